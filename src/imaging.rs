// src/imaging.rs
//
// Planar multi-channel image used by every stage of the pipeline.
// Pixels are stored as (channels, height, width) f64, RGB inputs in [0, 1].

use crate::preprocessing::{resize_bilinear, rgb_hwc_to_chw};
use anyhow::{Context, Result};
use ndarray::{Array2, Array3, Axis};
use std::path::Path;

/// Luminosity weights used for greyscale conversion.
const LUMINOSITY: [f64; 3] = [0.2989, 0.5870, 0.1140];

#[derive(Debug, Clone, PartialEq)]
pub struct MultiChannelImage {
    pub pixels: Array3<f64>,
}

impl MultiChannelImage {
    pub fn new(pixels: Array3<f64>) -> Self {
        Self { pixels }
    }

    pub fn from_channel(channel: Array2<f64>) -> Self {
        Self {
            pixels: channel.insert_axis(Axis(0)),
        }
    }

    /// Decode an image file into a 3-channel RGB image.
    pub fn open(path: &Path) -> Result<Self> {
        let rgb = image::open(path)
            .with_context(|| format!("Failed to decode image {}", path.display()))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::from_rgb8(rgb.as_raw(), width as usize, height as usize)
    }

    /// Build from interleaved RGB bytes.
    pub fn from_rgb8(data: &[u8], width: usize, height: usize) -> Result<Self> {
        let chw = rgb_hwc_to_chw(data, width, height)?;
        let pixels = Array3::from_shape_vec((3, height, width), chw)
            .context("RGB buffer does not match image dimensions")?;
        Ok(Self { pixels })
    }

    pub fn n_channels(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().2
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Single-channel luminosity image. Non-RGB inputs are averaged.
    pub fn as_greyscale(&self) -> Self {
        let (c, h, w) = self.pixels.dim();
        let grey = match c {
            1 => self.pixels.index_axis(Axis(0), 0).to_owned(),
            3 => {
                let mut acc = Array2::<f64>::zeros((h, w));
                for (ch, weight) in LUMINOSITY.iter().enumerate() {
                    acc.scaled_add(*weight, &self.pixels.index_axis(Axis(0), ch));
                }
                acc
            }
            _ => self
                .pixels
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array2::zeros((h, w))),
        };
        Self::from_channel(grey)
    }

    pub fn resize(&self, height: usize, width: usize) -> Result<Self> {
        if height == 0 || width == 0 {
            anyhow::bail!("Cannot resize to {}x{}", height, width);
        }
        if self.shape() == (height, width) {
            return Ok(self.clone());
        }
        Ok(Self {
            pixels: resize_bilinear(&self.pixels, height, width),
        })
    }

    pub fn rescale(&self, scale: f64) -> Result<Self> {
        let h = ((self.height() as f64) * scale).round().max(1.0) as usize;
        let w = ((self.width() as f64) * scale).round().max(1.0) as usize;
        self.resize(h, w)
    }

    /// Interleaved RGB bytes for the first three channels, clamped to [0, 1].
    /// Single-channel images are replicated.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let (c, h, w) = self.pixels.dim();
        let mut out = vec![0u8; h * w * 3];
        for y in 0..h {
            for x in 0..w {
                for k in 0..3 {
                    let src = if c >= 3 { k } else { 0 };
                    let v = self.pixels[[src, y, x]].clamp(0.0, 1.0);
                    out[(y * w + x) * 3 + k] = (v * 255.0).round() as u8;
                }
            }
        }
        out
    }
}

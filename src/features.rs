// src/features.rs
//
// Dense holistic features computed on the whole image before normalisation.
//
//   no_op    → pixels unchanged
//   hsi      → hue / saturation / intensity (3 channels, needs RGB)
//   rgb_hsi  → RGB ++ HSI                    (6 channels)
//   igo      → [cos θ, sin θ] of the gradient, per input channel
//   igo_hsi  → IGO of the greyscale image ++ HSI (5 channels)

use crate::imaging::MultiChannelImage;
use crate::types::FeatureKind;
use anyhow::Result;
use ndarray::{concatenate, Array2, Array3, ArrayView2, Axis};
use std::f64::consts::PI;

/// Small offset that keeps the HSI divisions finite.
const EPS: f64 = 1.0 / (1u64 << 50) as f64;

impl FeatureKind {
    pub fn apply(&self, image: &MultiChannelImage) -> Result<MultiChannelImage> {
        let pixels = match self {
            FeatureKind::NoOp => image.pixels.clone(),
            FeatureKind::Hsi => rgb2hsi(&image.pixels)?,
            FeatureKind::RgbHsi => rgb_hsi(&image.pixels)?,
            FeatureKind::Igo => igo(&image.pixels),
            FeatureKind::IgoHsi => igo_hsi(image)?,
        };
        Ok(MultiChannelImage::new(pixels))
    }

    /// Number of output channels for an input with `input_channels` channels.
    pub fn n_channels(&self, input_channels: usize) -> usize {
        match self {
            FeatureKind::NoOp => input_channels,
            FeatureKind::Hsi => 3,
            FeatureKind::RgbHsi => 6,
            FeatureKind::Igo => 2 * input_channels,
            FeatureKind::IgoHsi => 5,
        }
    }
}

/// Convert a 3-channel RGB array to HSI. Hue is scaled to [0, 1].
pub fn rgb2hsi(pixels: &Array3<f64>) -> Result<Array3<f64>> {
    let (c, h, w) = pixels.dim();
    if c != 3 {
        anyhow::bail!("HSI conversion needs 3 RGB channels, got {}", c);
    }

    let mut hsi = Array3::<f64>::zeros((3, h, w));

    for y in 0..h {
        for x in 0..w {
            let r = pixels[[0, y, x]];
            let g = pixels[[1, y, x]];
            let b = pixels[[2, y, x]];

            let num = 0.5 * ((r - g) + (r - b));
            let den = ((r - g).powi(2) + (r - b) * (g - b)).max(0.0).sqrt();
            let theta = (num / (den + EPS)).clamp(-1.0, 1.0).acos();

            let mut hue = if b > g { 2.0 * PI - theta } else { theta };
            hue /= 2.0 * PI;

            let mut sum = r + g + b;
            if sum == 0.0 {
                sum = EPS;
            }
            let sat = 1.0 - 3.0 * r.min(g).min(b) / sum;

            if sat == 0.0 {
                hue = 0.0;
            }

            hsi[[0, y, x]] = hue;
            hsi[[1, y, x]] = sat;
            hsi[[2, y, x]] = (r + g + b) / 3.0;
        }
    }

    Ok(hsi)
}

/// RGB channels followed by their HSI conversion.
pub fn rgb_hsi(pixels: &Array3<f64>) -> Result<Array3<f64>> {
    let hsi = rgb2hsi(pixels)?;
    Ok(concatenate(Axis(0), &[pixels.view(), hsi.view()])?)
}

/// Image gradient orientations: for every channel emit cos and sin of the
/// gradient angle.
pub fn igo(pixels: &Array3<f64>) -> Array3<f64> {
    let (c, h, w) = pixels.dim();
    let mut out = Array3::<f64>::zeros((2 * c, h, w));

    for ch in 0..c {
        let (gy, gx) = gradient(pixels.index_axis(Axis(0), ch));
        for y in 0..h {
            for x in 0..w {
                let theta = gy[[y, x]].atan2(gx[[y, x]]);
                out[[2 * ch, y, x]] = theta.cos();
                out[[2 * ch + 1, y, x]] = theta.sin();
            }
        }
    }

    out
}

/// IGO of the greyscale image followed by HSI.
pub fn igo_hsi(image: &MultiChannelImage) -> Result<Array3<f64>> {
    let hsi = rgb2hsi(&image.pixels)?;
    let igo_pixels = igo(&image.as_greyscale().pixels);
    Ok(concatenate(Axis(0), &[igo_pixels.view(), hsi.view()])?)
}

/// Central differences inside, one-sided differences at the borders.
/// Returns (d/dy, d/dx).
fn gradient(channel: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (h, w) = channel.dim();
    let mut gy = Array2::<f64>::zeros((h, w));
    let mut gx = Array2::<f64>::zeros((h, w));

    for y in 0..h {
        for x in 0..w {
            gy[[y, x]] = axis_diff(h, y, |i| channel[[i, x]]);
            gx[[y, x]] = axis_diff(w, x, |i| channel[[y, i]]);
        }
    }

    (gy, gx)
}

fn axis_diff(len: usize, i: usize, at: impl Fn(usize) -> f64) -> f64 {
    if len < 2 {
        0.0
    } else if i == 0 {
        at(1) - at(0)
    } else if i == len - 1 {
        at(len - 1) - at(len - 2)
    } else {
        (at(i + 1) - at(i - 1)) / 2.0
    }
}

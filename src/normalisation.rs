// src/normalisation.rs

use crate::imaging::MultiChannelImage;
use crate::types::NormalisationKind;
use anyhow::Result;
use ndarray::{Array1, Array2, Array3, Axis};
use std::f64::consts::PI;

/// Below this a channel is treated as flat and left at zero.
const FLAT_CHANNEL: f64 = 1e-12;

impl NormalisationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalisationKind::None => "none",
            NormalisationKind::Norm => "norm",
            NormalisationKind::Std => "std",
        }
    }

    pub fn apply(&self, pixels: &Array3<f64>) -> Array3<f64> {
        match self {
            NormalisationKind::None => pixels.clone(),
            NormalisationKind::Norm => normalise_norm(pixels),
            NormalisationKind::Std => normalise_std(pixels),
        }
    }
}

/// Per channel: subtract the mean and divide by the L2 norm.
pub fn normalise_norm(pixels: &Array3<f64>) -> Array3<f64> {
    normalise_with(pixels, |centred| centred.iter().map(|v| v * v).sum::<f64>().sqrt())
}

/// Per channel: subtract the mean and divide by the standard deviation.
pub fn normalise_std(pixels: &Array3<f64>) -> Array3<f64> {
    normalise_with(pixels, |centred| {
        let n = centred.len().max(1) as f64;
        (centred.iter().map(|v| v * v).sum::<f64>() / n).sqrt()
    })
}

fn normalise_with(pixels: &Array3<f64>, scale: impl Fn(&Array2<f64>) -> f64) -> Array3<f64> {
    let mut out = pixels.clone();
    for mut channel in out.axis_iter_mut(Axis(0)) {
        let mean = channel.mean().unwrap_or(0.0);
        channel.mapv_inplace(|v| v - mean);

        let s = scale(&channel.to_owned());
        if s > FLAT_CHANNEL {
            channel.mapv_inplace(|v| v / s);
        } else {
            channel.fill(0.0);
        }
    }
    out
}

/// Hann window of length `m`.
fn hanning(m: usize) -> Array1<f64> {
    if m == 1 {
        return Array1::from_elem(1, 1.0);
    }
    Array1::from_shape_fn(m, |n| 0.5 - 0.5 * (2.0 * PI * n as f64 / (m - 1) as f64).cos())
}

/// 2D cosine (Hann) window used to suppress patch borders.
pub fn create_cosine_mask(shape: (usize, usize)) -> Array2<f64> {
    let (h, w) = shape;
    let wy = hanning(h);
    let wx = hanning(w);
    Array2::from_shape_fn((h, w), |(y, x)| wy[y] * wx[x])
}

/// Normalise every channel and optionally weight it by `mask`.
pub fn image_normalisation(
    image: &MultiChannelImage,
    normalisation: NormalisationKind,
    mask: Option<&Array2<f64>>,
) -> Result<MultiChannelImage> {
    let mut pixels = normalisation.apply(&image.pixels);

    if let Some(mask) = mask {
        if mask.dim() != image.shape() {
            anyhow::bail!(
                "Cosine mask shape {:?} does not match image shape {:?}",
                mask.dim(),
                image.shape()
            );
        }
        for mut channel in pixels.axis_iter_mut(Axis(0)) {
            channel *= mask;
        }
    }

    Ok(MultiChannelImage::new(pixels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Array3<f64> {
        Array3::from_shape_fn((2, 4, 5), |(c, y, x)| (c * 7 + y * 3 + x) as f64 * 0.1)
    }

    #[test]
    fn test_norm_gives_zero_mean_unit_norm() {
        let out = normalise_norm(&sample());
        for channel in out.axis_iter(Axis(0)) {
            assert!(channel.mean().unwrap().abs() < 1e-12);
            let norm: f64 = channel.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_std_gives_unit_std() {
        let out = normalise_std(&sample());
        for channel in out.axis_iter(Axis(0)) {
            let n = channel.len() as f64;
            let var: f64 = channel.iter().map(|v| v * v).sum::<f64>() / n;
            assert!((var - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_flat_channel_stays_zero() {
        let flat = Array3::from_elem((1, 3, 3), 0.7);
        let out = normalise_norm(&flat);
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cosine_mask() {
        let mask = create_cosine_mask((5, 7));
        assert_eq!(mask.dim(), (5, 7));
        assert_eq!(mask[[0, 0]], 0.0);
        assert!((mask[[2, 3]] - 1.0).abs() < 1e-12);

        let single = create_cosine_mask((1, 1));
        assert_eq!(single[[0, 0]], 1.0);
    }

    #[test]
    fn test_image_normalisation_rejects_mask_mismatch() {
        let image = MultiChannelImage::new(sample());
        let mask = create_cosine_mask((3, 3));
        assert!(image_normalisation(&image, NormalisationKind::Norm, Some(&mask)).is_err());

        let mask = create_cosine_mask((4, 5));
        let out = image_normalisation(&image, NormalisationKind::Norm, Some(&mask)).unwrap();
        // Borders are zeroed by the Hann window
        assert!(out.pixels.slice(ndarray::s![.., 0, ..]).iter().all(|v| *v == 0.0));
    }
}

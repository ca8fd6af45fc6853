// src/correlation_filter/response.rs

use anyhow::Result;
use ndarray::Array2;
use std::f64::consts::PI;

/// Desired correlation output: an isotropic Gaussian pdf centred at
/// (h / 2, w / 2) with covariance `cov * I`.
pub fn gaussian_response(shape: (usize, usize), cov: f64) -> Result<Array2<f64>> {
    if cov <= 0.0 {
        anyhow::bail!("Response covariance must be positive, got {}", cov);
    }
    let (h, w) = shape;
    let (cy, cx) = ((h / 2) as f64, (w / 2) as f64);
    let norm = 1.0 / (2.0 * PI * cov);

    Ok(Array2::from_shape_fn((h, w), |(y, x)| {
        let dy = y as f64 - cy;
        let dx = x as f64 - cx;
        norm * (-(dy * dy + dx * dx) / (2.0 * cov)).exp()
    }))
}

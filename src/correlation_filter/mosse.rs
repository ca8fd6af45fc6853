// src/correlation_filter/mosse.rs
//
// Minimum Output Sum of Squared Errors filter (Bolme et al., CVPR 2010).
// Each channel is solved independently in the Fourier domain:
//
//   F_c = Σ conj(X_c) ⊙ Y / (Σ conj(X_c) ⊙ X_c + λ)
//
// Training patches are zero padded: mirrored copies of the object inside the
// circular window would push filter energy outside the cropped support.

use super::fft::{channel_spectra, fft2, pad, to_complex};
use super::{log_progress, spatial_filter};
use crate::types::Boundary;
use anyhow::Result;
use ndarray::{Array2, Array3};
use rustfft::num_complex::Complex64;

pub fn train_mosse(
    images: &[Array3<f64>],
    desired_response: &Array2<f64>,
    l: f64,
    verbose: bool,
) -> Result<Array3<f64>> {
    let (k, hx, wx) = super::check_training_set(images)?;
    let (hy, wy) = desired_response.dim();
    let ext = (hx + hy - 1, wx + wy - 1);

    let fft_y = fft2(&to_complex(&pad(desired_response.view(), ext, Boundary::Constant)));

    let mut sxx = Array3::<Complex64>::zeros((k, ext.0, ext.1));
    let mut sxy = Array3::<Complex64>::zeros((k, ext.0, ext.1));

    for (n, x) in images.iter().enumerate() {
        let fx = channel_spectra(x, ext, Boundary::Constant);
        for c in 0..k {
            for i in 0..ext.0 {
                for j in 0..ext.1 {
                    let xc = fx[[c, i, j]];
                    sxx[[c, i, j]] += xc.conj() * xc;
                    sxy[[c, i, j]] += xc.conj() * fft_y[[i, j]];
                }
            }
        }
        log_progress("Training MOSSE filter", n + 1, images.len(), verbose);
    }

    let fft_f = Array3::from_shape_fn((k, ext.0, ext.1), |(c, i, j)| {
        let den = sxx[[c, i, j]] + l;
        if den.norm() > 0.0 {
            sxy[[c, i, j]] / den
        } else {
            Complex64::new(0.0, 0.0)
        }
    });

    Ok(spatial_filter(&fft_f, (hy, wy)))
}

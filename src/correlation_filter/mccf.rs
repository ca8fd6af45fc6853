// src/correlation_filter/mccf.rs
//
// Multi-Channel Correlation Filter (Galoogahi, Sim & Lucey, ICCV 2013).
// Channels are coupled: at every frequency solve the k x k system
//
//   (Σ conj(x) xᵀ + λI) f = Σ conj(x) Y

use super::fft::{channel_spectra, fft2, pad, to_complex};
use super::{log_progress, spatial_filter};
use crate::types::Boundary;
use anyhow::Result;
use ndarray::{Array2, Array3, Array4};
use rustfft::num_complex::Complex64;

pub fn train_mccf(
    images: &[Array3<f64>],
    desired_response: &Array2<f64>,
    l: f64,
    verbose: bool,
) -> Result<Array3<f64>> {
    let (k, hx, wx) = super::check_training_set(images)?;
    let (hy, wy) = desired_response.dim();
    let ext = (hx + hy - 1, wx + wy - 1);

    let fft_y = fft2(&to_complex(&pad(desired_response.view(), ext, Boundary::Constant)));

    let mut sxx = Array4::<Complex64>::zeros((k, k, ext.0, ext.1));
    let mut sxy = Array3::<Complex64>::zeros((k, ext.0, ext.1));

    for (n, x) in images.iter().enumerate() {
        let fx = channel_spectra(x, ext, Boundary::Constant);
        for i in 0..ext.0 {
            for j in 0..ext.1 {
                for a in 0..k {
                    let ca = fx[[a, i, j]].conj();
                    sxy[[a, i, j]] += ca * fft_y[[i, j]];
                    for b in 0..k {
                        sxx[[a, b, i, j]] += ca * fx[[b, i, j]];
                    }
                }
            }
        }
        log_progress("Training MCCF filter", n + 1, images.len(), verbose);
    }

    let mut fft_f = Array3::<Complex64>::zeros((k, ext.0, ext.1));
    let mut system = vec![Complex64::new(0.0, 0.0); k * k];
    let mut rhs = vec![Complex64::new(0.0, 0.0); k];

    for i in 0..ext.0 {
        for j in 0..ext.1 {
            for a in 0..k {
                rhs[a] = sxy[[a, i, j]];
                for b in 0..k {
                    system[a * k + b] = sxx[[a, b, i, j]];
                }
                system[a * k + a] += l;
            }

            let solution = solve(&mut system, &mut rhs, k).ok_or_else(|| {
                anyhow::anyhow!(
                    "MCCF system is singular at frequency ({}, {}); increase the regularisation",
                    i,
                    j
                )
            })?;
            for a in 0..k {
                fft_f[[a, i, j]] = solution[a];
            }
        }
    }

    Ok(spatial_filter(&fft_f, (hy, wy)))
}

/// Gaussian elimination with partial pivoting on a row-major k x k system.
/// Overwrites both inputs. Returns `None` when a pivot vanishes.
fn solve(a: &mut [Complex64], b: &mut [Complex64], k: usize) -> Option<Vec<Complex64>> {
    const PIVOT_EPS: f64 = 1e-300;

    for col in 0..k {
        let pivot_row = (col..k).max_by(|&r1, &r2| {
            a[r1 * k + col]
                .norm()
                .partial_cmp(&a[r2 * k + col].norm())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot_row * k + col].norm() < PIVOT_EPS {
            return None;
        }
        if pivot_row != col {
            for c in 0..k {
                a.swap(col * k + c, pivot_row * k + c);
            }
            b.swap(col, pivot_row);
        }

        let pivot = a[col * k + col];
        for row in (col + 1)..k {
            let factor = a[row * k + col] / pivot;
            if factor.norm() == 0.0 {
                continue;
            }
            for c in col..k {
                let upper = a[col * k + c];
                a[row * k + c] -= factor * upper;
            }
            let upper_b = b[col];
            b[row] -= factor * upper_b;
        }
    }

    let mut x = vec![Complex64::new(0.0, 0.0); k];
    for row in (0..k).rev() {
        let mut acc = b[row];
        for c in (row + 1)..k {
            acc -= a[row * k + c] * x[c];
        }
        x[row] = acc / a[row * k + row];
    }
    Some(x)
}

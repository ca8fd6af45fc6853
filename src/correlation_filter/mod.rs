// src/correlation_filter/mod.rs
//
// Multi-channel correlation filters learned in the Fourier domain.
//
// Training (per image x, desired Gaussian response y):
//   zero pad x and y to (hx + hy - 1, wx + wy - 1) → FFT → accumulate spectral
//   energies → solve for F → IFFT → fftshift → centre crop to y's shape.
//
// The resulting spatial filter is a convolution kernel whose origin sits
// at (h / 2, w / 2): convolving an image with it and summing over channels
// gives a response map that peaks at the centre of the trained object.
// The boundary mode only decides how a test image is extended past its
// borders.

mod fft;
mod mccf;
mod mosse;
mod response;

use fft::{crop, fft2, fftshift, ifft2, pad, to_complex};
use mccf::train_mccf;
use mosse::train_mosse;
use response::gaussian_response;

use crate::types::{Boundary, FilterKind};
use anyhow::Result;
use ndarray::{s, Array2, Array3, Axis};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct FilterParams {
    pub kind: FilterKind,
    pub filter_shape: (usize, usize),
    pub response_covariance: f64,
    pub regularisation: f64,
    pub boundary: Boundary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationFilter {
    pub kind: FilterKind,
    /// Spatial filter, (channels, height, width)
    pub filter: Array3<f64>,
    pub desired_response: Array2<f64>,
    pub response_covariance: f64,
    pub regularisation: f64,
    pub boundary: Boundary,
    pub n_training_images: usize,
}

impl CorrelationFilter {
    /// Train a filter from normalised training patches of identical shape.
    pub fn train(images: &[Array3<f64>], params: &FilterParams, verbose: bool) -> Result<Self> {
        if params.filter_shape.0 == 0 || params.filter_shape.1 == 0 {
            anyhow::bail!("Filter shape must be non-zero, got {:?}", params.filter_shape);
        }
        if params.regularisation < 0.0 {
            anyhow::bail!(
                "Regularisation must be non-negative, got {}",
                params.regularisation
            );
        }

        let desired_response =
            gaussian_response(params.filter_shape, params.response_covariance)?;

        let filter = match params.kind {
            FilterKind::Mosse => train_mosse(
                images,
                &desired_response,
                params.regularisation,
                verbose,
            )?,
            FilterKind::Mccf => train_mccf(
                images,
                &desired_response,
                params.regularisation,
                verbose,
            )?,
        };

        debug!(
            "Trained {} filter {:?} from {} images",
            params.kind.as_str(),
            filter.dim(),
            images.len()
        );

        Ok(Self {
            kind: params.kind,
            filter,
            desired_response,
            response_covariance: params.response_covariance,
            regularisation: params.regularisation,
            boundary: params.boundary,
            n_training_images: images.len(),
        })
    }

    /// Reject filters that cannot be applied, e.g. from a hand-edited model.
    pub fn validate(&self) -> Result<()> {
        let (k, h, w) = self.filter.dim();
        if k == 0 || h == 0 || w == 0 {
            anyhow::bail!("Filter must be non-empty, got shape {:?}", self.filter.dim());
        }
        if self.desired_response.dim() != (h, w) {
            anyhow::bail!(
                "Desired response shape {:?} does not match filter shape {:?}",
                self.desired_response.dim(),
                (h, w)
            );
        }
        if self.filter.iter().any(|v| !v.is_finite()) {
            anyhow::bail!("Filter contains non-finite values");
        }
        Ok(())
    }

    /// (height, width) of the spatial filter.
    pub fn filter_shape(&self) -> (usize, usize) {
        let (_, h, w) = self.filter.dim();
        (h, w)
    }

    pub fn n_channels(&self) -> usize {
        self.filter.dim().0
    }

    /// Convolve every channel of `pixels` with the matching filter channel
    /// and sum. The output has the same height and width as the input.
    pub fn response(&self, pixels: &Array3<f64>) -> Result<Array2<f64>> {
        let (k, h, w) = self.filter.dim();
        let (c, ih, iw) = pixels.dim();
        if h == 0 || w == 0 {
            anyhow::bail!("Cannot correlate with an empty filter");
        }
        if c != k {
            anyhow::bail!("Filter has {} channels but the image has {}", k, c);
        }
        if ih == 0 || iw == 0 {
            anyhow::bail!("Cannot correlate an empty image");
        }

        let ext = (ih + h - 1, iw + w - 1);
        let mut acc = Array2::<Complex64>::zeros(ext);

        for ch in 0..k {
            let fz = fft2(&to_complex(&pad(
                pixels.index_axis(Axis(0), ch),
                ext,
                self.boundary,
            )));

            let mut kernel = Array2::<f64>::zeros(ext);
            kernel
                .slice_mut(s![..h, ..w])
                .assign(&self.filter.index_axis(Axis(0), ch));
            let fk = fft2(&to_complex(&kernel));

            acc += &(fz * fk);
        }

        let full = ifft2(&acc);
        Ok(full
            .slice(s![h - 1..h - 1 + ih, w - 1..w - 1 + iw])
            .mapv(|v| v.re))
    }

    /// Magnitude spectrum of every filter channel, zero frequency centred.
    pub fn frequency_magnitude(&self) -> Array3<f64> {
        let (k, h, w) = self.filter.dim();
        let mut out = Array3::<f64>::zeros((k, h, w));
        for (c, channel) in self.filter.axis_iter(Axis(0)).enumerate() {
            let spectrum = fftshift(&fft2(&to_complex(&channel.to_owned())));
            out.index_axis_mut(Axis(0), c)
                .assign(&spectrum.mapv(|v| v.norm()));
        }
        out
    }
}

impl fmt::Display for CorrelationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, w) = self.filter_shape();
        write!(
            f,
            "Correlation Filter\n - {}\n - Shape: {}x{}\n - Response covariance: {}\n - Regularization parameter: {}\n - Boundary: {}\n - {} training samples",
            self.kind.method_name(),
            h,
            w,
            self.response_covariance,
            self.regularisation,
            self.boundary,
            self.n_training_images
        )
    }
}

/// Validate that all training images share one (channels, height, width).
pub(crate) fn check_training_set(images: &[Array3<f64>]) -> Result<(usize, usize, usize)> {
    let first = images
        .first()
        .ok_or_else(|| anyhow::anyhow!("Cannot train a correlation filter without images"))?;
    let dim = first.dim();
    if dim.0 == 0 || dim.1 == 0 || dim.2 == 0 {
        anyhow::bail!("Training images must be non-empty, got shape {:?}", dim);
    }
    if let Some((idx, bad)) = images.iter().enumerate().find(|(_, im)| im.dim() != dim) {
        anyhow::bail!(
            "Training image {} has shape {:?}, expected {:?}",
            idx,
            bad.dim(),
            dim
        );
    }
    Ok(dim)
}

/// Real part of the inverse FFT of every channel, origin moved to the
/// centre, cropped to `shape`.
pub(crate) fn spatial_filter(fft_f: &Array3<Complex64>, shape: (usize, usize)) -> Array3<f64> {
    let k = fft_f.dim().0;
    let mut out = Array3::<f64>::zeros((k, shape.0, shape.1));
    for (c, channel) in fft_f.axis_iter(Axis(0)).enumerate() {
        let spatial = ifft2(&channel.to_owned()).mapv(|v| v.re);
        let centred = fftshift(&spatial);
        out.index_axis_mut(Axis(0), c)
            .assign(&crop(centred.view(), shape));
    }
    out
}

/// Log coarse progress (every 10%) when `verbose` is set.
pub fn log_progress(prefix: &str, done: usize, total: usize, verbose: bool) {
    if !verbose || total == 0 {
        return;
    }
    let step = (total / 10).max(1);
    if done % step == 0 || done == total {
        info!(
            "{}: {}/{} ({:.0}%)",
            prefix,
            done,
            total,
            100.0 * done as f64 / total as f64
        );
    }
}

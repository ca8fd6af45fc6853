// src/correlation_filter/fft.rs
//
// 2D FFT helpers and the padding/cropping conventions shared by training
// and detection. Padding always centres the signal: the leading margin is
// (ext - n) / 2 and the trailing margin takes the remainder.

use crate::types::Boundary;
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

pub fn to_complex(real: &Array2<f64>) -> Array2<Complex64> {
    real.mapv(|v| Complex64::new(v, 0.0))
}

pub fn fft2(input: &Array2<Complex64>) -> Array2<Complex64> {
    transform(input, false)
}

/// Inverse 2D FFT, normalised by 1 / (h * w).
pub fn ifft2(input: &Array2<Complex64>) -> Array2<Complex64> {
    transform(input, true)
}

fn transform(input: &Array2<Complex64>, inverse: bool) -> Array2<Complex64> {
    let (h, w) = input.dim();
    let mut out = input.clone();
    if h == 0 || w == 0 {
        return out;
    }

    let mut planner = FftPlanner::<f64>::new();
    let (row_fft, col_fft) = if inverse {
        (planner.plan_fft_inverse(w), planner.plan_fft_inverse(h))
    } else {
        (planner.plan_fft_forward(w), planner.plan_fft_forward(h))
    };

    let mut buf = vec![Complex64::new(0.0, 0.0); w];
    for mut row in out.rows_mut() {
        for (b, v) in buf.iter_mut().zip(row.iter()) {
            *b = *v;
        }
        row_fft.process(&mut buf);
        for (v, b) in row.iter_mut().zip(buf.iter()) {
            *v = *b;
        }
    }

    let mut buf = vec![Complex64::new(0.0, 0.0); h];
    for mut col in out.columns_mut() {
        for (b, v) in buf.iter_mut().zip(col.iter()) {
            *b = *v;
        }
        col_fft.process(&mut buf);
        for (v, b) in col.iter_mut().zip(buf.iter()) {
            *v = *b;
        }
    }

    if inverse {
        let scale = 1.0 / (h * w) as f64;
        out.mapv_inplace(|v| v * scale);
    }

    out
}

/// Move the zero-frequency / zero-lag sample from index 0 to index n / 2.
pub fn fftshift<T: Clone>(input: &Array2<T>) -> Array2<T> {
    let (h, w) = input.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        input[[(y + h - h / 2) % h, (x + w - w / 2) % w]].clone()
    })
}

fn symmetric_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Centre `x` inside an array of `ext` shape, filling the margins according
/// to `boundary`.
pub fn pad(x: ArrayView2<f64>, ext: (usize, usize), boundary: Boundary) -> Array2<f64> {
    let (h, w) = x.dim();
    let top = (ext.0.saturating_sub(h) / 2) as isize;
    let left = (ext.1.saturating_sub(w) / 2) as isize;

    Array2::from_shape_fn(ext, |(y, xx)| {
        let sy = y as isize - top;
        let sx = xx as isize - left;
        let inside = sy >= 0 && sx >= 0 && (sy as usize) < h && (sx as usize) < w;
        match boundary {
            _ if inside => x[[sy as usize, sx as usize]],
            Boundary::Constant => 0.0,
            Boundary::Symmetric => x[[symmetric_index(sy, h), symmetric_index(sx, w)]],
        }
    })
}

/// Centre crop to `shape`.
pub fn crop(x: ArrayView2<f64>, shape: (usize, usize)) -> Array2<f64> {
    let (h, w) = x.dim();
    let top = h.saturating_sub(shape.0) / 2;
    let left = w.saturating_sub(shape.1) / 2;
    x.slice(s![top..top + shape.0.min(h), left..left + shape.1.min(w)])
        .to_owned()
}

/// FFT of every channel of `x` after padding it to `ext`.
pub fn channel_spectra(x: &Array3<f64>, ext: (usize, usize), boundary: Boundary) -> Array3<Complex64> {
    let k = x.dim().0;
    let mut out = Array3::<Complex64>::zeros((k, ext.0, ext.1));
    for (c, channel) in x.axis_iter(Axis(0)).enumerate() {
        let spectrum = fft2(&to_complex(&pad(channel, ext, boundary)));
        out.index_axis_mut(Axis(0), c).assign(&spectrum);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fft_round_trip() {
        let x = Array2::from_shape_fn((5, 6), |(y, x)| (y * 6 + x) as f64 * 0.25 - 1.0);
        let back = ifft2(&fft2(&to_complex(&x)));
        for (a, b) in back.iter().zip(x.iter()) {
            assert!((a.re - b).abs() < 1e-10);
            assert!(a.im.abs() < 1e-10);
        }
    }

    #[test]
    fn test_fft_of_delta_is_flat() {
        let mut x = Array2::<f64>::zeros((4, 4));
        x[[0, 0]] = 1.0;
        let spectrum = fft2(&to_complex(&x));
        assert!(spectrum.iter().all(|v| (v.re - 1.0).abs() < 1e-12 && v.im.abs() < 1e-12));
    }

    #[test]
    fn test_fftshift_moves_origin_to_centre() {
        let mut x = Array2::<i32>::zeros((5, 4));
        x[[0, 0]] = 1;
        let shifted = fftshift(&x);
        assert_eq!(shifted[[2, 2]], 1);
    }

    #[test]
    fn test_symmetric_padding() {
        let x = array![[1.0, 2.0, 3.0]];
        let padded = pad(x.view(), (1, 7), Boundary::Symmetric);
        assert_eq!(padded, array![[2.0, 1.0, 1.0, 2.0, 3.0, 3.0, 2.0]]);

        let padded = pad(x.view(), (1, 6), Boundary::Constant);
        assert_eq!(padded, array![[0.0, 1.0, 2.0, 3.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_symmetric_padding_wider_than_signal() {
        let x = array![[1.0, 2.0]];
        let padded = pad(x.view(), (1, 8), Boundary::Symmetric);
        // [1 2] mirrored periodically: ... 2 2 1 | 1 2 | 2 1 1 ...
        assert_eq!(padded, array![[2.0, 2.0, 1.0, 1.0, 2.0, 2.0, 1.0, 1.0]]);
    }

    #[test]
    fn test_crop_inverts_pad() {
        let x = Array2::from_shape_fn((3, 4), |(y, x)| (y * 4 + x) as f64);
        let padded = pad(x.view(), (8, 9), Boundary::Symmetric);
        assert_eq!(crop(padded.view(), (3, 4)), x);
    }
}

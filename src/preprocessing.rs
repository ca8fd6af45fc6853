// src/preprocessing.rs

use anyhow::Result;
use ndarray::Array3;

/// Convert interleaved RGB bytes (HWC) into planar f64 (CHW) in [0, 1]
pub fn rgb_hwc_to_chw(src: &[u8], width: usize, height: usize) -> Result<Vec<f64>> {
    let expected_len = width * height * 3;
    if src.len() < expected_len {
        anyhow::bail!(
            "RGB buffer too small: {} bytes for {}x{}",
            src.len(),
            width,
            height
        );
    }

    let mut output = vec![0.0f64; expected_len];

    for c in 0..3 {
        for h in 0..height {
            for w in 0..width {
                let hwc_idx = (h * width + w) * 3 + c;
                let chw_idx = c * height * width + h * width + w;

                output[chw_idx] = src[hwc_idx] as f64 / 255.0;
            }
        }
    }

    Ok(output)
}

/// Bilinear resize of every channel of a planar image
pub fn resize_bilinear(src: &Array3<f64>, dst_h: usize, dst_w: usize) -> Array3<f64> {
    let (channels, src_h, src_w) = src.dim();
    let mut dst = Array3::<f64>::zeros((channels, dst_h, dst_w));

    if src_h == 0 || src_w == 0 {
        return dst;
    }

    let x_ratio = src_w as f64 / dst_w as f64;
    let y_ratio = src_h as f64 / dst_h as f64;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            // Sample at pixel centres so that down-scaling stays centred
            let sx = ((dx as f64 + 0.5) * x_ratio - 0.5).max(0.0);
            let sy = ((dy as f64 + 0.5) * y_ratio - 0.5).max(0.0);

            let sx0 = (sx.floor() as usize).min(src_w - 1);
            let sy0 = (sy.floor() as usize).min(src_h - 1);
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);

            let fx = sx - sx0 as f64;
            let fy = sy - sy0 as f64;

            for c in 0..channels {
                let p00 = src[[c, sy0, sx0]];
                let p10 = src[[c, sy0, sx1]];
                let p01 = src[[c, sy1, sx0]];
                let p11 = src[[c, sy1, sx1]];

                dst[[c, dy, dx]] = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;
            }
        }
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hwc_to_chw() {
        let src = vec![128u8; 64 * 48 * 3];
        let result = rgb_hwc_to_chw(&src, 64, 48);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 3 * 48 * 64);
    }

    #[test]
    fn test_hwc_to_chw_short_buffer() {
        let src = vec![0u8; 10];
        assert!(rgb_hwc_to_chw(&src, 4, 4).is_err());
    }

    #[test]
    fn test_resize() {
        let src = Array3::<f64>::from_elem((3, 100, 100), 0.5);
        let dst = resize_bilinear(&src, 50, 40);
        assert_eq!(dst.dim(), (3, 50, 40));
        assert!(dst.iter().all(|v| (v - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_resize_upscale_interpolates() {
        let mut src = Array3::<f64>::zeros((1, 1, 2));
        src[[0, 0, 1]] = 1.0;
        let dst = resize_bilinear(&src, 1, 4);
        // Values must be monotone from left to right
        for x in 1..4 {
            assert!(dst[[0, 0, x]] >= dst[[0, 0, x - 1]]);
        }
        assert_eq!(dst[[0, 0, 0]], 0.0);
        assert_eq!(dst[[0, 0, 3]], 1.0);
    }
}

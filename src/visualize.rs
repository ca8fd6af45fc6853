// src/visualize.rs
//
// PNG renderings of trained filters, response maps and detections.
// Every channel is min-max scaled independently before colour mapping.

use crate::detector::Detector;
use crate::imaging::MultiChannelImage;
use crate::types::{Colormap, Detection};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use ndarray::{Array2, Array3, Axis};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Gap between tiled channels, in output pixels.
const TILE_GAP: u32 = 2;

const LABEL_PALETTE: [[u8; 3]; 8] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
];

impl Colormap {
    /// Map `t` in [0, 1] to RGB.
    pub fn map(&self, t: f64) -> [u8; 3] {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let (r, g, b) = match self {
            Colormap::Gray => (t, t, t),
            Colormap::Afmhot => (2.0 * t, 2.0 * t - 0.5, 2.0 * t - 1.0),
            Colormap::Jet => (
                1.5 - (4.0 * t - 3.0).abs(),
                1.5 - (4.0 * t - 2.0).abs(),
                1.5 - (4.0 * t - 1.0).abs(),
            ),
        };
        [to_u8(r), to_u8(g), to_u8(b)]
    }
}

fn to_u8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Integer zoom that brings small filters to a viewable size.
fn auto_zoom(h: usize, w: usize) -> u32 {
    let side = h.max(w).max(1);
    (128 / side).clamp(1, 8) as u32
}

/// Render a single map, min-max scaled.
pub fn render_map(map: &Array2<f64>, colormap: Colormap) -> RgbImage {
    let (h, w) = map.dim();
    let zoom = auto_zoom(h, w);
    let mut img = RgbImage::new(w as u32 * zoom, h as u32 * zoom);
    paint_map(&mut img, map, colormap, 0, zoom);
    img
}

/// Render every channel side by side.
pub fn render_channels(data: &Array3<f64>, colormap: Colormap) -> RgbImage {
    let (k, h, w) = data.dim();
    let zoom = auto_zoom(h, w);
    let tile_w = w as u32 * zoom;
    let total_w = k as u32 * tile_w + k.saturating_sub(1) as u32 * TILE_GAP;
    let mut img = RgbImage::new(total_w.max(1), (h as u32 * zoom).max(1));

    for (c, channel) in data.axis_iter(Axis(0)).enumerate() {
        let x0 = c as u32 * (tile_w + TILE_GAP);
        paint_map(&mut img, &channel.to_owned(), colormap, x0, zoom);
    }
    img
}

fn paint_map(img: &mut RgbImage, map: &Array2<f64>, colormap: Colormap, x0: u32, zoom: u32) {
    let (lo, hi) = map
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let range = if hi > lo { hi - lo } else { 1.0 };

    for ((y, x), v) in map.indexed_iter() {
        let t = if hi > lo { (v - lo) / range } else { 0.0 };
        let px = Rgb(colormap.map(t));
        for dy in 0..zoom {
            for dx in 0..zoom {
                img.put_pixel(x0 + x as u32 * zoom + dx, y as u32 * zoom + dy, px);
            }
        }
    }
}

pub fn save_png(img: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    img.save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Write the spatial filter, its magnitude spectrum and the desired
/// Gaussian response of `detector` into `out_dir`.
pub fn render_detector(
    detector: &Detector,
    label: &str,
    out_dir: &Path,
    colormap: Colormap,
) -> Result<Vec<PathBuf>> {
    let stem = sanitize(label);

    let spatial = out_dir.join(format!("{}_spatial.png", stem));
    save_png(&render_channels(&detector.model.filter, colormap), &spatial)?;

    let log_magnitude = detector.model.frequency_magnitude().mapv(f64::ln_1p);
    let frequency = out_dir.join(format!("{}_frequency.png", stem));
    save_png(&render_channels(&log_magnitude, colormap), &frequency)?;

    let gaussian = out_dir.join(format!("{}_gaussian.png", stem));
    save_png(
        &render_map(&detector.model.desired_response, Colormap::Jet),
        &gaussian,
    )?;

    Ok(vec![spatial, frequency, gaussian])
}

/// Response map of `detector` over a whole image at scale 1.
pub fn render_response_map(
    detector: &Detector,
    image: &MultiChannelImage,
    colormap: Colormap,
) -> Result<RgbImage> {
    let response = detector.response_map(image)?;
    Ok(render_map(&response, colormap))
}

/// Colour for `label`, stable across runs.
pub fn label_colour(label: &str) -> Rgb<u8> {
    let idx = label.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    Rgb(LABEL_PALETTE[idx % LABEL_PALETTE.len()])
}

/// Draw detection rectangles (2 px outline) over the image.
pub fn draw_detections(image: &MultiChannelImage, detections: &[Detection]) -> Result<RgbImage> {
    let (h, w) = image.shape();
    let mut canvas = RgbImage::from_raw(w as u32, h as u32, image.to_rgb8())
        .context("RGB buffer does not match image dimensions")?;

    for det in detections {
        let colour = label_colour(&det.label);
        let x1 = det.bbox[0].round() as i32;
        let y1 = det.bbox[1].round() as i32;
        let x2 = det.bbox[2].round() as i32;
        let y2 = det.bbox[3].round() as i32;

        for inset in 0..2 {
            let bw = x2 - x1 + 1 - 2 * inset;
            let bh = y2 - y1 + 1 - 2 * inset;
            if bw <= 0 || bh <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(&mut canvas, rect, colour);
        }
    }

    Ok(canvas)
}

pub fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_filter::FilterParams;
    use crate::detector::DetectorParams;
    use crate::types::{Boundary, FeatureKind, FilterKind, NormalisationKind};

    fn blob_detector() -> Detector {
        let crop = MultiChannelImage::new(Array3::from_shape_fn((1, 16, 16), |(_, y, x)| {
            let d2 = (y as f64 - 8.0).powi(2) + (x as f64 - 8.0).powi(2);
            (-d2 / 4.0).exp()
        }));
        let params = DetectorParams {
            filter: FilterParams {
                kind: FilterKind::Mosse,
                filter_shape: (16, 16),
                response_covariance: 2.0,
                regularisation: 0.01,
                boundary: Boundary::Symmetric,
            },
            features: FeatureKind::NoOp,
            normalisation: NormalisationKind::Norm,
            cosine_mask: false,
            verbose: false,
        };
        Detector::train(&[crop], &params).unwrap()
    }

    #[test]
    fn test_render_detector_writes_three_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("renders");
        let files = render_detector(&blob_detector(), "stop sign", &out, Colormap::Afmhot).unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["stop_sign_spatial.png", "stop_sign_frequency.png", "stop_sign_gaussian.png"]
        );
        for path in &files {
            let img = image::open(path).unwrap();
            // 16x16 filter, zoom 128 / 16 = 8
            assert_eq!((img.width(), img.height()), (128, 128));
        }
    }

    #[test]
    fn test_render_response_map_size() {
        let scene = MultiChannelImage::new(Array3::from_elem((1, 40, 40), 0.3));
        let img = render_response_map(&blob_detector(), &scene, Colormap::Jet).unwrap();
        // zoom 128 / 40 = 3
        assert_eq!((img.width(), img.height()), (120, 120));

        let rgb = MultiChannelImage::new(Array3::zeros((3, 40, 40)));
        assert!(render_response_map(&blob_detector(), &rgb, Colormap::Jet).is_err());
    }

    #[test]
    fn test_draw_detections_clips_partial_boxes() {
        let image = MultiChannelImage::new(Array3::zeros((3, 20, 20)));
        let det = Detection {
            bbox: [-5.0, 12.0, 8.0, 30.0],
            label: "yield".to_string(),
            peak: 1.0,
            psr: 10.0,
            scale: 1.0,
        };
        let canvas = draw_detections(&image, &[det]).unwrap();
        let colour = label_colour("yield");
        assert_eq!(*canvas.get_pixel(8, 15), colour);
        assert_eq!(*canvas.get_pixel(3, 12), colour);
        assert_eq!(*canvas.get_pixel(3, 15), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_colormap_endpoints() {
        assert_eq!(Colormap::Gray.map(0.0), [0, 0, 0]);
        assert_eq!(Colormap::Gray.map(1.0), [255, 255, 255]);
        assert_eq!(Colormap::Afmhot.map(1.0), [255, 255, 255]);
        assert_eq!(Colormap::Afmhot.map(0.0), [0, 0, 0]);
        // jet: dark blue at 0, dark red at 1
        assert_eq!(Colormap::Jet.map(0.0), [0, 0, 128]);
        assert_eq!(Colormap::Jet.map(1.0), [128, 0, 0]);
        assert_eq!(Colormap::Jet.map(f64::NAN), Colormap::Jet.map(0.0));
    }

    #[test]
    fn test_render_channels_tiles_horizontally() {
        let data = Array3::from_shape_fn((3, 32, 16), |(c, y, x)| (c + y + x) as f64);
        let img = render_channels(&data, Colormap::Afmhot);
        // zoom = 128 / 32 = 4
        assert_eq!(img.height(), 32 * 4);
        assert_eq!(img.width(), 3 * 16 * 4 + 2 * TILE_GAP);
    }

    #[test]
    fn test_render_constant_map() {
        let map = Array2::<f64>::from_elem((4, 4), 3.0);
        let img = render_map(&map, Colormap::Gray);
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_draw_detections_outlines_box() {
        let image = MultiChannelImage::new(Array3::zeros((3, 20, 20)));
        let det = Detection {
            bbox: [5.0, 5.0, 15.0, 15.0],
            label: "stop".to_string(),
            peak: 1.0,
            psr: 10.0,
            scale: 1.0,
        };
        let canvas = draw_detections(&image, &[det]).unwrap();
        let colour = label_colour("stop");
        assert_eq!(*canvas.get_pixel(5, 5), colour);
        assert_eq!(*canvas.get_pixel(15, 10), colour);
        assert_eq!(*canvas.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize("speed limit/50"), "speed_limit_50");
    }
}

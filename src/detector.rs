// src/detector.rs
//
// Single-class correlation filter detector.
//
// Training:  crop → resize to filter shape → features → normalisation
//            (+ cosine window) → CorrelationFilter
// Detection: image → features → normalisation → response map
//            → local maxima → PSR gate → boxes (per scale) → NMS

use crate::correlation_filter::{log_progress, CorrelationFilter, FilterParams};
use crate::imaging::MultiChannelImage;
use crate::normalisation::{create_cosine_mask, image_normalisation};
use crate::types::{
    Detection, DetectionConfig, FeatureKind, NormalisationKind, TrainingConfig,
};
use anyhow::{Context, Result};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    pub filter: FilterParams,
    pub features: FeatureKind,
    pub normalisation: NormalisationKind,
    pub cosine_mask: bool,
    pub verbose: bool,
}

impl DetectorParams {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            filter: FilterParams {
                kind: config.algorithm,
                filter_shape: (config.filter_shape[0], config.filter_shape[1]),
                response_covariance: config.response_covariance,
                regularisation: config.regularisation,
                boundary: config.boundary,
            },
            features: config.features,
            normalisation: config.normalisation,
            cosine_mask: config.cosine_mask,
            verbose: config.verbose,
        }
    }
}

/// A response-map peak before it is turned into a box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub y: usize,
    pub x: usize,
    pub value: f64,
    pub psr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detector {
    pub features: FeatureKind,
    pub normalisation: NormalisationKind,
    pub cosine_mask: bool,
    pub model: CorrelationFilter,
}

impl Detector {
    pub fn train(images: &[MultiChannelImage], params: &DetectorParams) -> Result<Self> {
        let shape = params.filter.filter_shape;
        let mask = params.cosine_mask.then(|| create_cosine_mask(shape));

        let mut data = Vec::with_capacity(images.len());
        for (i, image) in images.iter().enumerate() {
            let patch = image
                .resize(shape.0, shape.1)
                .with_context(|| format!("Failed to resize training image {}", i))?;
            let feat = params.features.apply(&patch)?;
            let norm = image_normalisation(&feat, params.normalisation, mask.as_ref())?;
            data.push(norm.pixels);
            log_progress("Pre-processing data", i + 1, images.len(), params.verbose);
        }

        let model = CorrelationFilter::train(&data, &params.filter, params.verbose)?;

        Ok(Self {
            features: params.features,
            normalisation: params.normalisation,
            cosine_mask: params.cosine_mask,
            model,
        })
    }

    pub fn n_channels(&self) -> usize {
        self.model.n_channels()
    }

    pub fn filter_shape(&self) -> (usize, usize) {
        self.model.filter_shape()
    }

    /// Features + normalisation of a whole test image.
    pub fn preprocess(&self, image: &MultiChannelImage) -> Result<Array3<f64>> {
        let expected = self.features.n_channels(image.n_channels());
        if expected != self.n_channels() {
            anyhow::bail!(
                "Detector expects {} feature channels but a {}-channel image gives {}",
                self.n_channels(),
                image.n_channels(),
                expected
            );
        }
        let feat = self.features.apply(image)?;
        Ok(image_normalisation(&feat, self.normalisation, None)?.pixels)
    }

    pub fn response_map(&self, image: &MultiChannelImage) -> Result<Array2<f64>> {
        let pixels = self.preprocess(image)?;
        self.model.response(&pixels)
    }

    /// Local maxima of `response` scored by peak-to-sidelobe ratio.
    pub fn find_peaks(&self, response: &Array2<f64>, psr_exclusion: usize) -> Vec<Peak> {
        let (fh, fw) = self.filter_shape();
        let radius = ((fh / 4).max(1), (fw / 4).max(1));
        let local_max = max_filter(response, radius);

        let mut peaks = Vec::new();
        for ((y, x), v) in response.indexed_iter() {
            if *v < local_max[[y, x]] || !v.is_finite() {
                continue;
            }
            // Plateaus: keep only the first sample of a run
            if x > 0 && response[[y, x - 1]] == *v {
                continue;
            }
            if y > 0 && response[[y - 1, x]] == *v {
                continue;
            }
            let psr = peak_to_sidelobe(response, (y, x), (fh, fw), psr_exclusion);
            peaks.push(Peak {
                y,
                x,
                value: *v,
                psr,
            });
        }
        peaks
    }

    pub fn detect(
        &self,
        image: &MultiChannelImage,
        params: &DetectionConfig,
        label: &str,
    ) -> Result<Vec<Detection>> {
        let (fh, fw) = self.filter_shape();
        let mut detections = Vec::new();

        for &scale in &params.scales {
            let scaled = image.rescale(scale)?;
            let response = self.response_map(&scaled)?;

            let peaks = self.find_peaks(&response, params.psr_exclusion);
            let before = peaks.len();

            for peak in peaks.into_iter().filter(|p| p.psr >= params.min_psr) {
                let x1 = peak.x as f64 - (fw / 2) as f64;
                let y1 = peak.y as f64 - (fh / 2) as f64;
                detections.push(Detection {
                    bbox: [
                        (x1 / scale) as f32,
                        (y1 / scale) as f32,
                        ((x1 + fw as f64) / scale) as f32,
                        ((y1 + fh as f64) / scale) as f32,
                    ],
                    label: label.to_string(),
                    peak: peak.value,
                    psr: peak.psr,
                    scale,
                });
            }

            debug!(
                "[{}] scale {:.2}: {} peaks, {} kept so far",
                label,
                scale,
                before,
                detections.len()
            );
        }

        let mut kept = nms(detections, params.nms_iou_threshold);
        kept.truncate(params.max_detections);
        Ok(kept)
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Correlation Filter Detector\n - Features: {}\n - Normalisation: {}\n - Cosine mask: {}\n - Channels: {}\n{}",
            self.features.as_str(),
            self.normalisation.as_str(),
            self.cosine_mask,
            self.n_channels(),
            self.model
        )
    }
}

/// Log a one-line summary of a freshly trained detector.
pub fn log_trained(label: &str, detector: &Detector) {
    let (h, w) = detector.filter_shape();
    info!(
        "✓ [{}] {} filter {}x{}x{} from {} samples",
        label,
        detector.model.kind.as_str(),
        detector.n_channels(),
        h,
        w,
        detector.model.n_training_images
    );
}

// ============================================================================
// RESPONSE MAP HELPERS
// ============================================================================

/// Separable running maximum over a (2 ry + 1) x (2 rx + 1) window.
fn max_filter(map: &Array2<f64>, radius: (usize, usize)) -> Array2<f64> {
    let (h, w) = map.dim();
    let (ry, rx) = radius;

    let mut rows = Array2::<f64>::from_elem((h, w), f64::NEG_INFINITY);
    for y in 0..h {
        for x in 0..w {
            let lo = x.saturating_sub(rx);
            let hi = (x + rx).min(w - 1);
            rows[[y, x]] = (lo..=hi).map(|i| map[[y, i]]).fold(f64::NEG_INFINITY, f64::max);
        }
    }

    let mut out = Array2::<f64>::from_elem((h, w), f64::NEG_INFINITY);
    for y in 0..h {
        let lo = y.saturating_sub(ry);
        let hi = (y + ry).min(h - 1);
        for x in 0..w {
            out[[y, x]] = (lo..=hi).map(|i| rows[[i, x]]).fold(f64::NEG_INFINITY, f64::max);
        }
    }
    out
}

/// (peak - mean(sidelobe)) / std(sidelobe), where the sidelobe is the
/// window of `window` shape around the peak minus a centred exclusion square.
pub fn peak_to_sidelobe(
    response: &Array2<f64>,
    at: (usize, usize),
    window: (usize, usize),
    exclusion: usize,
) -> f64 {
    let (h, w) = response.dim();
    let (py, px) = at;
    let (wy, wx) = (window.0 / 2, window.1 / 2);
    let ex = (exclusion / 2).min(wy.saturating_sub(1)).min(wx.saturating_sub(1));

    let y0 = py.saturating_sub(wy);
    let y1 = (py + wy).min(h - 1);
    let x0 = px.saturating_sub(wx);
    let x1 = (px + wx).min(w - 1);

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0usize;
    for y in y0..=y1 {
        for x in x0..=x1 {
            if y.abs_diff(py) <= ex && x.abs_diff(px) <= ex {
                continue;
            }
            let v = response[[y, x]];
            sum += v;
            sum_sq += v * v;
            n += 1;
        }
    }

    if n < 2 {
        return 0.0;
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    let std = var.sqrt();
    if std <= 1e-12 {
        return 0.0;
    }
    (response[[py, px]] - mean) / std
}

// ============================================================================
// NON-MAXIMUM SUPPRESSION
// ============================================================================

pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.psr
            .partial_cmp(&a.psr)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();

    for det in detections {
        if keep
            .iter()
            .all(|k| calculate_iou(&k.bbox, &det.bbox) < iou_threshold)
        {
            keep.push(det);
        }
    }

    keep
}

pub fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Boundary, FilterKind};

    /// RGB image with a red disc of `radius` centred at (cy, cx) on grey.
    fn red_disc(shape: (usize, usize), cy: f64, cx: f64, radius: f64) -> MultiChannelImage {
        let pixels = Array3::from_shape_fn((3, shape.0, shape.1), |(c, y, x)| {
            let d = ((y as f64 - cy).powi(2) + (x as f64 - cx).powi(2)).sqrt();
            let inside = (radius + 0.5 - d).clamp(0.0, 1.0);
            let (fg, bg) = if c == 0 { (0.9, 0.4) } else { (0.1, 0.4) };
            bg + (fg - bg) * inside
        });
        MultiChannelImage::new(pixels)
    }

    fn params() -> DetectorParams {
        DetectorParams {
            filter: FilterParams {
                kind: FilterKind::Mosse,
                filter_shape: (24, 24),
                response_covariance: 2.0,
                regularisation: 0.01,
                boundary: Boundary::Symmetric,
            },
            features: FeatureKind::NoOp,
            normalisation: NormalisationKind::Norm,
            cosine_mask: true,
            verbose: false,
        }
    }

    fn detection(bbox: [f32; 4], psr: f64) -> Detection {
        Detection {
            bbox,
            label: "sign".to_string(),
            peak: 1.0,
            psr,
            scale: 1.0,
        }
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [5.0, 0.0, 15.0, 10.0];
        assert!((calculate_iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(calculate_iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    }

    #[test]
    fn test_nms_keeps_strongest() {
        let dets = vec![
            detection([0.0, 0.0, 10.0, 10.0], 5.0),
            detection([1.0, 1.0, 11.0, 11.0], 9.0),
            detection([50.0, 50.0, 60.0, 60.0], 3.0),
        ];
        let kept = nms(dets, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].psr, 9.0);
        assert_eq!(kept[1].psr, 3.0);
    }

    #[test]
    fn test_psr_of_isolated_peak() {
        let mut map = Array2::<f64>::from_shape_fn((21, 21), |(y, x)| ((y * 7 + x * 3) % 5) as f64 * 0.01);
        map[[10, 10]] = 5.0;
        let psr = peak_to_sidelobe(&map, (10, 10), (21, 21), 3);
        assert!(psr > 50.0, "psr {}", psr);

        let flat = Array2::<f64>::zeros((9, 9));
        assert_eq!(peak_to_sidelobe(&flat, (4, 4), (9, 9), 3), 0.0);
    }

    #[test]
    fn test_max_filter() {
        let mut map = Array2::<f64>::zeros((5, 5));
        map[[2, 2]] = 1.0;
        let out = max_filter(&map, (1, 1));
        assert_eq!(out[[1, 1]], 1.0);
        assert_eq!(out[[3, 3]], 1.0);
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn test_train_and_detect_sign() {
        let crops: Vec<MultiChannelImage> = (0..3)
            .map(|i| red_disc((24, 24), 12.0, 12.0, 6.0 + i as f64 * 0.5))
            .collect();
        let detector = Detector::train(&crops, &params()).unwrap();
        assert_eq!(detector.n_channels(), 3);
        assert_eq!(detector.filter_shape(), (24, 24));

        let scene = red_disc((80, 100), 30.0, 64.0, 6.5);
        let config = DetectionConfig {
            scales: vec![1.0],
            min_psr: 3.0,
            psr_exclusion: 5,
            nms_iou_threshold: 0.3,
            max_detections: 5,
        };
        let detections = detector.detect(&scene, &config, "red_disc").unwrap();
        assert!(!detections.is_empty());

        let (cx, cy) = detections[0].center();
        assert!((cx - 64.0).abs() <= 1.0, "cx {}", cx);
        assert!((cy - 30.0).abs() <= 1.0, "cy {}", cy);
        assert_eq!(detections[0].label, "red_disc");
    }

    fn argmax(map: &Array2<f64>) -> (usize, usize) {
        let mut best = (f64::NEG_INFINITY, (0, 0));
        for (idx, v) in map.indexed_iter() {
            if *v > best.0 {
                best = (*v, idx);
            }
        }
        best.1
    }

    #[test]
    fn test_symmetric_response_centred_on_crop_and_scene() {
        let crops: Vec<MultiChannelImage> = (0..3)
            .map(|i| red_disc((24, 24), 12.0, 12.0, 6.0 + i as f64 * 0.5))
            .collect();
        for cosine_mask in [false, true] {
            let mut p = params();
            p.cosine_mask = cosine_mask;
            let detector = Detector::train(&crops, &p).unwrap();

            let (py, px) = argmax(&detector.response_map(&crops[0]).unwrap());
            assert!(py.abs_diff(12) <= 1 && px.abs_diff(12) <= 1, "crop peak ({}, {})", py, px);

            let scene = red_disc((80, 100), 40.0, 60.0, 6.5);
            let (py, px) = argmax(&detector.response_map(&scene).unwrap());
            assert!(py.abs_diff(40) <= 1 && px.abs_diff(60) <= 1, "scene peak ({}, {})", py, px);
        }
    }

    #[test]
    fn test_detect_maps_boxes_back_to_source_scale() {
        let crops = vec![red_disc((24, 24), 12.0, 12.0, 6.0)];
        let detector = Detector::train(&crops, &params()).unwrap();

        let scene = red_disc((60, 60), 30.0, 30.0, 6.0);
        let config = DetectionConfig {
            scales: vec![2.0],
            min_psr: f64::NEG_INFINITY,
            psr_exclusion: 5,
            nms_iou_threshold: 1.0,
            max_detections: 1000,
        };
        let detections = detector.detect(&scene, &config, "sign").unwrap();
        assert!(!detections.is_empty());
        for det in &detections {
            assert_eq!(det.scale, 2.0);
            let w = det.bbox[2] - det.bbox[0];
            assert!((w - 12.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_greyscale_input_rejected_by_rgb_detector() {
        let crops = vec![red_disc((24, 24), 12.0, 12.0, 6.0)];
        let detector = Detector::train(&crops, &params()).unwrap();
        let grey = red_disc((40, 40), 20.0, 20.0, 6.0).as_greyscale();
        let err = detector.response_map(&grey).unwrap_err().to_string();
        assert!(err.contains("expects 3 feature channels"), "{}", err);
    }

    #[test]
    fn test_display_lists_channels() {
        let crops = vec![red_disc((24, 24), 12.0, 12.0, 6.0)];
        let detector = Detector::train(&crops, &params()).unwrap();
        let text = detector.to_string();
        assert!(text.starts_with("Correlation Filter Detector"));
        assert!(text.contains("Channels: 3"));
        assert!(text.contains("Shape: 24x24"));
    }
}

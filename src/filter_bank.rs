// src/filter_bank.rs
//
// Filter bank: one correlation filter detector per sign class.
// Detection runs every class filter and merges the boxes; recognition of a
// single crop ranks the classes by the peak-to-sidelobe ratio measured near
// the crop centre.

use crate::dataset::{load_images, ClassSamples};
use crate::detector::{log_trained, nms, peak_to_sidelobe, Detector, DetectorParams};
use crate::imaging::MultiChannelImage;
use crate::types::{ClassScore, Detection, DetectionConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelledDetector {
    pub label: String,
    pub detector: Detector,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterBank {
    pub detectors: Vec<LabelledDetector>,
}

impl FilterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Train one detector per class found on disk.
    pub fn train(classes: &[ClassSamples], params: &DetectorParams) -> Result<Self> {
        let mut bank = Self::new();
        let shape = params.filter.filter_shape;

        for (idx, class) in classes.iter().enumerate() {
            info!(
                "🚦 Training class {}/{}: '{}' ({} images)",
                idx + 1,
                classes.len(),
                class.label,
                class.files.len()
            );
            let images = load_images(&class.files, shape)
                .with_context(|| format!("Failed to load images for class '{}'", class.label))?;
            let detector = Detector::train(&images, params)
                .with_context(|| format!("Failed to train class '{}'", class.label))?;
            log_trained(&class.label, &detector);
            bank.push(&class.label, detector)?;
        }

        Ok(bank)
    }

    pub fn push(&mut self, label: &str, detector: Detector) -> Result<()> {
        if self.get(label).is_some() {
            anyhow::bail!("Filter bank already has a detector for '{}'", label);
        }
        self.detectors.push(LabelledDetector {
            label: label.to_string(),
            detector,
        });
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&Detector> {
        self.detectors
            .iter()
            .find(|d| d.label == label)
            .map(|d| &d.detector)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.label.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Rank every class for a cropped sign. Sorted by PSR, best first.
    pub fn classify(&self, patch: &MultiChannelImage, psr_exclusion: usize) -> Result<Vec<ClassScore>> {
        if self.is_empty() {
            anyhow::bail!("Cannot classify with an empty filter bank");
        }

        let mut scores = Vec::with_capacity(self.len());
        for entry in &self.detectors {
            let (fh, fw) = entry.detector.filter_shape();
            let resized = patch.resize(fh, fw)?;
            let response = entry.detector.response_map(&resized)?;

            // Best peak in the central half of the crop
            let (cy, cx) = (fh / 2, fw / 2);
            let (ry, rx) = ((fh / 4).max(1), (fw / 4).max(1));
            let mut best = (f64::NEG_INFINITY, (cy, cx));
            for y in cy.saturating_sub(ry)..=(cy + ry).min(fh - 1) {
                for x in cx.saturating_sub(rx)..=(cx + rx).min(fw - 1) {
                    let v = response[[y, x]];
                    if v > best.0 {
                        best = (v, (y, x));
                    }
                }
            }

            let psr = peak_to_sidelobe(&response, best.1, (fh, fw), psr_exclusion);
            debug!("[{}] peak {:.4} psr {:.2}", entry.label, best.0, psr);
            scores.push(ClassScore {
                label: entry.label.clone(),
                peak: best.0,
                psr,
            });
        }

        scores.sort_by(|a, b| b.psr.partial_cmp(&a.psr).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scores)
    }

    /// Run every class detector over `image` and merge the results.
    pub fn detect(&self, image: &MultiChannelImage, params: &DetectionConfig) -> Result<Vec<Detection>> {
        let mut all = Vec::new();
        for entry in &self.detectors {
            let dets = entry.detector.detect(image, params, &entry.label)?;
            debug!("[{}] {} detections", entry.label, dets.len());
            all.extend(dets);
        }

        let mut merged = nms(all, params.nms_iou_threshold);
        merged.truncate(params.max_detections);
        Ok(merged)
    }
}

impl fmt::Display for FilterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Filter bank with {} classes", self.len())?;
        for entry in &self.detectors {
            writeln!(f, "\n[{}]\n{}", entry.label, entry.detector)?;
        }
        Ok(())
    }
}

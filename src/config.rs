use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if t.filter_shape[0] == 0 || t.filter_shape[1] == 0 {
            anyhow::bail!(
                "training.filter_shape must be non-zero, got {:?}",
                t.filter_shape
            );
        }
        if t.response_covariance <= 0.0 {
            anyhow::bail!("training.response_covariance must be positive");
        }
        if t.regularisation < 0.0 {
            anyhow::bail!("training.regularisation must be >= 0");
        }

        let d = &self.detection;
        if d.scales.is_empty() || d.scales.iter().any(|s| *s <= 0.0) {
            anyhow::bail!("detection.scales must be a non-empty list of positive factors");
        }
        // A box is kept while its IoU with every stronger box is below the
        // threshold, so 0 would suppress even disjoint boxes.
        if !(d.nms_iou_threshold > 0.0 && d.nms_iou_threshold <= 1.0) {
            anyhow::bail!(
                "detection.nms_iou_threshold must be in (0, 1], got {}",
                d.nms_iou_threshold
            );
        }

        Ok(())
    }
}

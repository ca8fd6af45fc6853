use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub training: TrainingConfig,
    pub dataset: DatasetConfig,
    pub detection: DetectionConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub algorithm: FilterKind,
    /// (height, width) of the learned filter; training crops are resized to it
    pub filter_shape: [usize; 2],
    pub features: FeatureKind,
    pub normalisation: NormalisationKind,
    pub cosine_mask: bool,
    pub response_covariance: f64,
    /// Regularisation added to the auto-correlation energy
    pub regularisation: f64,
    pub boundary: Boundary,
    pub verbose: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            algorithm: FilterKind::Mosse,
            filter_shape: [64, 64],
            features: FeatureKind::NoOp,
            normalisation: NormalisationKind::Norm,
            cosine_mask: false,
            response_covariance: 2.0,
            regularisation: 0.01,
            boundary: Boundary::Symmetric,
            verbose: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub root: String,
    pub extensions: Vec<String>,
    pub max_images_per_class: Option<usize>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: "data/train".to_string(),
            extensions: ["png", "jpg", "jpeg", "ppm", "bmp"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            max_images_per_class: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub scales: Vec<f64>,
    pub min_psr: f64,
    /// Side of the square around a peak excluded from the sidelobe
    pub psr_exclusion: usize,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            scales: vec![1.0],
            min_psr: 7.0,
            psr_exclusion: 11,
            nms_iou_threshold: 0.3,
            max_detections: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: String,
    pub colormap: Colormap,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
            colormap: Colormap::Afmhot,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Minimum Output Sum of Squared Errors, channels trained independently
    Mosse,
    /// Multi-Channel Correlation Filter, channels trained jointly
    Mccf,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Mosse => "mosse",
            FilterKind::Mccf => "mccf",
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            FilterKind::Mosse => "Minimum Output Sum of Squared Errors (MOSSE)",
            FilterKind::Mccf => "Multi-Channel Correlation (MCCF)",
        }
    }
}

impl FromStr for FilterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mosse" => Ok(FilterKind::Mosse),
            "mccf" => Ok(FilterKind::Mccf),
            other => anyhow::bail!(
                "Filter type can be either 'mosse' or 'mccf' (got '{}')",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Zero padding
    Constant,
    /// Mirror padding that repeats the edge sample
    Symmetric,
}

impl Boundary {
    pub fn as_str(&self) -> &'static str {
        match self {
            Boundary::Constant => "constant",
            Boundary::Symmetric => "symmetric",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    NoOp,
    Hsi,
    RgbHsi,
    Igo,
    IgoHsi,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::NoOp => "no_op",
            FeatureKind::Hsi => "hsi",
            FeatureKind::RgbHsi => "rgb_hsi",
            FeatureKind::Igo => "igo",
            FeatureKind::IgoHsi => "igo_hsi",
        }
    }
}

impl FromStr for FeatureKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        [
            FeatureKind::NoOp,
            FeatureKind::Hsi,
            FeatureKind::RgbHsi,
            FeatureKind::Igo,
            FeatureKind::IgoHsi,
        ]
        .into_iter()
        .find(|k| k.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown features '{}' (expected no_op, hsi, rgb_hsi, igo or igo_hsi)",
                s
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalisationKind {
    None,
    Norm,
    Std,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    Afmhot,
    Jet,
    Gray,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// DETECTION RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in source image pixels
    pub label: String,
    pub peak: f64,
    pub psr: f64,
    pub scale: f64,
}

impl Detection {
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }
}

/// Recognition score of a single sign class for a cropped patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub peak: f64,
    pub psr: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_kind_parse() {
        assert_eq!("mosse".parse::<FilterKind>().unwrap(), FilterKind::Mosse);
        assert_eq!("MCCF".parse::<FilterKind>().unwrap(), FilterKind::Mccf);

        let err = "svm".parse::<FilterKind>().unwrap_err().to_string();
        assert!(err.contains("'mosse' or 'mccf'"));
    }

    #[test]
    fn test_feature_kind_parse() {
        assert_eq!("igo_hsi".parse::<FeatureKind>().unwrap(), FeatureKind::IgoHsi);
        assert_eq!("NO_OP".parse::<FeatureKind>().unwrap(), FeatureKind::NoOp);
        assert!("dsift".parse::<FeatureKind>().is_err());
    }

    #[test]
    fn test_enums_use_snake_case_names() {
        let yaml = serde_yaml::to_string(&FeatureKind::IgoHsi).unwrap();
        assert_eq!(yaml.trim(), "igo_hsi");

        let kind: FeatureKind = serde_yaml::from_str("rgb_hsi").unwrap();
        assert_eq!(kind, FeatureKind::RgbHsi);
        assert_eq!(kind.as_str(), "rgb_hsi");
    }

    #[test]
    fn test_detection_center() {
        let det = Detection {
            bbox: [10.0, 20.0, 30.0, 60.0],
            label: "stop".to_string(),
            peak: 1.0,
            psr: 10.0,
            scale: 1.0,
        };
        assert_eq!(det.center(), (20.0, 40.0));
    }
}

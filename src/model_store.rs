// src/model_store.rs

use crate::filter_bank::FilterBank;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    format_version: u32,
    created_with: String,
    bank: FilterBank,
}

pub fn save(path: &Path, bank: &FilterBank) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let file = ModelFile {
        format_version: FORMAT_VERSION,
        created_with: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        bank: bank.clone(),
    };
    let json = serde_json::to_string(&file).context("Failed to serialise filter bank")?;
    fs::write(path, json).with_context(|| format!("Failed to write model {}", path.display()))?;

    info!("💾 Saved {} detectors to {}", bank.len(), path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<FilterBank> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read model {}", path.display()))?;
    let file: ModelFile = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse model {}", path.display()))?;

    if file.format_version != FORMAT_VERSION {
        anyhow::bail!(
            "Unsupported model format version {} (expected {})",
            file.format_version,
            FORMAT_VERSION
        );
    }

    for entry in &file.bank.detectors {
        entry
            .detector
            .model
            .validate()
            .with_context(|| format!("Invalid filter for class '{}' in {}", entry.label, path.display()))?;
    }

    info!(
        "✓ Loaded {} detectors from {} ({})",
        file.bank.len(),
        path.display(),
        file.created_with
    );
    Ok(file.bank)
}

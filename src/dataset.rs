// src/dataset.rs
//
// Training data layout: one sub-directory per sign class.
//
//   root/
//     stop/            ← label "stop"
//       00001.ppm
//       ...
//     yield/
//       ...

use crate::imaging::MultiChannelImage;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ClassSamples {
    pub label: String,
    pub files: Vec<PathBuf>,
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Image files under `dir`, recursively, sorted by path.
pub fn find_image_files(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| has_extension(p, extensions))
        .collect();
    files.sort();
    files
}

/// Discover classes as the immediate sub-directories of `root`.
pub fn discover(
    root: &Path,
    extensions: &[String],
    max_per_class: Option<usize>,
) -> Result<Vec<ClassSamples>> {
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read dataset directory {}", root.display()))?;

    let mut class_dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    class_dirs.sort();

    let mut classes = Vec::new();
    for dir in class_dirs {
        let label = match dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                warn!("Skipping class directory with non UTF-8 name: {}", dir.display());
                continue;
            }
        };

        let mut files = find_image_files(&dir, extensions);
        if let Some(max) = max_per_class {
            files.truncate(max);
        }

        if files.is_empty() {
            warn!("⚠️  Class '{}' has no images, skipping", label);
            continue;
        }

        debug!("Class '{}': {} images", label, files.len());
        classes.push(ClassSamples { label, files });
    }

    if classes.is_empty() {
        anyhow::bail!("No sign classes with images found in {}", root.display());
    }

    info!(
        "Found {} classes ({} images) in {}",
        classes.len(),
        classes.iter().map(|c| c.files.len()).sum::<usize>(),
        root.display()
    );
    Ok(classes)
}

/// Decode `files`, resizing each to `shape`. Undecodable files are skipped.
pub fn load_images(files: &[PathBuf], shape: (usize, usize)) -> Result<Vec<MultiChannelImage>> {
    let mut images = Vec::with_capacity(files.len());
    for path in files {
        match MultiChannelImage::open(path) {
            Ok(image) => images.push(image.resize(shape.0, shape.1)?),
            Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
        }
    }
    if images.is_empty() && !files.is_empty() {
        anyhow::bail!("None of the {} images could be decoded", files.len());
    }
    Ok(images)
}

/// Expand a mix of files and directories into a sorted list of image files.
/// The same file reached twice (e.g. `a.png` and `./a.png`) is kept once.
pub fn collect_inputs(paths: &[PathBuf], extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for path in paths {
        if path.is_dir() {
            found.extend(find_image_files(path, extensions));
        } else if path.is_file() {
            found.push(path.clone());
        } else {
            anyhow::bail!("Input {} does not exist", path.display());
        }
    }

    let mut unique: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
    for path in found {
        let key = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        unique.entry(key).or_insert(path);
    }
    Ok(unique.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn exts() -> Vec<String> {
        vec!["png".to_string(), "ppm".to_string()]
    }

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = RgbImage::from_pixel(w, h, Rgb([200, 10, 10]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_discover_classes() {
        let dir = tempfile::tempdir().unwrap();
        let stop = dir.path().join("stop");
        let yield_dir = dir.path().join("yield");
        let empty = dir.path().join("empty");
        std::fs::create_dir_all(stop.join("nested")).unwrap();
        std::fs::create_dir_all(&yield_dir).unwrap();
        std::fs::create_dir_all(&empty).unwrap();

        write_png(&stop.join("b.png"), 8, 8);
        write_png(&stop.join("nested").join("a.PNG"), 8, 8);
        write_png(&yield_dir.join("c.png"), 8, 8);
        std::fs::write(yield_dir.join("notes.txt"), "not an image").unwrap();

        let classes = discover(dir.path(), &exts(), None).unwrap();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].label, "stop");
        assert_eq!(classes[0].files.len(), 2);
        assert_eq!(classes[1].label, "yield");
        assert_eq!(classes[1].files.len(), 1);

        let capped = discover(dir.path(), &exts(), Some(1)).unwrap();
        assert_eq!(capped[0].files.len(), 1);
    }

    #[test]
    fn test_discover_empty_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path(), &exts(), None).is_err());
    }

    #[test]
    fn test_load_images_resizes_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        let bad = dir.path().join("bad.png");
        write_png(&good, 10, 6);
        std::fs::write(&bad, b"definitely not a png").unwrap();

        let images = load_images(&[good, bad], (16, 12)).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].shape(), (16, 12));
        assert_eq!(images[0].n_channels(), 3);
    }

    #[test]
    fn test_collect_inputs_sorted_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_png(&b, 4, 4);
        write_png(&a, 4, 4);
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let dotted = dir.path().join(".").join("b.png");
        let found = collect_inputs(
            &[b.clone(), a.clone(), dir.path().to_path_buf(), dotted],
            &exts(),
        )
        .unwrap();
        assert_eq!(found, vec![a, b]);

        assert!(collect_inputs(&[dir.path().join("missing.png")], &exts()).is_err());
    }
}

//! Input resolution.
//!
//! `--input` names a single image, a directory of images, a pickled list of
//! image records, or the literal `webcam`. Classification looks only at the
//! string; resolution reads the directory or pickle and produces the ordered
//! item list the driver walks.

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const WEBCAM_INPUT: &str = "webcam";

/// Extensions with a well-known non-image media type.
const NON_IMAGE_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "webm", "mpeg", "mpg", "wmv", "flv", "m4v", "mp3", "wav", "ogg",
    "flac", "json", "txt", "csv", "xml", "yaml", "yml", "toml", "html", "htm", "pdf", "zip",
    "tar", "gz", "py", "sh", "onnx",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    Image,
    Folder,
    Pickle,
    Webcam,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputKind::Image => "image",
            InputKind::Folder => "folder",
            InputKind::Pickle => "pickle",
            InputKind::Webcam => "webcam",
        };
        f.write_str(name)
    }
}

/// One image to process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputItem {
    /// Relative identifier used to name outputs (may contain `/`).
    pub id: String,
    pub path: PathBuf,
}

/// A pickled record. Only `image` is read; other fields are ignored.
#[derive(Debug, Deserialize)]
struct PickleRecord {
    image: String,
}

/// Classify an `--input` string.
pub fn classify_input(input: &str) -> Result<InputKind> {
    if input == WEBCAM_INPUT {
        return Ok(InputKind::Webcam);
    }
    if ImageFormat::from_path(input).is_ok() {
        return Ok(InputKind::Image);
    }

    let extension = Path::new(input)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    if let Some(ext) = extension {
        if NON_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(anyhow!(
                "file {} has invalid format",
                Path::new(input)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| input.to_string())
            ));
        }
    }

    if input.ends_with("pkl") {
        Ok(InputKind::Pickle)
    } else {
        Ok(InputKind::Folder)
    }
}

/// Produce the ordered item list for a non-streaming input.
pub fn resolve_items(kind: InputKind, input: &str, dataset_root: Option<&Path>) -> Result<Vec<InputItem>> {
    match kind {
        InputKind::Image => Ok(vec![image_item(input)]),
        InputKind::Folder => folder_items(Path::new(input)),
        InputKind::Pickle => {
            let root = dataset_root.ok_or_else(|| {
                anyhow!("pickle input requires a dataset root (--dataset-root or POSE_DATASET_ROOT)")
            })?;
            pickle_items(Path::new(input), root)
        }
        InputKind::Webcam => Err(anyhow!("webcam input is streamed, not listed")),
    }
}

fn image_item(input: &str) -> InputItem {
    let path = PathBuf::from(input);
    let id = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string());
    InputItem { id, path }
}

/// Regular, non-hidden files of `dir`, sorted by name.
fn folder_items(dir: &Path) -> Result<Vec<InputItem>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list input folder {}", dir.display()))?;

    let mut items = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list input folder {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if !entry.file_type()?.is_file() {
            continue;
        }
        items.push(InputItem {
            id: name,
            path: entry.path(),
        });
    }
    items.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(items)
}

fn pickle_items(path: &Path, dataset_root: &Path) -> Result<Vec<InputItem>> {
    let file = File::open(path).with_context(|| format!("failed to open pickle {}", path.display()))?;
    // Annotation pickles hold numpy arrays and reuse memoized objects.
    let options = serde_pickle::DeOptions::new()
        .replace_unresolved_globals()
        .replace_recursive_structures();
    let records: Vec<PickleRecord> = serde_pickle::from_reader(BufReader::new(file), options)
        .with_context(|| format!("failed to decode pickle {}", path.display()))?;

    Ok(records
        .into_iter()
        .map(|record| InputItem {
            path: dataset_root.join(&record.image),
            id: record.image,
        })
        .collect())
}

//! Result sink.
//!
//! Every input kind maps its items to output files through
//! [`output_paths`]:
//!
//! ```text
//! <output_root>/<checkpoint_name>/img/<item_id>
//! <output_root>/<checkpoint_name>/json/<item_id without extension>.json
//! ```
//!
//! Ids that differ only in extension (`a.jpg`, `a.png`) map to the same
//! JSON file. A sink claims every path it writes, and an item whose outputs
//! were already claimed earlier in the run fails instead of overwriting them.
//!
//! Prediction documents carry the dataset schema as `meta_info` and one
//! entry per instance as `instance_info`, tab-indented.

use anyhow::{bail, Context, Result};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use crate::pose::{DatasetMeta, PoseInstance, PredictedInstances};

/// Where one item's outputs go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPaths {
    pub image: PathBuf,
    pub json: PathBuf,
}

/// One serialized pose instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub keypoints: Vec<[f32; 2]>,
    pub keypoint_scores: Vec<f32>,
    pub bbox: Vec<[f32; 4]>,
    pub bbox_score: f32,
}

impl From<&PoseInstance> for InstanceRecord {
    fn from(instance: &PoseInstance) -> Self {
        Self {
            keypoints: instance.keypoints.clone(),
            keypoint_scores: instance.keypoint_scores.clone(),
            bbox: vec![instance.bbox.to_array()],
            bbox_score: instance.bbox_score,
        }
    }
}

/// A prediction document as written to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub meta_info: DatasetMeta,
    pub instance_info: Vec<InstanceRecord>,
}

impl OutputRecord {
    pub fn new(meta: &DatasetMeta, instances: Option<&PredictedInstances>) -> Self {
        Self {
            meta_info: meta.clone(),
            instance_info: instances
                .map(|preds| preds.iter().map(InstanceRecord::from).collect())
                .unwrap_or_default(),
        }
    }
}

/// Name of the output subdirectory for a pose checkpoint: its file stem.
///
/// `stub://name` checkpoints map to `name`.
pub fn checkpoint_name(checkpoint: &str) -> String {
    let trimmed = checkpoint.trim_start_matches("stub://");
    let last = trimmed
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(trimmed);
    let stem = Path::new(last)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.is_empty() {
        "checkpoint".to_string()
    } else {
        stem
    }
}

/// Map an item to its output files.
///
/// Only the normal components of `item_id` are kept, so ids cannot climb
/// out of the output root.
pub fn output_paths(output_root: &Path, checkpoint_name: &str, item_id: &str) -> OutputPaths {
    let relative: PathBuf = Path::new(item_id)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    let relative = if relative.as_os_str().is_empty() {
        PathBuf::from("item")
    } else {
        relative
    };

    let base = output_root.join(checkpoint_name);
    let image = base.join("img").join(&relative);
    let json = base.join("json").join(&relative).with_extension("json");
    OutputPaths { image, json }
}

/// Create `path` and its parents. Calling it again is a no-op.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory {}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Write one prediction document.
pub fn write_predictions(
    path: &Path,
    meta: &DatasetMeta,
    instances: Option<&PredictedInstances>,
) -> Result<()> {
    ensure_parent(path)?;
    let record = OutputRecord::new(meta, instances);
    let file = File::create(path)
        .with_context(|| format!("failed to create predictions file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
    record
        .serialize(&mut ser)
        .with_context(|| format!("failed to serialize predictions to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to write predictions file {}", path.display()))?;
    Ok(())
}

/// Read a prediction document back.
pub fn read_predictions(path: &Path) -> Result<OutputRecord> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read predictions file {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("invalid predictions file {}", path.display()))
}

/// Path a frame requested at `path` is actually written to. Extensions
/// without an enabled encoder get `.png` appended, so `a.webp` becomes
/// `a.webp.png` and never lands on a sibling `a.png`.
pub fn frame_target(path: &Path) -> PathBuf {
    match ImageFormat::from_path(path) {
        Ok(format) if format.writing_enabled() => path.to_path_buf(),
        _ => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".png");
            PathBuf::from(name)
        }
    }
}

/// Write a rendered frame to [`frame_target`] of `path`.
pub fn write_frame(path: &Path, frame: &RgbImage) -> Result<PathBuf> {
    let target = frame_target(path);
    ensure_parent(&target)?;
    frame
        .save(&target)
        .with_context(|| format!("failed to write frame {}", target.display()))?;
    Ok(target)
}

/// Files written for one item.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredOutputs {
    pub json: Option<PathBuf>,
    pub frame: Option<PathBuf>,
}

/// Writes each item's outputs under one root and checkpoint directory.
#[derive(Clone, Debug)]
pub struct ResultSink {
    output_root: Option<PathBuf>,
    checkpoint_name: String,
    save_predictions: bool,
    claimed: HashSet<PathBuf>,
}

impl ResultSink {
    pub fn new(output_root: Option<PathBuf>, checkpoint_name: String, save_predictions: bool) -> Self {
        Self {
            output_root,
            checkpoint_name,
            save_predictions,
            claimed: HashSet::new(),
        }
    }

    /// Create the checkpoint directory up front.
    pub fn prepare(&self) -> Result<()> {
        match &self.output_root {
            Some(root) => ensure_dir(&root.join(&self.checkpoint_name)),
            None => Ok(()),
        }
    }

    pub fn paths_for(&self, item_id: &str) -> Option<OutputPaths> {
        self.output_root
            .as_deref()
            .map(|root| output_paths(root, &self.checkpoint_name, item_id))
    }

    /// Persist predictions and/or the rendered frame for one item.
    ///
    /// Fails without writing anything when one of the item's output files
    /// was already written for an earlier item of this run.
    pub fn store(
        &mut self,
        item_id: &str,
        meta: &DatasetMeta,
        instances: Option<&PredictedInstances>,
        frame: Option<&RgbImage>,
    ) -> Result<StoredOutputs> {
        let Some(paths) = self.paths_for(item_id) else {
            return Ok(StoredOutputs::default());
        };

        let json = self.save_predictions.then_some(paths.json);
        let frame_path = frame.map(|_| frame_target(&paths.image));
        for path in json.iter().chain(frame_path.iter()) {
            if self.claimed.contains(path) {
                bail!(
                    "{} maps to {}, already written for another item in this run",
                    item_id,
                    path.display()
                );
            }
        }
        self.claimed.extend(json.iter().chain(frame_path.iter()).cloned());

        let mut stored = StoredOutputs::default();
        if let Some(json) = json {
            write_predictions(&json, meta, instances)?;
            stored.json = Some(json);
        }
        if let Some(frame) = frame {
            stored.frame = Some(write_frame(&paths.image, frame)?);
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BBox, Detection};

    fn predictions() -> PredictedInstances {
        let det = Detection::new(BBox::new(1.0, 2.0, 30.0, 60.0), 0.95, 0);
        let keypoints: Vec<[f32; 2]> = (0..17).map(|i| [i as f32, 2.0 * i as f32]).collect();
        let scores: Vec<f32> = (0..17).map(|i| 0.5 + i as f32 / 100.0).collect();
        PredictedInstances::merge(vec![PoseInstance::new(&det, keypoints, scores)]).unwrap()
    }

    #[test]
    fn checkpoint_name_is_file_stem() {
        assert_eq!(
            checkpoint_name("ckpt/td-hm_ViTPose-base_8xb64-210e_coco-256x192.onnx"),
            "td-hm_ViTPose-base_8xb64-210e_coco-256x192"
        );
        assert_eq!(checkpoint_name("stub://vitpose"), "vitpose");
        assert_eq!(checkpoint_name("model"), "model");
        assert_eq!(checkpoint_name("stub://"), "checkpoint");
    }

    #[test]
    fn output_paths_are_uniform() {
        let root = Path::new("/out");
        let paths = output_paths(root, "vitpose", "frame_15.jpg");
        assert_eq!(paths.image, PathBuf::from("/out/vitpose/img/frame_15.jpg"));
        assert_eq!(paths.json, PathBuf::from("/out/vitpose/json/frame_15.json"));

        let nested = output_paths(root, "vitpose", "s_01_act_02/s_01_act_02_000001.jpg");
        assert_eq!(
            nested.json,
            PathBuf::from("/out/vitpose/json/s_01_act_02/s_01_act_02_000001.json")
        );
    }

    #[test]
    fn output_paths_stay_under_root() {
        let paths = output_paths(Path::new("/out"), "ck", "../../etc/passwd");
        assert_eq!(paths.image, PathBuf::from("/out/ck/img/etc/passwd"));
        let paths = output_paths(Path::new("/out"), "ck", "/abs/a.png");
        assert_eq!(paths.image, PathBuf::from("/out/ck/img/abs/a.png"));
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c");
        ensure_dir(&target).unwrap();
        std::fs::write(target.join("keep.txt"), b"x").unwrap();
        ensure_dir(&target).unwrap();
        let entries: Vec<_> = std::fs::read_dir(&target).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn predictions_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("json/p.json");
        let meta = DatasetMeta::coco();
        let preds = predictions();

        write_predictions(&path, &meta, Some(&preds)).unwrap();
        let back = read_predictions(&path).unwrap();

        assert_eq!(back.meta_info, meta);
        assert_eq!(back.instance_info.len(), 1);
        assert_eq!(back.instance_info[0].keypoints, preds.instances[0].keypoints);
        assert_eq!(back.instance_info[0].keypoint_scores, preds.instances[0].keypoint_scores);
        assert_eq!(back.instance_info[0].bbox, vec![[1.0, 2.0, 30.0, 60.0]]);
    }

    #[test]
    fn predictions_are_tab_indented() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        write_predictions(&path, &DatasetMeta::coco(), None).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n\t\"meta_info\""));
        assert!(raw.contains("\"instance_info\": []"));
    }

    #[test]
    fn sink_without_root_writes_nothing() {
        let mut sink = ResultSink::new(None, "ck".into(), false);
        let stored = sink
            .store("a.jpg", &DatasetMeta::coco(), None, Some(&RgbImage::new(2, 2)))
            .unwrap();
        assert_eq!(stored, StoredOutputs::default());
    }

    #[test]
    fn sink_writes_json_and_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ResultSink::new(Some(dir.path().to_path_buf()), "ck".into(), true);
        sink.prepare().unwrap();
        let preds = predictions();
        let stored = sink
            .store("x/a.jpg", &DatasetMeta::coco(), Some(&preds), Some(&RgbImage::new(4, 4)))
            .unwrap();

        assert_eq!(stored.json, Some(dir.path().join("ck/json/x/a.json")));
        assert_eq!(stored.frame, Some(dir.path().join("ck/img/x/a.jpg")));
        assert!(dir.path().join("ck/json/x/a.json").is_file());
        assert!(dir.path().join("ck/img/x/a.jpg").is_file());
    }

    #[test]
    fn frames_without_encoder_fall_back_to_png() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_frame(&dir.path().join("img/a.webp"), &RgbImage::new(2, 2)).unwrap();
        assert_eq!(written, dir.path().join("img/a.webp.png"));
        assert!(written.is_file());
    }

    #[test]
    fn ids_sharing_a_stem_do_not_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ResultSink::new(Some(dir.path().to_path_buf()), "ck".into(), true);
        let meta = DatasetMeta::coco();
        let preds = predictions();

        let first = sink.store("a.jpg", &meta, Some(&preds), None).unwrap();
        assert_eq!(first.json, Some(dir.path().join("ck/json/a.json")));

        let err = sink.store("a.png", &meta, None, None).unwrap_err();
        assert!(err.to_string().contains("already written"), "{}", err);

        let kept = read_predictions(&dir.path().join("ck/json/a.json")).unwrap();
        assert_eq!(kept.instance_info.len(), 1);
    }

    #[test]
    fn png_fallback_does_not_claim_a_sibling_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ResultSink::new(Some(dir.path().to_path_buf()), "ck".into(), false);
        let meta = DatasetMeta::coco();
        let frame = RgbImage::new(2, 2);

        let webp = sink.store("a.webp", &meta, None, Some(&frame)).unwrap();
        let png = sink.store("a.png", &meta, None, Some(&frame)).unwrap();
        assert_eq!(webp.frame, Some(dir.path().join("ck/img/a.webp.png")));
        assert_eq!(png.frame, Some(dir.path().join("ck/img/a.png")));
        assert!(sink.store("a.webp", &meta, None, Some(&frame)).is_err());
    }
}

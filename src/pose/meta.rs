//! Dataset keypoint schema.
//!
//! The schema fixes how many keypoints an instance has, their order and
//! names, and how they are linked and coloured when drawn. It is written
//! verbatim into every prediction document as `meta_info`.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

const COCO_KEYPOINTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

const COCO_SKELETON: [[usize; 2]; 19] = [
    [15, 13],
    [13, 11],
    [16, 14],
    [14, 12],
    [11, 12],
    [5, 11],
    [6, 12],
    [5, 6],
    [5, 7],
    [6, 8],
    [7, 9],
    [8, 10],
    [1, 2],
    [0, 1],
    [0, 2],
    [1, 3],
    [2, 4],
    [3, 5],
    [4, 6],
];

const COCO_FLIP_INDICES: [usize; 17] = [0, 2, 1, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13, 16, 15];

const COCO_SIGMAS: [f32; 17] = [
    0.026, 0.025, 0.025, 0.035, 0.035, 0.079, 0.079, 0.072, 0.072, 0.062, 0.062, 0.107, 0.107,
    0.087, 0.087, 0.089, 0.089,
];

const HEAD: [u8; 3] = [51, 153, 255];
const LEFT: [u8; 3] = [0, 255, 0];
const RIGHT: [u8; 3] = [255, 128, 0];

/// Keypoint schema of a pose dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub dataset_name: String,
    pub num_keypoints: usize,
    pub keypoint_id2name: BTreeMap<usize, String>,
    pub keypoint_name2id: BTreeMap<String, usize>,
    pub skeleton_links: Vec<[usize; 2]>,
    pub keypoint_colors: Vec<[u8; 3]>,
    pub skeleton_link_colors: Vec<[u8; 3]>,
    pub flip_indices: Vec<usize>,
    pub sigmas: Vec<f32>,
}

/// Dataset schema as written in a pose model config.
///
/// Only names and links are required; colours, flip indices and sigmas
/// get neutral defaults.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DatasetMetaFile {
    pub name: Option<String>,
    pub keypoint_names: Vec<String>,
    #[serde(default)]
    pub skeleton_links: Vec<[usize; 2]>,
    pub keypoint_colors: Option<Vec<[u8; 3]>>,
    pub skeleton_link_colors: Option<Vec<[u8; 3]>>,
    pub flip_indices: Option<Vec<usize>>,
    pub sigmas: Option<Vec<f32>>,
}

impl DatasetMeta {
    /// The 17-keypoint COCO body schema.
    pub fn coco() -> Self {
        let names: Vec<String> = COCO_KEYPOINTS.iter().map(|n| n.to_string()).collect();
        let keypoint_colors = (0..COCO_KEYPOINTS.len()).map(coco_side_color).collect();
        let skeleton_link_colors = COCO_SKELETON
            .iter()
            .map(|link| {
                let a = coco_side_color(link[0]);
                if a == coco_side_color(link[1]) {
                    a
                } else {
                    HEAD
                }
            })
            .collect();
        let mut meta = Self::from_names("coco", names);
        meta.skeleton_links = COCO_SKELETON.to_vec();
        meta.keypoint_colors = keypoint_colors;
        meta.skeleton_link_colors = skeleton_link_colors;
        meta.flip_indices = COCO_FLIP_INDICES.to_vec();
        meta.sigmas = COCO_SIGMAS.to_vec();
        meta
    }

    fn from_names(dataset_name: &str, names: Vec<String>) -> Self {
        let num_keypoints = names.len();
        let keypoint_id2name = names.iter().cloned().enumerate().collect();
        let keypoint_name2id = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Self {
            dataset_name: dataset_name.to_string(),
            num_keypoints,
            keypoint_id2name,
            keypoint_name2id,
            skeleton_links: Vec::new(),
            keypoint_colors: vec![[255, 128, 0]; num_keypoints],
            skeleton_link_colors: Vec::new(),
            flip_indices: (0..num_keypoints).collect(),
            sigmas: vec![0.025; num_keypoints],
        }
    }

    /// Build and validate a schema from its config-file form.
    pub fn from_file(file: DatasetMetaFile) -> Result<Self> {
        if file.keypoint_names.is_empty() {
            return Err(anyhow!("dataset schema must name at least one keypoint"));
        }
        let name = file.name.unwrap_or_else(|| "custom".to_string());
        let mut meta = Self::from_names(&name, file.keypoint_names);
        let count = meta.num_keypoints;

        for link in &file.skeleton_links {
            if link[0] >= count || link[1] >= count {
                return Err(anyhow!(
                    "skeleton link {:?} refers to a keypoint outside 0..{}",
                    link,
                    count
                ));
            }
        }
        meta.skeleton_links = file.skeleton_links;
        meta.skeleton_link_colors = vec![[0, 255, 0]; meta.skeleton_links.len()];

        if let Some(colors) = file.keypoint_colors {
            check_len("keypoint_colors", colors.len(), count)?;
            meta.keypoint_colors = colors;
        }
        if let Some(colors) = file.skeleton_link_colors {
            check_len("skeleton_link_colors", colors.len(), meta.skeleton_links.len())?;
            meta.skeleton_link_colors = colors;
        }
        if let Some(flip) = file.flip_indices {
            check_len("flip_indices", flip.len(), count)?;
            meta.flip_indices = flip;
        }
        if let Some(sigmas) = file.sigmas {
            check_len("sigmas", sigmas.len(), count)?;
            meta.sigmas = sigmas;
        }
        Ok(meta)
    }

    /// True for the 17-keypoint COCO body layout.
    pub fn is_coco_body(&self) -> bool {
        self.num_keypoints == COCO_KEYPOINTS.len()
            && COCO_KEYPOINTS
                .iter()
                .enumerate()
                .all(|(idx, name)| self.keypoint_id2name.get(&idx).map(String::as_str) == Some(*name))
    }
}

impl Default for DatasetMeta {
    fn default() -> Self {
        Self::coco()
    }
}

// left-side body keypoints have odd indices from 5 on
fn coco_side_color(idx: usize) -> [u8; 3] {
    match idx {
        0..=4 => HEAD,
        i if i % 2 == 1 => LEFT,
        _ => RIGHT,
    }
}

fn check_len(field: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(anyhow!(
            "dataset schema field {} has {} entries, expected {}",
            field,
            got,
            expected
        ));
    }
    Ok(())
}

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use topdown_pose::run::{self, build_engines, Runner, Stage};
use topdown_pose::ui::Ui;
use topdown_pose::{output_paths, read_predictions, RunConfig, RunSummary};

fn stub_config(input: &Path, output_root: &Path) -> RunConfig {
    let mut cfg = RunConfig::new(
        "stub://detector",
        "stub://detector",
        "stub://pose",
        "stub://person",
        input.to_string_lossy(),
    );
    cfg.output_root = Some(output_root.to_path_buf());
    cfg.save_predictions = true;
    cfg
}

fn run_stub(cfg: RunConfig) -> Result<RunSummary> {
    let engines = build_engines(&cfg)?;
    Runner::new(cfg, engines, Ui::silent())?.run()
}

fn write_image(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_pixel(64, 48, Rgb([90, 120, 150])).save(path).unwrap();
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(files_under(&path));
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

#[test]
fn single_image_writes_one_prediction_document() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let image = dir.path().join("frame_15.jpg");
    write_image(&image);
    let out = dir.path().join("out");

    let summary = run_stub(stub_config(&image, &out))?;
    assert_eq!(summary.processed, 1);
    assert!(summary.is_success());

    let json_files = files_under(&out.join("person/json"));
    assert_eq!(json_files, vec![out.join("person/json/frame_15.json")]);

    let record = read_predictions(&json_files[0])?;
    assert_eq!(record.meta_info.dataset_name, "coco");
    assert_eq!(record.instance_info.len(), 1);
    let instance = &record.instance_info[0];
    assert_eq!(instance.keypoints.len(), 17);
    assert_eq!(instance.keypoint_scores.len(), 17);
    assert!((instance.bbox_score - 0.95).abs() < 1e-6);
    assert_eq!(instance.bbox.len(), 1);

    assert!(out.join("person/img/frame_15.jpg").is_file());
    Ok(())
}

#[test]
fn failing_folder_item_does_not_abort_the_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let images = dir.path().join("images");
    write_image(&images.join("a.png"));
    std::fs::write(images.join("b.jpg"), b"truncated")?;
    write_image(&images.join("c.png"));
    let out = dir.path().join("out");

    let summary = run_stub(stub_config(&images, &out))?;
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].item, "b.jpg");
    assert_eq!(summary.failures[0].stage, Stage::Load);
    assert!(!summary.is_success());

    assert!(out.join("person/json/a.json").is_file());
    assert!(out.join("person/json/c.json").is_file());
    assert!(!out.join("person/json/b.json").exists());
    Ok(())
}

#[test]
fn images_sharing_a_stem_keep_the_first_prediction_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let images = dir.path().join("images");
    write_image(&images.join("a.jpg"));
    write_image(&images.join("a.png"));
    let out = dir.path().join("out");

    let summary = run_stub(stub_config(&images, &out))?;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].item, "a.png");
    assert_eq!(summary.failures[0].stage, Stage::Save);

    assert_eq!(files_under(&out.join("person/json")), vec![out.join("person/json/a.json")]);
    assert!(out.join("person/img/a.jpg").is_file());
    assert!(!out.join("person/img/a.png").exists());
    Ok(())
}

#[test]
fn pickle_items_resolve_against_dataset_root() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dataset = dir.path().join("h36m/images");
    write_image(&dataset.join("s_01_act_02/s_01_act_02_000001.png"));

    let records: Vec<BTreeMap<String, String>> = ["s_01_act_02/s_01_act_02_000001.png"]
        .iter()
        .map(|image| BTreeMap::from([("image".to_string(), image.to_string())]))
        .collect();
    let pkl = dir.path().join("h36m_validation.pkl");
    let mut file = std::fs::File::create(&pkl)?;
    serde_pickle::to_writer(&mut file, &records, serde_pickle::SerOptions::new())?;
    drop(file);

    let out = dir.path().join("out");
    let mut cfg = stub_config(&pkl, &out);
    cfg.dataset_root = Some(dataset);

    let summary = run_stub(cfg)?;
    assert_eq!(summary.processed, 1);

    let expected = output_paths(&out, "person", "s_01_act_02/s_01_act_02_000001.png");
    assert!(expected.json.is_file());
    assert!(expected.image.is_file());
    assert_eq!(
        expected.json,
        out.join("person/json/s_01_act_02/s_01_act_02_000001.json")
    );
    Ok(())
}

#[test]
fn pickle_without_dataset_root_fails_before_processing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pkl = dir.path().join("list.pkl");
    let empty: Vec<BTreeMap<String, String>> = Vec::new();
    serde_pickle::to_writer(&mut std::fs::File::create(&pkl)?, &empty, serde_pickle::SerOptions::new())?;

    let err = run_stub(stub_config(&pkl, &dir.path().join("out"))).unwrap_err();
    assert!(err.to_string().contains("dataset root"));
    Ok(())
}

#[test]
fn heatmap_panel_doubles_saved_frame_height() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let image = dir.path().join("a.png");
    write_image(&image);
    let out = dir.path().join("out");
    let mut cfg = stub_config(&image, &out);
    cfg.draw.draw_heatmap = true;

    run_stub(cfg)?;
    let saved = image::open(out.join("person/img/a.png"))?;
    assert_eq!((saved.width(), saved.height()), (64, 96));
    Ok(())
}

#[test]
fn webcam_stub_runs_bounded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out");
    let mut cfg = stub_config(Path::new("webcam"), &out);
    cfg.camera.device = "stub://camera".into();
    cfg.camera.max_frames = 2;

    let summary = run_stub(cfg)?;
    assert_eq!(summary.processed, 2);
    assert_eq!(
        files_under(&out.join("person/json")),
        vec![
            out.join("person/json/webcam_000001.json"),
            out.join("person/json/webcam_000002.json"),
        ]
    );
    Ok(())
}

#[test]
fn configuration_errors_stop_before_engines_are_built() {
    let mut cfg = RunConfig::new(
        "/nonexistent/det.toml",
        "det.onnx",
        "/nonexistent/pose.toml",
        "pose.onnx",
        "a.jpg",
    );
    cfg.output_root = None;
    let err = run::run(cfg, Ui::silent(), Arc::new(AtomicBool::new(false))).unwrap_err();
    assert!(err.to_string().contains("nothing to do"));
}

#[test]
fn unsupported_input_type_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_stub(stub_config(Path::new("clips/walk.mp4"), dir.path())).unwrap_err();
    assert_eq!(err.to_string(), "file walk.mp4 has invalid format");
}

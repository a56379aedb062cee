//! Run driver.
//!
//! Builds the engines once, resolves the input into items and walks them
//! strictly in order through the pipeline and the sink. A failing item is
//! reported and skipped unless `fail_fast` is set.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::camera::{frame_id, CameraConfig, CameraSource};
use crate::config::{RunConfig, DEFAULT_DEVICE};
use crate::detect::{DetectorBackend, StubDetector};
use crate::display::FrameWindow;
use crate::input::{classify_input, resolve_items, InputItem, InputKind};
use crate::model_config::{is_stub, DetectorModelConfig, PoseModelConfig};
use crate::pipeline::process_one_image;
use crate::pose::{DatasetMeta, PoseBackend, StubPoseEstimator};
use crate::sink::{checkpoint_name, ResultSink, StoredOutputs};
use crate::ui::Ui;
use crate::visualize::Visualizer;

/// The two inference engines of a run.
pub struct Engines {
    pub detector: Box<dyn DetectorBackend>,
    pub pose: Box<dyn PoseBackend>,
}

/// Build both engines from their config and checkpoint paths.
///
/// `stub://` checkpoints select the deterministic stub engines.
pub fn build_engines(cfg: &RunConfig) -> Result<Engines> {
    if cfg.device != DEFAULT_DEVICE {
        log::warn!(
            "device {} is not supported by the inference backends; using {}",
            cfg.device,
            DEFAULT_DEVICE
        );
    }

    let det_config = DetectorModelConfig::load(&cfg.det_config).context("failed to load detector config")?;
    let mut detector = build_detector(&cfg.det_checkpoint, det_config)?;
    detector
        .warm_up()
        .with_context(|| format!("{} detector warm-up failed", detector.name()))?;

    let pose_config = PoseModelConfig::load(&cfg.pose_config).context("failed to load pose config")?;
    let pose = build_pose(&cfg.pose_checkpoint, pose_config, cfg.draw.draw_heatmap)?;

    log::info!(
        "engines ready: detector={} pose={} ({} keypoints)",
        detector.name(),
        pose.name(),
        pose.dataset_meta().num_keypoints
    );
    Ok(Engines { detector, pose })
}

fn build_detector(checkpoint: &str, config: DetectorModelConfig) -> Result<Box<dyn DetectorBackend>> {
    if is_stub(checkpoint) {
        return Ok(Box::new(StubDetector::centered_person()));
    }
    tract_detector(checkpoint, config)
}

#[cfg(feature = "backend-tract")]
fn tract_detector(checkpoint: &str, config: DetectorModelConfig) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(crate::detect::TractDetector::new(checkpoint, config)?))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_detector(checkpoint: &str, _config: DetectorModelConfig) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector checkpoint {} needs the `backend-tract` feature",
        checkpoint
    ))
}

fn build_pose(checkpoint: &str, config: PoseModelConfig, output_heatmaps: bool) -> Result<Box<dyn PoseBackend>> {
    if is_stub(checkpoint) {
        let meta = config.dataset_meta()?;
        return Ok(Box::new(StubPoseEstimator::new(meta).with_heatmaps(output_heatmaps)));
    }
    tract_pose(checkpoint, config, output_heatmaps)
}

#[cfg(feature = "backend-tract")]
fn tract_pose(checkpoint: &str, config: PoseModelConfig, output_heatmaps: bool) -> Result<Box<dyn PoseBackend>> {
    Ok(Box::new(crate::pose::TractPoseEstimator::new(
        checkpoint,
        config,
        output_heatmaps,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_pose(checkpoint: &str, _config: PoseModelConfig, _output_heatmaps: bool) -> Result<Box<dyn PoseBackend>> {
    Err(anyhow!(
        "pose checkpoint {} needs the `backend-tract` feature",
        checkpoint
    ))
}

/// Where an item failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Load,
    Inference,
    Save,
    Display,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Inference => "inference",
            Stage::Save => "save",
            Stage::Display => "display",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct ItemFailure {
    pub item: String,
    pub stage: Stage,
    pub error: anyhow::Error,
}

#[derive(Clone, Debug)]
pub struct ItemSuccess {
    pub item: String,
    pub boxes: usize,
    pub instances: usize,
    pub outputs: StoredOutputs,
}

#[derive(Debug)]
pub enum ItemReport {
    Processed(ItemSuccess),
    Failed(ItemFailure),
}

impl ItemReport {
    pub fn item(&self) -> &str {
        match self {
            ItemReport::Processed(success) => &success.item,
            ItemReport::Failed(failure) => &failure.item,
        }
    }
}

/// End-of-run totals.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub instances: usize,
    pub failures: Vec<ItemFailure>,
    /// The run stopped early on Ctrl-C or a closed window.
    pub interrupted: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, report: ItemReport) -> Option<&ItemFailure> {
        match report {
            ItemReport::Processed(success) => {
                self.processed += 1;
                self.instances += success.instances;
                None
            }
            ItemReport::Failed(failure) => {
                self.failures.push(failure);
                self.failures.last()
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {} item(s), {} instance(s), {} failed",
            self.processed,
            self.instances,
            self.failures.len()
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        for failure in &self.failures {
            write!(f, "\n  {} [{}]: {:#}", failure.item, failure.stage, failure.error)?;
        }
        Ok(())
    }
}

/// Drives items through the pipeline and sink.
pub struct Runner {
    cfg: RunConfig,
    engines: Engines,
    meta: DatasetMeta,
    visualizer: Option<Visualizer>,
    sink: ResultSink,
    window: Option<FrameWindow>,
    stop: Arc<AtomicBool>,
    ui: Ui,
}

impl Runner {
    pub fn new(cfg: RunConfig, engines: Engines, ui: Ui) -> Result<Self> {
        cfg.validate()?;
        let meta = engines.pose.dataset_meta().clone();
        let visualizer = if cfg.wants_rendering() {
            Some(Visualizer::new(cfg.draw.clone(), meta.clone())?)
        } else {
            None
        };
        let sink = ResultSink::new(
            cfg.output_root.clone(),
            checkpoint_name(&cfg.pose_checkpoint),
            cfg.save_predictions,
        );
        sink.prepare()?;
        let window = cfg
            .show
            .then(|| FrameWindow::new("topdown_demo", cfg.show_interval));

        Ok(Self {
            cfg,
            engines,
            meta,
            visualizer,
            sink,
            window,
            stop: Arc::new(AtomicBool::new(false)),
            ui,
        })
    }

    /// Flag checked between items; setting it ends the run after the
    /// current item.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn with_stop_handle(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Classify the configured input and process all of it.
    pub fn run(&mut self) -> Result<RunSummary> {
        let kind = classify_input(&self.cfg.input)?;
        log::info!("input {} classified as {}", self.cfg.input, kind);
        match kind {
            InputKind::Webcam => self.run_camera(),
            _ => {
                let items = resolve_items(kind, &self.cfg.input, self.cfg.dataset_root.as_deref())?;
                self.run_items(&items)
            }
        }
    }

    /// Process listed items in order.
    pub fn run_items(&mut self, items: &[InputItem]) -> Result<RunSummary> {
        let fail_fast = self.cfg.fail_fast;
        let progress = self.ui.progress("images", Some(items.len() as u64));
        let mut summary = RunSummary::default();

        for report in self.reports(items) {
            progress.advance(report.item());
            settle(&mut summary, report, fail_fast)?;
        }
        summary.interrupted = summary.processed + summary.failures.len() < items.len();
        Ok(summary)
    }

    /// One report per item, in order. Ends early once the stop flag is set.
    pub fn reports<'a>(&'a mut self, items: &'a [InputItem]) -> impl Iterator<Item = ItemReport> + 'a {
        let stop = Arc::clone(&self.stop);
        items
            .iter()
            .take_while(move |_| !stop.load(Ordering::SeqCst))
            .map(move |item| self.process_item(item))
    }

    /// Process camera frames until stopped or `max_frames` is reached.
    ///
    /// Capture errors end the run; per-frame inference and save errors are
    /// isolated like any other item.
    pub fn run_camera(&mut self) -> Result<RunSummary> {
        let mut camera = CameraSource::new(CameraConfig::from(&self.cfg.camera))?;
        camera.connect()?;

        let max_frames = self.cfg.camera.max_frames;
        let mut summary = RunSummary::default();
        let progress = self.ui.progress("frames", (max_frames > 0).then_some(max_frames));

        while max_frames == 0 || camera.frames_captured() < max_frames {
            if self.should_stop() {
                summary.interrupted = true;
                break;
            }
            let frame = camera
                .next_frame()
                .with_context(|| format!("failed to capture {}", frame_id(camera.frames_captured() + 1)))?;
            let report = self.process_frame(&frame.id, &frame.image);
            progress.advance(&frame.id);
            settle(&mut summary, report, self.cfg.fail_fast)?;
        }
        Ok(summary)
    }

    /// Load and process one listed item.
    pub fn process_item(&mut self, item: &InputItem) -> ItemReport {
        match load_rgb(&item.path) {
            Ok(frame) => self.process_frame(&item.id, &frame),
            Err(error) => ItemReport::Failed(ItemFailure {
                item: item.id.clone(),
                stage: Stage::Load,
                error,
            }),
        }
    }

    /// Run the pipeline on one frame, then save and show the results.
    pub fn process_frame(&mut self, id: &str, frame: &RgbImage) -> ItemReport {
        let failed = |stage, error| {
            ItemReport::Failed(ItemFailure {
                item: id.to_string(),
                stage,
                error,
            })
        };

        let outcome = match process_one_image(
            frame,
            self.engines.detector.as_mut(),
            self.engines.pose.as_mut(),
            &self.cfg,
            self.visualizer.as_ref(),
        ) {
            Ok(outcome) => outcome,
            Err(error) => return failed(Stage::Inference, error),
        };

        let outputs = match self
            .sink
            .store(id, &self.meta, outcome.instances.as_ref(), outcome.frame.as_ref())
        {
            Ok(outputs) => outputs,
            Err(error) => return failed(Stage::Save, error),
        };

        if let (Some(window), Some(rendered)) = (self.window.as_mut(), outcome.frame.as_ref()) {
            match window.show(rendered) {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("display window closed; stopping");
                    self.stop.store(true, Ordering::SeqCst);
                }
                Err(error) => return failed(Stage::Display, error),
            }
        }

        log::debug!("{}: {} instance(s)", id, outcome.instance_count());
        ItemReport::Processed(ItemSuccess {
            item: id.to_string(),
            boxes: outcome.boxes,
            instances: outcome.instance_count(),
            outputs,
        })
    }
}

fn settle(summary: &mut RunSummary, report: ItemReport, fail_fast: bool) -> Result<()> {
    if let Some(failure) = summary.record(report) {
        log::warn!("{}: {} failed: {:#}", failure.item, failure.stage, failure.error);
        if fail_fast {
            return Err(anyhow!(
                "{}: {} failed: {:#}",
                failure.item,
                failure.stage,
                failure.error
            ));
        }
    }
    Ok(())
}

fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(image.to_rgb8())
}

/// Validate `cfg`, build the engines and process the whole input.
pub fn run(cfg: RunConfig, ui: Ui, stop: Arc<AtomicBool>) -> Result<RunSummary> {
    cfg.validate()?;
    let engines = {
        let _stage = ui.stage("Load models");
        build_engines(&cfg)?
    };
    let mut runner = Runner::new(cfg, engines, ui)?.with_stop_handle(stop);
    runner.run()
}

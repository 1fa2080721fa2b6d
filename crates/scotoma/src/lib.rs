//! # Scotoma
//!
//! Gaze-contingent scotoma simulation. Each update tick the pipeline polls
//! the eye tracker, resolves a world-space gaze ray, finds the area of
//! interest under gaze, and drives a two-pass blur centered on the gaze
//! point. Calibration loss pauses simulation time until the tracker recovers.
//! Accepted samples can be logged to CSV and the rendered surface captured
//! periodically.

pub mod aoi;
pub mod calibration;
pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod projection;
pub mod recorder;
pub mod render;
pub mod resolver;
pub mod source;
pub mod types;

pub use aoi::{AoiRaycaster, Collider, SceneQuery, Shape, StaticScene};
pub use calibration::{CalibrationMonitor, CalibrationService};
pub use config::{GazeSourceKind, PipelineConfig};
pub use error::PipelineError;
pub use projection::{GazeProjector, GraphicsBackend};
pub use render::{BlurFilter, BlurParams, BlurType, CpuBlurFilter, ScotomaRenderer, Surface};
pub use resolver::GazeRayResolver;
pub use source::GazeInput;
pub use types::*;

use capture::ScreenshotTask;
use clock::{IntervalTimer, SimClock, TimeScale};
use crossbeam_channel::{Sender, TrySendError};
use recorder::GazeRecorder;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// The engine side of the frame loop
pub trait Host: Send {
    fn head_pose(&mut self) -> Pose;

    /// Camera image to blur this frame
    fn camera_frame(&mut self) -> &Surface;
}

/// External services the pipeline is wired to
pub struct Collaborators {
    pub input: GazeInput,
    pub calibration: Arc<dyn CalibrationService>,
    pub scene: Box<dyn SceneQuery>,
    pub blur: Box<dyn BlurFilter>,
}

/// Owns every stage of the gaze pipeline and the session resources
pub struct GazePipeline {
    config: PipelineConfig,
    input: GazeInput,
    resolver: GazeRayResolver,
    projector: GazeProjector,
    aoi: AoiRaycaster,
    calibration: CalibrationMonitor,
    clock: SimClock,
    recorder: GazeRecorder,
    screenshots: ScreenshotTask,
    renderer: ScotomaRenderer,
    /// The off-screen surface the renderer writes and screenshots read
    target: Option<Surface>,
    observer_tx: Option<Sender<FrameReport>>,
    rate_log: IntervalTimer,
    tick: u64,
    /// Recording waits for the start calibration to finish
    recording_pending: bool,
}

impl GazePipeline {
    pub fn new(config: PipelineConfig, parts: Collaborators) -> Self {
        log::info!(
            "Initializing gaze pipeline (source: {:?}, backend: {:?})",
            parts.input.kind(),
            config.render.backend
        );
        if parts.input.kind() != config.gaze.source {
            log::warn!(
                "Configured source {:?} differs from bound input {:?}",
                config.gaze.source,
                parts.input.kind()
            );
        }

        let time_scale = TimeScale::default();
        let calibration = CalibrationMonitor::new(
            parts.calibration,
            time_scale.clone(),
            config.calibration.poll_interval(),
            config.gaze.toggle_scotoma,
        );

        Self {
            resolver: GazeRayResolver::new(parts.input.kind()),
            projector: GazeProjector::new(
                config.eye_camera.camera(),
                config.render.backend,
                config.gaze.floating_distance,
            ),
            aoi: AoiRaycaster::new(parts.scene, config.fixed_camera.camera(), config.scene.aoi_tag.clone()),
            calibration,
            clock: SimClock::new(time_scale),
            recorder: GazeRecorder::new(),
            screenshots: ScreenshotTask::new(
                config.scene.name.clone(),
                config.recording.output_dir.clone(),
                config.recording.screenshot_interval_secs,
            ),
            renderer: ScotomaRenderer::new(parts.blur, config.render.blur_params()),
            target: None,
            observer_tx: None,
            rate_log: IntervalTimer::new(1.0),
            tick: 0,
            recording_pending: false,
            input: parts.input,
            config,
        }
    }

    /// Publish every frame report to an external consumer
    pub fn connect_observer(&mut self, tx: Sender<FrameReport>) {
        log::info!("Connecting frame report observer");
        self.observer_tx = Some(tx);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationMonitor {
        &self.calibration
    }

    pub fn time_scale(&self) -> &TimeScale {
        self.clock.time_scale()
    }

    /// Scaled simulation seconds since start
    pub fn sim_time(&self) -> f64 {
        self.clock.elapsed()
    }

    pub fn resolver(&self) -> &GazeRayResolver {
        &self.resolver
    }

    /// Normalized gaze read fresh for this render frame; `None` renders at
    /// the center
    pub fn gaze_position(&mut self, head: Pose) -> Option<NormalizedGazePosition> {
        if !self.input.is_bound() {
            log::debug!("No eye-tracking source bound, scotoma stays centered");
            return None;
        }
        if !self.calibration.is_gaze_usable() {
            return None;
        }
        match self.input.latest() {
            Ok(sample) => self.projector.project(&sample, &head),
            Err(e) => {
                log::debug!("Gaze read for render failed: {e}");
                None
            }
        }
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.target.as_ref()
    }

    pub fn toggle_debug_ring(&mut self) -> bool {
        self.renderer.toggle_debug_ring()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn recording_path(&self) -> Option<&std::path::Path> {
        self.recorder.path()
    }

    /// Open the session log and, if configured, start screenshots
    pub fn start_recording(&mut self) -> error::Result<PathBuf> {
        let path = self
            .recorder
            .start(&self.config.scene.name, &self.config.recording.output_dir)?;
        if self.config.recording.screenshots {
            self.screenshots.start()?;
        }
        Ok(path)
    }

    pub fn stop_recording(&mut self) -> error::Result<()> {
        let flushed = self.recorder.stop();
        self.screenshots.stop();
        flushed
    }

    /// Kick off the optional start calibration and recording per
    /// configuration. Never waits: with a start calibration in flight,
    /// recording begins on the first tick after it completes.
    pub fn begin_session(&mut self) {
        if self.config.calibration.calibrate_on_start {
            self.calibration.start_calibration();
            self.recording_pending = self.config.recording.enabled;
        } else if self.config.recording.enabled {
            self.start_session_recording();
        }
    }

    fn start_session_recording(&mut self) {
        if let Err(e) = self.start_recording() {
            log::error!("Failed to start recording: {e}");
        }
    }

    /// One update tick. `real_dt` is the unscaled frame delta in seconds.
    pub fn update(&mut self, real_dt: f32, head: Pose) -> FrameReport {
        self.tick += 1;
        let scaled_dt = self.clock.tick(real_dt);

        let tracking = self.calibration.check();
        if self.recording_pending && !self.calibration.is_recalibrating() {
            self.recording_pending = false;
            self.start_session_recording();
        }

        let sample = if tracking { self.poll_sample() } else { None };

        let ray = match &sample {
            Some(s) => self.resolver.resolve(s, &head),
            None => self.resolver.ray(),
        };
        let aoi = match &sample {
            Some(s) if s.status.is_valid() => self.aoi.cast(&ray),
            _ => AoiHit::none(),
        };
        let indicator = IndicatorPose::floating(
            &ray,
            self.config.gaze.floating_distance,
            self.calibration.indicator_visible(),
        );

        if let Some(s) = &sample {
            self.log_samples(s, &head, &aoi);
        }
        if self.rate_log.advance(real_dt) {
            if let Some(n) = self.input.samples_last_second() {
                log::debug!("Gaze records in the last second: {n}");
            }
        }
        self.screenshots.advance(scaled_dt, self.target.as_ref());

        let report = FrameReport {
            tick: self.tick,
            ray,
            fixation: self.resolver.state().fixation,
            aoi,
            indicator,
            calibration: self.calibration.state(),
        };
        self.publish(&report);
        report
    }

    fn poll_sample(&mut self) -> Option<GazeSample> {
        match self.input.poll() {
            Ok(sample) => Some(sample),
            Err(PipelineError::SensorUnavailable) => {
                log::debug!("No gaze input bound, retrying next tick");
                None
            }
            Err(e) => {
                log::warn!("Gaze poll failed: {e}");
                None
            }
        }
    }

    /// Every record since the last tick goes to the log with this tick's AOI
    fn log_samples(&mut self, current: &GazeSample, head: &Pose, aoi: &AoiHit) {
        let drained = self.input.drain_since_last();
        if !self.recorder.is_recording() {
            return;
        }
        match self.input.kind() {
            GazeSourceKind::DeviceFeature => self.recorder.record(current, head, aoi),
            GazeSourceKind::DedicatedApi => {
                for s in &drained {
                    self.recorder.record(s, head, aoi);
                }
            }
        }
    }

    fn publish(&mut self, report: &FrameReport) {
        let Some(tx) = &self.observer_tx else {
            return;
        };
        match tx.try_send(report.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("Observer lagging, dropped frame {}", report.tick),
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Frame report observer disconnected");
                self.observer_tx = None;
            }
        }
    }

    /// Blur `src` around the gaze seen from `head` into the off-screen surface
    pub fn render(&mut self, head: Pose, src: &Surface) -> &Surface {
        let gaze = self.gaze_position(head);
        let target = self
            .target
            .get_or_insert_with(|| Surface::new(src.width(), src.height()));
        self.renderer.render(gaze, src, target);
        target
    }

    /// Fixed-rate frame loop until `shutdown` flips to true
    pub async fn run(&mut self, host: &mut dyn Host, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        log::info!("Starting gaze pipeline loop at {} Hz", self.config.gaze.update_hz);
        self.begin_session();

        let mut ticker = tokio::time::interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last = tokio::time::Instant::now();

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            let now = tokio::time::Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;

            let head = host.head_pose();
            let report = self.update(dt, head);
            if report.tick % u64::from(self.config.gaze.update_hz) == 0 {
                log::debug!(
                    "Frame {}: AOI {}, calibration {}",
                    report.tick,
                    report.aoi.aoi_id,
                    report.calibration
                );
            }
            let head = host.head_pose();
            self.render(head, host.camera_frame());
        }
        log::info!("Gaze pipeline loop stopped");
        Ok(())
    }

    /// Flush and close the log first, then halt the capture writer and the
    /// calibration task
    pub fn shutdown(&mut self) -> error::Result<()> {
        log::info!("Shutting down gaze pipeline...");
        let flushed = self.recorder.stop();
        self.screenshots.stop();
        self.calibration.shutdown();
        flushed
    }
}

//! End-to-end scenarios through the whole gaze pipeline

use glam::{Quat, Vec3};
use scotoma::render::BlurUniforms;
use scotoma::source::{
    DedicatedApiSource, DeviceFeatureSource, DeviceProvider, EyeDevice, EyeFeatures, GazeApi,
};
use scotoma::{
    AoiHit, BlurFilter, CalibrationService, CalibrationState, Collaborators, Collider, EyeRay,
    GazePipeline, GazeSample, GazeSourceKind, GazeStatus, Host, PipelineConfig, Pose, Shape,
    StaticScene, Surface,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ApiState {
    current: GazeSample,
    pending: Vec<GazeSample>,
    connected: bool,
}

#[derive(Clone, Default)]
struct ScriptedApi(Arc<Mutex<ApiState>>);

impl ScriptedApi {
    fn connected() -> Self {
        let api = Self::default();
        api.0.lock().unwrap().connected = true;
        api
    }

    fn push(&self, sample: GazeSample) {
        let mut state = self.0.lock().unwrap();
        state.current = sample;
        state.pending.push(sample);
    }

    /// Move the live gaze without delivering a new buffered record
    fn set_current(&self, sample: GazeSample) {
        self.0.lock().unwrap().current = sample;
    }
}

impl GazeApi for ScriptedApi {
    fn gaze(&mut self) -> GazeSample {
        self.0.lock().unwrap().current
    }

    fn drain_since_last(&mut self) -> Vec<GazeSample> {
        std::mem::take(&mut self.0.lock().unwrap().pending)
    }

    fn is_connected(&self) -> bool {
        self.0.lock().unwrap().connected
    }
}

struct FakeTracker {
    allowed: AtomicBool,
    calibrated: AtomicBool,
    requests: AtomicU32,
}

impl FakeTracker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            allowed: AtomicBool::new(true),
            calibrated: AtomicBool::new(true),
            requests: AtomicU32::new(0),
        })
    }
}

impl CalibrationService for FakeTracker {
    fn is_gaze_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }
    fn is_calibrated(&self) -> bool {
        self.calibrated.load(Ordering::SeqCst)
    }
    fn request_calibration(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct RecordingFilter(Arc<Mutex<Vec<BlurUniforms>>>);

impl BlurFilter for RecordingFilter {
    fn blit(&mut self, src: &Surface, _original: &Surface, dst: &mut Surface, u: &BlurUniforms) {
        self.0.lock().unwrap().push(*u);
        dst.copy_from_slice(src);
    }
}

struct Rig {
    pipeline: GazePipeline,
    api: ScriptedApi,
    tracker: Arc<FakeTracker>,
    passes: RecordingFilter,
}

fn target_scene() -> StaticScene {
    StaticScene::new(vec![Collider::new(
        "Target",
        Shape::Box {
            min: Vec3::new(-1.0, -1.0, 3.0),
            max: Vec3::new(1.0, 1.0, 3.5),
        },
    )
    .tagged("AOI")])
}

fn rig(config: PipelineConfig) -> Rig {
    let api = ScriptedApi::connected();
    let tracker = FakeTracker::new();
    let passes = RecordingFilter::default();
    let parts = Collaborators {
        input: DedicatedApiSource::new(Box::new(api.clone())).into(),
        calibration: tracker.clone(),
        scene: Box::new(target_scene()),
        blur: Box::new(passes.clone()),
    };
    Rig {
        pipeline: GazePipeline::new(config, parts),
        api,
        tracker,
        passes,
    }
}

fn api_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.gaze.source = GazeSourceKind::DedicatedApi;
    config
}

fn forward_sample(frame: u64) -> GazeSample {
    GazeSample {
        frame,
        status: GazeStatus::Valid,
        left_status: GazeStatus::Valid,
        right_status: GazeStatus::Valid,
        left: EyeRay::new(Vec3::new(-0.03, 0.0, 0.0), Vec3::Z),
        right: EyeRay::new(Vec3::new(0.03, 0.0, 0.0), Vec3::Z),
        combined: EyeRay::new(Vec3::ZERO, Vec3::Z),
        focus_distance: 5.0,
        focus_stability: 0.9,
        ..Default::default()
    }
}

fn frame() -> Surface {
    Surface::from_pixel(32, 16, image::Rgba([90, 90, 90, 255]))
}

struct ScriptedHost {
    frame: Surface,
}

impl Host for ScriptedHost {
    fn head_pose(&mut self) -> Pose {
        Pose::IDENTITY
    }

    fn camera_frame(&mut self) -> &Surface {
        &self.frame
    }
}

/// Center-eye device whose next read is whatever the test last stored
#[derive(Clone)]
struct FixedEyes(Arc<Mutex<Option<EyeFeatures>>>);

impl EyeDevice for FixedEyes {
    fn name(&self) -> &str {
        "fixed-eyes"
    }
    fn is_valid(&self) -> bool {
        true
    }
    fn eyes(&self) -> Option<EyeFeatures> {
        *self.0.lock().unwrap()
    }
}

impl DeviceProvider for FixedEyes {
    fn center_eye_device(&mut self) -> Option<Box<dyn EyeDevice>> {
        Some(Box::new(self.clone()))
    }
}

#[tokio::test]
async fn invalid_combined_gaze_is_neutral() {
    let mut rig = rig(api_config());
    rig.api.push(GazeSample {
        status: GazeStatus::Invalid,
        ..forward_sample(1)
    });

    let report = rig.pipeline.update(0.011, Pose::IDENTITY);
    assert_eq!(report.aoi, AoiHit::none());
    assert_eq!(report.aoi.aoi_id, "None");
    assert_eq!(report.aoi.world_point, Vec3::ZERO);
    assert_eq!(report.aoi.screen_point, Vec3::ZERO);
    assert!(rig.pipeline.gaze_position(Pose::IDENTITY).is_none());

    rig.pipeline.render(Pose::IDENTITY, &frame());
    let passes = rig.passes.0.lock().unwrap();
    assert_eq!(passes.len(), 2);
    for pass in passes.iter() {
        assert_eq!((pass.gaze_pos.x, pass.gaze_pos.y), (0.5, 0.5));
    }
}

#[tokio::test]
async fn forward_gaze_hits_tagged_target() {
    let mut rig = rig(api_config());
    rig.api.push(forward_sample(1));

    let report = rig.pipeline.update(0.011, Pose::IDENTITY);
    assert!(report.fixation.abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-5));
    assert_eq!(report.aoi.aoi_id, "Target");
    assert!(report.aoi.world_point.abs_diff_eq(Vec3::new(0.0, 0.0, 3.0), 1e-5));
    assert_eq!(report.calibration, CalibrationState::Calibrated);
    assert!(report.indicator.visible);
    assert!(report.indicator.position.abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-5));

    let gaze = rig.pipeline.gaze_position(Pose::IDENTITY).expect("gaze");
    assert!((gaze.x - 0.5).abs() < 1e-5 && (gaze.y - 0.5).abs() < 1e-5);
}

#[tokio::test]
async fn invalid_frame_holds_previous_ray() {
    let mut rig = rig(api_config());
    rig.api.push(forward_sample(1));
    let first = rig.pipeline.update(0.011, Pose::IDENTITY);

    rig.api.push(GazeSample {
        status: GazeStatus::Invalid,
        combined: EyeRay::new(Vec3::ONE, Vec3::X),
        ..forward_sample(2)
    });
    let second = rig.pipeline.update(0.011, Pose::IDENTITY);
    assert_eq!(second.ray, first.ray);
    assert_eq!(second.fixation, first.fixation);
}

#[tokio::test]
async fn unbound_sensor_renders_at_center() {
    let mut rig = rig(api_config());
    rig.api.0.lock().unwrap().connected = false;

    for _ in 0..3 {
        let report = rig.pipeline.update(0.011, Pose::IDENTITY);
        assert!(report.aoi.is_none());
    }
    rig.pipeline.render(Pose::IDENTITY, &frame());
    let passes = rig.passes.0.lock().unwrap();
    assert_eq!((passes[0].gaze_pos.x, passes[0].gaze_pos.y), (0.5, 0.5));
}

#[tokio::test(start_paused = true)]
async fn calibration_loss_pauses_simulation_time() {
    let mut rig = rig(api_config());
    rig.api.push(forward_sample(1));
    rig.pipeline.update(0.5, Pose::IDENTITY);
    assert_eq!(rig.pipeline.sim_time(), 0.5);

    rig.tracker.calibrated.store(false, Ordering::SeqCst);
    let report = rig.pipeline.update(0.5, Pose::IDENTITY);
    assert_eq!(report.calibration, CalibrationState::Recalibrating);
    assert!(!report.indicator.visible);
    assert!(report.aoi.is_none());
    assert!(rig.pipeline.time_scale().is_paused());
    let paused_at = rig.pipeline.sim_time();

    for _ in 0..10 {
        rig.pipeline.update(0.5, Pose::IDENTITY);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(rig.pipeline.sim_time(), paused_at);
    assert_eq!(rig.tracker.requests.load(Ordering::SeqCst), 1);

    rig.tracker.calibrated.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(rig.pipeline.time_scale().get(), 1.0);

    let report = rig.pipeline.update(0.5, Pose::IDENTITY);
    assert_eq!(report.calibration, CalibrationState::Calibrated);
    assert!(report.indicator.visible);
    assert_eq!(rig.pipeline.sim_time(), paused_at + 0.5);
}

#[tokio::test]
async fn recording_logs_every_drained_sample() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = api_config();
    config.scene.name = "Gallery".into();
    config.recording.output_dir = dir.path().join("Logs");
    let mut rig = rig(config);

    let path = rig.pipeline.start_recording().unwrap();
    rig.api.push(forward_sample(1));
    rig.api.push(forward_sample(2));
    rig.pipeline.update(0.011, Pose::IDENTITY);
    rig.api.push(GazeSample {
        status: GazeStatus::Invalid,
        ..forward_sample(3)
    });
    rig.pipeline.update(0.011, Pose::IDENTITY);
    rig.pipeline.shutdown().unwrap();
    assert!(!rig.pipeline.is_recording());

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    for line in &lines {
        assert_eq!(line.split(',').count(), 26);
    }
    let rows: Vec<Vec<&str>> = lines[1..].iter().map(|l| l.split(',').collect()).collect();
    assert_eq!(rows[0][0], "1");
    assert_eq!(rows[1][0], "2");
    assert_eq!(rows[1][19], "Target");
    assert_eq!(rows[2][10], "INVALID");
    assert_eq!(rows[2][19], "None");
    assert!(rows[2][11..19].iter().all(|f| f.is_empty()));
}

#[tokio::test]
async fn observer_receives_frame_reports() {
    let mut rig = rig(api_config());
    let (tx, rx) = crossbeam_channel::bounded(4);
    rig.pipeline.connect_observer(tx);

    rig.api.push(forward_sample(1));
    rig.pipeline.update(0.011, Pose::IDENTITY);
    rig.pipeline.update(0.011, Pose::IDENTITY);

    let reports: Vec<_> = rx.try_iter().collect();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].tick, 1);
    assert_eq!(reports[1].aoi.aoi_id, "Target");
}

#[tokio::test]
async fn render_follows_gaze_between_updates() {
    let mut rig = rig(api_config());
    rig.api.push(forward_sample(1));
    rig.pipeline.update(0.011, Pose::IDENTITY);
    rig.pipeline.render(Pose::IDENTITY, &frame());

    // the eye moves right before the next update tick
    rig.api.set_current(GazeSample {
        combined: EyeRay::new(Vec3::ZERO, Vec3::new(0.3, 0.0, 1.0).normalize()),
        ..forward_sample(2)
    });
    rig.pipeline.render(Pose::IDENTITY, &frame());

    let passes = rig.passes.0.lock().unwrap();
    assert_eq!(passes.len(), 4);
    assert!((passes[0].gaze_pos.x - 0.5).abs() < 1e-5);
    assert!(passes[2].gaze_pos.x > 0.55, "x={}", passes[2].gaze_pos.x);
    assert!((passes[2].gaze_pos.y - 0.5).abs() < 1e-5);
}

#[test]
fn recalibration_completes_without_async_runtime() {
    let mut rig = rig(api_config());
    rig.api.push(forward_sample(1));
    rig.pipeline.update(0.5, Pose::IDENTITY);

    rig.tracker.calibrated.store(false, Ordering::SeqCst);
    let report = rig.pipeline.update(0.5, Pose::IDENTITY);
    assert_eq!(report.calibration, CalibrationState::Recalibrating);
    assert!(rig.pipeline.time_scale().is_paused());
    for _ in 0..5 {
        rig.pipeline.update(0.5, Pose::IDENTITY);
    }
    assert_eq!(rig.pipeline.sim_time(), 0.5);
    assert_eq!(rig.tracker.requests.load(Ordering::SeqCst), 1);

    rig.tracker.calibrated.store(true, Ordering::SeqCst);
    let report = rig.pipeline.update(0.5, Pose::IDENTITY);
    assert_eq!(report.calibration, CalibrationState::Calibrated);
    assert_eq!(rig.pipeline.time_scale().get(), 1.0);

    let report = rig.pipeline.update(0.5, Pose::IDENTITY);
    assert!(report.indicator.visible);
    assert_eq!(report.aoi.aoi_id, "Target");
}

#[tokio::test]
async fn device_features_drive_fixation_and_aoi() {
    let eyes = FixedEyes(Arc::new(Mutex::new(Some(EyeFeatures {
        left_position: Some(Vec3::new(-0.03, 0.0, 0.0)),
        left_rotation: Some(Quat::IDENTITY),
        right_position: Some(Vec3::new(0.03, 0.0, 0.0)),
        right_rotation: Some(Quat::IDENTITY),
        fixation_point: Some(Vec3::new(0.0, 0.0, 5.0)),
    }))));
    let passes = RecordingFilter::default();
    let parts = Collaborators {
        input: DeviceFeatureSource::new(Box::new(eyes.clone())).into(),
        calibration: FakeTracker::new(),
        scene: Box::new(target_scene()),
        blur: Box::new(passes.clone()),
    };
    let mut pipeline = GazePipeline::new(PipelineConfig::default(), parts);

    let report = pipeline.update(0.011, Pose::IDENTITY);
    assert!(report.fixation.abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-5));
    assert_eq!(report.aoi.aoi_id, "Target");
    assert!(report.aoi.world_point.abs_diff_eq(Vec3::new(0.0, 0.0, 3.0), 1e-5));
    let gaze = pipeline.gaze_position(Pose::IDENTITY).expect("gaze");
    assert!((gaze.x - 0.5).abs() < 1e-5 && (gaze.y - 0.5).abs() < 1e-5);

    // feature read fails: the last fixation is held
    *eyes.0.lock().unwrap() = None;
    let held = pipeline.update(0.011, Pose::IDENTITY);
    assert_eq!(held.fixation, report.fixation);
    assert_eq!(held.aoi.aoi_id, "Target");

    // held fixation is head-local and turns with the head
    let turned = Pose::new(Vec3::ZERO, Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
    let report = pipeline.update(0.011, turned);
    assert!(report.fixation.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-4));
    assert!(report.aoi.is_none());
}

#[tokio::test(start_paused = true)]
async fn run_loop_flushes_log_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = api_config();
    config.scene.name = "Gallery".into();
    config.recording.enabled = true;
    config.recording.screenshots = true;
    config.recording.screenshot_interval_secs = 0.25;
    config.recording.output_dir = dir.path().join("Logs");
    let mut rig = rig(config);
    let mut host = ScriptedHost { frame: frame() };
    let (tx, rx) = tokio::sync::watch::channel(false);
    let api = rig.api.clone();

    let driven = tokio::time::timeout(Duration::from_secs(60), async {
        tokio::join!(rig.pipeline.run(&mut host, rx), async {
            for i in 1..=10 {
                api.push(forward_sample(i));
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tx.send_replace(true);
        })
    })
    .await
    .expect("loop stops on shutdown");
    driven.0.unwrap();

    let path = rig.pipeline.recording_path().expect("log path").to_path_buf();
    rig.pipeline.shutdown().unwrap();
    assert!(!rig.pipeline.is_recording());

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.len() >= 2, "{text}");
    for line in &lines {
        assert_eq!(line.split(',').count(), 26);
    }
    assert_eq!(lines[1].split(',').next(), Some("1"));

    let captures = std::fs::read_dir(dir.path().join("Logs"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("RenderTextureCapture_Gallery_"))
        .count();
    assert!(captures >= 1);
}

#[tokio::test(start_paused = true)]
async fn start_calibration_never_blocks_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = api_config();
    config.calibration.calibrate_on_start = true;
    config.recording.enabled = true;
    config.recording.output_dir = dir.path().join("Logs");
    let mut rig = rig(config);
    rig.tracker.calibrated.store(false, Ordering::SeqCst);
    rig.api.push(forward_sample(1));
    let (reports_tx, reports_rx) = crossbeam_channel::bounded(1024);
    rig.pipeline.connect_observer(reports_tx);
    let mut host = ScriptedHost { frame: frame() };
    let (tx, rx) = tokio::sync::watch::channel(false);

    let driven = tokio::time::timeout(Duration::from_secs(60), async {
        tokio::join!(rig.pipeline.run(&mut host, rx), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send_replace(true);
        })
    })
    .await
    .expect("loop stops while the tracker is still uncalibrated");
    driven.0.unwrap();

    let reports: Vec<_> = reports_rx.try_iter().collect();
    assert!(!reports.is_empty());
    for report in &reports {
        assert_eq!(report.calibration, CalibrationState::Recalibrating);
        assert!(report.aoi.is_none());
    }
    assert_eq!(rig.tracker.requests.load(Ordering::SeqCst), 1);
    assert!(!rig.pipeline.is_recording());
    assert!(!rig.pipeline.time_scale().is_paused());

    rig.pipeline.shutdown().unwrap();
    assert!(!dir.path().join("Logs").exists());
}

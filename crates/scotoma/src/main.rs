//! Scotoma - gaze-contingent blur simulation
//!
//! Runs the gaze pipeline against a simulated headset:
//! - Simulated eye tracker (or a UDP gaze bridge) as the gaze source
//! - A static scene with tagged areas of interest
//! - CPU blur over a generated camera image
//! - Optional CSV gaze log and periodic screenshots

use anyhow::{Context, Result};
use clap::Parser;
use glam::{Quat, Vec3};
use log::LevelFilter;
use scotoma::source::sim::SimulatedTracker;
use scotoma::source::{self, DedicatedApiSource, DeviceFeatureSource, UdpGazeBridge};
use scotoma::{
    Collaborators, Collider, CpuBlurFilter, GazeInput, GazePipeline, GazeSourceKind,
    GraphicsBackend, Host, PipelineConfig, Pose, Shape, StaticScene, Surface,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "scotoma")]
#[command(about = "Gaze-contingent scotoma simulation", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scene name used in log and capture file names
    #[arg(long)]
    scene: Option<String>,

    /// Gaze input channel
    #[arg(long, value_enum)]
    source: Option<GazeSourceKind>,

    /// Write the CSV gaze log
    #[arg(long)]
    record: bool,

    /// Capture the blurred surface every simulated second
    #[arg(long)]
    screenshots: bool,

    /// Graphics backend whose viewport convention applies
    #[arg(long, value_enum)]
    backend: Option<GraphicsBackend>,

    /// Simulate a calibration loss after this many seconds
    #[arg(long, value_name = "SECS")]
    drop_calibration_after: Option<u64>,
}

/// Head bobbing gently in front of the gallery, with a generated camera image
struct SimulatedHost {
    started: Instant,
    frame: Surface,
}

impl SimulatedHost {
    fn new(width: u32, height: u32) -> Self {
        let frame = Surface::from_fn(width, height, |x, y| {
            let check = ((x / 16) + (y / 16)) % 2 == 0;
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = if check { 220 } else { 40 };
            image::Rgba([r, g, b, 255])
        });
        Self {
            started: Instant::now(),
            frame,
        }
    }
}

impl Host for SimulatedHost {
    fn head_pose(&mut self) -> Pose {
        let t = self.started.elapsed().as_secs_f32();
        Pose::new(
            Vec3::new(0.0, 1.6 + 0.01 * (t * 1.3).sin(), 0.0),
            Quat::from_rotation_y(0.05 * (t * 0.2).sin()),
        )
    }

    fn camera_frame(&mut self) -> &Surface {
        &self.frame
    }
}

fn gallery_scene(aoi_tag: &str) -> StaticScene {
    let painting = |name: &str, x: f32| {
        Collider::new(
            name,
            Shape::Box {
                min: Vec3::new(x - 0.35, 1.25, 2.0),
                max: Vec3::new(x + 0.35, 1.95, 2.05),
            },
        )
        .tagged(aoi_tag)
    };
    StaticScene::new(vec![
        painting("Painting_Left", -0.6),
        painting("Painting_Center", 0.0),
        painting("Painting_Right", 0.6),
        Collider::new(
            "Wall",
            Shape::Box {
                min: Vec3::new(-5.0, 0.0, 2.05),
                max: Vec3::new(5.0, 4.0, 2.3),
            },
        ),
    ])
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(scene) = &args.scene {
        config.scene.name = scene.clone();
    }
    if let Some(source) = args.source {
        config.gaze.source = source;
    }
    if let Some(backend) = args.backend {
        config.render.backend = backend;
    }
    config.recording.enabled |= args.record;
    config.recording.screenshots |= args.screenshots;
    config.validate()?;
    Ok(config)
}

async fn gaze_input(
    config: &PipelineConfig,
    tracker: &SimulatedTracker,
) -> Result<(GazeInput, Option<tokio::task::JoinHandle<()>>)> {
    if let Some(addr) = source::udp_gaze_addr_from_env().or(config.bridge.udp_addr) {
        let (bridge, handle) = UdpGazeBridge::bind(addr)
            .await
            .with_context(|| format!("bind UDP gaze bridge on {addr}"))?;
        if config.gaze.source != GazeSourceKind::DedicatedApi {
            log::warn!("UDP gaze bridge implies the dedicated API source");
        }
        let input = DedicatedApiSource::new(Box::new(bridge)).into();
        return Ok((input, Some(handle)));
    }

    let input = match config.gaze.source {
        GazeSourceKind::DeviceFeature => DeviceFeatureSource::new(tracker.device_provider()).into(),
        GazeSourceKind::DedicatedApi => DedicatedApiSource::new(tracker.gaze_api()).into(),
    };
    Ok((input, None))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    log::info!("═══════════════════════════════════════");
    log::info!("  Scotoma - gaze-contingent simulation");
    log::info!("═══════════════════════════════════════");

    let tracker = SimulatedTracker::new(Duration::from_secs(2));
    let (input, bridge_task) = gaze_input(&config, &tracker).await?;

    let parts = Collaborators {
        input,
        calibration: Arc::new(tracker.clone()),
        scene: Box::new(gallery_scene(&config.scene.aoi_tag)),
        blur: Box::new(CpuBlurFilter),
    };
    let mut host = SimulatedHost::new(config.render.width, config.render.height);
    let mut pipeline = GazePipeline::new(config, parts);

    if let Some(secs) = args.drop_calibration_after {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            log::info!("Simulating calibration loss");
            tracker.lose_calibration();
        });
    }

    log::info!("Press Ctrl+C to exit");
    log::info!("───────────────────────────────────────");

    // Set up Ctrl+C handler
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal...");
        let _ = tx.blocking_send(());
    })?;

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let pipeline_task = tokio::spawn(async move {
        if let Err(e) = pipeline.run(&mut host, stop_rx).await {
            log::error!("Pipeline error: {}", e);
        }
        pipeline
    });

    // Wait for shutdown signal
    rx.recv().await;
    stop_tx.send_replace(true);

    let mut pipeline = pipeline_task.await?;
    pipeline.shutdown()?;
    if let Some(task) = bridge_task {
        task.abort();
    }

    log::info!("Scotoma shutdown complete.");
    Ok(())
}

//! Pipeline configuration
//!
//! Loaded from TOML; every section falls back to its defaults so a config
//! file only needs the keys it changes.

use crate::error::PipelineError;
use crate::projection::{Camera, GraphicsBackend};
use crate::render::{BlurParams, BlurType};
use anyhow::{Context, Result};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which raw input channel feeds the pipeline. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GazeSourceKind {
    /// Poll per-eye features from the center-eye XR input device
    #[default]
    DeviceFeature,
    /// Pull aggregate gaze records from the eye-tracking API
    DedicatedApi,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub gaze: GazeConfig,
    pub scene: SceneConfig,
    pub render: RenderConfig,
    pub calibration: CalibrationConfig,
    pub recording: RecordingConfig,
    pub eye_camera: CameraConfig,
    pub fixed_camera: CameraConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    pub source: GazeSourceKind,
    /// Distance of the floating scotoma point along the gaze ray
    pub floating_distance: f32,
    /// Show the scotoma indicator while tracking is permitted
    pub toggle_scotoma: bool,
    /// Update tick rate of the host loop
    pub update_hz: u32,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            source: GazeSourceKind::DeviceFeature,
            floating_distance: 5.0,
            toggle_scotoma: true,
            update_hz: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub name: String,
    /// Tag that marks a collider as an area of interest
    pub aoi_tag: String,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            name: "Scene".to_string(),
            aoi_tag: "AOI".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub backend: GraphicsBackend,
    pub blur_type: BlurType,
    pub radius: f32,
    pub blur_intensity: f32,
    pub debug_ring: bool,
    /// Off-screen surface size
    pub width: u32,
    pub height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: GraphicsBackend::Vulkan,
            blur_type: BlurType::Peripheral,
            radius: 0.2,
            blur_intensity: 0.005,
            debug_ring: false,
            width: 640,
            height: 360,
        }
    }
}

impl RenderConfig {
    pub fn blur_params(&self) -> BlurParams {
        BlurParams::new(self.radius, self.blur_intensity, self.blur_type, self.debug_ring)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Real-time interval between calibration polls
    pub poll_interval_ms: u64,
    /// Force a fresh calibration when the session starts
    pub calibrate_on_start: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            calibrate_on_start: false,
        }
    }
}

impl CalibrationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Write the CSV gaze log
    pub enabled: bool,
    /// Capture the off-screen surface periodically
    pub screenshots: bool,
    pub output_dir: PathBuf,
    /// Simulation seconds between captures
    pub screenshot_interval_secs: f32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            screenshots: false,
            output_dir: PathBuf::from("Logs"),
            screenshot_interval_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub position: Vec3,
    pub rotation: Quat,
    pub vertical_fov_deg: f32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            vertical_fov_deg: 60.0,
            pixel_width: 1920,
            pixel_height: 1080,
        }
    }
}

impl CameraConfig {
    pub fn camera(&self) -> Camera {
        Camera::new(
            crate::types::Pose::new(self.position, self.rotation.normalize()),
            self.vertical_fov_deg.to_radians(),
            self.pixel_width,
            self.pixel_height,
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bind address of the UDP gaze bridge
    pub udp_addr: Option<SocketAddr>,
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable values and clamp blur parameters into their ranges
    pub fn validate(&mut self) -> std::result::Result<(), PipelineError> {
        if !(self.gaze.floating_distance.is_finite() && self.gaze.floating_distance > 0.0) {
            return Err(PipelineError::Config(format!(
                "gaze.floating_distance must be positive, got {}",
                self.gaze.floating_distance
            )));
        }
        if self.gaze.update_hz == 0 {
            return Err(PipelineError::Config("gaze.update_hz must be non-zero".into()));
        }
        if self.calibration.poll_interval_ms == 0 {
            return Err(PipelineError::Config(
                "calibration.poll_interval_ms must be non-zero".into(),
            ));
        }
        if !(self.recording.screenshot_interval_secs > 0.0) {
            return Err(PipelineError::Config(
                "recording.screenshot_interval_secs must be positive".into(),
            ));
        }
        if self.render.width == 0 || self.render.height == 0 {
            return Err(PipelineError::Config("render surface must not be empty".into()));
        }
        for cam in [&self.eye_camera, &self.fixed_camera] {
            if cam.pixel_width == 0 || cam.pixel_height == 0 {
                return Err(PipelineError::Config("camera resolution must not be empty".into()));
            }
            if !(cam.vertical_fov_deg > 0.0 && cam.vertical_fov_deg < 180.0) {
                return Err(PipelineError::Config(format!(
                    "camera field of view out of range: {}",
                    cam.vertical_fov_deg
                )));
            }
        }

        let params = self.render.blur_params();
        if params.radius != self.render.radius {
            log::warn!("render.radius {} clamped to {}", self.render.radius, params.radius);
            self.render.radius = params.radius;
        }
        if params.neighborhood_size != self.render.blur_intensity {
            log::warn!(
                "render.blur_intensity {} clamped to {}",
                self.render.blur_intensity,
                params.neighborhood_size
            );
            self.render.blur_intensity = params.neighborhood_size;
        }
        Ok(())
    }

    /// Period of one update tick
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.gaze.update_hz.max(1)))
    }
}

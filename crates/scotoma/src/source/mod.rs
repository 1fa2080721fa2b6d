//! Gaze sample sources
//!
//! Two mutually exclusive input channels produce the same [`GazeSample`]:
//! polling per-eye features from the center-eye XR device, or pulling
//! aggregate records from a dedicated eye-tracking API. The channel is
//! chosen once, when the pipeline is built.

use crate::config::GazeSourceKind;
use crate::error::Result;
use crate::types::GazeSample;
use glam::{Quat, Vec3};
use std::sync::{Mutex, MutexGuard};

mod api;
mod device;
pub mod sim;
mod udp;

pub use api::DedicatedApiSource;
pub use device::DeviceFeatureSource;
pub use udp::{parse_gaze_message, udp_gaze_addr_from_env, UdpGazeBridge};

/// Per-eye features exposed by an XR input device in one read.
///
/// Every field is an independent `tryGet`: `None` means that read failed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeFeatures {
    pub left_position: Option<Vec3>,
    pub left_rotation: Option<Quat>,
    pub right_position: Option<Vec3>,
    pub right_rotation: Option<Quat>,
    /// Head-local point both eyes converge on
    pub fixation_point: Option<Vec3>,
}

/// An XR input device bound at the center-eye node
pub trait EyeDevice: Send {
    fn name(&self) -> &str;

    /// False once the device has detached
    fn is_valid(&self) -> bool;

    /// Read the eyes feature; `None` if the device does not expose it this frame
    fn eyes(&self) -> Option<EyeFeatures>;
}

/// Enumerates devices at the center-eye node
pub trait DeviceProvider: Send {
    fn center_eye_device(&mut self) -> Option<Box<dyn EyeDevice>>;
}

/// A dedicated eye-tracking API producing aggregate gaze records
pub trait GazeApi: Send {
    /// Latest record. Vectors are relative to the head pose.
    fn gaze(&mut self) -> GazeSample;

    /// Every record received since the previous call
    fn drain_since_last(&mut self) -> Vec<GazeSample>;

    /// Whether the API currently has a tracker behind it
    fn is_connected(&self) -> bool {
        true
    }
}

/// The input channel, selected once from configuration
pub enum GazeInput {
    DeviceFeature(DeviceFeatureSource),
    DedicatedApi(DedicatedApiSource),
}

impl GazeInput {
    pub fn kind(&self) -> GazeSourceKind {
        match self {
            Self::DeviceFeature(_) => GazeSourceKind::DeviceFeature,
            Self::DedicatedApi(_) => GazeSourceKind::DedicatedApi,
        }
    }

    /// Poll this frame's sample; `SensorUnavailable` while nothing is bound
    pub fn poll(&mut self) -> Result<GazeSample> {
        match self {
            Self::DeviceFeature(source) => source.poll(),
            Self::DedicatedApi(source) => source.poll(),
        }
    }

    /// Fresh read of the current gaze for the render path; never drains
    /// records or advances frame counters
    pub fn latest(&mut self) -> Result<GazeSample> {
        match self {
            Self::DeviceFeature(source) => source.latest(),
            Self::DedicatedApi(source) => source.latest(),
        }
    }

    /// All samples received since the last update (only the API buffers them)
    pub fn drain_since_last(&mut self) -> Vec<GazeSample> {
        match self {
            Self::DeviceFeature(_) => Vec::new(),
            Self::DedicatedApi(source) => source.drain_since_last(),
        }
    }

    /// Drained record rate; the device channel has no buffer to count
    pub fn samples_last_second(&self) -> Option<usize> {
        match self {
            Self::DeviceFeature(_) => None,
            Self::DedicatedApi(source) => Some(source.samples_last_second()),
        }
    }

    /// Whether an eye-tracking source is currently bound
    pub fn is_bound(&self) -> bool {
        match self {
            Self::DeviceFeature(source) => source.is_bound(),
            Self::DedicatedApi(source) => source.is_bound(),
        }
    }
}

impl From<DeviceFeatureSource> for GazeInput {
    fn from(source: DeviceFeatureSource) -> Self {
        Self::DeviceFeature(source)
    }
}

impl From<DedicatedApiSource> for GazeInput {
    fn from(source: DedicatedApiSource) -> Self {
        Self::DedicatedApi(source)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lock that survives a panicked writer; gaze buffers are plain data
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

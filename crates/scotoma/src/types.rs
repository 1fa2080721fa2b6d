//! Core data types for the gaze pipeline

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// AOI id reported when the gaze ray hits nothing of interest
pub const NO_AOI: &str = "None";

/// Rigid transform (position + rotation), +Z forward, +Y up
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Map a point from this pose's local space into world space
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    /// Rotate a local direction into world space (no translation)
    pub fn transform_direction(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }

    /// Map a world point into this pose's local space
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.position)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Rotation whose +Z axis points along `forward` with +Y kept as close to `up` as possible.
///
/// Returns identity for a zero-length forward vector.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let Some(z) = forward.try_normalize() else {
        return Quat::IDENTITY;
    };
    let x = up
        .cross(z)
        .try_normalize()
        .unwrap_or_else(|| z.any_orthonormal_vector());
    let y = z.cross(x);
    Quat::from_mat3(&Mat3::from_cols(x, y, z)).normalize()
}

/// Validity of a combined or per-eye gaze signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GazeStatus {
    #[default]
    Invalid,
    Valid,
}

impl GazeStatus {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }

    pub fn from_valid(valid: bool) -> Self {
        if valid {
            Self::Valid
        } else {
            Self::Invalid
        }
    }

    /// Column value used in the CSV log
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
        }
    }
}

/// A gaze ray as reported by the sensor, relative to the head pose
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeRay {
    pub origin: Vec3,
    /// Unit length whenever the owning status is valid
    pub forward: Vec3,
}

impl EyeRay {
    pub fn new(origin: Vec3, forward: Vec3) -> Self {
        Self { origin, forward }
    }
}

/// One normalized gaze sample, produced fresh every frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeSample {
    /// Sensor frame number
    pub frame: u64,
    /// Monotonic sensor clock (nanoseconds)
    pub capture_time_ns: i64,
    /// Wall clock at the time the sample was accepted (milliseconds since epoch)
    pub log_time_ms: i64,
    /// Combined (cyclopean) gaze validity
    pub status: GazeStatus,
    pub left_status: GazeStatus,
    pub right_status: GazeStatus,
    pub left: EyeRay,
    pub right: EyeRay,
    pub combined: EyeRay,
    /// Head-local fixation point; only the device-feature strategy reports one
    #[serde(default)]
    pub fixation: Option<Vec3>,
    pub focus_distance: f32,
    pub focus_stability: f32,
}

/// The canonical world-space gaze ray
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeRay {
    pub origin: Vec3,
    /// Always unit length
    pub direction: Vec3,
}

impl GazeRay {
    /// Build a ray, renormalizing the direction. `None` for a zero-length direction.
    pub fn new(origin: Vec3, direction: Vec3) -> Option<Self> {
        direction
            .try_normalize()
            .map(|direction| Self { origin, direction })
    }

    pub fn point_at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

impl Default for GazeRay {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            direction: Vec3::Z,
        }
    }
}

/// World-space pose of one eye (visualization target)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyePose {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Result of the per-frame AOI raycast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiHit {
    pub aoi_id: String,
    pub world_point: Vec3,
    /// Pixel coordinates in the fixed observation camera; z is depth
    pub screen_point: Vec3,
}

impl AoiHit {
    /// The neutral "nothing of interest" result
    pub fn none() -> Self {
        Self {
            aoi_id: NO_AOI.to_string(),
            world_point: Vec3::ZERO,
            screen_point: Vec3::ZERO,
        }
    }

    pub fn is_none(&self) -> bool {
        self.aoi_id == NO_AOI
    }
}

impl Default for AoiHit {
    fn default() -> Self {
        Self::none()
    }
}

/// Gaze position as a viewport fraction in [0,1]x[0,1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedGazePosition {
    pub x: f32,
    pub y: f32,
}

impl NormalizedGazePosition {
    pub const CENTER: Self = Self { x: 0.5, y: 0.5 };

    /// Clamps both axes into [0,1]
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }
}

/// Eye-tracker calibration as tracked by the calibration monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CalibrationState {
    #[default]
    Calibrated,
    Lost,
    Recalibrating,
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Calibrated => "calibrated",
            Self::Lost => "lost",
            Self::Recalibrating => "recalibrating",
        };
        f.write_str(s)
    }
}

/// Placement of the floating scotoma indicator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPose {
    pub position: Vec3,
    /// Faces back towards the ray origin
    pub rotation: Quat,
    pub scale: f32,
    pub visible: bool,
}

impl IndicatorPose {
    /// Indicator floating `distance` along `ray`, facing the ray origin
    pub fn floating(ray: &GazeRay, distance: f32, visible: bool) -> Self {
        let position = ray.point_at(distance);
        Self {
            position,
            rotation: look_rotation(ray.origin - position, Vec3::Y),
            scale: distance,
            visible,
        }
    }
}

/// Everything one update tick produced, published to external observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameReport {
    pub tick: u64,
    pub ray: GazeRay,
    pub fixation: Vec3,
    pub aoi: AoiHit,
    pub indicator: IndicatorPose,
    pub calibration: CalibrationState,
}

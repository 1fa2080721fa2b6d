//! Camera projection and the normalized gaze position fed to the blur stage

use crate::types::{GazeSample, NormalizedGazePosition, Pose};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Active graphics API. Some backends put the viewport origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum GraphicsBackend {
    #[serde(rename = "direct3d11")]
    #[value(name = "direct3d11")]
    Direct3D11,
    #[serde(rename = "direct3d12")]
    #[value(name = "direct3d12")]
    Direct3D12,
    #[serde(rename = "metal")]
    #[value(name = "metal")]
    Metal,
    #[serde(rename = "vulkan")]
    #[value(name = "vulkan")]
    Vulkan,
    #[serde(rename = "opengl_core")]
    #[value(name = "opengl-core")]
    OpenGlCore,
    #[serde(rename = "opengl_es3")]
    #[value(name = "opengl-es3")]
    OpenGlEs3,
    #[serde(rename = "null")]
    #[value(name = "null")]
    Null,
}

impl GraphicsBackend {
    pub const ALL: [Self; 7] = [
        Self::Direct3D11,
        Self::Direct3D12,
        Self::Metal,
        Self::Vulkan,
        Self::OpenGlCore,
        Self::OpenGlEs3,
        Self::Null,
    ];

    /// Whether viewport Y must be inverted for this backend
    pub fn flips_y(self) -> bool {
        matches!(self, Self::Direct3D11 | Self::Metal | Self::Vulkan)
    }
}

/// A pinhole camera looking down its pose's +Z axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub pose: Pose,
    /// Vertical field of view in radians
    pub vertical_fov: f32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Camera {
    pub fn new(pose: Pose, vertical_fov: f32, pixel_width: u32, pixel_height: u32) -> Self {
        Self {
            pose,
            vertical_fov,
            pixel_width,
            pixel_height,
        }
    }

    /// Same optics, different pose (the eye camera follows the head every frame)
    pub fn with_pose(&self, pose: Pose) -> Self {
        Self { pose, ..*self }
    }

    pub fn aspect(&self) -> f32 {
        self.pixel_width as f32 / self.pixel_height.max(1) as f32
    }

    /// World point to viewport space: x/y are fractions of the view, z is depth along +Z.
    ///
    /// Points behind the camera come out mirrored with negative depth.
    pub fn world_to_viewport(&self, world: Vec3) -> Vec3 {
        let local = self.pose.inverse_transform_point(world);
        let half_h = (self.vertical_fov * 0.5).tan();
        let half_w = half_h * self.aspect();
        let depth = if local.z.abs() < 1e-6 {
            1e-6_f32.copysign(local.z)
        } else {
            local.z
        };
        let ndc_x = local.x / (depth * half_w);
        let ndc_y = local.y / (depth * half_h);
        Vec3::new(0.5 + 0.5 * ndc_x, 0.5 + 0.5 * ndc_y, local.z)
    }

    /// World point to pixel coordinates (bottom-left origin), z is depth
    pub fn world_to_screen(&self, world: Vec3) -> Vec3 {
        let v = self.world_to_viewport(world);
        Vec3::new(
            v.x * self.pixel_width as f32,
            v.y * self.pixel_height as f32,
            v.z,
        )
    }
}

/// Apply the backend Y convention to a viewport point and clamp into [0,1]
pub fn viewport_to_normalized(viewport: Vec3, backend: GraphicsBackend) -> NormalizedGazePosition {
    let y = if backend.flips_y() {
        1.0 - viewport.y
    } else {
        viewport.y
    };
    NormalizedGazePosition::new(viewport.x, y)
}

/// Projects the combined gaze of a sample onto the eye camera's viewport
#[derive(Debug, Clone)]
pub struct GazeProjector {
    eye_camera: Camera,
    backend: GraphicsBackend,
    floating_distance: f32,
}

impl GazeProjector {
    pub fn new(eye_camera: Camera, backend: GraphicsBackend, floating_distance: f32) -> Self {
        Self {
            eye_camera,
            backend,
            floating_distance,
        }
    }

    pub fn backend(&self) -> GraphicsBackend {
        self.backend
    }

    /// Normalized gaze for this frame; `None` when the combined gaze is invalid.
    ///
    /// The point projected is the combined ray's floating point, so the blur
    /// follows gaze even when the raycast hits nothing.
    pub fn project(&self, sample: &GazeSample, head: &Pose) -> Option<NormalizedGazePosition> {
        if !sample.status.is_valid() {
            return None;
        }
        let local = sample.combined.origin + sample.combined.forward * self.floating_distance;
        let world = head.transform_point(local);
        let viewport = self.eye_camera.with_pose(*head).world_to_viewport(world);
        let gaze = viewport_to_normalized(viewport, self.backend);
        log::debug!("Gaze viewport: ({:.3}, {:.3})", gaze.x, gaze.y);
        Some(gaze)
    }
}

//! Gaze ray resolution
//!
//! Turns a head-relative [`GazeSample`] into the canonical world-space ray.
//! The resolver owns the last known ray and eye poses and overwrites only
//! what is valid in the current sample, so invalid frames never snap the
//! ray to zero.

use crate::config::GazeSourceKind;
use crate::types::{look_rotation, EyePose, EyeRay, GazeRay, GazeSample, Pose};
use glam::Vec3;

/// Last known gaze geometry, updated in place each frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayState {
    pub origin: Vec3,
    /// Unit length
    pub direction: Vec3,
    /// World-space fixation point
    pub fixation: Vec3,
    pub left_eye: EyePose,
    pub right_eye: EyePose,
    /// Head-local fixation as last reported by the device (device strategy)
    fixation_local: Option<Vec3>,
}

impl RayState {
    pub fn ray(&self) -> GazeRay {
        GazeRay {
            origin: self.origin,
            direction: self.direction,
        }
    }
}

impl Default for RayState {
    fn default() -> Self {
        let ray = GazeRay::default();
        Self {
            origin: ray.origin,
            direction: ray.direction,
            fixation: Vec3::ZERO,
            left_eye: EyePose::default(),
            right_eye: EyePose::default(),
            fixation_local: None,
        }
    }
}

/// Fixation point from a world ray and focus distance
pub fn fixation_point(origin: Vec3, direction: Vec3, focus_distance: f32) -> Vec3 {
    origin + direction * focus_distance
}

pub struct GazeRayResolver {
    kind: GazeSourceKind,
    state: RayState,
}

impl GazeRayResolver {
    pub fn new(kind: GazeSourceKind) -> Self {
        Self {
            kind,
            state: RayState::default(),
        }
    }

    pub fn state(&self) -> &RayState {
        &self.state
    }

    pub fn ray(&self) -> GazeRay {
        self.state.ray()
    }

    /// Fold this frame's sample into the ray state and return the current ray
    pub fn resolve(&mut self, sample: &GazeSample, head: &Pose) -> GazeRay {
        match self.kind {
            GazeSourceKind::DeviceFeature => self.resolve_fixation_anchored(sample, head),
            GazeSourceKind::DedicatedApi => self.resolve_head_relative(sample, head),
        }
        self.state.ray()
    }

    /// Device features are head-local: eye poses and the fixation point move
    /// with the head, the ray runs from the head towards the fixation point.
    fn resolve_fixation_anchored(&mut self, sample: &GazeSample, head: &Pose) {
        if sample.left_status.is_valid() {
            self.state.left_eye = local_eye_pose(&sample.left, head);
        }
        if sample.right_status.is_valid() {
            self.state.right_eye = local_eye_pose(&sample.right, head);
        }
        if let Some(local) = sample.fixation {
            self.state.fixation_local = Some(local);
        }

        let Some(local) = self.state.fixation_local else {
            return;
        };
        let fixation = head.transform_point(local);
        self.state.fixation = fixation;
        if let Some(direction) = (fixation - head.position).try_normalize() {
            self.state.origin = head.position;
            self.state.direction = direction;
        }
    }

    /// API vectors are relative to the head pose; each valid signal is
    /// transformed to world space on its own.
    fn resolve_head_relative(&mut self, sample: &GazeSample, head: &Pose) {
        if sample.left_status.is_valid() {
            if let Some(pose) = world_eye_pose(&sample.left, head) {
                self.state.left_eye = pose;
            }
        }
        if sample.right_status.is_valid() {
            if let Some(pose) = world_eye_pose(&sample.right, head) {
                self.state.right_eye = pose;
            }
        }
        if !sample.status.is_valid() {
            return;
        }

        let origin = head.transform_point(sample.combined.origin);
        let Some(direction) = head.transform_direction(sample.combined.forward).try_normalize() else {
            log::debug!("Degenerate combined gaze in frame {}", sample.frame);
            return;
        };
        self.state.origin = origin;
        self.state.direction = direction;
        self.state.fixation = fixation_point(origin, direction, sample.focus_distance);
    }
}

fn local_eye_pose(eye: &EyeRay, head: &Pose) -> EyePose {
    EyePose {
        position: head.transform_point(eye.origin),
        rotation: head.rotation * look_rotation(eye.forward, Vec3::Y),
    }
}

fn world_eye_pose(eye: &EyeRay, head: &Pose) -> Option<EyePose> {
    let forward = head.transform_direction(eye.forward).try_normalize()?;
    Some(EyePose {
        position: head.transform_point(eye.origin),
        rotation: look_rotation(forward, Vec3::Y),
    })
}

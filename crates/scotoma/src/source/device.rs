//! Device-feature strategy: per-eye features polled from the center-eye device

use super::{now_ms, DeviceProvider, EyeDevice, EyeFeatures};
use crate::error::{PipelineError, Result};
use crate::types::{EyeRay, GazeSample, GazeStatus};
use glam::{Quat, Vec3};
use std::time::Instant;

/// Last successfully read value of every feature.
///
/// A failed read never clears a field, so the visualization does not snap.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RetainedFeatures {
    left_position: Option<Vec3>,
    left_rotation: Option<Quat>,
    right_position: Option<Vec3>,
    right_rotation: Option<Quat>,
    fixation_point: Option<Vec3>,
}

impl RetainedFeatures {
    fn apply(&mut self, eyes: &EyeFeatures) {
        if let Some(p) = eyes.left_position {
            self.left_position = Some(p);
        }
        if let Some(r) = eyes.left_rotation {
            self.left_rotation = Some(r);
        }
        if let Some(p) = eyes.right_position {
            self.right_position = Some(p);
        }
        if let Some(r) = eyes.right_rotation {
            self.right_rotation = Some(r);
        }
        if let Some(f) = eyes.fixation_point {
            self.fixation_point = Some(f);
        }
    }

    fn eye(position: Option<Vec3>, rotation: Option<Quat>) -> (GazeStatus, EyeRay) {
        match (position, rotation) {
            (Some(origin), Some(rotation)) => (
                GazeStatus::Valid,
                EyeRay::new(origin, (rotation.normalize() * Vec3::Z).normalize()),
            ),
            _ => (GazeStatus::Invalid, EyeRay::default()),
        }
    }
}

pub struct DeviceFeatureSource {
    provider: Box<dyn DeviceProvider>,
    device: Option<Box<dyn EyeDevice>>,
    retained: RetainedFeatures,
    frame: u64,
    epoch: Instant,
}

impl DeviceFeatureSource {
    /// The device itself is acquired lazily on the first poll
    pub fn new(provider: Box<dyn DeviceProvider>) -> Self {
        Self {
            provider,
            device: None,
            retained: RetainedFeatures::default(),
            frame: 0,
            epoch: Instant::now(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_valid())
    }

    fn ensure_device(&mut self) -> Option<&dyn EyeDevice> {
        if self.device.as_ref().is_some_and(|d| !d.is_valid()) {
            if let Some(lost) = self.device.take() {
                log::warn!("Eye device '{}' detached", lost.name());
            }
        }
        if self.device.is_none() {
            self.device = self.provider.center_eye_device();
            if let Some(device) = &self.device {
                log::info!("Bound eye device '{}'", device.name());
            }
        }
        self.device.as_deref()
    }

    fn read(&mut self) -> Result<()> {
        let eyes = {
            let device = self.ensure_device().ok_or(PipelineError::SensorUnavailable)?;
            device.eyes()
        };
        match eyes {
            Some(eyes) => self.retained.apply(&eyes),
            None => log::debug!("Eyes feature unavailable this frame, holding last values"),
        }
        Ok(())
    }

    pub fn poll(&mut self) -> Result<GazeSample> {
        self.read()?;
        self.frame += 1;
        Ok(self.sample())
    }

    /// Fresh read that does not count as a new frame
    pub fn latest(&mut self) -> Result<GazeSample> {
        self.read()?;
        Ok(self.sample())
    }

    fn sample(&self) -> GazeSample {
        let r = &self.retained;
        let (left_status, left) = RetainedFeatures::eye(r.left_position, r.left_rotation);
        let (right_status, right) = RetainedFeatures::eye(r.right_position, r.right_rotation);

        // The device reports no combined ray; derive it from the head center
        // towards the fixation point so downstream consumers see one shape.
        let forward = r.fixation_point.and_then(Vec3::try_normalize);
        let (status, combined, focus_distance) = match (r.fixation_point, forward) {
            (Some(fixation), Some(forward)) => (
                GazeStatus::Valid,
                EyeRay::new(Vec3::ZERO, forward),
                fixation.length(),
            ),
            _ => (GazeStatus::Invalid, EyeRay::default(), 0.0),
        };

        GazeSample {
            frame: self.frame,
            capture_time_ns: self.epoch.elapsed().as_nanos() as i64,
            log_time_ms: now_ms(),
            status,
            left_status,
            right_status,
            left,
            right,
            combined,
            fixation: r.fixation_point,
            focus_distance,
            focus_stability: 0.0,
        }
    }
}

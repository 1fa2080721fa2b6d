//! Simulated eye tracker for running without headset hardware
//!
//! Gaze wanders on a slow Lissajous path. A calibration request makes the
//! tracker report "not calibrated" for a short while, then recover.

use super::{lock, DeviceProvider, EyeDevice, EyeFeatures, GazeApi};
use crate::calibration::CalibrationService;
use crate::types::{EyeRay, GazeSample, GazeStatus};
use glam::{Quat, Vec3};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const IPD: f32 = 0.063;
const FOCUS_DISTANCE: f32 = 2.0;
/// Simulated sensor rate; frame numbers follow wall time at this rate
const SAMPLE_HZ: f32 = 200.0;
/// Oldest records dropped beyond this backlog
const MAX_BACKLOG: u64 = 1024;

struct TrackerState {
    epoch: Instant,
    allowed: AtomicBool,
    calibrated: AtomicBool,
    recalibration_time: Duration,
    calibration_started: Mutex<Option<Instant>>,
    last_drained: AtomicU64,
}

/// Shared handle; clone it into every role the tracker plays
#[derive(Clone)]
pub struct SimulatedTracker {
    state: Arc<TrackerState>,
}

impl SimulatedTracker {
    pub fn new(recalibration_time: Duration) -> Self {
        log::warn!("No eye-tracking SDK linked, using simulated gaze");
        Self {
            state: Arc::new(TrackerState {
                epoch: Instant::now(),
                allowed: AtomicBool::new(true),
                calibrated: AtomicBool::new(true),
                recalibration_time,
                calibration_started: Mutex::new(None),
                last_drained: AtomicU64::new(0),
            }),
        }
    }

    /// Make the tracker report lost calibration until the next request completes
    pub fn lose_calibration(&self) {
        self.state.calibrated.store(false, Ordering::Release);
    }

    pub fn gaze_api(&self) -> Box<dyn GazeApi> {
        Box::new(self.clone())
    }

    pub fn device_provider(&self) -> Box<dyn DeviceProvider> {
        Box::new(self.clone())
    }

    /// Head-local gaze direction at time `t` seconds
    fn direction_at(t: f32) -> Vec3 {
        let yaw = 0.25 * (t * 0.5).sin();
        let pitch = 0.15 * (t * 0.3).cos();
        (Quat::from_rotation_y(yaw) * Quat::from_rotation_x(-pitch)) * Vec3::Z
    }

    fn elapsed(&self) -> f32 {
        self.state.epoch.elapsed().as_secs_f32()
    }

    fn current_frame(&self) -> u64 {
        (self.elapsed() * SAMPLE_HZ) as u64
    }

    fn sample_at(&self, frame: u64, t: f32) -> GazeSample {
        let forward = Self::direction_at(t);
        let fixation = forward * FOCUS_DISTANCE;
        let left_origin = Vec3::new(-IPD * 0.5, 0.0, 0.0);
        let right_origin = Vec3::new(IPD * 0.5, 0.0, 0.0);
        let valid = self.is_calibrated();
        let status = GazeStatus::from_valid(valid);
        GazeSample {
            frame,
            capture_time_ns: (f64::from(t) * 1e9) as i64,
            log_time_ms: 0,
            status,
            left_status: status,
            right_status: status,
            left: EyeRay::new(left_origin, (fixation - left_origin).normalize()),
            right: EyeRay::new(right_origin, (fixation - right_origin).normalize()),
            combined: EyeRay::new(Vec3::ZERO, forward),
            fixation: None,
            focus_distance: FOCUS_DISTANCE,
            focus_stability: 0.9,
        }
    }
}

impl CalibrationService for SimulatedTracker {
    fn is_gaze_allowed(&self) -> bool {
        self.state.allowed.load(Ordering::Acquire)
    }

    fn is_calibrated(&self) -> bool {
        let mut started = lock(&self.state.calibration_started);
        if let Some(at) = *started {
            if at.elapsed() >= self.state.recalibration_time {
                *started = None;
                self.state.calibrated.store(true, Ordering::Release);
            }
        }
        self.state.calibrated.load(Ordering::Acquire)
    }

    fn request_calibration(&self) {
        log::info!("Simulated tracker: calibrating");
        self.state.calibrated.store(false, Ordering::Release);
        *lock(&self.state.calibration_started) = Some(Instant::now());
    }
}

impl GazeApi for SimulatedTracker {
    fn gaze(&mut self) -> GazeSample {
        let t = self.elapsed();
        self.sample_at((t * SAMPLE_HZ) as u64, t)
    }

    fn drain_since_last(&mut self) -> Vec<GazeSample> {
        let frame = self.current_frame();
        let last = self.state.last_drained.fetch_max(frame, Ordering::AcqRel);
        let first = (last + 1).max(frame.saturating_sub(MAX_BACKLOG - 1));
        (first..=frame)
            .map(|f| self.sample_at(f, f as f32 / SAMPLE_HZ))
            .collect()
    }
}

impl DeviceProvider for SimulatedTracker {
    fn center_eye_device(&mut self) -> Option<Box<dyn EyeDevice>> {
        Some(Box::new(self.clone()))
    }
}

impl EyeDevice for SimulatedTracker {
    fn name(&self) -> &str {
        "Simulated Center Eye"
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn eyes(&self) -> Option<EyeFeatures> {
        if !self.is_calibrated() {
            return None;
        }
        let forward = Self::direction_at(self.elapsed());
        let fixation = forward * FOCUS_DISTANCE;
        let left = Vec3::new(-IPD * 0.5, 0.0, 0.0);
        let right = Vec3::new(IPD * 0.5, 0.0, 0.0);
        Some(EyeFeatures {
            left_position: Some(left),
            left_rotation: Some(Quat::from_rotation_arc(Vec3::Z, (fixation - left).normalize())),
            right_position: Some(right),
            right_rotation: Some(Quat::from_rotation_arc(Vec3::Z, (fixation - right).normalize())),
            fixation_point: Some(fixation),
        })
    }
}

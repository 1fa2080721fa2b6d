//! Dedicated-API strategy: aggregate gaze records from the eye-tracking API

use super::{now_ms, GazeApi};
use crate::error::{PipelineError, Result};
use crate::types::GazeSample;
use std::time::{Duration, Instant};

/// Counts received records over one-second windows
#[derive(Debug)]
struct SampleRate {
    window_start: Instant,
    in_window: usize,
    last_rate: usize,
}

impl SampleRate {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            in_window: 0,
            last_rate: 0,
        }
    }

    fn add(&mut self, count: usize, now: Instant) {
        if now.duration_since(self.window_start) > Duration::from_secs(1) {
            self.last_rate = self.in_window;
            self.in_window = 0;
            self.window_start = now;
        }
        self.in_window += count;
    }
}

pub struct DedicatedApiSource {
    api: Box<dyn GazeApi>,
    rate: SampleRate,
}

impl DedicatedApiSource {
    pub fn new(api: Box<dyn GazeApi>) -> Self {
        Self {
            api,
            rate: SampleRate::new(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.api.is_connected()
    }

    pub fn poll(&mut self) -> Result<GazeSample> {
        let sample = self.latest()?;
        if !sample.status.is_valid() {
            log::debug!("Gaze record {} invalid", sample.frame);
        }
        Ok(sample)
    }

    /// Most recent record, stamped with the wall clock
    pub fn latest(&mut self) -> Result<GazeSample> {
        if !self.api.is_connected() {
            return Err(PipelineError::SensorUnavailable);
        }
        let mut sample = self.api.gaze();
        sample.log_time_ms = now_ms();
        Ok(sample)
    }

    pub fn drain_since_last(&mut self) -> Vec<GazeSample> {
        let mut samples = self.api.drain_since_last();
        let now = now_ms();
        for s in &mut samples {
            s.log_time_ms = now;
        }
        self.rate.add(samples.len(), Instant::now());
        log::debug!("Drained {} gaze records", samples.len());
        samples
    }

    /// Records received during the last complete one-second window
    pub fn samples_last_second(&self) -> usize {
        self.rate.last_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EyeRay, GazeStatus};
    use glam::Vec3;

    struct FixedApi {
        connected: bool,
        pending: Vec<GazeSample>,
    }

    impl GazeApi for FixedApi {
        fn gaze(&mut self) -> GazeSample {
            GazeSample {
                frame: 7,
                status: GazeStatus::Valid,
                combined: EyeRay::new(Vec3::ZERO, Vec3::Z),
                focus_distance: 1.5,
                ..Default::default()
            }
        }
        fn drain_since_last(&mut self) -> Vec<GazeSample> {
            std::mem::take(&mut self.pending)
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    #[test]
    fn disconnected_api_is_unavailable() {
        let mut src = DedicatedApiSource::new(Box::new(FixedApi {
            connected: false,
            pending: vec![],
        }));
        assert!(!src.is_bound());
        assert!(matches!(src.poll(), Err(PipelineError::SensorUnavailable)));
    }

    #[test]
    fn poll_stamps_log_time() {
        let mut src = DedicatedApiSource::new(Box::new(FixedApi {
            connected: true,
            pending: vec![GazeSample::default(); 3],
        }));
        let s = src.poll().expect("sample");
        assert_eq!(s.frame, 7);
        assert!(s.log_time_ms > 0);

        let drained = src.drain_since_last();
        assert_eq!(drained.len(), 3);
        assert!(drained.iter().all(|s| s.log_time_ms > 0));
        assert!(src.drain_since_last().is_empty());
    }

    #[test]
    fn rate_rolls_over_each_second() {
        let mut rate = SampleRate::new();
        let t0 = rate.window_start;
        rate.add(40, t0 + Duration::from_millis(500));
        rate.add(50, t0 + Duration::from_millis(900));
        assert_eq!(rate.last_rate, 0);
        rate.add(5, t0 + Duration::from_millis(1100));
        assert_eq!(rate.last_rate, 90);
        assert_eq!(rate.in_window, 5);
    }
}

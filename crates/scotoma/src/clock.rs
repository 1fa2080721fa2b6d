//! Simulation time
//!
//! The time scale is the only knob that pauses the simulation. It is written
//! by the calibration monitor alone; everyone else reads it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared global time scale (1.0 = real time, 0.0 = paused)
#[derive(Debug, Clone)]
pub struct TimeScale(Arc<AtomicU32>);

impl TimeScale {
    pub fn new(scale: f32) -> Self {
        Self(Arc::new(AtomicU32::new(scale.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, scale: f32) {
        self.0.store(scale.to_bits(), Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.get() == 0.0
    }
}

impl Default for TimeScale {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Accumulates scaled simulation time from real frame deltas
#[derive(Debug, Clone)]
pub struct SimClock {
    scale: TimeScale,
    elapsed: f64,
}

impl SimClock {
    pub fn new(scale: TimeScale) -> Self {
        Self {
            scale,
            elapsed: 0.0,
        }
    }

    /// Advance by a real delta; returns the scaled delta
    pub fn tick(&mut self, real_dt: f32) -> f32 {
        let dt = real_dt.max(0.0) * self.scale.get();
        self.elapsed += f64::from(dt);
        dt
    }

    /// Scaled seconds since the clock started
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn time_scale(&self) -> &TimeScale {
        &self.scale
    }
}

/// Fires once every `period` seconds of scaled time
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    period: f32,
    acc: f32,
}

impl IntervalTimer {
    pub fn new(period: f32) -> Self {
        Self { period, acc: 0.0 }
    }

    /// Feed a scaled delta; true when a period boundary was crossed
    pub fn advance(&mut self, dt: f32) -> bool {
        self.acc += dt;
        if self.acc >= self.period {
            self.acc -= self.period;
            // a long stall fires once, not once per missed period
            if self.acc >= self.period {
                self.acc = 0.0;
            }
            return true;
        }
        false
    }
}

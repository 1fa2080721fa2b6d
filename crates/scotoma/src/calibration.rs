//! Calibration monitor
//!
//! Detects calibration loss, pauses simulation time while the tracker
//! recalibrates, and resumes once the tracker reports calibration again.
//! The monitor is the only writer of [`CalibrationState`], the time scale and
//! the indicator flag.

use crate::clock::TimeScale;
use crate::types::CalibrationState;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Settle time after a start calibration request before polling starts
const START_SETTLE: Duration = Duration::from_millis(500);

/// The eye tracker's calibration surface
pub trait CalibrationService: Send + Sync {
    fn is_gaze_allowed(&self) -> bool;
    fn is_calibrated(&self) -> bool;
    fn request_calibration(&self);
}

/// Everything the recovery task needs, cloned out of the monitor
#[derive(Clone)]
struct Shared {
    service: Arc<dyn CalibrationService>,
    state: Arc<watch::Sender<CalibrationState>>,
    time_scale: TimeScale,
    indicator: Arc<AtomicBool>,
    recalibrating: Arc<AtomicBool>,
    poll_interval: Duration,
    toggle_scotoma: bool,
}

impl Shared {
    /// Poll on a real-time interval; the simulation clock is frozen meanwhile
    async fn wait_until_calibrated(&self) {
        while !self.service.is_calibrated() {
            log::debug!("Waiting for recalibration to complete...");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn restore_indicator(&self) {
        let allowed = self.service.is_gaze_allowed();
        if !allowed {
            log::warn!("Gaze tracking is not allowed, scotoma indicator stays hidden");
        }
        self.indicator
            .store(allowed && self.toggle_scotoma, Ordering::Release);
    }

    fn finish(&self, resume_scale: f32) {
        self.time_scale.set(resume_scale);
        self.restore_indicator();
        self.state.send_replace(CalibrationState::Calibrated);
        self.recalibrating.store(false, Ordering::Release);
    }

    async fn recover(self, resume_scale: f32) {
        self.wait_until_calibrated().await;
        log::info!("Recalibration completed. Resuming simulation.");
        self.finish(resume_scale);
    }

    async fn settle_and_recover(self, resume_scale: f32) {
        tokio::time::sleep(START_SETTLE).await;
        self.wait_until_calibrated().await;
        log::info!("Start calibration completed");
        self.finish(resume_scale);
    }
}

pub struct CalibrationMonitor {
    shared: Shared,
    state_rx: watch::Receiver<CalibrationState>,
    runtime: Option<Handle>,
    task: Option<JoinHandle<()>>,
    /// Set when no runtime was available: completion is polled by `check`
    pending_resume: Option<f32>,
}

impl CalibrationMonitor {
    /// Captures the current tokio runtime, if any, for the completion poller
    pub fn new(
        service: Arc<dyn CalibrationService>,
        time_scale: TimeScale,
        poll_interval: Duration,
        toggle_scotoma: bool,
    ) -> Self {
        let initial = if service.is_calibrated() {
            CalibrationState::Calibrated
        } else {
            CalibrationState::Lost
        };
        let visible = toggle_scotoma && service.is_gaze_allowed() && service.is_calibrated();
        let (state_tx, state_rx) = watch::channel(initial);
        Self {
            shared: Shared {
                service,
                state: Arc::new(state_tx),
                time_scale,
                indicator: Arc::new(AtomicBool::new(visible)),
                recalibrating: Arc::new(AtomicBool::new(false)),
                poll_interval,
                toggle_scotoma,
            },
            state_rx,
            runtime: Handle::try_current().ok(),
            task: None,
            pending_resume: None,
        }
    }

    pub fn state(&self) -> CalibrationState {
        *self.state_rx.borrow()
    }

    /// Observe state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<CalibrationState> {
        self.state_rx.clone()
    }

    pub fn indicator_visible(&self) -> bool {
        self.shared.indicator.load(Ordering::Acquire)
    }

    pub fn is_recalibrating(&self) -> bool {
        self.shared.recalibrating.load(Ordering::Acquire)
    }

    pub fn time_scale(&self) -> &TimeScale {
        &self.shared.time_scale
    }

    /// Whether the tracker reports gaze as allowed and calibrated
    pub fn is_tracking(&self) -> bool {
        self.shared.service.is_gaze_allowed() && self.shared.service.is_calibrated()
    }

    /// Whether gaze may be consumed right now. Read-only, for the render path.
    pub fn is_gaze_usable(&self) -> bool {
        !self.is_recalibrating() && self.is_tracking()
    }

    /// Per-tick check. Returns true when gaze may be consumed this tick.
    ///
    /// Starts recovery on calibration loss; repeated calls while a
    /// calibration is in flight only gate gaze.
    pub fn check(&mut self) -> bool {
        if self.is_recalibrating() {
            self.poll_pending();
            return false;
        }
        if self.is_tracking() {
            self.shared
                .indicator
                .store(self.shared.toggle_scotoma, Ordering::Release);
            return true;
        }

        if !self.shared.service.is_calibrated()
            && !self.shared.recalibrating.swap(true, Ordering::AcqRel)
        {
            self.begin_recovery();
        }
        false
    }

    /// Tick-driven completion when no runtime runs the poller
    fn poll_pending(&mut self) {
        let Some(resume_scale) = self.pending_resume else {
            return;
        };
        if self.shared.service.is_calibrated() {
            self.pending_resume = None;
            log::info!("Recalibration completed. Resuming simulation.");
            self.shared.finish(resume_scale);
        }
    }

    fn begin_recovery(&mut self) {
        log::warn!("Calibration lost. Pausing simulation and requesting recalibration.");
        self.shared.state.send_replace(CalibrationState::Lost);
        self.shared.indicator.store(false, Ordering::Release);

        let resume_scale = self.shared.time_scale.get();
        self.shared.time_scale.set(0.0);
        self.shared.service.request_calibration();
        self.shared.state.send_replace(CalibrationState::Recalibrating);

        let shared = self.shared.clone();
        self.spawn_completion(shared.recover(resume_scale), resume_scale);
    }

    /// Force a fresh calibration at session start without blocking the caller.
    ///
    /// Time is not paused: nothing has started yet. Gaze stays gated until
    /// the tracker reports calibration.
    pub fn start_calibration(&mut self) {
        if self.shared.recalibrating.swap(true, Ordering::AcqRel) {
            log::debug!("Recalibration already running, skipping start calibration");
            return;
        }
        log::info!("Requesting gaze calibration at session start");
        self.shared.state.send_replace(CalibrationState::Recalibrating);
        self.shared.indicator.store(false, Ordering::Release);
        self.shared.service.request_calibration();

        let resume_scale = self.shared.time_scale.get();
        let shared = self.shared.clone();
        self.spawn_completion(shared.settle_and_recover(resume_scale), resume_scale);
    }

    fn spawn_completion<F>(&mut self, completion: F, resume_scale: f32)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => self.task = Some(runtime.spawn(completion)),
            None => {
                log::warn!("No async runtime, polling calibration on update ticks");
                self.pending_resume = Some(resume_scale);
            }
        }
    }

    /// Halt a pending recovery task
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.pending_resume = None;
    }
}

impl Drop for CalibrationMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Periodic screenshots of the off-screen render surface
//!
//! The frame loop only clones the surface and queues it; PNG encoding runs
//! on a writer thread fed through a crossbeam channel.

use crate::clock::IntervalTimer;
use crate::error::{PipelineError, Result};
use crate::recorder::sanitize_file_stem;
use crate::render::Surface;
use crossbeam_channel::{Receiver, Sender};
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// `RenderTextureCapture_<scene>_yyyyMMdd_HHmmss.png`
pub fn capture_file_name(scene: &str, now: chrono::DateTime<chrono::Local>) -> String {
    format!(
        "RenderTextureCapture_{}_{}.png",
        sanitize_file_stem(scene),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Encode as RGB PNG
pub fn write_png(path: &Path, surface: &Surface) -> Result<()> {
    let rgb = DynamicImage::ImageRgba8(surface.clone()).to_rgb8();
    rgb.save_with_format(path, ImageFormat::Png)
        .map_err(|source| PipelineError::Image {
            path: path.to_path_buf(),
            source,
        })
}

struct CaptureJob {
    path: PathBuf,
    image: Surface,
}

fn writer_loop(rx: Receiver<CaptureJob>, failed: Arc<AtomicBool>) {
    for job in rx {
        match write_png(&job.path, &job.image) {
            Ok(()) => log::info!("Render surface captured and saved to: {}", job.path.display()),
            Err(e) => {
                log::error!("{e}");
                log::error!("Screenshot capture disabled for this session");
                failed.store(true, Ordering::Release);
                break;
            }
        }
    }
}

pub struct ScreenshotTask {
    scene: String,
    dir: PathBuf,
    timer: IntervalTimer,
    tx: Option<Sender<CaptureJob>>,
    worker: Option<JoinHandle<()>>,
    failed: Arc<AtomicBool>,
}

impl ScreenshotTask {
    pub fn new(scene: impl Into<String>, dir: impl Into<PathBuf>, interval_secs: f32) -> Self {
        Self {
            scene: scene.into(),
            dir: dir.into(),
            timer: IntervalTimer::new(interval_secs),
            tx: None,
            worker: None,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.tx.is_some() && !self.failed.load(Ordering::Acquire)
    }

    /// Create the output directory and spawn the writer
    pub fn start(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let failed = self.failed.clone();
        let worker = std::thread::Builder::new()
            .name("scotoma-capture".into())
            .spawn(move || writer_loop(rx, failed))
            .map_err(|e| PipelineError::io(&self.dir, e))?;

        log::info!("Screenshot capture started in {}", self.dir.display());
        self.tx = Some(tx);
        self.worker = Some(worker);
        Ok(())
    }

    /// Feed scaled simulation time; queues a capture once per interval.
    /// Returns the queued file path.
    pub fn advance(&mut self, scaled_dt: f32, surface: Option<&Surface>) -> Option<PathBuf> {
        if !self.is_running() || !self.timer.advance(scaled_dt) {
            return None;
        }
        self.capture_now(surface)
    }

    /// Queue a capture of `surface` right away
    pub fn capture_now(&self, surface: Option<&Surface>) -> Option<PathBuf> {
        let tx = self.tx.as_ref()?;
        let Some(surface) = surface else {
            log::error!("Render surface is not set, skipping capture");
            return None;
        };
        let path = self
            .dir
            .join(capture_file_name(&self.scene, chrono::Local::now()));
        let job = CaptureJob {
            path: path.clone(),
            image: surface.clone(),
        };
        if tx.send(job).is_err() {
            log::error!("Capture writer is gone, dropping {}", path.display());
            return None;
        }
        Some(path)
    }

    /// Close the queue and wait for pending captures to be written
    pub fn stop(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Capture writer panicked");
            }
            log::info!("Screenshot capture stopped");
        }
    }
}

impl Drop for ScreenshotTask {
    fn drop(&mut self) {
        self.stop();
    }
}

//! CSV session log
//!
//! One file per session, one row per accepted gaze sample. A write failure
//! disables recording for the rest of the session; the frame loop never
//! sees it.

use crate::error::{PipelineError, Result};
use crate::types::{AoiHit, GazeSample, Pose};
use glam::{Quat, Vec3};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const COLUMNS: [&str; 26] = [
    "frame",
    "captureTime",
    "logTime",
    "HMDPos_x",
    "HMDPos_y",
    "HMDPos_z",
    "HMDRot_1",
    "HMDRot_2",
    "HMDRot_3",
    "HMDRot_4",
    "gazeStatus",
    "combinedGazeForward_x",
    "combinedGazeForward_y",
    "combinedGazeForward_z",
    "combinedGazePos_x",
    "combinedGazePos_y",
    "combinedGazePos_z",
    "focusDistance",
    "focusStability",
    "AOI",
    "hitCoordinate_x",
    "hitCoordinate_y",
    "hitCoordinate_z",
    "screenPoint_x",
    "screenPoint_y",
    "screenPoint_z",
];

/// Strip characters that would break a row: line breaks, parentheses, and
/// commas (replaced by ';').
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '(' | ')'))
        .map(|c| if c == ',' { ';' } else { c })
        .collect()
}

/// `<scene>_YYYY-MM-DD-hh-mm-ss.csv`
pub fn log_file_name(scene: &str, now: chrono::DateTime<chrono::Local>) -> String {
    format!("{}_{}.csv", sanitize_file_stem(scene), now.format("%Y-%m-%d-%H-%M-%S"))
}

pub(crate) fn sanitize_file_stem(scene: &str) -> String {
    scene
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn vec3(v: Vec3) -> [String; 3] {
    [format!("{:.3}", v.x), format!("{:.3}", v.y), format!("{:.3}", v.z)]
}

fn quat(q: Quat) -> [String; 4] {
    [
        format!("{:.3}", q.x),
        format!("{:.3}", q.y),
        format!("{:.3}", q.z),
        format!("{:.3}", q.w),
    ]
}

/// Row fields in [`COLUMNS`] order. Gaze-dependent fields stay empty for invalid samples.
pub fn format_row(sample: &GazeSample, head: &Pose, aoi: &AoiHit) -> Vec<String> {
    let valid = sample.status.is_valid();
    let mut row = Vec::with_capacity(COLUMNS.len());
    row.push(sample.frame.to_string());
    row.push(sample.capture_time_ns.to_string());
    row.push(sample.log_time_ms.to_string());
    row.extend(vec3(head.position));
    row.extend(quat(head.rotation));
    row.push(sample.status.as_str().to_string());
    if valid {
        row.extend(vec3(sample.combined.forward));
        row.extend(vec3(sample.combined.origin));
        row.push(sample.focus_distance.to_string());
        row.push(sample.focus_stability.to_string());
    } else {
        row.extend(std::iter::repeat(String::new()).take(8));
    }
    row.push(aoi.aoi_id.clone());
    row.extend(vec3(aoi.world_point));
    row.extend(vec3(aoi.screen_point));
    row
}

#[derive(Default)]
pub struct GazeRecorder {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    rows: u64,
    failed: bool,
}

impl GazeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open `<dir>/<scene>_<timestamp>.csv` and write the header.
    /// Already recording: keeps the current file.
    pub fn start(&mut self, scene: &str, dir: &Path) -> Result<PathBuf> {
        if let (Some(_), Some(path)) = (&self.writer, &self.path) {
            log::debug!("Already recording to {}", path.display());
            return Ok(path.clone());
        }
        if self.failed {
            log::warn!("Recording disabled for this session after a write failure");
            return Err(PipelineError::NotRecording);
        }

        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        let path = dir.join(log_file_name(scene, chrono::Local::now()));
        let file = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", COLUMNS.join(",")).map_err(|e| PipelineError::io(&path, e))?;

        log::info!("Log file started at: {}", path.display());
        self.writer = Some(writer);
        self.path = Some(path.clone());
        self.rows = 0;
        Ok(path)
    }

    /// Append one row. No-op while not recording.
    pub fn record(&mut self, sample: &GazeSample, head: &Pose, aoi: &AoiHit) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let line = format_row(sample, head, aoi)
            .iter()
            .map(|v| sanitize(v))
            .collect::<Vec<_>>()
            .join(",");
        if let Err(e) = writeln!(writer, "{line}") {
            self.fail(e);
            return;
        }
        self.rows += 1;
    }

    fn fail(&mut self, e: std::io::Error) {
        let path = self.path.clone().unwrap_or_default();
        log::error!("{}", PipelineError::io(path, e));
        log::error!("Gaze recording disabled for this session");
        self.writer = None;
        self.failed = true;
    }

    /// Flush and close. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        let path = self.path.clone().unwrap_or_default();
        writer.flush().map_err(|e| PipelineError::io(&path, e))?;
        log::info!("Data recording ended ({} rows)", self.rows);
        Ok(())
    }
}

impl Drop for GazeRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{e}");
        }
    }
}

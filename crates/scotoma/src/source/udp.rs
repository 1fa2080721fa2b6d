use super::{lock, GazeApi};
use crate::types::{EyeRay, GazeSample, GazeStatus};
use anyhow::Result;
use glam::Vec3;
use serde::Deserialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Records kept for logging between two updates before the oldest are dropped
const MAX_PENDING: usize = 1024;

#[derive(Debug, Clone, Deserialize)]
struct JsonGazeMsg {
    #[serde(default)]
    frame: u64,
    #[serde(default)]
    capture_time: Option<i64>,
    status: GazeStatus,
    #[serde(default)]
    left_status: GazeStatus,
    #[serde(default)]
    right_status: GazeStatus,
    #[serde(default)]
    left: EyeRay,
    #[serde(default)]
    right: EyeRay,
    combined: EyeRay,
    #[serde(default)]
    focus_distance: f32,
    #[serde(default)]
    focus_stability: f32,
}

pub fn udp_gaze_addr_from_env() -> Option<SocketAddr> {
    let raw = std::env::var("SCOTOMA_GAZE_UDP_ADDR").ok()?;
    raw.parse::<SocketAddr>().ok()
}

pub fn parse_gaze_message(msg: &str) -> Option<GazeSample> {
    let msg = msg.trim();
    if msg.is_empty() {
        return None;
    }

    // JSON: {"frame":1,"status":"valid","combined":{"origin":[0,0,0],"forward":[0,0,1]},"focus_distance":2.0}
    if msg.starts_with('{') {
        let j = serde_json::from_str::<JsonGazeMsg>(msg).ok()?;
        return Some(GazeSample {
            frame: j.frame,
            capture_time_ns: j.capture_time.unwrap_or_else(now_ns),
            status: j.status,
            left_status: j.left_status,
            right_status: j.right_status,
            left: j.left,
            right: j.right,
            combined: j.combined,
            focus_distance: j.focus_distance.max(0.0),
            focus_stability: j.focus_stability.clamp(0.0, 1.0),
            ..Default::default()
        });
    }

    // k=v tokens, combined gaze only: fx=0 fy=0 fz=1 ox=0 oy=0 oz=0 dist=2 frame=12 ts=123
    let mut forward: [Option<f32>; 3] = [None; 3];
    let mut origin = Vec3::ZERO;
    let mut distance = 0.0f32;
    let mut frame = 0u64;
    let mut timestamp: Option<i64> = None;

    for tok in msg.split_whitespace() {
        let (k, v) = tok.split_once('=')?;
        match k {
            "fx" => forward[0] = v.parse().ok(),
            "fy" => forward[1] = v.parse().ok(),
            "fz" => forward[2] = v.parse().ok(),
            "ox" => origin.x = v.parse().ok()?,
            "oy" => origin.y = v.parse().ok()?,
            "oz" => origin.z = v.parse().ok()?,
            "dist" | "focus_distance" => distance = v.parse().ok()?,
            "frame" => frame = v.parse().ok()?,
            "ts" | "capture_time" => timestamp = v.parse().ok(),
            _ => {}
        }
    }

    let forward = Vec3::new(forward[0]?, forward[1]?, forward[2]?).try_normalize();
    Some(GazeSample {
        frame,
        capture_time_ns: timestamp.unwrap_or_else(now_ns),
        status: GazeStatus::from_valid(forward.is_some()),
        combined: EyeRay::new(origin, forward.unwrap_or(Vec3::Z)),
        focus_distance: distance.max(0.0),
        ..Default::default()
    })
}

#[derive(Default)]
struct BridgeState {
    latest: Mutex<Option<GazeSample>>,
    pending: Mutex<VecDeque<GazeSample>>,
    connected: AtomicBool,
}

impl BridgeState {
    fn push(&self, sample: GazeSample) {
        *lock(&self.latest) = Some(sample);
        let mut pending = lock(&self.pending);
        if pending.len() >= MAX_PENDING {
            pending.pop_front();
        }
        pending.push_back(sample);
        self.connected.store(true, Ordering::Release);
    }
}

/// Dedicated gaze API fed by datagrams from an external tracker bridge
pub struct UdpGazeBridge {
    state: Arc<BridgeState>,
}

impl UdpGazeBridge {
    /// Bind the socket and spawn the receive loop
    pub async fn bind(bind_addr: SocketAddr) -> Result<(Self, JoinHandle<()>)> {
        let sock = UdpSocket::bind(bind_addr).await?;
        log::info!("UDP gaze listener bound on {bind_addr}");

        let state = Arc::new(BridgeState::default());
        let task_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let (len, _src) = match sock.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        log::warn!("UDP gaze recv error: {e}");
                        continue;
                    }
                };

                if let Ok(s) = std::str::from_utf8(&buf[..len]) {
                    match parse_gaze_message(s) {
                        Some(g) => task_state.push(g),
                        None => log::debug!("Dropped malformed gaze datagram"),
                    }
                }
            }
        });

        Ok((Self { state }, handle))
    }
}

impl GazeApi for UdpGazeBridge {
    fn gaze(&mut self) -> GazeSample {
        (*lock(&self.state.latest)).unwrap_or_default()
    }

    fn drain_since_last(&mut self) -> Vec<GazeSample> {
        lock(&self.state.pending).drain(..).collect()
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }
}

fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

//! Frame capture.
//!
//! `FrameSource` owns a capture device and runs it on a dedicated thread,
//! publishing every captured frame into a latest-wins `FrameSlot`. Readers never
//! block the capture loop and the capture loop never waits for readers.
//!
//! Devices:
//! - `stub://...` paths: synthetic scene generator (tests, demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A device that cannot be opened does not make `FrameSource::open` fail. The
//! source is marked unavailable and `read()` always returns `None`, so downstream
//! perception degrades to empty cycles instead of taking the process down.

mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::{Frame, FrameSlot, GammaCorrection, DEFAULT_GAMMA};

pub use synthetic::SyntheticDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// Backoff after a failed device read before the next attempt.
pub const READ_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Mean intensity below which the first frame triggers a dark-scene warning.
const DARK_SCENE_MEAN: f32 = 50.0;

/// A capture device driven by the `FrameSource` thread.
///
/// `capture` may block until the device has a frame ready. It must not hold
/// any lock shared with readers.
pub trait CaptureDevice: Send {
    /// Device identifier for logs.
    fn name(&self) -> &str;

    /// Capture the next frame, stamped with `seq`.
    fn capture(&mut self, seq: u64) -> Result<Frame>;

    /// Release the underlying device. Called once, on the capture thread, when
    /// the loop exits.
    fn release(&mut self) {}
}

/// Configuration for a frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Device path (e.g., "/dev/video2") or "stub://name" for a synthetic scene.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Upper bound on capture rate. The loop never publishes faster than this.
    pub target_fps: u32,
    /// Gamma applied on `read()`. `None` returns frames untouched.
    pub gamma: Option<f32>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video2".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
            gamma: Some(DEFAULT_GAMMA),
        }
    }
}

impl SourceConfig {
    fn frame_interval(&self) -> Duration {
        if self.target_fps == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(1000 / self.target_fps as u64)
    }
}

/// Open the device named by `config.device`.
pub fn open_device(config: &SourceConfig) -> Result<Box<dyn CaptureDevice>> {
    if config.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticDevice::new(config)));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        let device = V4l2Device::open(config)?;
        Ok(Box::new(device))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow!(
            "capture device {} requires the ingest-v4l2 feature",
            config.device
        ))
    }
}

#[derive(Debug, Default)]
struct CaptureCounters {
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
}

/// Read-only view of a source's availability and counters, shareable with the
/// request layer after the source itself has moved into the daemon.
#[derive(Clone, Debug)]
pub struct SourceStatus {
    device: String,
    available: bool,
    counters: Arc<CaptureCounters>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceStatusSnapshot {
    pub device: String,
    pub available: bool,
    pub frames_captured: u64,
    pub read_failures: u64,
}

impl SourceStatus {
    pub fn snapshot(&self) -> SourceStatusSnapshot {
        SourceStatusSnapshot {
            device: self.device.clone(),
            available: self.available,
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
        }
    }
}

/// Cheap, cloneable read handle onto a frame source's slot.
///
/// Detection threads hold one of these instead of the `FrameSource` itself.
#[derive(Clone, Debug)]
pub struct FrameReader {
    slot: Arc<FrameSlot>,
    gamma: Option<GammaCorrection>,
}

impl FrameReader {
    /// Reader over an externally fed slot (replay tools, tests).
    pub fn from_slot(slot: Arc<FrameSlot>, gamma: Option<GammaCorrection>) -> Self {
        Self { slot, gamma }
    }

    /// Latest frame with gamma applied, or `None`. Never blocks on capture.
    pub fn read(&self) -> Option<Frame> {
        let frame = self.slot.latest()?;
        Some(match &self.gamma {
            Some(gamma) => gamma.apply(&frame),
            None => frame,
        })
    }
}

/// Background frame producer.
pub struct FrameSource {
    config: SourceConfig,
    slot: Arc<FrameSlot>,
    gamma: Option<GammaCorrection>,
    device: Option<Box<dyn CaptureDevice>>,
    available: bool,
    counters: Arc<CaptureCounters>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Open the configured device. Never fails: an unopenable device yields an
    /// unavailable source.
    pub fn open(config: SourceConfig) -> Self {
        match open_device(&config) {
            Ok(device) => Self::with_device(config, device),
            Err(err) => {
                log::error!(
                    "FrameSource: failed to open {}: {:#}; perception disabled",
                    config.device,
                    err
                );
                Self::build(config, None)
            }
        }
    }

    /// Wrap an already-open device.
    pub fn with_device(config: SourceConfig, device: Box<dyn CaptureDevice>) -> Self {
        Self::build(config, Some(device))
    }

    /// A source that never produces frames.
    pub fn unavailable(config: SourceConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: SourceConfig, device: Option<Box<dyn CaptureDevice>>) -> Self {
        let gamma = config.gamma.and_then(|g| {
            let table = GammaCorrection::new(g);
            if table.is_none() {
                log::warn!("FrameSource: ignoring invalid gamma {}", g);
            }
            table
        });
        Self {
            available: device.is_some(),
            config,
            slot: Arc::new(FrameSlot::new()),
            gamma,
            device,
            counters: Arc::new(CaptureCounters::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            join: None,
        }
    }

    /// Launch the capture loop. A no-op for unavailable sources.
    pub fn start(&mut self) -> Result<()> {
        if self.join.is_some() {
            return Err(anyhow!("frame source already started"));
        }
        let Some(device) = self.device.take() else {
            if self.available {
                return Err(anyhow!("frame source cannot be restarted after stop"));
            }
            log::warn!(
                "FrameSource: {} unavailable, capture loop not started",
                self.config.device
            );
            return Ok(());
        };

        self.shutdown.store(false, Ordering::SeqCst);
        let slot = self.slot.clone();
        let counters = self.counters.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.config.frame_interval();
        let join = std::thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || run_capture(device, slot, counters, shutdown, interval))?;
        self.join = Some(join);
        log::info!("FrameSource: capture started on {}", self.config.device);
        Ok(())
    }

    /// Latest frame or `None`. Non-blocking.
    pub fn read(&self) -> Option<Frame> {
        if !self.available {
            return None;
        }
        self.reader().read()
    }

    pub fn reader(&self) -> FrameReader {
        FrameReader {
            slot: self.slot.clone(),
            gamma: self.gamma.clone(),
        }
    }

    /// Stop the capture loop, release the device, and wait for the thread to exit.
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("frame capture thread panicked"))?;
            log::info!(
                "FrameSource: stopped after {} frames",
                self.frames_captured()
            );
        }
        if let Some(mut device) = self.device.take() {
            device.release();
        }
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn is_running(&self) -> bool {
        self.join.is_some()
    }

    pub fn frames_captured(&self) -> u64 {
        self.counters.frames_captured.load(Ordering::Relaxed)
    }

    pub fn read_failures(&self) -> u64 {
        self.counters.read_failures.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn status(&self) -> SourceStatus {
        SourceStatus {
            device: self.config.device.clone(),
            available: self.available,
            counters: self.counters.clone(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("FrameSource: {}", err);
        }
    }
}

fn run_capture(
    mut device: Box<dyn CaptureDevice>,
    slot: Arc<FrameSlot>,
    counters: Arc<CaptureCounters>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut seq = 0u64;
    let mut consecutive_failures = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        match device.capture(seq + 1) {
            Ok(frame) => {
                seq += 1;
                if seq == 1 && frame.mean_intensity() < DARK_SCENE_MEAN {
                    log::warn!(
                        "FrameSource: {} image extremely dark (mean {:.1}), check exposure",
                        device.name(),
                        frame.mean_intensity()
                    );
                }
                if consecutive_failures > 0 {
                    log::info!(
                        "FrameSource: {} recovered after {} failed reads",
                        device.name(),
                        consecutive_failures
                    );
                    consecutive_failures = 0;
                }
                slot.publish(frame);
                counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                let elapsed = started.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                counters.read_failures.fetch_add(1, Ordering::Relaxed);
                if consecutive_failures == 1 || consecutive_failures % 50 == 0 {
                    log::warn!(
                        "FrameSource: read failed on {} ({} in a row), retrying: {:#}",
                        device.name(),
                        consecutive_failures,
                        err
                    );
                }
                std::thread::sleep(READ_RETRY_BACKOFF);
            }
        }
    }
    device.release();
}

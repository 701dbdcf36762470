use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use super::registry::TrackRegistry;
use crate::detect::{LabelMap, Observation, TrackingBackend};
use crate::ingest::FrameReader;

/// Observations at or below this confidence are discarded before tracking.
pub const ACCEPTANCE_THRESHOLD: f32 = 0.4;
/// Observations needed before a track counts as stable.
pub const DEFAULT_MIN_SEEN_COUNT: u64 = 5;
/// Tracks not observed for longer than this are evicted.
pub const DEFAULT_STALE_AGE: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub stale_age: Duration,
    /// Loop period when frames are available (20 Hz by default).
    pub target_interval: Duration,
    /// Pause before retrying when no new frame is available.
    pub idle_backoff: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_age: DEFAULT_STALE_AGE,
            target_interval: Duration::from_millis(50),
            idle_backoff: Duration::from_millis(100),
        }
    }
}

impl TrackerConfig {
    pub fn with_rate_hz(mut self, hz: u32) -> Self {
        self.target_interval = Duration::from_millis(1000 / hz.max(1) as u64);
        self
    }
}

/// Loop counters, readable from any thread.
#[derive(Debug, Default)]
pub struct TrackerStats {
    cycles: AtomicU64,
    idle_cycles: AtomicU64,
    frames_processed: AtomicU64,
    observations_accepted: AtomicU64,
    observations_rejected: AtomicU64,
    inference_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStatsSnapshot {
    pub cycles: u64,
    pub idle_cycles: u64,
    pub frames_processed: u64,
    pub observations_accepted: u64,
    pub observations_rejected: u64,
    pub inference_failures: u64,
}

impl TrackerStats {
    pub fn snapshot(&self) -> TrackerStatsSnapshot {
        TrackerStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            idle_cycles: self.idle_cycles.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            observations_accepted: self.observations_accepted.load(Ordering::Relaxed),
            observations_rejected: self.observations_rejected.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
        }
    }
}

/// What one loop iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No frame yet, or the latest frame was already processed. Stale tracks
    /// are still pruned.
    NoFrame,
    /// No backend loaded; the registry was only pruned.
    NoBackend,
    /// Backend ran; counts of observations folded in and discarded.
    Processed { accepted: usize, rejected: usize },
    /// Backend returned an error or panicked; the frame was skipped.
    InferenceFailed,
}

/// One detect → update → prune iteration, separated from the thread so it can
/// be driven step by step.
pub struct TrackingCycle {
    reader: FrameReader,
    registry: Arc<TrackRegistry>,
    backend: Option<Box<dyn TrackingBackend>>,
    labels: LabelMap,
    config: TrackerConfig,
    stats: Arc<TrackerStats>,
    last_seq: Option<u64>,
}

impl TrackingCycle {
    /// `backend: None` builds a no-op tracker for when the model failed to load.
    pub fn new(
        reader: FrameReader,
        registry: Arc<TrackRegistry>,
        backend: Option<Box<dyn TrackingBackend>>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            reader,
            registry,
            backend,
            labels: LabelMap::default(),
            config,
            stats: Arc::new(TrackerStats::default()),
            last_seq: None,
        }
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    pub fn stats(&self) -> Arc<TrackerStats> {
        self.stats.clone()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    pub fn step(&mut self) -> CycleOutcome {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let frame = match self.reader.read() {
            Some(frame) if self.last_seq != Some(frame.seq) => frame,
            _ => {
                self.stats.idle_cycles.fetch_add(1, Ordering::Relaxed);
                // A stalled camera leaves its last frame in the slot; tracks still age out.
                self.registry.prune(self.config.stale_age);
                return CycleOutcome::NoFrame;
            }
        };
        self.last_seq = Some(frame.seq);

        let Some(backend) = self.backend.as_mut() else {
            self.registry.prune(self.config.stale_age);
            return CycleOutcome::NoBackend;
        };

        // Registry lock is not held here; inference may take as long as it takes.
        let result = catch_unwind(AssertUnwindSafe(|| backend.detect_and_track(&frame)));
        self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);
        let raw = match result {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                self.stats.inference_failures.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "DetectionTracker: inference failed on frame {}: {:#}",
                    frame.seq,
                    err
                );
                self.registry.prune(self.config.stale_age);
                return CycleOutcome::InferenceFailed;
            }
            Err(_) => {
                self.stats.inference_failures.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "DetectionTracker: backend panicked on frame {}, skipping",
                    frame.seq
                );
                self.registry.prune(self.config.stale_age);
                return CycleOutcome::InferenceFailed;
            }
        };

        let mut accepted = 0;
        let mut rejected = 0;
        for raw_obs in raw {
            let obs = match Observation::from_raw(raw_obs) {
                Ok(obs) => obs,
                Err(err) => {
                    log::warn!("DetectionTracker: dropping malformed observation: {}", err);
                    rejected += 1;
                    continue;
                }
            };
            if obs.confidence() <= ACCEPTANCE_THRESHOLD {
                rejected += 1;
                continue;
            }
            let label = self.labels.map(obs.label());
            self.registry.observe(&obs.with_label(label));
            accepted += 1;
        }
        self.registry.prune(self.config.stale_age);

        self.stats
            .observations_accepted
            .fetch_add(accepted as u64, Ordering::Relaxed);
        self.stats
            .observations_rejected
            .fetch_add(rejected as u64, Ordering::Relaxed);
        log::debug!(
            "DetectionTracker: frame {} accepted={} rejected={}",
            frame.seq,
            accepted,
            rejected
        );
        CycleOutcome::Processed { accepted, rejected }
    }

    fn pause_after(&self, outcome: CycleOutcome, started: Instant) -> Duration {
        match outcome {
            CycleOutcome::NoFrame => self.config.idle_backoff,
            _ => self.config.target_interval.saturating_sub(started.elapsed()),
        }
    }
}

/// Background detection/tracking loop.
pub struct DetectionTracker {
    stats: Arc<TrackerStats>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DetectionTracker {
    pub fn spawn(cycle: TrackingCycle) -> Result<Self> {
        let stats = cycle.stats();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("detection-tracker".to_string())
            .spawn(move || run_tracking(cycle, shutdown_thread))?;
        Ok(Self {
            stats,
            shutdown,
            join: Some(join),
        })
    }

    pub fn stats(&self) -> TrackerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<TrackerStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.join.is_some()
    }

    /// Signal the loop and wait for the thread to exit. After this returns the
    /// tracker no longer touches the registry.
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("detection tracker thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for DetectionTracker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("DetectionTracker: {}", err);
        }
    }
}

fn run_tracking(mut cycle: TrackingCycle, shutdown: Arc<AtomicBool>) {
    match cycle.backend_name() {
        Some(name) => log::info!("DetectionTracker: loop started (backend={})", name),
        None => log::warn!("DetectionTracker: loop started without a model; tracking disabled"),
    }
    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        let outcome = cycle.step();
        let pause = cycle.pause_after(outcome, started);
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }
    let stats = cycle.stats.snapshot();
    log::info!(
        "DetectionTracker: loop stopped after {} frames ({} inference failures)",
        stats.frames_processed,
        stats.inference_failures
    );
}

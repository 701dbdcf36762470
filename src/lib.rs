//! Shelfscan
//!
//! Continuous perception-to-inventory pipeline: a camera feed is tracked frame
//! by frame, tracks that persist long enough are offered as stable objects, and
//! each stable track can be committed to a persisted inventory at most once.
//!
//! # Architecture
//!
//! Three independently scheduled loops share two synchronized stores:
//!
//! 1. **Capture** (`ingest::FrameSource`) publishes the latest frame into a
//!    single-slot, latest-wins buffer.
//! 2. **Detection/tracking** (`track::DetectionTracker`) pulls the latest frame,
//!    runs the tracking backend, and folds observations into `TrackRegistry`.
//! 3. **Requests** (`api`, over `service::InventoryService`) read stable
//!    snapshots, commit tracks with `mark_logged`, and update `InventoryStore`.
//!
//! No lock is held across inference or network I/O. The inventory lock spans
//! the full read-modify-write of every mutation.
//!
//! # Module Structure
//!
//! - `frame`: frame buffers, gamma correction, the latest-wins slot
//! - `ingest`: capture devices and the capture loop
//! - `detect`: tracking backend boundary, observation validation, label mapping
//! - `track`: track registry and the detection loop
//! - `pose`: box-to-grasp-pose heuristic
//! - `storage`: persisted inventory
//! - `service`, `api`: request layer
//! - `config`: daemon configuration

use anyhow::Result;
use std::sync::Arc;

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pose;
pub mod service;
pub mod storage;
pub mod track;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use config::ShelfscanConfig;
pub use detect::{BackendRegistry, BoundingBox, LabelMap, Observation, TrackingBackend};
pub use frame::{Frame, FrameSlot, GammaCorrection};
pub use ingest::{CaptureDevice, FrameReader, FrameSource, SourceConfig};
pub use pose::PoseEstimator;
pub use service::{InventoryService, LogOutcome};
pub use storage::{InventoryItem, InventoryStore, Pose};
pub use track::{
    DetectionTracker, MarkLogged, StableObject, TrackRegistry, TrackerConfig, TrackingCycle,
};

/// The capture and tracking loops plus the shared stores, started in
/// dependency order and stopped in reverse.
pub struct Pipeline {
    registry: Arc<TrackRegistry>,
    store: Arc<InventoryStore>,
    source: FrameSource,
    tracker: DetectionTracker,
    service: InventoryService,
}

impl Pipeline {
    /// Open the store, start capture, pick the tracking backend, start tracking.
    ///
    /// A backend that is unknown or fails to load yields a no-op tracker; an
    /// unopenable camera yields an unavailable source. Neither is fatal.
    pub fn start(cfg: &ShelfscanConfig, backends: &BackendRegistry) -> Result<Self> {
        let store = Arc::new(InventoryStore::open(
            cfg.inventory_path.clone(),
            cfg.cross_process_lock,
        ));
        Self::start_with_store(cfg, backends, store)
    }

    pub fn start_with_store(
        cfg: &ShelfscanConfig,
        backends: &BackendRegistry,
        store: Arc<InventoryStore>,
    ) -> Result<Self> {
        let registry = Arc::new(TrackRegistry::new());

        let mut source = FrameSource::open(cfg.source_config());
        source.start()?;

        let backend = match backends.build(&cfg.tracking.backend) {
            Ok(backend) => Some(backend),
            Err(err) => {
                log::error!(
                    "Pipeline: tracking backend '{}' unavailable ({:#}); running without tracking. Known backends: {:?}",
                    cfg.tracking.backend,
                    err,
                    backends.list()
                );
                None
            }
        };
        let cycle = TrackingCycle::new(
            source.reader(),
            registry.clone(),
            backend,
            cfg.tracker_config(),
        );
        let tracker = DetectionTracker::spawn(cycle)?;

        let service = InventoryService::new(registry.clone(), store.clone())
            .with_min_seen_count(cfg.tracking.min_seen_count)
            .with_pose_estimator(PoseEstimator::new(cfg.camera.width, cfg.camera.height))
            .with_tracker_stats(tracker.stats_handle())
            .with_source_status(source.status());

        Ok(Self {
            registry,
            store,
            source,
            tracker,
            service,
        })
    }

    pub fn service(&self) -> InventoryService {
        self.service.clone()
    }

    pub fn registry(&self) -> Arc<TrackRegistry> {
        self.registry.clone()
    }

    pub fn store(&self) -> Arc<InventoryStore> {
        self.store.clone()
    }

    pub fn source_available(&self) -> bool {
        self.source.is_available()
    }

    /// One-line summary for periodic health logging.
    pub fn health_line(&self) -> String {
        let stats = self.tracker.stats();
        format!(
            "frames captured={} processed={} inference_failures={} live_tracks={}",
            self.source.frames_captured(),
            stats.frames_processed,
            stats.inference_failures,
            self.registry.len()
        )
    }

    /// Stop tracking, then capture. Both threads have exited when this returns.
    pub fn stop(mut self) -> Result<()> {
        self.tracker.stop()?;
        self.source.stop()?;
        log::info!("Pipeline: stopped");
        Ok(())
    }
}

//! Request-layer operations over the track registry and the inventory store.
//!
//! `InventoryService` is what the HTTP API (and any other front end) calls. It
//! owns no state of its own beyond shared handles, so it is cheap to clone into
//! request handlers.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::ingest::{SourceStatus, SourceStatusSnapshot};
use crate::pose::PoseEstimator;
use crate::storage::{InventoryItem, InventoryStore, DEFAULT_CATEGORY};
use crate::track::{
    MarkLogged, StableObject, TrackRegistry, TrackerStats, TrackerStatsSnapshot,
    DEFAULT_MIN_SEEN_COUNT,
};

/// Result of `InventoryService::log_track`.
#[derive(Clone, Debug, PartialEq)]
pub enum LogOutcome {
    /// This call committed the track; the returned record reflects the increment.
    Logged(InventoryItem),
    /// An earlier call already committed this track.
    AlreadyLogged,
    /// The track was never seen or has been pruned.
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub min_seen_count: u64,
    pub live_tracks: usize,
    pub stable_tracks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceStatusSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerStatsSnapshot>,
}

#[derive(Clone)]
pub struct InventoryService {
    registry: Arc<TrackRegistry>,
    store: Arc<InventoryStore>,
    pose: PoseEstimator,
    category: String,
    min_seen_count: u64,
    tracker_stats: Option<Arc<TrackerStats>>,
    source_status: Option<SourceStatus>,
}

impl InventoryService {
    pub fn new(registry: Arc<TrackRegistry>, store: Arc<InventoryStore>) -> Self {
        Self {
            registry,
            store,
            pose: PoseEstimator::default(),
            category: DEFAULT_CATEGORY.to_string(),
            min_seen_count: DEFAULT_MIN_SEEN_COUNT,
            tracker_stats: None,
            source_status: None,
        }
    }

    pub fn with_min_seen_count(mut self, min_seen_count: u64) -> Self {
        self.min_seen_count = min_seen_count;
        self
    }

    pub fn with_pose_estimator(mut self, pose: PoseEstimator) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_tracker_stats(mut self, stats: Arc<TrackerStats>) -> Self {
        self.tracker_stats = Some(stats);
        self
    }

    pub fn with_source_status(mut self, status: SourceStatus) -> Self {
        self.source_status = Some(status);
        self
    }

    pub fn min_seen_count(&self) -> u64 {
        self.min_seen_count
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            min_seen_count: self.min_seen_count,
            live_tracks: self.registry.len(),
            stable_tracks: self.registry.snapshot_stable(self.min_seen_count).len(),
            source: self.source_status.as_ref().map(SourceStatus::snapshot),
            tracker: self.tracker_stats.as_ref().map(|s| s.snapshot()),
        }
    }

    pub fn list_stable(&self, min_count: u64) -> Vec<StableObject> {
        self.registry.snapshot_stable(min_count)
    }

    /// Commit a tracked object to inventory at most once.
    ///
    /// `mark_logged` is the commit point. If the store write fails after it, the
    /// track stays logged and the error is returned: an increment can be lost,
    /// never duplicated.
    pub fn log_track(&self, track_id: u64) -> Result<LogOutcome> {
        let observed = match self.registry.mark_logged(track_id) {
            MarkLogged::Logged(observed) => observed,
            MarkLogged::AlreadyLogged => {
                log::debug!("InventoryService: track {} already logged", track_id);
                return Ok(LogOutcome::AlreadyLogged);
            }
            MarkLogged::NotFound => return Ok(LogOutcome::NotFound),
        };

        let pose = self.pose.estimate(&observed.bbox);
        match self
            .store
            .add_or_increment(&observed.label, &self.category, 1, Some(pose))
        {
            Ok(item) => {
                log::info!(
                    "InventoryService: logged track {} as {} (confidence {:.2})",
                    track_id,
                    item.name,
                    observed.confidence
                );
                Ok(LogOutcome::Logged(item))
            }
            Err(err) => {
                log::error!(
                    "InventoryService: track {} marked logged but not stored: {:#}",
                    track_id,
                    err
                );
                Err(err)
            }
        }
    }

    pub fn list_inventory(&self) -> Result<Vec<InventoryItem>> {
        self.store.get_all()
    }

    /// Manual entry, without a pose.
    pub fn add_item(&self, name: &str, category: Option<&str>, qty: Option<u32>) -> Result<InventoryItem> {
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.category.as_str());
        let qty = qty.unwrap_or(1);
        if qty == 0 {
            return Err(anyhow!("qty must be at least 1"));
        }
        self.store.add_or_increment(name, category, qty, None)
    }

    pub fn delete_by_id(&self, id: u64) -> Result<bool> {
        self.store.delete_by_id(id)
    }

    pub fn delete_by_name(&self, name: &str) -> Result<bool> {
        self.store.delete_by_name(name)
    }

    pub fn clear_inventory(&self) -> Result<()> {
        self.store.clear()
    }
}

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::detect::{BoundingBox, Observation};

/// State of one tracked instance. Lives only inside `TrackRegistry`.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    pub id: u64,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub first_seen: Instant,
    pub last_seen: Instant,
    /// Number of observations folded into this entry. Monotone while the entry lives.
    pub count: u64,
    /// Set once when the object is committed to inventory. Never cleared.
    pub logged: bool,
}

/// Immutable copy of a stable track handed to the request layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StableObject {
    pub id: u64,
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub logged: bool,
}

/// Data captured at the moment a track was marked logged.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoggedObservation {
    pub label: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Result of `TrackRegistry::mark_logged`.
#[derive(Clone, Debug, PartialEq)]
pub enum MarkLogged {
    /// This call performed the false→true transition.
    Logged(LoggedObservation),
    /// The track exists but an earlier call already logged it.
    AlreadyLogged,
    /// No such track (never seen, or pruned).
    NotFound,
}

/// Thread-safe map of currently tracked objects.
///
/// One mutex covers every operation, held only for the operation itself. Callers
/// never get a reference into the map; reads return owned copies.
#[derive(Debug, Default)]
pub struct TrackRegistry {
    objects: Mutex<HashMap<u64, TrackedObject>>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation is a single in-place assignment, so a panic elsewhere while
    // the guard was held cannot leave an entry half-updated.
    fn objects(&self) -> MutexGuard<'_, HashMap<u64, TrackedObject>> {
        match self.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a new track or fold an observation into an existing one.
    pub fn update(&self, id: u64, label: &str, confidence: f32, bbox: BoundingBox) {
        self.update_at(id, label, confidence, bbox, Instant::now());
    }

    pub fn update_at(&self, id: u64, label: &str, confidence: f32, bbox: BoundingBox, now: Instant) {
        let mut objects = self.objects();
        match objects.get_mut(&id) {
            Some(obj) => {
                obj.label.clear();
                obj.label.push_str(label);
                obj.confidence = confidence;
                obj.bbox = bbox;
                obj.last_seen = now;
                obj.count += 1;
            }
            None => {
                objects.insert(
                    id,
                    TrackedObject {
                        id,
                        label: label.to_string(),
                        confidence,
                        bbox,
                        first_seen: now,
                        last_seen: now,
                        count: 1,
                        logged: false,
                    },
                );
            }
        }
    }

    /// `update` from a validated observation.
    pub fn observe(&self, obs: &Observation) {
        self.update(obs.track_id(), obs.label(), obs.confidence(), obs.bbox());
    }

    /// Remove every entry with `now - last_seen > max_age`, logged or not.
    /// Returns the number of entries removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        self.prune_at(max_age, Instant::now())
    }

    pub fn prune_at(&self, max_age: Duration, now: Instant) -> usize {
        let mut objects = self.objects();
        let before = objects.len();
        objects.retain(|_, obj| now.saturating_duration_since(obj.last_seen) <= max_age);
        let removed = before - objects.len();
        if removed > 0 {
            log::debug!("TrackRegistry: pruned {} stale tracks", removed);
        }
        removed
    }

    /// Copies of every entry with `count >= min_count`, ordered by track id.
    pub fn snapshot_stable(&self, min_count: u64) -> Vec<StableObject> {
        let mut stable: Vec<StableObject> = self
            .objects()
            .values()
            .filter(|obj| obj.count >= min_count)
            .map(|obj| StableObject {
                id: obj.id,
                label: obj.label.clone(),
                confidence: obj.confidence,
                bbox: obj.bbox,
                logged: obj.logged,
            })
            .collect();
        stable.sort_by_key(|obj| obj.id);
        stable
    }

    /// Atomically flip `logged` from false to true.
    ///
    /// Of any number of concurrent callers for the same id, exactly one receives
    /// `Logged` with the data captured under the lock.
    pub fn mark_logged(&self, id: u64) -> MarkLogged {
        let mut objects = self.objects();
        let Some(obj) = objects.get_mut(&id) else {
            return MarkLogged::NotFound;
        };
        if obj.logged {
            return MarkLogged::AlreadyLogged;
        }
        obj.logged = true;
        MarkLogged::Logged(LoggedObservation {
            label: obj.label.clone(),
            bbox: obj.bbox,
            confidence: obj.confidence,
        })
    }

    /// Copy of a single entry.
    pub fn get(&self, id: u64) -> Option<TrackedObject> {
        self.objects().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }
}

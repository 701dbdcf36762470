//! Object tracking state and the detection loop that feeds it.
//!
//! - `TrackRegistry`: thread-safe map of live tracks, stability snapshots, and the
//!   at-most-once `mark_logged` commit point.
//! - `DetectionTracker`: background loop pulling frames, running the tracking
//!   backend, and folding accepted observations into the registry.
//!
//! Per-object lifecycle: unseen → tracked (count = 1) → tracked (count + 1) per
//! observation → pruned once `now - last_seen` exceeds the staleness window.
//! `logged` is orthogonal: it flips at most once while the track is live, and a
//! logged track is pruned like any other. A physical object that is re-acquired
//! under a new track id starts over as a new, unlogged track.

mod registry;
mod worker;

pub use registry::{LoggedObservation, MarkLogged, StableObject, TrackRegistry, TrackedObject};
pub use worker::{
    CycleOutcome, DetectionTracker, TrackerConfig, TrackerStats, TrackerStatsSnapshot,
    TrackingCycle, ACCEPTANCE_THRESHOLD, DEFAULT_MIN_SEEN_COUNT, DEFAULT_STALE_AGE,
};

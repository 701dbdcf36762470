//! Detection and tracking boundary.
//!
//! The detect-and-track model itself is an external capability behind
//! `TrackingBackend`. This module owns what crosses that boundary: raw backend
//! output is validated into `Observation` values here, and raw class names are
//! mapped to inventory labels by `LabelMap`.

mod backend;
mod backends;
mod labels;
mod registry;
mod result;

pub use backend::TrackingBackend;
pub use backends::StubBackend;
pub use labels::LabelMap;
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Observation, RawObservation};

use anyhow::Result;

use crate::detect::result::RawObservation;
use crate::frame::Frame;

/// Detect-and-track capability.
///
/// Track ids are assigned and kept stable across calls by the backend; callers
/// never reassign or merge them. Implementations may keep per-stream state
/// (that is what makes ids persistent), hence `&mut self`.
///
/// There is no timeout around `detect_and_track`. A backend that hangs stalls
/// only the detection thread that owns it.
pub trait TrackingBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection plus tracking on one frame.
    fn detect_and_track(&mut self, frame: &Frame) -> Result<Vec<RawObservation>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

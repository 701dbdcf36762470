//! Frame buffers and the single-slot hand-off between capture and detection.
//!
//! - `Frame`: timestamped pixel buffer. Pixels are shared (`Arc`) so a frame can be
//!   cloned out of the slot without copying the image.
//! - `GammaCorrection`: deterministic brightness lookup table applied on read.
//! - `FrameSlot`: latest-wins slot. The producer overwrites, readers take a copy of
//!   whatever is current. Neither side ever waits on the other beyond a pointer swap.

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Default gamma used by the capture path. Values below 1.0 brighten dark scenes.
pub const DEFAULT_GAMMA: f32 = 0.6;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A captured image. RGB24, row-major, `width * height * 3` bytes.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    /// Monotonic sequence number assigned by the frame source.
    pub seq: u64,
    /// Capture instant (monotonic clock).
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        Self {
            pixels: Arc::new(pixels),
            width,
            height,
            seq,
            captured_at: Instant::now(),
        }
    }

    /// Read-only pixel access. Detection backends receive frames through this.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Mean intensity over all channels, 0..=255. Used for dark-scene warnings.
    pub fn mean_intensity(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f32 / self.pixels.len() as f32
    }

    /// Returns a new frame with `table` applied to every byte. The source frame's
    /// buffer is never touched, so this is safe to call on a frame shared with the
    /// capture thread.
    fn mapped(&self, table: &[u8; 256]) -> Frame {
        let pixels = self.pixels.iter().map(|&p| table[p as usize]).collect();
        Frame {
            pixels: Arc::new(pixels),
            width: self.width,
            height: self.height,
            seq: self.seq,
            captured_at: self.captured_at,
        }
    }
}

// ----------------------------------------------------------------------------
// GammaCorrection
// ----------------------------------------------------------------------------

/// Precomputed gamma lookup table: `out = 255 * (in / 255) ^ gamma`.
///
/// `gamma < 1.0` lifts shadows and midtones, `gamma > 1.0` darkens.
#[derive(Clone, Debug)]
pub struct GammaCorrection {
    gamma: f32,
    table: [u8; 256],
}

impl GammaCorrection {
    /// Build a table for `gamma`. Returns `None` for non-positive or non-finite gamma.
    pub fn new(gamma: f32) -> Option<Self> {
        if !gamma.is_finite() || gamma <= 0.0 {
            return None;
        }
        let exponent = gamma as f64;
        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let v = (i as f64 / 255.0).powf(exponent) * 255.0;
            *slot = v.clamp(0.0, 255.0) as u8;
        }
        Some(Self { gamma, table })
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn apply(&self, frame: &Frame) -> Frame {
        frame.mapped(&self.table)
    }
}

// ----------------------------------------------------------------------------
// FrameSlot
// ----------------------------------------------------------------------------

/// Single-slot, latest-wins frame store shared between the capture thread and
/// any number of readers.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. Called only by the capture loop.
    pub fn publish(&self, frame: Frame) {
        let mut guard = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(frame);
    }

    /// Clone of the current frame, or `None` if nothing was captured yet.
    ///
    /// The lock is held only for the `Arc` clone; any per-read transform runs
    /// after the guard is dropped.
    pub fn latest(&self) -> Option<Frame> {
        let guard = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }

    pub fn clear(&self) {
        let mut guard = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

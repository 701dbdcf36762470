use anyhow::Result;
use rand::Rng;

use crate::detect::backend::TrackingBackend;
use crate::detect::result::RawObservation;
use crate::frame::Frame;

/// Scripted scene length in frames.
const CYCLE: u64 = 240;
/// Frames each item stays in view per cycle.
const VISIBLE_FOR: u64 = 140;
/// Offset between item entries.
const ENTRY_STAGGER: u64 = 40;
const ITEMS: &[(&str, f32)] = &[("apple", 0.82), ("banana", 0.74), ("bottle", 0.61)];
/// Label and confidence of a distractor that sits below the acceptance threshold.
const DISTRACTOR: (&str, f32) = ("cup", 0.3);

/// Stub backend for testing and demos.
///
/// Ignores pixel content and replays a fixed scene keyed on the frame sequence
/// number: a few items walk in and out of view, each re-entry getting a fresh
/// track id, the way a real tracker loses and re-acquires objects. Confidences
/// carry a small random jitter.
#[derive(Default)]
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl TrackingBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect_and_track(&mut self, frame: &Frame) -> Result<Vec<RawObservation>> {
        self.frames_seen += 1;

        let w = frame.width.max(16) as f32;
        let h = frame.height.max(16) as f32;
        let size = (w.min(h) / 6.0).max(4.0);
        let phase = frame.seq % CYCLE;
        let epoch = frame.seq / CYCLE;
        let mut rng = rand::thread_rng();

        let mut out = Vec::new();
        for (k, (label, base_conf)) in ITEMS.iter().enumerate() {
            let enter = k as u64 * ENTRY_STAGGER;
            if phase < enter || phase >= enter + VISIBLE_FOR {
                continue;
            }
            let progress = (phase - enter) as f32 / VISIBLE_FOR as f32;
            let xmin = (k as f32 * w / 3.0 + progress * w / 4.0).min(w - size);
            let ymin = (h / 3.0 + k as f32 * size / 2.0).min(h - size);
            let jitter: f32 = rng.gen_range(-0.05..0.05);
            out.push(RawObservation {
                track_id: (epoch * ITEMS.len() as u64 + k as u64 + 1) as i64,
                label: label.to_string(),
                confidence: (base_conf + jitter).clamp(0.0, 1.0),
                bbox: [xmin, ymin, xmin + size, ymin + size],
            });
        }

        if phase % 3 == 0 {
            let (label, confidence) = DISTRACTOR;
            out.push(RawObservation {
                track_id: 10_000 + epoch as i64,
                label: label.to_string(),
                confidence,
                bbox: [0.0, 0.0, size, size],
            });
        }

        Ok(out)
    }
}

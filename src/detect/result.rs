use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixels: `[xmin, ymin, xmax, ymax]`.
///
/// Serialized as a plain four-element array.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub [f32; 4]);

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self([xmin, ymin, xmax, ymax])
    }

    pub fn xmin(&self) -> f32 {
        self.0[0]
    }

    pub fn ymin(&self) -> f32 {
        self.0[1]
    }

    pub fn xmax(&self) -> f32 {
        self.0[2]
    }

    pub fn ymax(&self) -> f32 {
        self.0[3]
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.xmin() + self.xmax()) / 2.0,
            (self.ymin() + self.ymax()) / 2.0,
        )
    }

    fn validate(&self) -> Result<()> {
        if self.0.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("box has non-finite coordinates: {:?}", self.0));
        }
        if self.xmin() > self.xmax() || self.ymin() > self.ymax() {
            return Err(anyhow!("box corners are inverted: {:?}", self.0));
        }
        Ok(())
    }
}

/// Unvalidated per-instance output of a tracking backend.
#[derive(Clone, Debug, PartialEq)]
pub struct RawObservation {
    pub track_id: i64,
    pub label: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// Validated observation of one tracked instance in one frame.
///
/// Constructed only through `Observation::from_raw`, so every value reaching
/// the track registry has a non-negative id, a non-empty label, a confidence
/// in `[0, 1]` and a well-formed box.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    track_id: u64,
    label: String,
    confidence: f32,
    bbox: BoundingBox,
}

impl Observation {
    pub fn from_raw(raw: RawObservation) -> Result<Self> {
        let track_id = u64::try_from(raw.track_id)
            .map_err(|_| anyhow!("negative track id {}", raw.track_id))?;
        let label = raw.label.trim();
        if label.is_empty() {
            return Err(anyhow!("empty label for track {}", track_id));
        }
        if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
            return Err(anyhow!(
                "confidence {} out of range for track {}",
                raw.confidence,
                track_id
            ));
        }
        let bbox = BoundingBox(raw.bbox);
        bbox.validate()?;
        Ok(Self {
            track_id,
            label: label.to_string(),
            confidence: raw.confidence,
            bbox,
        })
    }

    pub fn track_id(&self) -> u64 {
        self.track_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Replace the label (used for class-name mapping after validation).
    pub fn with_label(mut self, label: String) -> Self {
        self.label = label;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(track_id: i64, label: &str, confidence: f32, bbox: [f32; 4]) -> RawObservation {
        RawObservation {
            track_id,
            label: label.to_string(),
            confidence,
            bbox,
        }
    }

    #[test]
    fn accepts_well_formed_observation() -> Result<()> {
        let obs = Observation::from_raw(raw(3, " apple ", 0.9, [10.0, 20.0, 30.0, 40.0]))?;
        assert_eq!(obs.track_id(), 3);
        assert_eq!(obs.label(), "apple");
        assert_eq!(obs.bbox().center(), (20.0, 30.0));
        Ok(())
    }

    #[test]
    fn rejects_malformed_observations() {
        let good_box = [0.0, 0.0, 1.0, 1.0];
        assert!(Observation::from_raw(raw(-1, "apple", 0.9, good_box)).is_err());
        assert!(Observation::from_raw(raw(1, "  ", 0.9, good_box)).is_err());
        assert!(Observation::from_raw(raw(1, "apple", 1.5, good_box)).is_err());
        assert!(Observation::from_raw(raw(1, "apple", f32::NAN, good_box)).is_err());
        assert!(Observation::from_raw(raw(1, "apple", 0.5, [5.0, 0.0, 1.0, 1.0])).is_err());
        assert!(
            Observation::from_raw(raw(1, "apple", 0.5, [0.0, 0.0, f32::INFINITY, 1.0])).is_err()
        );
    }

    #[test]
    fn box_serializes_as_array() -> Result<()> {
        let json = serde_json::to_string(&BoundingBox::new(1.0, 2.0, 3.0, 4.0))?;
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");
        Ok(())
    }
}

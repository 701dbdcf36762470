//! Grasp pose heuristic.
//!
//! Maps a pixel bounding box to an approximate top-down grasp pose in the arm's
//! base frame. The mapping is linear in the box centre and assumes a fixed camera
//! mount; it is a placeholder for a calibrated hand-eye transform.

use crate::detect::BoundingBox;
use crate::storage::Pose;

pub const DEFAULT_Z: f64 = 0.35;
/// Gripper pointing straight down.
pub const TOP_DOWN_PITCH: f64 = -1.57;

const X_SPAN: f64 = 0.2;
const Y_OFFSET: f64 = 0.4;
const Y_SPAN: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseEstimator {
    pub frame_width: u32,
    pub frame_height: u32,
    pub default_z: f64,
}

impl Default for PoseEstimator {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            default_z: DEFAULT_Z,
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

impl PoseEstimator {
    pub fn new(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            ..Self::default()
        }
    }

    pub fn estimate(&self, bbox: &BoundingBox) -> Pose {
        let (cx, cy) = bbox.center();
        let half_w = f64::from(self.frame_width.max(1)) / 2.0;
        let half_h = f64::from(self.frame_height.max(1)) / 2.0;
        let norm_x = (f64::from(cx) - half_w) / half_w;
        let norm_y = (f64::from(cy) - half_h) / half_h;

        Pose {
            x: round3(norm_x * X_SPAN),
            y: round3(Y_OFFSET + norm_y * Y_SPAN),
            z: self.default_z,
            roll: 0.0,
            pitch: TOP_DOWN_PITCH,
            yaw: 0.0,
        }
    }
}

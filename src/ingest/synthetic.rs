//! Synthetic capture device for `stub://` paths.
//!
//! Renders a flat background with a few coloured blocks that drift across the
//! frame, plus a little sensor noise. There is no real scene behind it; the stub
//! tracking backend produces detections independently of pixel content.

use anyhow::Result;
use rand::Rng;

use super::{CaptureDevice, SourceConfig};
use crate::frame::Frame;

const BACKGROUND: [u8; 3] = [96, 96, 104];
const BLOCKS: [[u8; 3]; 3] = [[220, 40, 40], [230, 210, 60], [240, 240, 240]];

pub struct SyntheticDevice {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticDevice {
    pub fn new(config: &SourceConfig) -> Self {
        log::info!("SyntheticDevice: opened {}", config.device);
        Self {
            name: config.device.clone(),
            width: config.width.max(1),
            height: config.height.max(1),
            frame_count: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut pixels = Vec::with_capacity(w * h * 3);
        for _ in 0..w * h {
            pixels.extend_from_slice(&BACKGROUND);
        }

        let block = (w.min(h) / 6).max(1);
        for (i, colour) in BLOCKS.iter().enumerate() {
            // Each block drifts horizontally at its own speed and wraps around.
            let x0 = (self.frame_count as usize * (i + 1) + i * w / 3) % w;
            let y0 = (h / 4 + i * block * 2).min(h.saturating_sub(block));
            for y in y0..(y0 + block).min(h) {
                for x in x0..(x0 + block).min(w) {
                    let idx = (y * w + x) * 3;
                    pixels[idx..idx + 3].copy_from_slice(colour);
                }
            }
        }

        let mut rng = rand::thread_rng();
        for p in pixels.iter_mut().step_by(7) {
            let noise: i16 = rng.gen_range(-4..=4);
            *p = (*p as i16 + noise).clamp(0, 255) as u8;
        }
        pixels
    }
}

impl CaptureDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self, seq: u64) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.render();
        Ok(Frame::new(pixels, self.width, self.height, seq))
    }

    fn release(&mut self) {
        log::debug!(
            "SyntheticDevice: released {} after {} frames",
            self.name,
            self.frame_count
        );
    }
}

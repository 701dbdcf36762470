//! V4L2 capture device.
//!
//! Opens a local device node (e.g., /dev/video2), negotiates RGB24 at the
//! configured size and rate, and captures through a memory-mapped stream.
//! Devices that refuse a requested setting keep their own value; a warning is
//! logged and capture proceeds at whatever the driver accepted.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::{CaptureDevice, SourceConfig};
use crate::frame::Frame;

const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Device {
    path: String,
    state: V4l2State,
    width: u32,
    height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn open(config: &SourceConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Device: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Device: failed to set fps on {}: {}",
                    config.device,
                    err
                );
            }
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Device: opened {} ({}x{})",
            config.device,
            format.width,
            format.height
        );
        Ok(Self {
            path: config.device.clone(),
            state,
            width: format.width,
            height: format.height,
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.path
    }

    fn capture(&mut self, seq: u64) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (buf, _meta) = self
            .state
            .with_mut(|fields| fields.stream.next())
            .context("capture v4l2 frame")?;

        let expected = (self.width as usize) * (self.height as usize) * 3;
        if buf.len() < expected {
            anyhow::bail!(
                "short v4l2 frame: expected {} bytes, got {}",
                expected,
                buf.len()
            );
        }
        Ok(Frame::new(
            buf[..expected].to_vec(),
            self.width,
            self.height,
            seq,
        ))
    }

    fn release(&mut self) {
        log::info!("V4l2Device: released {}", self.path);
    }
}

//! Synchronous device used for rendering to memory and for tests.

use std::sync::Arc;

use crate::audio::buffer::AudioBuffer;

use super::{AudioDeviceCallback, DeviceInfo};

/// Drives an [`AudioDeviceCallback`] from the calling thread, block by block,
/// exactly the way a hardware device would.
pub struct OfflineDevice {
    callback: Arc<dyn AudioDeviceCallback>,
    info: DeviceInfo,
    block: AudioBuffer,
    started: bool,
}

impl OfflineDevice {
    pub fn new(callback: Arc<dyn AudioDeviceCallback>, info: DeviceInfo) -> Self {
        let info = DeviceInfo {
            block_size: info.block_size.max(1),
            output_channels: info.output_channels.max(1),
            ..info
        };
        Self {
            callback,
            block: AudioBuffer::new(info.output_channels, info.block_size),
            info,
            started: false,
        }
    }

    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    /// Announce the stream format to the callback. Called implicitly by
    /// [`OfflineDevice::render`].
    pub fn start(&mut self) {
        if !self.started {
            self.callback.on_device_start(&self.info);
            self.started = true;
        }
    }

    /// Render `num_frames` frames into a new planar buffer.
    pub fn render(&mut self, num_frames: usize) -> AudioBuffer {
        self.start();
        let mut out = AudioBuffer::new(self.info.output_channels, num_frames);
        let mut offset = 0;
        while offset < num_frames {
            let frames = (num_frames - offset).min(self.info.block_size);
            self.callback.on_io_callback(&mut self.block, frames);
            for channel in 0..self.info.output_channels {
                out.copy_from(channel, offset, &self.block, channel, 0, frames);
            }
            offset += frames;
        }
        out
    }

    /// Render one block into a caller-provided buffer, the same call a
    /// real-time device makes.
    pub fn render_block(&mut self, output: &mut AudioBuffer, num_frames: usize) {
        self.start();
        self.callback.on_io_callback(output, num_frames);
    }

    pub fn stop(&mut self) {
        if self.started {
            self.callback.on_device_stop();
            self.started = false;
        }
    }
}

impl Drop for OfflineDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

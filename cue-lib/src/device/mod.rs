//! Audio device abstraction consumed by the playback core.
//!
//! A device calls [`AudioDeviceCallback::on_device_start`] once before it
//! streams, then [`AudioDeviceCallback::on_io_callback`] repeatedly from its
//! real-time thread, and finally [`AudioDeviceCallback::on_device_stop`].

mod offline;
mod output;

pub use offline::OfflineDevice;
pub use output::OutputDevice;

/// Stream format reported by a device when it starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceInfo {
    pub sample_rate: f64,
    pub block_size: usize,
    pub output_channels: usize,
}

/// Receiver of device lifecycle and IO callbacks.
///
/// `on_io_callback` runs on the real-time thread and must not allocate or
/// block. The other entry points run on ordinary threads.
pub trait AudioDeviceCallback: Send + Sync {
    fn on_device_start(&self, info: &DeviceInfo);

    /// Fill the first `num_frames` frames of every channel of `output`.
    fn on_io_callback(&self, output: &mut crate::audio::buffer::AudioBuffer, num_frames: usize);

    fn on_device_stop(&self);

    fn on_device_error(&self, message: &str);
}

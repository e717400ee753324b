//! Default output device backed by a `rodio` output stream.

use log::{error, info, warn};
use rodio::cpal::BufferSize;
use rodio::stream::OutputStreamConfig;
use rodio::{OutputStream, OutputStreamBuilder, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::buffer::AudioBuffer;
use crate::error::CueError;
use crate::settings::Settings;

use super::{AudioDeviceCallback, DeviceInfo};

const OUTPUT_STREAM_OPEN_RETRIES: usize = 20;
const OUTPUT_STREAM_OPEN_RETRY_MS: u64 = 100;

/// An open output stream driving an [`AudioDeviceCallback`].
///
/// The callback is started before the first block is requested and stopped
/// when the device is closed or dropped.
pub struct OutputDevice {
    stream: Option<OutputStream>,
    callback: Arc<dyn AudioDeviceCallback>,
    running: Arc<AtomicBool>,
    info: DeviceInfo,
}

impl OutputDevice {
    /// Open the system default output and start streaming into `callback`.
    ///
    /// # Arguments
    ///
    /// * `callback` - Receiver of device lifecycle and IO callbacks.
    /// * `settings` - Block size used when the stream does not fix one.
    ///
    /// # Errors
    ///
    /// Returns [`CueError::Device`] when no output stream can be opened. The
    /// callback is told through `on_device_error` first.
    pub fn open_default(
        callback: Arc<dyn AudioDeviceCallback>,
        settings: &Settings,
    ) -> Result<Self, CueError> {
        let stream = match open_output_stream_with_retry() {
            Ok(stream) => stream,
            Err(err) => {
                callback.on_device_error(&err.to_string());
                return Err(err);
            }
        };

        let info = stream_device_info(stream.config(), settings);
        callback.on_device_start(&info);

        let running = Arc::new(AtomicBool::new(true));
        stream
            .mixer()
            .add(DeviceStream::new(callback.clone(), info, running.clone()));
        info!(
            "output device started: {} Hz, {} channels, {} frame blocks",
            info.sample_rate, info.output_channels, info.block_size
        );

        Ok(Self {
            stream: Some(stream),
            callback,
            running,
            info,
        })
    }

    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    /// Stop streaming and notify the callback.
    pub fn close(self) {}
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.callback.on_device_stop();
            info!("output device stopped");
        }
    }
}

/// Format the stream actually runs at. The block size falls back to the
/// configured one when the backend picks its own buffer size.
fn stream_device_info(config: &OutputStreamConfig, settings: &Settings) -> DeviceInfo {
    let block_size = match config.buffer_size() {
        BufferSize::Fixed(frames) if *frames > 0 => *frames as usize,
        _ => settings.block_size,
    };
    DeviceInfo {
        sample_rate: f64::from(config.sample_rate()),
        block_size,
        output_channels: usize::from(config.channel_count()),
    }
}

/// Open the default output stream with bounded retry behavior.
fn open_output_stream_with_retry() -> Result<OutputStream, CueError> {
    let mut last_error = String::new();
    for attempt in 1..=OUTPUT_STREAM_OPEN_RETRIES {
        match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                last_error = err.to_string();
                if attempt == OUTPUT_STREAM_OPEN_RETRIES {
                    error!(
                        "failed to open default output stream after {} attempts: {}",
                        OUTPUT_STREAM_OPEN_RETRIES, err
                    );
                    break;
                }
                warn!(
                    "open_default_stream attempt {}/{} failed: {}",
                    attempt, OUTPUT_STREAM_OPEN_RETRIES, err
                );
                thread::sleep(Duration::from_millis(OUTPUT_STREAM_OPEN_RETRY_MS));
            }
        }
    }
    Err(CueError::Device(last_error))
}

/// Endless `rodio` source that pulls planar blocks from the callback and
/// hands them to the stream one interleaved sample at a time.
struct DeviceStream {
    callback: Arc<dyn AudioDeviceCallback>,
    block: AudioBuffer,
    block_size: usize,
    channels: usize,
    sample_rate: u32,
    cursor: usize,
    available: usize,
    running: Arc<AtomicBool>,
}

impl DeviceStream {
    fn new(callback: Arc<dyn AudioDeviceCallback>, info: DeviceInfo, running: Arc<AtomicBool>) -> Self {
        let channels = info.output_channels.max(1);
        let block_size = info.block_size.max(1);
        Self {
            callback,
            block: AudioBuffer::new(channels, block_size),
            block_size,
            channels,
            sample_rate: info.sample_rate.round() as u32,
            cursor: 0,
            available: 0,
            running,
        }
    }
}

impl Iterator for DeviceStream {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        if self.cursor >= self.available {
            self.callback.on_io_callback(&mut self.block, self.block_size);
            self.available = self.block_size * self.channels;
            self.cursor = 0;
        }
        let frame = self.cursor / self.channels;
        let channel = self.cursor % self.channels;
        self.cursor += 1;
        Some(self.block.sample(channel, frame))
    }
}

impl Source for DeviceStream {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels as u16
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingCallback {
        blocks: AtomicUsize,
    }

    impl AudioDeviceCallback for CountingCallback {
        fn on_device_start(&self, _info: &DeviceInfo) {}

        fn on_io_callback(&self, output: &mut AudioBuffer, num_frames: usize) {
            let block = self.blocks.fetch_add(1, Ordering::SeqCst) as f32;
            for channel in 0..output.num_channels() {
                for frame in 0..num_frames {
                    output.set_sample(channel, frame, block + channel as f32 * 0.5);
                }
            }
        }

        fn on_device_stop(&self) {}

        fn on_device_error(&self, _message: &str) {}
    }

    #[test]
    fn device_stream_interleaves_blocks() {
        let callback = Arc::new(CountingCallback {
            blocks: AtomicUsize::new(0),
        });
        let info = DeviceInfo {
            sample_rate: 48_000.0,
            block_size: 2,
            output_channels: 2,
        };
        let running = Arc::new(AtomicBool::new(true));
        let mut stream = DeviceStream::new(callback.clone(), info, running.clone());

        let samples: Vec<f32> = stream.by_ref().take(8).collect();
        assert_eq!(samples, vec![0.0, 0.5, 0.0, 0.5, 1.0, 1.5, 1.0, 1.5]);
        assert_eq!(callback.blocks.load(Ordering::SeqCst), 2);
        assert_eq!(stream.channels(), 2);
        assert_eq!(stream.sample_rate(), 48_000);

        running.store(false, Ordering::Release);
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn stream_format_overrides_configured_rate_and_channels() {
        let settings = Settings {
            sample_rate: 96_000.0,
            block_size: 256,
            output_channels: 6,
            ..Settings::default()
        };
        let info = stream_device_info(&OutputStreamConfig::default(), &settings);
        assert_eq!(info.sample_rate, 44_100.0);
        assert_eq!(info.output_channels, 2);
        assert_eq!(info.block_size, 256);
    }
}

//! High-level playback facade.
//!
//! [`PlaybackManager`] turns play requests into mixer inputs and receives the
//! device callbacks that drive the mixer.

use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::audio::buffer::{AudioBuffer, BufferHandle};
use crate::decode::{AudioFormatReader, ReaderFactory, SymphoniaFactory};
use crate::device::{AudioDeviceCallback, DeviceInfo};
use crate::settings::Settings;

use super::buffer_source::LoopingBufferSource;
use super::handle::{AutoRemovingHandle, PlaybackId};
use super::mixer::MixerGraph;
use super::reader_source::ReaderSource;
use super::reaper::Reaper;
use super::source::{lock_ignoring_poison, Playable};
use super::test_tone;
use super::transport::TransportSource;

/// Plays any number of independent sounds through one device callback.
///
/// Every `play*` call returns the [`PlaybackId`] of the new playback, or
/// `None` when there was nothing to play. Finished playbacks are removed by a
/// background reaper.
pub struct PlaybackManager {
    graph: Arc<MixerGraph>,
    factory: Arc<dyn ReaderFactory>,
    settings: Settings,
    device: Mutex<DeviceInfo>,
    reaper: Reaper,
}

impl Default for PlaybackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackManager {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::with_factory(settings, Arc::new(SymphoniaFactory::new()))
    }

    /// # Arguments
    ///
    /// * `settings` - Initial device format and reaper interval.
    /// * `factory` - Decoder used by [`PlaybackManager::play_file`] and
    ///   [`PlaybackManager::play_memory`].
    pub fn with_factory(settings: Settings, factory: Arc<dyn ReaderFactory>) -> Self {
        let settings = settings.sanitized();
        let info = settings.device_info();
        let graph = Arc::new(MixerGraph::new());
        graph.prepare(&info);
        let reaper = Reaper::spawn(Arc::downgrade(&graph), settings.reap_interval());
        Self {
            graph,
            factory,
            settings,
            device: Mutex::new(info),
            reaper,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn factory(&self) -> &Arc<dyn ReaderFactory> {
        &self.factory
    }

    pub fn graph(&self) -> &Arc<MixerGraph> {
        &self.graph
    }

    /// Format of the running device, or the configured one before a device
    /// starts.
    pub fn device_info(&self) -> DeviceInfo {
        *lock_ignoring_poison(&self.device)
    }

    pub fn last_device_error(&self) -> Option<String> {
        self.graph.last_device_error()
    }

    /// Decode and play a file.
    pub fn play_file(&self, path: impl AsRef<Path>) -> Option<PlaybackId> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("file not found: {}", path.display());
            return None;
        }
        match self.factory.create_reader_for_file(path) {
            Ok(reader) => self.play_reader(Some(reader)),
            Err(err) => {
                warn!("failed to open {}: {}", path.display(), err);
                None
            }
        }
    }

    /// Decode and play an encoded file held in memory.
    pub fn play_memory(&self, bytes: &[u8]) -> Option<PlaybackId> {
        if bytes.is_empty() {
            debug!("play_memory called with no data");
            return None;
        }
        match self.factory.create_reader_for_memory(bytes) {
            Ok(reader) => self.play_reader(Some(reader)),
            Err(err) => {
                warn!("failed to decode {} bytes: {}", bytes.len(), err);
                None
            }
        }
    }

    /// Play an already opened reader at its own sample rate.
    pub fn play_reader(&self, reader: Option<Box<dyn AudioFormatReader>>) -> Option<PlaybackId> {
        let reader = reader?;
        let sample_rate = reader.sample_rate();
        self.play_source(Some(Playable::owned(ReaderSource::new(reader))), sample_rate)
    }

    /// Play a PCM buffer once at the device rate.
    ///
    /// # Arguments
    ///
    /// * `buffer` - The samples, moved in or shared.
    /// * `spread_across_all_channels` - Cycle the buffer's channels over every
    ///   output channel instead of leaving extra outputs silent.
    pub fn play_buffer(
        &self,
        buffer: Option<BufferHandle>,
        spread_across_all_channels: bool,
    ) -> Option<PlaybackId> {
        let buffer = buffer?;
        let source = LoopingBufferSource::new(buffer, spread_across_all_channels);
        self.play_source(Some(Playable::owned(source)), 0.0)
    }

    /// Start a source and add it to the mixer.
    ///
    /// A bare source is wrapped in a [`TransportSource`] running at
    /// `source_sample_rate` (zero means the device rate). A ready-made
    /// transport keeps the rate it was built with.
    pub fn play_source(&self, source: Option<Playable>, source_sample_rate: f64) -> Option<PlaybackId> {
        let Some(source) = source else {
            debug!("play_source called without a source");
            return None;
        };
        let mut transport = match source {
            Playable::Transport(transport) => transport,
            Playable::Source(source) => TransportSource::new(source, source_sample_rate),
        };
        transport.start();
        let handle = AutoRemovingHandle::register(&self.graph, transport, &self.device_info());
        Some(handle.id())
    }

    /// Play the diagnostic tone once on every output channel.
    pub fn play_test_sound(&self) -> Option<PlaybackId> {
        let tone = test_tone::render(&self.settings.test_tone, self.device_info().sample_rate);
        self.play_buffer(Some(BufferHandle::Owned(tone)), true)
    }

    /// Remove one playback. No callback after this returns includes it.
    pub fn stop(&self, id: PlaybackId) -> bool {
        self.graph.remove_source(id)
    }

    pub fn stop_all(&self) {
        self.graph.remove_all();
    }

    pub fn is_playing(&self, id: PlaybackId) -> bool {
        self.graph
            .get(id)
            .is_some_and(|handle| handle.is_playing() && !handle.is_detached())
    }

    pub fn active_count(&self) -> usize {
        self.graph.len()
    }
}

impl AudioDeviceCallback for PlaybackManager {
    fn on_device_start(&self, info: &DeviceInfo) {
        *lock_ignoring_poison(&self.device) = *info;
        self.graph.prepare(info);
        info!(
            "device started: {} Hz, {} frames per block, {} channels",
            info.sample_rate, info.block_size, info.output_channels
        );
    }

    fn on_io_callback(&self, output: &mut AudioBuffer, num_frames: usize) {
        self.graph.produce_block(output, num_frames);
    }

    fn on_device_stop(&self) {
        self.graph.release();
        info!("device stopped");
    }

    fn on_device_error(&self, message: &str) {
        self.graph.device_error(message);
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.reaper.stop();
        self.graph.remove_all();
        self.graph.collect_garbage();
    }
}

impl std::fmt::Debug for PlaybackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackManager")
            .field("graph", &self.graph)
            .field("device", &self.device_info())
            .finish()
    }
}

//! A mixer input that removes itself once its transport finishes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError, Weak};

use log::debug;

use crate::audio::buffer::AudioBuffer;
use crate::device::DeviceInfo;

use super::mixer::MixerGraph;
use super::source::{lock_ignoring_poison, AudioSource};
use super::transport::{TransportSource, TransportState};

static NEXT_PLAYBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one call to `play`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackId(u64);

impl PlaybackId {
    fn next() -> Self {
        Self(NEXT_PLAYBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns one transport while it is registered with a [`MixerGraph`].
///
/// The handle moves from active to detached exactly once. Detaching takes it
/// out of the graph's published membership; a callback that already loaded
/// the previous membership still mixes it to the end of that block. The graph
/// later drops it off the audio thread, which in turn drops the transport and
/// any owned source.
pub struct AutoRemovingHandle {
    id: PlaybackId,
    graph: Weak<MixerGraph>,
    state: Arc<TransportState>,
    transport: Mutex<TransportSource>,
    detached: AtomicBool,
}

impl AutoRemovingHandle {
    /// Prepare `transport` for `info` and add it to `graph`.
    ///
    /// # Arguments
    ///
    /// * `graph` - Mixer the handle registers with and later removes itself from.
    /// * `transport` - The transport to play. Normally already started.
    /// * `info` - Current device format.
    pub fn register(graph: &Arc<MixerGraph>, mut transport: TransportSource, info: &DeviceInfo) -> Arc<Self> {
        transport.prepare(info);
        let handle = Arc::new(Self {
            id: PlaybackId::next(),
            graph: Arc::downgrade(graph),
            state: transport.state(),
            transport: Mutex::new(transport),
            detached: AtomicBool::new(false),
        });
        graph.add_source(Arc::clone(&handle));
        debug!("registered playback {}", handle.id);
        handle
    }

    pub fn id(&self) -> PlaybackId {
        self.id
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Stop the transport. The reaper detaches the handle on its next pass.
    pub fn stop(&self) {
        self.state.stop();
    }

    /// Check for completion and detach if the transport is no longer playing.
    ///
    /// Returns true when the handle is (now) detached.
    pub fn poll(&self) -> bool {
        if self.is_detached() {
            return true;
        }
        if self.state.is_playing() {
            return false;
        }
        if self.state.has_stream_finished() {
            debug!("playback {} finished", self.id);
        }
        self.detach();
        true
    }

    /// Remove this handle from its graph. Idempotent.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(graph) = self.graph.upgrade() {
            graph.remove_source(self.id);
        }
    }

    pub(crate) fn mark_detached(&self) {
        self.detached.store(true, Ordering::Release);
    }

    /// Render the transport into `output`. Called on the audio thread.
    pub fn produce_block(&self, output: &mut AudioBuffer, num_frames: usize) {
        match self.transport.try_lock() {
            Ok(mut transport) => transport.produce_block(output, num_frames),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().produce_block(output, num_frames),
            Err(TryLockError::WouldBlock) => output.clear_region(0, num_frames),
        }
    }

    pub fn prepare(&self, info: &DeviceInfo) {
        lock_ignoring_poison(&self.transport).prepare(info);
    }

    pub fn release(&self) {
        lock_ignoring_poison(&self.transport).release();
    }
}

impl Drop for AutoRemovingHandle {
    fn drop(&mut self) {
        debug!("dropping playback {}", self.id);
    }
}

impl fmt::Debug for AutoRemovingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoRemovingHandle")
            .field("id", &self.id)
            .field("playing", &self.is_playing())
            .field("detached", &self.is_detached())
            .finish()
    }
}

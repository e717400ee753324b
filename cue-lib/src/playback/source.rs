//! Source traits and the ownership tags used at the `play` boundary.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::audio::buffer::AudioBuffer;
use crate::device::DeviceInfo;

use super::transport::TransportSource;

/// Anything that can fill blocks of audio.
pub trait AudioSource: Send {
    /// Called off the audio thread before streaming and whenever the device
    /// format changes. May allocate.
    fn prepare(&mut self, _info: &DeviceInfo) {}

    /// Drop resources acquired in [`AudioSource::prepare`].
    fn release(&mut self) {}

    /// Fill the first `num_frames` frames of every channel of `output`.
    ///
    /// Runs on the real-time thread.
    fn produce_block(&mut self, output: &mut AudioBuffer, num_frames: usize);
}

/// Loop region of a positionable source, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRange {
    pub start: u64,
    pub length: u64,
}

/// A source with a read position, a total length and optional looping.
pub trait PositionableSource: AudioSource {
    fn total_length(&self) -> u64;

    fn next_read_position(&self) -> u64;

    fn set_next_read_position(&mut self, position: u64);

    fn is_looping(&self) -> bool;

    fn set_looping(&mut self, looping: bool);

    fn loop_range(&self) -> LoopRange {
        LoopRange {
            start: 0,
            length: self.total_length(),
        }
    }

    fn set_loop_range(&mut self, _start: u64, _length: u64) {}
}

/// A positionable source either moved into the player or shared with the
/// caller.
///
/// An `Owned` source is dropped when its playback is detached. A `Shared`
/// source stays alive through the caller's `Arc`; the audio thread only
/// `try_lock`s it and renders silence for a block if the caller holds the lock.
pub enum SourceHandle {
    Owned(Box<dyn PositionableSource>),
    Shared(Arc<Mutex<dyn PositionableSource>>),
}

impl SourceHandle {
    pub fn owned<S: PositionableSource + 'static>(source: S) -> Self {
        Self::Owned(Box::new(source))
    }

    pub fn shared(source: Arc<Mutex<dyn PositionableSource>>) -> Self {
        Self::Shared(source)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Run `f` against the source without ever blocking.
    ///
    /// Returns `None` when a shared source is locked elsewhere.
    pub(crate) fn try_with<R>(&mut self, f: impl FnOnce(&mut dyn PositionableSource) -> R) -> Option<R> {
        match self {
            Self::Owned(source) => Some(f(source.as_mut())),
            Self::Shared(source) => match source.try_lock() {
                Ok(mut guard) => Some(f(&mut *guard)),
                Err(TryLockError::Poisoned(poisoned)) => Some(f(&mut *poisoned.into_inner())),
                Err(TryLockError::WouldBlock) => None,
            },
        }
    }

    /// Run `f` against the source, waiting for a shared lock if needed.
    ///
    /// Not for use on the audio thread.
    pub(crate) fn with<R>(&mut self, f: impl FnOnce(&mut dyn PositionableSource) -> R) -> R {
        match self {
            Self::Owned(source) => f(source.as_mut()),
            Self::Shared(source) => {
                let mut guard = lock_ignoring_poison(source);
                f(&mut *guard)
            }
        }
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owned(_) => f.write_str("SourceHandle::Owned"),
            Self::Shared(_) => f.write_str("SourceHandle::Shared"),
        }
    }
}

/// What `PlaybackManager::play_source` accepts: a ready-made transport, or a
/// bare source the manager wraps in one.
pub enum Playable {
    Transport(TransportSource),
    Source(SourceHandle),
}

impl Playable {
    pub fn owned<S: PositionableSource + 'static>(source: S) -> Self {
        Self::Source(SourceHandle::owned(source))
    }

    pub fn shared(source: Arc<Mutex<dyn PositionableSource>>) -> Self {
        Self::Source(SourceHandle::shared(source))
    }
}

impl From<TransportSource> for Playable {
    fn from(transport: TransportSource) -> Self {
        Self::Transport(transport)
    }
}

impl From<SourceHandle> for Playable {
    fn from(source: SourceHandle) -> Self {
        Self::Source(source)
    }
}

pub(crate) fn lock_ignoring_poison<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Lock-free mixing graph over the set of active playbacks.
//!
//! The membership list is published as an immutable snapshot through
//! [`ArcSwap`]. The audio thread loads the current snapshot without blocking.
//! Writers serialize on a mutex, publish a modified copy, and park the replaced
//! snapshot in a retired list until no reader holds it, so no handle is ever
//! dropped on the audio thread.

use std::sync::{Arc, Mutex, TryLockError};

use arc_swap::ArcSwap;
use log::{debug, warn};

use crate::audio::buffer::AudioBuffer;
use crate::device::DeviceInfo;

use super::handle::{AutoRemovingHandle, PlaybackId};
use super::source::lock_ignoring_poison;

type Snapshot = Vec<Arc<AutoRemovingHandle>>;

/// Sums every registered [`AutoRemovingHandle`] into one output.
pub struct MixerGraph {
    snapshot: ArcSwap<Snapshot>,
    retired: Mutex<Vec<Arc<Snapshot>>>,
    scratch: Mutex<AudioBuffer>,
    last_error: Mutex<Option<String>>,
}

impl Default for MixerGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerGraph {
    /// An empty graph. Call [`MixerGraph::prepare`] before mixing.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            retired: Mutex::new(Vec::new()),
            scratch: Mutex::new(AudioBuffer::default()),
            last_error: Mutex::new(None),
        }
    }

    /// Add a handle. Returns false if a handle with the same id is already
    /// registered.
    pub fn add_source(&self, handle: Arc<AutoRemovingHandle>) -> bool {
        let mut retired = lock_ignoring_poison(&self.retired);
        let current = self.snapshot.load_full();
        if current.iter().any(|existing| existing.id() == handle.id()) {
            return false;
        }
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(handle);
        self.publish(&mut retired, current, next);
        true
    }

    /// Remove a handle by id. Unknown ids are ignored.
    ///
    /// Once this returns, no later call to [`MixerGraph::produce_block`]
    /// includes the handle.
    pub fn remove_source(&self, id: PlaybackId) -> bool {
        let mut retired = lock_ignoring_poison(&self.retired);
        let current = self.snapshot.load_full();
        let Some(index) = current.iter().position(|handle| handle.id() == id) else {
            return false;
        };
        current[index].mark_detached();
        let next: Snapshot = current
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, handle)| Arc::clone(handle))
            .collect();
        self.publish(&mut retired, current, next);
        debug!("removed playback {}", id);
        true
    }

    /// Remove every handle.
    pub fn remove_all(&self) {
        let mut retired = lock_ignoring_poison(&self.retired);
        let current = self.snapshot.load_full();
        if current.is_empty() {
            return;
        }
        for handle in current.iter() {
            handle.mark_detached();
        }
        self.publish(&mut retired, current, Vec::new());
    }

    fn publish(&self, retired: &mut Vec<Arc<Snapshot>>, current: Arc<Snapshot>, next: Snapshot) {
        self.snapshot.store(Arc::new(next));
        retired.push(current);
        retired.retain(|snapshot| Arc::strong_count(snapshot) > 1);
    }

    /// Free retired snapshots no reader holds any more.
    pub fn collect_garbage(&self) {
        lock_ignoring_poison(&self.retired).retain(|snapshot| Arc::strong_count(snapshot) > 1);
    }

    /// Poll every handle and detach those that finished.
    ///
    /// Returns how many handles were detached by this pass.
    pub fn reap_finished(&self) -> usize {
        let snapshot = self.snapshot.load_full();
        let reaped = snapshot
            .iter()
            .filter(|handle| !handle.is_detached())
            .filter(|handle| handle.poll())
            .count();
        drop(snapshot);
        self.collect_garbage();
        reaped
    }

    /// Size the scratch block and prepare every handle. Allocates.
    pub fn prepare(&self, info: &DeviceInfo) {
        lock_ignoring_poison(&self.scratch).set_size(info.output_channels.max(1), info.block_size.max(1));
        for handle in self.snapshot.load().iter() {
            handle.prepare(info);
        }
    }

    pub fn release(&self) {
        for handle in self.snapshot.load().iter() {
            handle.release();
        }
    }

    /// Record a device fault. Inputs stay registered; recovery is up to the
    /// device.
    pub fn device_error(&self, message: &str) {
        warn!("device error with {} active playback(s): {}", self.len(), message);
        *lock_ignoring_poison(&self.last_error) = Some(message.to_string());
    }

    pub fn last_device_error(&self) -> Option<String> {
        lock_ignoring_poison(&self.last_error).clone()
    }

    /// Mix every registered handle into the first `num_frames` frames of
    /// `output`. Called on the audio thread.
    ///
    /// The membership is loaded once, so a handle removed while this runs is
    /// still mixed into every slice of the block.
    pub fn produce_block(&self, output: &mut AudioBuffer, num_frames: usize) {
        let num_frames = num_frames.min(output.num_frames());
        output.clear_region(0, num_frames);

        let handles = self.snapshot.load();
        if handles.is_empty() {
            return;
        }
        let mut scratch = match self.scratch.try_lock() {
            Ok(scratch) => scratch,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        let block = scratch.num_frames();
        if block == 0 {
            return;
        }
        let channels = scratch.num_channels().min(output.num_channels());

        let mut offset = 0;
        while offset < num_frames {
            let frames = (num_frames - offset).min(block);
            for handle in handles.iter() {
                handle.produce_block(&mut scratch, frames);
                for channel in 0..channels {
                    output.add_from(channel, offset, &scratch, channel, 0, frames);
                }
            }
            offset += frames;
        }
    }

    /// The currently published membership.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn get(&self, id: PlaybackId) -> Option<Arc<AutoRemovingHandle>> {
        self.snapshot.load().iter().find(|handle| handle.id() == id).cloned()
    }

    pub fn contains(&self, id: PlaybackId) -> bool {
        self.snapshot.load().iter().any(|handle| handle.id() == id)
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    pub fn ids(&self) -> Vec<PlaybackId> {
        self.snapshot.load().iter().map(|handle| handle.id()).collect()
    }
}

impl std::fmt::Debug for MixerGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerGraph").field("ids", &self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use std::sync::Weak;

    use super::*;
    use crate::playback::buffer_source::LoopingBufferSource;
    use crate::playback::source::{AudioSource, PositionableSource, SourceHandle};
    use crate::playback::transport::TransportSource;

    fn info(block_size: usize) -> DeviceInfo {
        DeviceInfo {
            sample_rate: 48_000.0,
            block_size,
            output_channels: 2,
        }
    }

    fn constant_loop(value: f32) -> TransportSource {
        let buffer = AudioBuffer::from_channels(vec![vec![value; 32]]);
        let mut source = LoopingBufferSource::new(buffer, true);
        source.set_looping(true);
        let mut transport = TransportSource::new(SourceHandle::owned(source), 0.0);
        transport.start();
        transport
    }

    fn prepared(block_size: usize) -> Arc<MixerGraph> {
        let graph = Arc::new(MixerGraph::new());
        graph.prepare(&info(block_size));
        graph
    }

    #[test]
    fn empty_graph_renders_silence() {
        let graph = prepared(16);
        let mut out = AudioBuffer::from_channels(vec![vec![1.0; 16], vec![1.0; 16]]);
        graph.produce_block(&mut out, 16);
        assert_eq!(out.peak(0, 16), 0.0);
    }

    #[test]
    fn sums_constant_sources() {
        let graph = prepared(16);
        for _ in 0..5 {
            AutoRemovingHandle::register(&graph, constant_loop(0.1), &info(16));
        }
        let mut out = AudioBuffer::new(2, 16);
        graph.produce_block(&mut out, 16);
        for channel in 0..2 {
            for sample in out.channel(channel) {
                assert!((sample - 0.5).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn blocks_larger_than_scratch_are_sliced() {
        let graph = prepared(8);
        AutoRemovingHandle::register(&graph, constant_loop(0.25), &info(8));
        AutoRemovingHandle::register(&graph, constant_loop(0.25), &info(8));
        let mut out = AudioBuffer::new(2, 50);
        graph.produce_block(&mut out, 50);
        assert!(out.channel(1).iter().all(|sample| (sample - 0.5).abs() < 1e-6));
    }

    #[test]
    fn duplicate_add_and_unknown_remove_are_no_ops() {
        let graph = prepared(16);
        let handle = AutoRemovingHandle::register(&graph, constant_loop(0.1), &info(16));
        assert!(!graph.add_source(Arc::clone(&handle)));
        assert_eq!(graph.len(), 1);

        assert!(graph.remove_source(handle.id()));
        assert!(!graph.remove_source(handle.id()));
        assert!(graph.is_empty());
        assert!(handle.is_detached());
    }

    #[test]
    fn removed_source_contributes_nothing() {
        let graph = prepared(16);
        let keep = AutoRemovingHandle::register(&graph, constant_loop(0.1), &info(16));
        let gone = AutoRemovingHandle::register(&graph, constant_loop(0.7), &info(16));
        graph.remove_source(gone.id());

        let mut out = AudioBuffer::new(2, 16);
        graph.produce_block(&mut out, 16);
        assert!((out.peak(0, 16) - 0.1).abs() < 1e-6);
        assert_eq!(graph.ids(), vec![keep.id()]);
    }

    /// Emits ones and clears the graph from inside its first block, the way a
    /// reaper pass landing mid-callback would.
    struct ClearsGraphOnFirstBlock {
        graph: Option<Weak<MixerGraph>>,
        position: u64,
    }

    impl AudioSource for ClearsGraphOnFirstBlock {
        fn produce_block(&mut self, output: &mut AudioBuffer, num_frames: usize) {
            if let Some(graph) = self.graph.take().and_then(|graph| graph.upgrade()) {
                graph.remove_all();
            }
            for channel in 0..output.num_channels() {
                for frame in 0..num_frames {
                    output.set_sample(channel, frame, 1.0);
                }
            }
            self.position += num_frames as u64;
        }
    }

    impl PositionableSource for ClearsGraphOnFirstBlock {
        fn total_length(&self) -> u64 {
            1_000
        }

        fn next_read_position(&self) -> u64 {
            self.position
        }

        fn set_next_read_position(&mut self, position: u64) {
            self.position = position;
        }

        fn is_looping(&self) -> bool {
            false
        }

        fn set_looping(&mut self, _looping: bool) {}
    }

    #[test]
    fn removal_during_a_sliced_block_keeps_the_whole_block() {
        let graph = prepared(8);
        let source = ClearsGraphOnFirstBlock {
            graph: Some(Arc::downgrade(&graph)),
            position: 0,
        };
        let mut transport = TransportSource::new(SourceHandle::owned(source), 0.0);
        transport.start();
        let handle = AutoRemovingHandle::register(&graph, transport, &info(8));

        let mut out = AudioBuffer::new(2, 16);
        graph.produce_block(&mut out, 16);
        assert!(handle.is_detached());
        assert!(graph.is_empty());
        for channel in 0..2 {
            assert_eq!(out.channel(channel), &[1.0; 16]);
        }

        graph.produce_block(&mut out, 16);
        assert_eq!(out.peak(0, 16), 0.0);
    }

    #[test]
    fn device_errors_are_retained() {
        let graph = prepared(16);
        assert_eq!(graph.last_device_error(), None);
        AutoRemovingHandle::register(&graph, constant_loop(0.1), &info(16));
        graph.device_error("buffer underrun");
        assert_eq!(graph.last_device_error().as_deref(), Some("buffer underrun"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn reaps_finished_handles() {
        let graph = prepared(16);
        let buffer = AudioBuffer::from_channels(vec![vec![1.0; 10]]);
        let mut transport = TransportSource::new(SourceHandle::owned(LoopingBufferSource::new(buffer, true)), 0.0);
        transport.start();
        let finite = AutoRemovingHandle::register(&graph, transport, &info(16));
        let looping = AutoRemovingHandle::register(&graph, constant_loop(0.1), &info(16));

        let mut out = AudioBuffer::new(2, 16);
        graph.produce_block(&mut out, 16);
        assert_eq!(graph.reap_finished(), 1);
        assert!(!graph.contains(finite.id()));
        assert!(graph.contains(looping.id()));
        assert_eq!(graph.reap_finished(), 0);
    }

    #[test]
    fn retired_snapshots_wait_for_readers() {
        let graph = prepared(16);
        let handle = AutoRemovingHandle::register(&graph, constant_loop(0.1), &info(16));
        let reader = graph.snapshot();
        graph.remove_source(handle.id());
        graph.collect_garbage();
        assert_eq!(reader.len(), 1);
        assert_eq!(Arc::strong_count(&handle), 2);

        drop(reader);
        graph.collect_garbage();
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn concurrent_writers_keep_membership_consistent() {
        let graph = prepared(16);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let graph = Arc::clone(&graph);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let handle = AutoRemovingHandle::register(&graph, constant_loop(0.0), &info(16));
                        let mut out = AudioBuffer::new(2, 16);
                        graph.produce_block(&mut out, 16);
                        assert!(graph.remove_source(handle.id()));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        assert!(graph.is_empty());
    }
}

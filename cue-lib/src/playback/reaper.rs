//! Background thread that detaches finished playbacks.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::mixer::MixerGraph;
use super::source::lock_ignoring_poison;

/// Polls a [`MixerGraph`] at a fixed interval and removes handles whose
/// transport stopped.
///
/// The thread exits when [`Reaper::stop`] is called, when the reaper is
/// dropped, or when the graph itself is gone.
pub struct Reaper {
    shutdown: Mutex<Option<Sender<()>>>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Start polling `graph` every `interval`.
    pub fn spawn(graph: Weak<MixerGraph>, interval: Duration) -> Self {
        let (shutdown, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("cue-reaper".to_string())
            .spawn(move || run(graph, rx, interval));
        let thread_handle = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("failed to spawn reaper thread: {}", err);
                None
            }
        };
        Self {
            shutdown: Mutex::new(Some(shutdown)),
            thread_handle: Mutex::new(thread_handle),
        }
    }

    pub fn is_running(&self) -> bool {
        lock_ignoring_poison(&self.thread_handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&self) {
        if let Some(shutdown) = lock_ignoring_poison(&self.shutdown).take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = lock_ignoring_poison(&self.thread_handle).take() {
            if handle.thread().id() == thread::current().id() {
                log::warn!("reaper stop called from reaper thread; skipping join");
            } else if handle.join().is_err() {
                log::warn!("reaper thread panicked during join");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(graph: Weak<MixerGraph>, shutdown: mpsc::Receiver<()>, interval: Duration) {
    loop {
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        let Some(graph) = graph.upgrade() else {
            break;
        };
        let reaped = graph.reap_finished();
        if reaped > 0 {
            log::debug!("reaped {} finished playback(s)", reaped);
        }
    }
}

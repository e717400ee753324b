//! Decoding collaborator: turns files or byte ranges into PCM readers.

mod memory;
mod probe;

use std::path::Path;

use crate::audio::buffer::AudioBuffer;
use crate::error::CueError;

pub use memory::MemoryReader;
pub use probe::SymphoniaFactory;

/// Random-access reader over decoded PCM.
pub trait AudioFormatReader: Send {
    fn sample_rate(&self) -> f64;

    fn num_channels(&self) -> usize;

    fn length_in_frames(&self) -> u64;

    /// Copy `num_frames` frames starting at `start_frame` into `dest` at
    /// `dest_start`. Frames past the end of the stream are written as silence.
    fn read(&mut self, dest: &mut AudioBuffer, dest_start: usize, num_frames: usize, start_frame: u64);

    fn length_in_seconds(&self) -> f64 {
        if self.sample_rate() > 0.0 {
            self.length_in_frames() as f64 / self.sample_rate()
        } else {
            0.0
        }
    }
}

/// Creates readers for encoded audio.
///
/// Implementations are called from whatever thread calls `play`.
pub trait ReaderFactory: Send + Sync {
    fn create_reader_for_file(&self, path: &Path) -> Result<Box<dyn AudioFormatReader>, CueError>;

    fn create_reader_for_memory(&self, bytes: &[u8]) -> Result<Box<dyn AudioFormatReader>, CueError>;
}

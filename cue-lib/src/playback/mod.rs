//! Playback core: sources, transports, the mixer and its manager.

pub mod buffer_source;
pub mod handle;
pub mod manager;
pub mod mixer;
pub mod reader_source;
pub mod reaper;
pub mod resample;
pub mod source;
pub mod test_tone;
pub mod transport;

pub use buffer_source::LoopingBufferSource;
pub use handle::{AutoRemovingHandle, PlaybackId};
pub use manager::PlaybackManager;
pub use mixer::MixerGraph;
pub use reader_source::ReaderSource;
pub use source::{AudioSource, LoopRange, Playable, PositionableSource, SourceHandle};
pub use transport::{TransportSource, TransportState};

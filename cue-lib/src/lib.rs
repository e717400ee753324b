//! # Cue Audio Library
//!
//! A lightweight sound player core. It mixes any number of independently
//! started sounds into a single real-time device callback, removes sounds
//! when they finish, and never allocates or blocks on the audio thread.

pub mod audio;
pub mod decode;
pub mod device;
pub mod error;
pub mod playback;
pub mod settings;

pub use audio::buffer::{AudioBuffer, BufferHandle};
pub use error::CueError;
pub use playback::{PlaybackId, PlaybackManager};
pub use settings::Settings;

//! PCM storage shared by sources, the mixer and devices.

pub mod buffer;

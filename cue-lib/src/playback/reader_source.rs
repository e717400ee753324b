//! Positionable source over a decoded reader.

use crate::audio::buffer::AudioBuffer;
use crate::decode::AudioFormatReader;

use super::source::{AudioSource, PositionableSource};

/// Streams frames out of an [`AudioFormatReader`], optionally looping over the
/// whole stream.
pub struct ReaderSource {
    reader: Box<dyn AudioFormatReader>,
    position: u64,
    looping: bool,
}

impl ReaderSource {
    pub fn new(reader: Box<dyn AudioFormatReader>) -> Self {
        Self {
            reader,
            position: 0,
            looping: false,
        }
    }
}

impl AudioSource for ReaderSource {
    fn produce_block(&mut self, output: &mut AudioBuffer, num_frames: usize) {
        let num_frames = num_frames.min(output.num_frames());
        let length = self.reader.length_in_frames();

        if !self.looping || length == 0 {
            self.reader.read(output, 0, num_frames, self.position);
            self.position = self.position.saturating_add(num_frames as u64);
            return;
        }

        let mut start = self.position % length;
        let mut written = 0;
        while written < num_frames {
            let run = ((length - start) as usize).min(num_frames - written);
            self.reader.read(output, written, run, start);
            written += run;
            start = (start + run as u64) % length;
        }
        self.position = start;
    }
}

impl PositionableSource for ReaderSource {
    fn total_length(&self) -> u64 {
        self.reader.length_in_frames()
    }

    fn next_read_position(&self) -> u64 {
        let length = self.reader.length_in_frames();
        if self.looping && length > 0 {
            self.position % length
        } else {
            self.position
        }
    }

    fn set_next_read_position(&mut self, position: u64) {
        self.position = position;
    }

    fn is_looping(&self) -> bool {
        self.looping
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::MemoryReader;

    fn source(samples: Vec<f32>) -> ReaderSource {
        let reader = MemoryReader::new(AudioBuffer::from_channels(vec![samples]), 8_000.0);
        ReaderSource::new(Box::new(reader))
    }

    #[test]
    fn reads_sequentially_then_silence() {
        let mut source = source(vec![1.0, 2.0, 3.0]);
        let mut out = AudioBuffer::new(1, 5);
        source.produce_block(&mut out, 5);
        assert_eq!(out.channel(0), &[1.0, 2.0, 3.0, 0.0, 0.0]);
        assert!(source.next_read_position() > source.total_length());
    }

    #[test]
    fn looping_wraps_at_stream_end() {
        let mut source = source(vec![1.0, 2.0, 3.0]);
        source.set_looping(true);
        source.set_next_read_position(2);
        let mut out = AudioBuffer::new(1, 5);
        source.produce_block(&mut out, 5);
        assert_eq!(out.channel(0), &[3.0, 1.0, 2.0, 3.0, 1.0]);
        assert_eq!(source.next_read_position(), 1);
    }
}

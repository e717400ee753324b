use crate::audio::buffer::AudioBuffer;

use super::AudioFormatReader;

/// Reader over a stream that has already been fully decoded into memory.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    buffer: AudioBuffer,
    sample_rate: f64,
}

impl MemoryReader {
    pub fn new(buffer: AudioBuffer, sample_rate: f64) -> Self {
        Self { buffer, sample_rate }
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }
}

impl AudioFormatReader for MemoryReader {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn num_channels(&self) -> usize {
        self.buffer.num_channels()
    }

    fn length_in_frames(&self) -> u64 {
        self.buffer.num_frames() as u64
    }

    /// Mono streams are copied to the first two destination channels; wider
    /// streams map channel for channel. Remaining channels are zeroed.
    fn read(&mut self, dest: &mut AudioBuffer, dest_start: usize, num_frames: usize, start_frame: u64) {
        let end = dest_start.saturating_add(num_frames).min(dest.num_frames());
        let num_frames = end.saturating_sub(dest_start);
        dest.clear_region(dest_start, num_frames);

        let total = self.buffer.num_frames() as u64;
        if start_frame >= total || self.buffer.num_channels() == 0 {
            return;
        }
        let start = start_frame as usize;
        let available = (total - start_frame).min(num_frames as u64) as usize;

        let mapped = if self.buffer.num_channels() == 1 {
            dest.num_channels().min(2)
        } else {
            dest.num_channels().min(self.buffer.num_channels())
        };
        let last_source = self.buffer.num_channels() - 1;
        for channel in 0..mapped {
            dest.copy_from(
                channel,
                dest_start,
                &self.buffer,
                channel.min(last_source),
                start,
                available,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_zero_fills_past_the_end() {
        let mut reader = MemoryReader::new(
            AudioBuffer::from_channels(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]),
            8_000.0,
        );
        let mut dest = AudioBuffer::from_channels(vec![vec![9.0; 4], vec![9.0; 4]]);
        reader.read(&mut dest, 0, 4, 1);
        assert_eq!(dest.channel(0), &[2.0, 3.0, 0.0, 0.0]);
        assert_eq!(dest.channel(1), &[5.0, 6.0, 0.0, 0.0]);
    }

    #[test]
    fn mono_is_copied_to_both_stereo_channels() {
        let mut reader = MemoryReader::new(AudioBuffer::from_channels(vec![vec![0.5, 0.25]]), 8_000.0);
        let mut dest = AudioBuffer::new(3, 2);
        reader.read(&mut dest, 0, 2, 0);
        assert_eq!(dest.channel(0), &[0.5, 0.25]);
        assert_eq!(dest.channel(1), &[0.5, 0.25]);
        assert_eq!(dest.channel(2), &[0.0, 0.0]);
        assert_eq!(reader.length_in_seconds(), 2.0 / 8_000.0);
    }
}

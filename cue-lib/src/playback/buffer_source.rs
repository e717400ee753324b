//! In-memory buffer playback with sample-accurate loop ranges.

use crate::audio::buffer::{AudioBuffer, BufferHandle};

use super::source::{AudioSource, LoopRange, PositionableSource};

/// Plays a fixed PCM buffer once or in a loop.
///
/// Loop bounds are always kept inside the buffer: `loop_start < frame_count`
/// and `1 <= loop_length <= frame_count - loop_start`. An empty buffer has the
/// degenerate range `(0, 0)` and only renders silence.
#[derive(Debug)]
pub struct LoopingBufferSource {
    buffer: BufferHandle,
    position: usize,
    looping: bool,
    spread_across_all_channels: bool,
    loop_start: usize,
    loop_length: usize,
}

impl LoopingBufferSource {
    /// Wrap a buffer.
    ///
    /// # Arguments
    ///
    /// * `buffer` - Owned or shared PCM data.
    /// * `spread_across_all_channels` - When the output has more channels than
    ///   the buffer, cycle the buffer channels across all of them instead of
    ///   leaving the extra channels silent.
    pub fn new(buffer: impl Into<BufferHandle>, spread_across_all_channels: bool) -> Self {
        let buffer = buffer.into();
        let loop_length = buffer.num_frames();
        Self {
            buffer,
            position: 0,
            looping: false,
            spread_across_all_channels,
            loop_start: 0,
            loop_length,
        }
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    fn frame_count(&self) -> usize {
        self.buffer.num_frames()
    }

    fn copy_run(&self, output: &mut AudioBuffer, out_channels: usize, dest_start: usize, frames: usize) {
        let in_channels = self.buffer.num_channels();
        for channel in 0..out_channels {
            output.copy_from(
                channel,
                dest_start,
                &self.buffer,
                channel % in_channels,
                self.position,
                frames,
            );
        }
    }
}

impl AudioSource for LoopingBufferSource {
    fn produce_block(&mut self, output: &mut AudioBuffer, num_frames: usize) {
        let num_frames = num_frames.min(output.num_frames());
        output.clear_region(0, num_frames);

        let frame_count = self.frame_count();
        let in_channels = self.buffer.num_channels();
        if frame_count == 0 || in_channels == 0 || num_frames == 0 {
            return;
        }

        let out_channels = if self.spread_across_all_channels {
            output.num_channels()
        } else {
            output.num_channels().min(in_channels)
        };

        if !self.looping {
            let run = frame_count.saturating_sub(self.position).min(num_frames);
            if run > 0 {
                self.copy_run(output, out_channels, 0, run);
            }
            self.position = self.position.saturating_add(num_frames).min(frame_count);
            return;
        }

        let loop_end = self.loop_start + self.loop_length;
        if self.position >= loop_end {
            self.position = self.loop_start + (self.position - loop_end) % self.loop_length;
        }

        let mut written = 0;
        while written < num_frames {
            let run = (loop_end - self.position).min(num_frames - written);
            self.copy_run(output, out_channels, written, run);
            self.position += run;
            written += run;
            if self.position >= loop_end {
                self.position = self.loop_start;
            }
        }
    }
}

impl PositionableSource for LoopingBufferSource {
    fn total_length(&self) -> u64 {
        self.frame_count() as u64
    }

    fn next_read_position(&self) -> u64 {
        self.position as u64
    }

    /// Seek. While looping the position is reduced modulo the whole buffer
    /// length, not the loop length, so it can land outside the loop region;
    /// the next block folds it back in.
    fn set_next_read_position(&mut self, position: u64) {
        let frame_count = self.frame_count() as u64;
        let mut position = position;
        if self.looping && frame_count > 0 {
            position %= frame_count;
        }
        self.position = position.min(frame_count) as usize;
    }

    fn is_looping(&self) -> bool {
        self.looping
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn loop_range(&self) -> LoopRange {
        LoopRange {
            start: self.loop_start as u64,
            length: self.loop_length as u64,
        }
    }

    fn set_loop_range(&mut self, start: u64, length: u64) {
        let frame_count = self.frame_count() as u64;
        if frame_count == 0 {
            self.loop_start = 0;
            self.loop_length = 0;
            return;
        }
        let start = start.min(frame_count - 1);
        let length = length.clamp(1, frame_count - start);
        self.loop_start = start as usize;
        self.loop_length = length as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;

    fn ramp(frames: usize) -> AudioBuffer {
        AudioBuffer::from_channels(vec![(0..frames).map(|i| i as f32).collect()])
    }

    fn render(source: &mut LoopingBufferSource, channels: usize, frames: usize) -> AudioBuffer {
        let mut out = AudioBuffer::new(channels, frames);
        source.produce_block(&mut out, frames);
        out
    }

    #[test]
    fn plays_buffer_once_then_silence() {
        let mut source = LoopingBufferSource::new(ramp(4), false);
        let out = render(&mut source, 1, 6);
        assert_eq!(out.channel(0), &[0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(source.next_read_position(), 4);

        let out = render(&mut source, 1, 3);
        assert_eq!(out.channel(0), &[0.0, 0.0, 0.0]);
        assert_eq!(source.next_read_position(), 4);
    }

    #[test]
    fn output_is_cleared_before_filling() {
        let mut source = LoopingBufferSource::new(ramp(2), false);
        let mut out = AudioBuffer::from_channels(vec![vec![9.0; 4]]);
        source.produce_block(&mut out, 3);
        assert_eq!(out.channel(0), &[0.0, 1.0, 0.0, 9.0]);
    }

    #[test]
    fn loop_repeats_region_across_long_requests() {
        let buffer = ramp(10);
        let mut source = LoopingBufferSource::new(buffer.clone(), false);
        source.set_looping(true);
        source.set_loop_range(2, 3);
        source.set_next_read_position(2);

        let requested = 11;
        let out = render(&mut source, 1, requested);

        let expected: Vec<f32> = (0..requested).map(|i| (2 + i % 3) as f32).collect();
        assert_eq!(out.channel(0), expected.as_slice());
        assert_eq!(source.next_read_position(), 2 + (requested % 3) as u64);
    }

    #[test]
    fn random_loop_output_matches_manual_slicing() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let frames = rng.gen_range(1..64);
            let buffer = AudioBuffer::from_channels(vec![(0..frames)
                .map(|_| rng.gen_range(-1.0..1.0))
                .collect()]);
            let mut source = LoopingBufferSource::new(buffer.clone(), false);
            source.set_looping(true);
            source.set_loop_range(rng.gen_range(0..frames as u64), rng.gen_range(1..=frames as u64));
            let range = source.loop_range();
            source.set_next_read_position(range.start);

            let requested = range.length as usize + rng.gen_range(1..200);
            let out = render(&mut source, 1, requested);

            let slice = &buffer.channel(0)[range.start as usize..(range.start + range.length) as usize];
            let expected: Vec<f32> = slice.iter().copied().cycle().take(requested).collect();
            assert_eq!(out.channel(0), expected.as_slice());
        }
    }

    #[test]
    fn loop_range_is_always_clamped() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let frames = rng.gen_range(1..1000u64);
            let mut source = LoopingBufferSource::new(ramp(frames as usize), false);
            source.set_loop_range(rng.gen_range(0..3000), rng.gen_range(0..3000));
            let range = source.loop_range();
            assert!(range.start < frames);
            assert!(range.length >= 1);
            assert!(range.length <= frames - range.start);
        }
    }

    #[test]
    fn loop_range_clamps_out_of_range_inputs() {
        let mut source = LoopingBufferSource::new(ramp(8), false);
        source.set_loop_range(20, 0);
        assert_eq!(source.loop_range(), LoopRange { start: 7, length: 1 });
        source.set_loop_range(3, 100);
        assert_eq!(source.loop_range(), LoopRange { start: 3, length: 5 });
    }

    #[test]
    fn looping_seek_uses_total_length_modulo() {
        let mut source = LoopingBufferSource::new(ramp(10), false);
        source.set_looping(true);
        source.set_loop_range(2, 3);
        source.set_next_read_position(17);
        assert_eq!(source.next_read_position(), 7);

        // Past the loop end: folded back into the region on the next block.
        let out = render(&mut source, 1, 4);
        assert_eq!(out.channel(0), &[4.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn non_looping_seek_clamps_to_length() {
        let mut source = LoopingBufferSource::new(ramp(10), false);
        source.set_next_read_position(25);
        assert_eq!(source.next_read_position(), 10);
    }

    #[test]
    fn lead_in_before_loop_start_plays_through() {
        let mut source = LoopingBufferSource::new(ramp(6), false);
        source.set_looping(true);
        source.set_loop_range(3, 2);
        let out = render(&mut source, 1, 8);
        assert_eq!(out.channel(0), &[0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0, 3.0]);
    }

    #[test]
    fn spread_cycles_source_channels() {
        let buffer = AudioBuffer::from_channels(vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
        let mut source = LoopingBufferSource::new(buffer, true);
        let out = render(&mut source, 3, 2);
        assert_eq!(out.channel(0), &[1.0, 1.0]);
        assert_eq!(out.channel(1), &[2.0, 2.0]);
        assert_eq!(out.channel(2), &[1.0, 1.0]);
    }

    #[test]
    fn without_spread_extra_channels_stay_silent() {
        let buffer = AudioBuffer::from_channels(vec![vec![1.0, 1.0]]);
        let mut source = LoopingBufferSource::new(Arc::new(buffer), false);
        let out = render(&mut source, 2, 2);
        assert_eq!(out.channel(0), &[1.0, 1.0]);
        assert_eq!(out.channel(1), &[0.0, 0.0]);
    }

    #[test]
    fn empty_buffer_renders_silence() {
        let mut source = LoopingBufferSource::new(AudioBuffer::new(1, 0), true);
        source.set_looping(true);
        source.set_loop_range(4, 4);
        assert_eq!(source.loop_range(), LoopRange { start: 0, length: 0 });
        let out = render(&mut source, 2, 4);
        assert_eq!(out.peak(0, 4), 0.0);
        assert_eq!(source.next_read_position(), 0);
    }
}

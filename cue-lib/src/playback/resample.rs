//! Streaming sample rate conversion for the transport.
//!
//! Uses linear interpolation between consecutive source frames. All buffers
//! are sized in [`Resampler::new`], so processing never allocates.

use crate::audio::buffer::AudioBuffer;

/// Converts a pulled source stream from one rate to another, block by block.
#[derive(Debug)]
pub struct Resampler {
    /// Source frames consumed per output frame.
    ratio: f64,
    phase: f64,
    previous: Vec<f32>,
    next: Vec<f32>,
    input: AudioBuffer,
    block_size: usize,
    primed: bool,
}

impl Resampler {
    /// # Arguments
    ///
    /// * `source_rate` - Rate the pulled source produces.
    /// * `target_rate` - Rate of the output blocks.
    /// * `channels` - Number of channels converted.
    /// * `block_size` - Largest output block converted in one pass; larger
    ///   requests are split.
    pub fn new(source_rate: f64, target_rate: f64, channels: usize, block_size: usize) -> Self {
        let ratio = source_rate / target_rate;
        let block_size = block_size.max(1);
        let capacity = (block_size as f64 * ratio).ceil() as usize + 2;
        Self {
            ratio,
            phase: 0.0,
            previous: vec![0.0; channels],
            next: vec![0.0; channels],
            input: AudioBuffer::new(channels, capacity),
            block_size,
            primed: false,
        }
    }

    /// Forget stream history, e.g. after a seek.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.primed = false;
        self.previous.fill(0.0);
        self.next.fill(0.0);
    }

    /// Fill `num_frames` frames of `output`, pulling source frames through
    /// `pull(buffer, frames)`, which must fill the first `frames` frames of
    /// `buffer`.
    pub fn process(
        &mut self,
        output: &mut AudioBuffer,
        num_frames: usize,
        mut pull: impl FnMut(&mut AudioBuffer, usize),
    ) {
        let num_frames = num_frames.min(output.num_frames());
        let channels = self.previous.len().min(output.num_channels());
        output.clear_region(0, num_frames);

        if !self.primed {
            pull(&mut self.input, 2);
            for channel in 0..channels {
                self.previous[channel] = self.input.sample(channel, 0);
                self.next[channel] = self.input.sample(channel, 1);
            }
            self.primed = true;
        }

        let mut offset = 0;
        while offset < num_frames {
            let frames = (num_frames - offset).min(self.block_size);
            self.process_chunk(output, offset, frames, channels, &mut pull);
            offset += frames;
        }
    }

    fn process_chunk(
        &mut self,
        output: &mut AudioBuffer,
        offset: usize,
        frames: usize,
        channels: usize,
        pull: &mut impl FnMut(&mut AudioBuffer, usize),
    ) {
        // Dry run with the same arithmetic to learn how many frames to pull.
        let mut phase = self.phase;
        let mut needed = 0;
        for _ in 0..frames {
            phase += self.ratio;
            while phase >= 1.0 {
                phase -= 1.0;
                needed += 1;
            }
        }
        let needed = needed.min(self.input.num_frames());
        if needed > 0 {
            pull(&mut self.input, needed);
        }

        let mut consumed = 0;
        for frame in 0..frames {
            let fraction = self.phase as f32;
            for channel in 0..channels {
                let previous = self.previous[channel];
                let sample = previous + (self.next[channel] - previous) * fraction;
                output.set_sample(channel, offset + frame, sample);
            }
            self.phase += self.ratio;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                for channel in 0..channels {
                    self.previous[channel] = self.next[channel];
                    if consumed < needed {
                        self.next[channel] = self.input.sample(channel, consumed);
                    }
                }
                consumed += 1;
            }
        }
    }
}

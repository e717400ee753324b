//! Planar PCM storage shared by sources, the mixer and the device adapters.

use std::ops::Deref;
use std::sync::Arc;

/// Multi-channel block of 32-bit float samples stored one `Vec` per channel.
///
/// All block operations clamp their ranges to the buffer bounds instead of
/// panicking, so they are safe to call from the audio callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    num_frames: usize,
}

impl AudioBuffer {
    /// Create a zeroed buffer.
    pub fn new(num_channels: usize, num_frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; num_frames]; num_channels],
            num_frames,
        }
    }

    /// Build a buffer from per-channel sample vectors.
    ///
    /// Shorter channels are padded with silence to the longest one.
    pub fn from_channels(mut channels: Vec<Vec<f32>>) -> Self {
        let num_frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel.resize(num_frames, 0.0);
        }
        Self {
            channels,
            num_frames,
        }
    }

    /// Build a buffer from interleaved samples.
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], num_channels: usize) -> Self {
        if num_channels == 0 {
            return Self::default();
        }
        let num_frames = samples.len() / num_channels;
        let mut buffer = Self::new(num_channels, num_frames);
        for (frame, chunk) in samples.chunks_exact(num_channels).enumerate() {
            for (channel, sample) in chunk.iter().enumerate() {
                buffer.channels[channel][frame] = *sample;
            }
        }
        buffer
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// True when the buffer holds no samples at all.
    pub fn is_empty(&self) -> bool {
        self.num_frames == 0 || self.channels.is_empty()
    }

    /// Resize the buffer, zeroing its contents. Allocates.
    pub fn set_size(&mut self, num_channels: usize, num_frames: usize) {
        self.channels = vec![vec![0.0; num_frames]; num_channels];
        self.num_frames = num_frames;
    }

    /// Samples of one channel. Out-of-range channels read as empty.
    pub fn channel(&self, channel: usize) -> &[f32] {
        self.channels.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mutable samples of one channel. Out-of-range channels are empty.
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        self.channels
            .get_mut(channel)
            .map(Vec::as_mut_slice)
            .unwrap_or(&mut [])
    }

    /// Read a single sample, returning silence outside the buffer.
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.channel(channel).get(frame).copied().unwrap_or(0.0)
    }

    pub fn set_sample(&mut self, channel: usize, frame: usize, value: f32) {
        if let Some(sample) = self.channel_mut(channel).get_mut(frame) {
            *sample = value;
        }
    }

    /// Zero `num_frames` frames starting at `start` on every channel.
    pub fn clear_region(&mut self, start: usize, num_frames: usize) {
        let (start, end) = self.clamp_range(start, num_frames);
        for channel in self.channels.iter_mut() {
            channel[start..end].fill(0.0);
        }
    }

    /// Overwrite a run of one channel with samples from another buffer.
    pub fn copy_from(
        &mut self,
        dest_channel: usize,
        dest_start: usize,
        source: &AudioBuffer,
        source_channel: usize,
        source_start: usize,
        num_frames: usize,
    ) {
        let src = source.channel(source_channel);
        let dest = self.channel_mut(dest_channel);
        let len = run_length(dest.len(), dest_start, src.len(), source_start, num_frames);
        if len == 0 {
            return;
        }
        dest[dest_start..dest_start + len].copy_from_slice(&src[source_start..source_start + len]);
    }

    /// Sum a run of another buffer's channel into one of this buffer's channels.
    pub fn add_from(
        &mut self,
        dest_channel: usize,
        dest_start: usize,
        source: &AudioBuffer,
        source_channel: usize,
        source_start: usize,
        num_frames: usize,
    ) {
        let src = source.channel(source_channel);
        let dest = self.channel_mut(dest_channel);
        let len = run_length(dest.len(), dest_start, src.len(), source_start, num_frames);
        if len == 0 {
            return;
        }
        for (out, sample) in dest[dest_start..dest_start + len]
            .iter_mut()
            .zip(&src[source_start..source_start + len])
        {
            *out += *sample;
        }
    }

    /// Multiply a region of every channel by a constant gain.
    pub fn apply_gain(&mut self, start: usize, num_frames: usize, gain: f32) {
        let (start, end) = self.clamp_range(start, num_frames);
        for channel in self.channels.iter_mut() {
            for sample in channel[start..end].iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Apply a linear gain ramp to a region of one channel.
    ///
    /// The gain starts at `start_gain` on the first frame and grows by
    /// `(end_gain - start_gain) / num_frames` per frame.
    pub fn apply_gain_ramp(
        &mut self,
        channel: usize,
        start: usize,
        num_frames: usize,
        start_gain: f32,
        end_gain: f32,
    ) {
        if num_frames == 0 {
            return;
        }
        let increment = (end_gain - start_gain) / num_frames as f32;
        let (start, end) = self.clamp_range(start, num_frames);
        let Some(samples) = self.channels.get_mut(channel) else {
            return;
        };
        let mut gain = start_gain;
        for sample in samples[start..end].iter_mut() {
            *sample *= gain;
            gain += increment;
        }
    }

    /// Apply the same gain ramp to every channel.
    pub fn apply_gain_ramp_all(
        &mut self,
        start: usize,
        num_frames: usize,
        start_gain: f32,
        end_gain: f32,
    ) {
        for channel in 0..self.num_channels() {
            self.apply_gain_ramp(channel, start, num_frames, start_gain, end_gain);
        }
    }

    /// Largest absolute sample value in a region, across all channels.
    pub fn peak(&self, start: usize, num_frames: usize) -> f32 {
        let (start, end) = self.clamp_range(start, num_frames);
        self.channels
            .iter()
            .flat_map(|channel| channel[start..end].iter())
            .fold(0.0_f32, |peak, sample| peak.max(sample.abs()))
    }

    /// Interleave the whole buffer into a new vector.
    pub fn to_interleaved(&self) -> Vec<f32> {
        let channels = self.num_channels();
        let mut out = Vec::with_capacity(self.num_frames * channels);
        for frame in 0..self.num_frames {
            for channel in 0..channels {
                out.push(self.channels[channel][frame]);
            }
        }
        out
    }

    fn clamp_range(&self, start: usize, num_frames: usize) -> (usize, usize) {
        let start = start.min(self.num_frames);
        let end = start.saturating_add(num_frames).min(self.num_frames);
        (start, end)
    }
}

fn run_length(
    dest_len: usize,
    dest_start: usize,
    source_len: usize,
    source_start: usize,
    num_frames: usize,
) -> usize {
    num_frames
        .min(dest_len.saturating_sub(dest_start))
        .min(source_len.saturating_sub(source_start))
}

/// A PCM buffer handed to a source either by value or shared with the caller.
///
/// `Owned` moves the buffer into the source and it is dropped with it.
/// `Shared` keeps the caller's `Arc` alive for as long as the source plays.
#[derive(Debug, Clone)]
pub enum BufferHandle {
    Owned(AudioBuffer),
    Shared(Arc<AudioBuffer>),
}

impl BufferHandle {
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl Deref for BufferHandle {
    type Target = AudioBuffer;

    fn deref(&self) -> &AudioBuffer {
        match self {
            Self::Owned(buffer) => buffer,
            Self::Shared(buffer) => buffer,
        }
    }
}

impl From<AudioBuffer> for BufferHandle {
    fn from(buffer: AudioBuffer) -> Self {
        Self::Owned(buffer)
    }
}

impl From<Arc<AudioBuffer>> for BufferHandle {
    fn from(buffer: Arc<AudioBuffer>) -> Self {
        Self::Shared(buffer)
    }
}

//! Start/stop, gain and completion control over a positionable source.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::buffer::AudioBuffer;
use crate::device::DeviceInfo;

use super::resample::Resampler;
use super::source::{AudioSource, PositionableSource, SourceHandle};

/// Frames faded out on the block after playback stops.
const STOP_FADE_FRAMES: usize = 256;

/// Transport flags shared between the audio thread and control threads.
#[derive(Debug)]
pub struct TransportState {
    playing: AtomicBool,
    stream_finished: AtomicBool,
    gain: AtomicU32,
}

impl TransportState {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            stream_finished: AtomicBool::new(false),
            gain: AtomicU32::new(1.0_f32.to_bits()),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// True once a non-looping source has run past its end.
    pub fn has_stream_finished(&self) -> bool {
        self.stream_finished.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }
}

/// Wraps a [`PositionableSource`] with a transport.
///
/// The source is pulled only while the transport is playing. When a
/// non-looping source reaches its end the transport stops itself and raises
/// [`TransportState::has_stream_finished`], which the reaper picks up.
pub struct TransportSource {
    source: SourceHandle,
    source_sample_rate: f64,
    device_sample_rate: f64,
    resampler: Option<Resampler>,
    was_playing: bool,
    last_gain: f32,
    state: Arc<TransportState>,
}

impl TransportSource {
    /// # Arguments
    ///
    /// * `source` - The source to play, owned or shared.
    /// * `source_sample_rate` - Rate the source produces. Zero or a negative
    ///   value means "same as the device", so no conversion happens.
    pub fn new(source: SourceHandle, source_sample_rate: f64) -> Self {
        Self {
            source,
            source_sample_rate,
            device_sample_rate: 0.0,
            resampler: None,
            was_playing: false,
            last_gain: 1.0,
            state: Arc::new(TransportState::new()),
        }
    }

    pub fn start(&mut self) {
        if self.state.is_playing() {
            return;
        }
        self.state.stream_finished.store(false, Ordering::Release);
        self.state.playing.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.state.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn has_stream_finished(&self) -> bool {
        self.state.has_stream_finished()
    }

    /// Flags shared with whoever needs to observe or stop this transport
    /// without holding it.
    pub fn state(&self) -> Arc<TransportState> {
        Arc::clone(&self.state)
    }

    pub fn is_owned(&self) -> bool {
        self.source.is_owned()
    }

    /// Seek, in seconds of source time.
    pub fn set_position(&mut self, seconds: f64) {
        let rate = self.effective_source_rate();
        let frame = if rate > 0.0 && seconds.is_finite() && seconds > 0.0 {
            (seconds * rate) as u64
        } else {
            0
        };
        self.source.with(|source| source.set_next_read_position(frame));
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Current read position in seconds of source time.
    pub fn position(&mut self) -> f64 {
        let rate = self.effective_source_rate();
        if rate <= 0.0 {
            return 0.0;
        }
        self.source.with(|source| source.next_read_position()) as f64 / rate
    }

    pub fn length_in_seconds(&mut self) -> f64 {
        let rate = self.effective_source_rate();
        if rate <= 0.0 {
            return 0.0;
        }
        self.source.with(|source| source.total_length()) as f64 / rate
    }

    /// Set the output gain. The change is ramped across the next block.
    pub fn set_gain(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
        self.state.set_gain(gain);
    }

    pub fn gain(&self) -> f32 {
        self.state.gain()
    }

    fn effective_source_rate(&self) -> f64 {
        if self.source_sample_rate > 0.0 {
            self.source_sample_rate
        } else {
            self.device_sample_rate
        }
    }

    fn reached_end(source: &dyn PositionableSource) -> bool {
        !source.is_looping() && source.next_read_position() >= source.total_length()
    }
}

impl AudioSource for TransportSource {
    fn prepare(&mut self, info: &DeviceInfo) {
        self.device_sample_rate = info.sample_rate;
        self.source.with(|source| source.prepare(info));

        let needs_conversion = self.source_sample_rate > 0.0
            && info.sample_rate > 0.0
            && (self.source_sample_rate - info.sample_rate).abs() > f64::EPSILON;
        self.resampler = if needs_conversion {
            Some(Resampler::new(
                self.source_sample_rate,
                info.sample_rate,
                info.output_channels,
                info.block_size,
            ))
        } else {
            None
        };
    }

    fn release(&mut self) {
        self.source.with(|source| source.release());
        self.resampler = None;
    }

    fn produce_block(&mut self, output: &mut AudioBuffer, num_frames: usize) {
        let num_frames = num_frames.min(output.num_frames());
        let playing = self.state.is_playing();
        if !playing && !self.was_playing {
            output.clear_region(0, num_frames);
            return;
        }

        let resampler = &mut self.resampler;
        let rendered = self.source.try_with(|source| {
            match resampler.as_mut() {
                Some(resampler) => {
                    resampler.process(output, num_frames, |buf, frames| source.produce_block(buf, frames))
                }
                None => source.produce_block(output, num_frames),
            }
            Self::reached_end(source)
        });

        let Some(reached_end) = rendered else {
            output.clear_region(0, num_frames);
            return;
        };

        if !playing {
            // Just stopped: fade the last block out.
            let fade = num_frames.min(STOP_FADE_FRAMES);
            output.apply_gain_ramp_all(0, fade, 1.0, 0.0);
            output.clear_region(fade, num_frames - fade);
        }

        if playing && reached_end {
            self.state.playing.store(false, Ordering::Release);
            self.state.stream_finished.store(true, Ordering::Release);
        }
        self.was_playing = playing;

        let gain = self.state.gain();
        if (gain - self.last_gain).abs() > f32::EPSILON {
            output.apply_gain_ramp_all(0, num_frames, self.last_gain, gain);
        } else if (gain - 1.0).abs() > f32::EPSILON {
            output.apply_gain(0, num_frames, gain);
        }
        self.last_gain = gain;
    }
}

impl std::fmt::Debug for TransportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSource")
            .field("source", &self.source)
            .field("source_sample_rate", &self.source_sample_rate)
            .field("playing", &self.state.is_playing())
            .field("stream_finished", &self.state.has_stream_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::playback::buffer_source::LoopingBufferSource;
    use crate::playback::source::PositionableSource;

    fn info(sample_rate: f64) -> DeviceInfo {
        DeviceInfo {
            sample_rate,
            block_size: 8,
            output_channels: 1,
        }
    }

    fn constant(frames: usize, value: f32) -> LoopingBufferSource {
        LoopingBufferSource::new(AudioBuffer::from_channels(vec![vec![value; frames]]), false)
    }

    #[test]
    fn silent_until_started() {
        let mut transport = TransportSource::new(SourceHandle::owned(constant(16, 0.5)), 0.0);
        transport.prepare(&info(48_000.0));
        let mut out = AudioBuffer::new(1, 8);
        transport.produce_block(&mut out, 8);
        assert_eq!(out.peak(0, 8), 0.0);

        transport.start();
        transport.produce_block(&mut out, 8);
        assert_eq!(out.channel(0), &[0.5; 8]);
    }

    #[test]
    fn finishes_when_non_looping_source_runs_out() {
        let mut transport = TransportSource::new(SourceHandle::owned(constant(10, 0.25)), 0.0);
        transport.prepare(&info(48_000.0));
        transport.start();
        let state = transport.state();
        let mut out = AudioBuffer::new(1, 8);

        transport.produce_block(&mut out, 8);
        assert!(state.is_playing());
        transport.produce_block(&mut out, 8);
        assert_eq!(out.channel(0), &[0.25, 0.25, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(!state.is_playing());
        assert!(state.has_stream_finished());
    }

    #[test]
    fn looping_source_never_finishes() {
        let mut source = constant(4, 1.0);
        source.set_looping(true);
        let mut transport = TransportSource::new(SourceHandle::owned(source), 0.0);
        transport.prepare(&info(48_000.0));
        transport.start();
        let mut out = AudioBuffer::new(1, 8);
        for _ in 0..10 {
            transport.produce_block(&mut out, 8);
        }
        assert!(transport.is_playing());
        assert!(!transport.has_stream_finished());
    }

    #[test]
    fn stop_fades_one_block_then_silence() {
        let mut transport = TransportSource::new(SourceHandle::owned(constant(64, 1.0)), 0.0);
        transport.prepare(&info(48_000.0));
        transport.start();
        let mut out = AudioBuffer::new(1, 8);
        transport.produce_block(&mut out, 8);

        transport.stop();
        transport.produce_block(&mut out, 8);
        assert_eq!(out.sample(0, 0), 1.0);
        assert!(out.sample(0, 7) < out.sample(0, 1));

        transport.produce_block(&mut out, 8);
        assert_eq!(out.peak(0, 8), 0.0);
        assert!(!transport.has_stream_finished());
    }

    #[test]
    fn gain_change_ramps_over_one_block() {
        let mut transport = TransportSource::new(SourceHandle::owned(constant(64, 1.0)), 0.0);
        transport.prepare(&info(48_000.0));
        transport.start();
        transport.set_gain(0.0);
        let mut out = AudioBuffer::new(1, 4);
        transport.produce_block(&mut out, 4);
        assert_eq!(out.channel(0), &[1.0, 0.75, 0.5, 0.25]);
        transport.produce_block(&mut out, 4);
        assert_eq!(out.peak(0, 4), 0.0);
        assert_eq!(transport.gain(), 0.0);
    }

    #[test]
    fn seek_and_length_use_source_rate() {
        let mut transport = TransportSource::new(SourceHandle::owned(constant(8_000, 0.0)), 8_000.0);
        transport.prepare(&info(16_000.0));
        assert!((transport.length_in_seconds() - 1.0).abs() < 1e-9);
        transport.set_position(0.5);
        assert!((transport.position() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn converts_rate_when_source_differs_from_device() {
        let mut transport = TransportSource::new(SourceHandle::owned(constant(4, 0.5)), 24_000.0);
        transport.prepare(&info(48_000.0));
        transport.start();
        let mut out = AudioBuffer::new(1, 8);
        transport.produce_block(&mut out, 8);
        // Four source frames stretch to eight device frames.
        assert_eq!(&out.channel(0)[..6], &[0.5; 6]);
        for _ in 0..4 {
            transport.produce_block(&mut out, 8);
        }
        assert!(transport.has_stream_finished());
    }

    #[test]
    fn locked_shared_source_renders_silence() {
        let shared: Arc<Mutex<dyn PositionableSource>> = Arc::new(Mutex::new(constant(32, 1.0)));
        let mut transport = TransportSource::new(SourceHandle::shared(Arc::clone(&shared)), 0.0);
        transport.prepare(&info(48_000.0));
        transport.start();
        let mut out = AudioBuffer::new(1, 8);

        let guard = shared.lock().expect("lock");
        transport.produce_block(&mut out, 8);
        assert_eq!(out.peak(0, 8), 0.0);
        drop(guard);

        transport.produce_block(&mut out, 8);
        assert_eq!(out.channel(0), &[1.0; 8]);
        assert_eq!(shared.lock().expect("lock").next_read_position(), 8);
    }
}

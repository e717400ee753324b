//! Diagnostic sine tone.

use std::f64::consts::TAU;

use crate::audio::buffer::AudioBuffer;
use crate::settings::TestToneSettings;

/// Render the test tone as a mono buffer at `sample_rate`.
///
/// The tone fades in over its first tenth and out over its last quarter.
pub fn render(settings: &TestToneSettings, sample_rate: f64) -> AudioBuffer {
    let length = (sample_rate * settings.seconds).max(0.0) as usize;
    let mut buffer = AudioBuffer::new(1, length);
    if length == 0 {
        return buffer;
    }

    let phase_per_sample = TAU / (sample_rate / settings.frequency);
    for (i, sample) in buffer.channel_mut(0).iter_mut().enumerate() {
        *sample = settings.amplitude * (i as f64 * phase_per_sample).sin() as f32;
    }

    let fade_in = length / 10;
    let fade_out = length / 4;
    buffer.apply_gain_ramp(0, 0, fade_in, 0.0, 1.0);
    buffer.apply_gain_ramp(0, length - fade_out, fade_out, 1.0, 0.0);
    buffer
}

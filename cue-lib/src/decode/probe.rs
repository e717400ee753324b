//! Symphonia-backed reader factory.

use log::{debug, warn};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::buffer::AudioBuffer;
use crate::error::CueError;

use super::{AudioFormatReader, MemoryReader, ReaderFactory};

/// Decodes every format enabled in symphonia's default registry.
///
/// Streams are decoded completely when the reader is created, so reads on
/// the audio thread never touch the codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaFactory;

impl SymphoniaFactory {
    pub fn new() -> Self {
        Self
    }

    /// Decode a file into a [`MemoryReader`].
    pub fn decode_file(&self, path: &Path) -> Result<MemoryReader, CueError> {
        let file = std::fs::File::open(path)?;
        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }
        decode_stream(Box::new(file), &hint)
    }

    /// Decode an in-memory byte range into a [`MemoryReader`].
    pub fn decode_memory(&self, bytes: &[u8]) -> Result<MemoryReader, CueError> {
        if bytes.is_empty() {
            return Err(CueError::Unsupported("empty input".to_string()));
        }
        decode_stream(Box::new(Cursor::new(bytes.to_vec())), &Hint::new())
    }
}

impl ReaderFactory for SymphoniaFactory {
    fn create_reader_for_file(&self, path: &Path) -> Result<Box<dyn AudioFormatReader>, CueError> {
        Ok(Box::new(self.decode_file(path)?))
    }

    fn create_reader_for_memory(&self, bytes: &[u8]) -> Result<Box<dyn AudioFormatReader>, CueError> {
        Ok(Box::new(self.decode_memory(bytes)?))
    }
}

fn decode_stream(source: Box<dyn MediaSource>, hint: &Hint) -> Result<MemoryReader, CueError> {
    let mss = MediaSourceStream::new(source, Default::default());

    // Use the default options for metadata and format readers.
    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = symphonia::default::get_probe().format(hint, mss, &fmt_opts, &meta_opts)?;
    let mut format = probed.format;

    let (track_id, sample_rate, mut decoder) = open_first_track(format.as_ref())?;
    let channels = read_all_packets(format.as_mut(), decoder.as_mut(), track_id)?;

    let buffer = AudioBuffer::from_channels(channels);
    if buffer.is_empty() {
        return Err(CueError::Decode("stream contains no audio".to_string()));
    }
    debug!(
        "decoded {} frames, {} channels at {} Hz",
        buffer.num_frames(),
        buffer.num_channels(),
        sample_rate
    );
    Ok(MemoryReader::new(buffer, sample_rate))
}

/// Pick the first track with a known codec and build its decoder.
fn open_first_track(format: &dyn FormatReader) -> Result<(u32, f64, Box<dyn Decoder>), CueError> {
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(CueError::NoTrack)?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| CueError::Decode("track has no sample rate".to_string()))?;

    let dec_opts: DecoderOptions = Default::default();
    let decoder = symphonia::default::get_codecs().make(&track.codec_params, &dec_opts)?;

    Ok((track.id, sample_rate as f64, decoder))
}

fn read_all_packets(
    format: &mut dyn FormatReader,
    decoder: &mut dyn Decoder,
    track_id: u32,
) -> Result<Vec<Vec<f32>>, CueError> {
    let mut channels: Vec<Vec<f32>> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::ResetRequired) => break,
            Err(err) => return Err(err.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let frames = decoded.frames();
                let channel_count = spec.channels.count();
                if frames == 0 || channel_count == 0 {
                    continue;
                }
                if channels.len() < channel_count {
                    channels.resize(channel_count, Vec::new());
                }

                let needed = frames * channel_count;
                if sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_planar_ref(decoded);
                    let samples = buf.samples();
                    for (channel, dest) in channels.iter_mut().enumerate().take(channel_count) {
                        dest.extend_from_slice(&samples[channel * frames..(channel + 1) * frames]);
                    }
                }
            }
            Err(Error::DecodeError(err)) => {
                warn!("decode error: {}", err);
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(channels)
}

use std::path::Path;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use clap::ArgMatches;
use cue_lib::audio::buffer::AudioBuffer;
use cue_lib::device::{AudioDeviceCallback, OfflineDevice, OutputDevice};
use cue_lib::playback::{Playable, PositionableSource, ReaderSource, SourceHandle, TransportSource};
use cue_lib::{CueError, PlaybackManager, Settings};
use log::{info, warn};

const WAIT_POLL_MS: u64 = 50;

pub fn run(args: &ArgMatches) -> Result<i32, CueError> {
    let settings = match args.get_one::<String>("settings") {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };

    match args.subcommand() {
        Some(("play", sub)) => run_play(sub, settings),
        Some(("tone", _)) => run_tone(settings),
        Some(("render", sub)) => run_render(sub, settings),
        Some(("info", sub)) => run_info(sub, settings),
        _ => Ok(-1),
    }
}

fn run_play(args: &ArgMatches, settings: Settings) -> Result<i32, CueError> {
    let looping = args.get_flag("loop");
    let gain = args.get_one::<f32>("GAIN").copied().unwrap_or(1.0);
    let manager = Arc::new(PlaybackManager::with_settings(settings.clone()));
    let device = OutputDevice::open_default(callback(&manager), &settings)?;

    let mut started = 0;
    for path in args.get_many::<String>("INPUT").into_iter().flatten() {
        let reader = match manager.factory().create_reader_for_file(Path::new(path)) {
            Ok(reader) => reader,
            Err(err) => {
                warn!("skipping {}: {}", path, err);
                continue;
            }
        };
        let sample_rate = reader.sample_rate();
        let mut source = ReaderSource::new(reader);
        source.set_looping(looping);
        let transport = TransportSource::new(SourceHandle::owned(source), sample_rate);
        transport.set_gain(gain);
        if let Some(id) = manager.play_source(Some(Playable::Transport(transport)), sample_rate) {
            info!("playing {} as {}", path, id);
            started += 1;
        }
    }

    if started == 0 {
        warn!("nothing to play");
        device.close();
        return Ok(-1);
    }

    wait_until_idle(&manager);
    device.close();
    Ok(0)
}

fn run_tone(settings: Settings) -> Result<i32, CueError> {
    let manager = Arc::new(PlaybackManager::with_settings(settings.clone()));
    let device = OutputDevice::open_default(callback(&manager), &settings)?;
    if manager.play_test_sound().is_none() {
        device.close();
        return Ok(-1);
    }
    wait_until_idle(&manager);
    device.close();
    Ok(0)
}

fn run_render(args: &ArgMatches, settings: Settings) -> Result<i32, CueError> {
    let out = args
        .get_one::<String>("out")
        .ok_or_else(|| CueError::Unsupported("missing output path".to_string()))?;
    let manager = Arc::new(PlaybackManager::with_settings(settings.clone()));
    let info = manager.device_info();

    let mut longest = 0.0_f64;
    for path in args.get_many::<String>("INPUT").into_iter().flatten() {
        let reader = manager.factory().create_reader_for_file(Path::new(path))?;
        longest = longest.max(reader.length_in_seconds());
        manager.play_reader(Some(reader));
    }
    if args.get_flag("test-tone") {
        longest = longest.max(manager.settings().test_tone.seconds);
        manager.play_test_sound();
    }
    if manager.active_count() == 0 {
        warn!("nothing to render; pass input files or --test-tone");
        return Ok(-1);
    }

    let seconds = args.get_one::<f64>("seconds").copied().unwrap_or(longest).max(0.0);
    let frames = (seconds * info.sample_rate).round() as usize;
    let mut device = OfflineDevice::new(callback(&manager), info);
    let rendered = device.render(frames);
    device.stop();

    write_wav(Path::new(out), &rendered, info.sample_rate)?;
    println!("wrote {} frames to {}", rendered.num_frames(), out);
    Ok(0)
}

fn run_info(args: &ArgMatches, settings: Settings) -> Result<i32, CueError> {
    let path = args
        .get_one::<String>("INPUT")
        .ok_or_else(|| CueError::Unsupported("missing input path".to_string()))?;
    let manager = PlaybackManager::with_settings(settings);
    let reader = manager.factory().create_reader_for_file(Path::new(path))?;
    println!("sample rate: {} Hz", reader.sample_rate());
    println!("channels: {}", reader.num_channels());
    println!("frames: {}", reader.length_in_frames());
    println!("duration: {:.3} s", reader.length_in_seconds());
    Ok(0)
}

fn callback(manager: &Arc<PlaybackManager>) -> Arc<dyn AudioDeviceCallback> {
    Arc::clone(manager) as Arc<dyn AudioDeviceCallback>
}

fn wait_until_idle(manager: &PlaybackManager) {
    while manager.active_count() > 0 {
        sleep(Duration::from_millis(WAIT_POLL_MS));
    }
    // Let the device drain the last block before closing.
    sleep(Duration::from_millis(WAIT_POLL_MS));
}

fn write_wav(path: &Path, buffer: &AudioBuffer, sample_rate: f64) -> Result<(), CueError> {
    let spec = hound::WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: sample_rate.round() as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    for sample in buffer.to_interleaved() {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}

fn wav_error(err: hound::Error) -> CueError {
    match err {
        hound::Error::IoError(err) => CueError::Io(err),
        other => CueError::Unsupported(other.to_string()),
    }
}

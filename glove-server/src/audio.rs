use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::error::AudioError;

/// Companion audio is probed in this order; first existing file wins.
pub const AUDIO_EXTENSIONS: [&str; 2] = ["wav", "mp3"];

const HAPTICS_MARKER: &str = "_haptics";

/// Fully decoded, interleaved PCM.
#[derive(Clone, Debug)]
pub struct AudioClip {
    samples: Arc<[f32]>,
    channels: usize,
    sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            channels: channels.max(1),
            sample_rate,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn length_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples[frame * self.channels + channel.min(self.channels - 1)]
    }

    /// De-interleaves one channel.
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        (0..self.frames()).map(|f| self.sample(f, channel)).collect()
    }
}

/// `songs/intro_haptics.json` -> `intro`.
pub fn companion_base_name(song: &Path) -> String {
    let stem = song
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.strip_suffix(HAPTICS_MARKER) {
        Some(base) => base.to_string(),
        None => stem,
    }
}

pub fn resolve_companion(audio_dir: &Path, base: &str) -> Result<PathBuf, AudioError> {
    AUDIO_EXTENSIONS
        .iter()
        .map(|ext| audio_dir.join(format!("{base}.{ext}")))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| AudioError::NotFound {
            base: base.to_string(),
            dir: audio_dir.to_path_buf(),
        })
}

/// Resolves and decodes the audio that accompanies `song`.
pub fn load_companion(song: &Path, audio_dir: &Path) -> Result<AudioClip, AudioError> {
    let base = companion_base_name(song);
    let path = resolve_companion(audio_dir, &base)?;
    let clip = decode_file(&path)?;
    info!(
        audio = %path.display(),
        seconds = clip.length_seconds(),
        channels = clip.channels(),
        sample_rate = clip.sample_rate(),
        "loaded companion audio"
    );
    Ok(clip)
}

pub fn decode_file(path: &Path) -> Result<AudioClip, AudioError> {
    let decode_error = |source: SymphoniaError| AudioError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|e| decode_error(SymphoniaError::from(e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_error)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::NoTrack {
            path: path.to_path_buf(),
        })?
        .clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_error)?;

    let mut samples = Vec::new();
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(decode_error(e)),
        };
        if packet.track_id() != track.id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt frame is dropped; the rest of the file is still usable.
            Err(SymphoniaError::DecodeError(msg)) => {
                debug!(audio = %path.display(), msg, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(decode_error(e)),
        };
        let spec = *decoded.spec();
        channels = spec.channels.count();
        sample_rate = spec.rate;
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(AudioError::NoTrack {
            path: path.to_path_buf(),
        });
    }
    Ok(AudioClip::new(samples, channels, sample_rate))
}

/// A loaded, ready-to-start audio track owned by one playback session.
pub trait AudioHandle {
    fn start(&mut self);
    fn stop(&mut self);
    fn seek_to_start(&mut self);
    fn is_playing(&self) -> bool;
    fn length_seconds(&self) -> f64;
}

/// Turns decoded clips into live handles and reports asynchronous stream failures.
pub trait AudioBackend {
    fn open(&mut self, clip: AudioClip) -> Result<Box<dyn AudioHandle>, AudioError>;
    fn drain_errors(&mut self) -> Vec<String>;
}

/// Read position into a clip, shared between the tick loop and the output callback.
pub struct Playhead {
    clip: AudioClip,
    position: f64,
    step: f64,
    playing: bool,
    failed: bool,
}

impl Playhead {
    pub fn new(clip: AudioClip, output_rate: u32) -> Self {
        let step = if output_rate == 0 {
            1.0
        } else {
            clip.sample_rate() as f64 / output_rate as f64
        };
        Self {
            clip,
            position: 0.0,
            step,
            playing: false,
            failed: false,
        }
    }

    /// Fills one interleaved output buffer, nearest-frame resampled to the device rate.
    pub fn render(&mut self, out: &mut [f32], out_channels: usize) {
        let frames = self.clip.frames();
        for frame in out.chunks_mut(out_channels.max(1)) {
            let source = self.position as usize;
            if !self.playing || source >= frames {
                frame.fill(0.0);
                continue;
            }
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.clip.sample(source, ch);
            }
            self.position += self.step;
        }
        if self.position as usize >= frames {
            self.playing = false;
        }
    }

    fn start(&mut self) {
        self.playing = !self.failed && (self.position as usize) < self.clip.frames();
    }

    /// The output stream died; the callback will not run again, so the clip
    /// can never reach its end on its own.
    pub fn fail(&mut self) {
        self.failed = true;
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

pub struct CpalHandle {
    stream: cpal::Stream,
    playhead: Arc<Mutex<Playhead>>,
    length: f64,
}

impl AudioHandle for CpalHandle {
    fn start(&mut self) {
        self.playhead.lock().start();
        if let Err(e) = self.stream.play() {
            warn!(error = %e, "failed to start audio stream");
        }
    }

    fn stop(&mut self) {
        self.playhead.lock().playing = false;
        if let Err(e) = self.stream.pause() {
            debug!(error = %e, "audio stream pause not supported");
        }
    }

    fn seek_to_start(&mut self) {
        self.playhead.lock().position = 0.0;
    }

    fn is_playing(&self) -> bool {
        self.playhead.lock().is_playing()
    }

    fn length_seconds(&self) -> f64 {
        self.length
    }
}

/// The stream renders f32. Prefers the clip's own rate so no resampling is
/// needed, then the fastest rate of any f32 config; the playhead resamples.
fn choose_f32_config(
    supported: impl IntoIterator<Item = cpal::SupportedStreamConfigRange>,
    clip_rate: u32,
) -> Option<cpal::SupportedStreamConfig> {
    let wanted_rate = cpal::SampleRate(clip_rate);
    let f32_configs: Vec<_> = supported
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .collect();
    if let Some(exact) = f32_configs
        .iter()
        .find(|c| c.min_sample_rate() <= wanted_rate && c.max_sample_rate() >= wanted_rate)
    {
        return Some(exact.clone().with_sample_rate(wanted_rate));
    }
    f32_configs
        .into_iter()
        .max_by_key(|c| c.max_sample_rate())
        .map(|c| c.with_max_sample_rate())
}

pub struct CpalBackend {
    error_tx: Sender<String>,
    error_rx: Receiver<String>,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        let (error_tx, error_rx) = crossbeam_channel::bounded(64);
        Self { error_tx, error_rx }
    }
}

impl AudioBackend for CpalBackend {
    fn open(&mut self, clip: AudioClip) -> Result<Box<dyn AudioHandle>, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Output("no output device available".to_string()))?;

        let supported: Vec<cpal::SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map(|configs| configs.collect())
            .unwrap_or_default();
        let config = match choose_f32_config(supported, clip.sample_rate()) {
            Some(config) => config,
            None => {
                let default = device
                    .default_output_config()
                    .map_err(|e| AudioError::Output(e.to_string()))?;
                if default.sample_format() != cpal::SampleFormat::F32 {
                    return Err(AudioError::Output(format!(
                        "output device has no f32 config (default is {:?})",
                        default.sample_format()
                    )));
                }
                default
            }
        };

        let output_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        info!(
            device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate = output_rate,
            channels,
            "opening audio output"
        );

        let length = clip.length_seconds();
        let playhead = Arc::new(Mutex::new(Playhead::new(clip, output_rate)));
        let callback_playhead = playhead.clone();
        let failed_playhead = playhead.clone();
        let error_tx = self.error_tx.clone();

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Never block the audio thread; a contended buffer is rendered silent.
                    match callback_playhead.try_lock() {
                        Some(mut playhead) => playhead.render(data, channels),
                        None => data.fill(0.0),
                    }
                },
                move |err| {
                    failed_playhead.lock().fail();
                    let _ = error_tx.try_send(err.to_string());
                },
                None,
            )
            .map_err(|e| AudioError::Output(e.to_string()))?;

        Ok(Box::new(CpalHandle {
            stream,
            playhead,
            length,
        }))
    }

    fn drain_errors(&mut self) -> Vec<String> {
        self.error_rx.try_iter().collect()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default, Debug)]
    pub struct FakeAudioState {
        pub playing: bool,
        pub starts: usize,
        pub stops: usize,
        pub seeks: usize,
        pub opened: usize,
        pub live: usize,
        pub pending_errors: Vec<String>,
    }

    impl FakeAudioState {
        /// Same effect as a cpal stream error: playback stops and the error is queued.
        pub fn fail_stream(&mut self, message: &str) {
            self.playing = false;
            self.pending_errors.push(message.to_string());
        }
    }

    pub type SharedAudio = Rc<RefCell<FakeAudioState>>;

    pub struct FakeHandle {
        state: SharedAudio,
        length: f64,
    }

    impl AudioHandle for FakeHandle {
        fn start(&mut self) {
            let mut state = self.state.borrow_mut();
            state.playing = true;
            state.starts += 1;
        }

        fn stop(&mut self) {
            let mut state = self.state.borrow_mut();
            state.playing = false;
            state.stops += 1;
        }

        fn seek_to_start(&mut self) {
            self.state.borrow_mut().seeks += 1;
        }

        fn is_playing(&self) -> bool {
            self.state.borrow().playing
        }

        fn length_seconds(&self) -> f64 {
            self.length
        }
    }

    impl Drop for FakeHandle {
        fn drop(&mut self) {
            self.state.borrow_mut().live -= 1;
        }
    }

    #[derive(Default)]
    pub struct FakeBackend {
        pub state: SharedAudio,
        pub fail_open: bool,
        pub errors: Vec<String>,
    }

    impl AudioBackend for FakeBackend {
        fn open(&mut self, clip: AudioClip) -> Result<Box<dyn AudioHandle>, AudioError> {
            if self.fail_open {
                return Err(AudioError::Output("fake output refused".to_string()));
            }
            let mut state = self.state.borrow_mut();
            state.opened += 1;
            state.live += 1;
            Ok(Box::new(FakeHandle {
                state: self.state.clone(),
                length: clip.length_seconds(),
            }))
        }

        fn drain_errors(&mut self) -> Vec<String> {
            let mut errors = std::mem::take(&mut self.errors);
            errors.append(&mut self.state.borrow_mut().pending_errors);
            errors
        }
    }
}

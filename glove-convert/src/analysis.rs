//! Onset-driven haptic event generation.
//!
//! Each detected onset becomes a short analysis segment. The segment's
//! loudness, normalised against the whole channel, sets how hard the gloves
//! buzz; its spectrum decides which fingers: five frequency bands map to the
//! five fingers, and every band carrying a meaningful share of the segment's
//! strongest band fires.

use glove_protocol::{FingerChannel, Hand};
use glove_server::audio::AudioClip;
use glove_server::song::{HapticEvent, Score};
use tracing::debug;

use crate::stft::Stft;

pub const N_FFT: usize = 2048;
pub const HOP: usize = 512;
pub const EVENT_DURATION: f32 = 0.15;
pub const MIN_STRENGTH: u8 = 50;
pub const MAX_STRENGTH: u8 = 255;

const ONSET_WAIT: f64 = 0.03;
const SEGMENT_PRE_ONSET: f64 = 0.05;
const QUIET_SEGMENT: f32 = 0.05;
const BAND_THRESHOLD: f32 = 0.20;
const BAND_FLOOR: f32 = 1e-5;
const SILENT_SEGMENT: f32 = 1e-6;
const RMS_DEGENERATE_RANGE: f32 = 1e-5;

// Peak picking over the normalised onset envelope, in seconds.
const PEAK_PRE_MAX: f64 = 0.03;
const PEAK_AVG_WINDOW: f64 = 0.10;
const PEAK_DELTA: f32 = 0.07;
const TOP_DB: f32 = 80.0;

/// Inclusive frequency range in Hz driving each finger.
pub const BANDS: [(f32, f32, FingerChannel); 5] = [
    (20.0, 100.0, FingerChannel::Thumb),
    (101.0, 400.0, FingerChannel::Index),
    (401.0, 1500.0, FingerChannel::Middle),
    (1501.0, 4000.0, FingerChannel::Ring),
    (4001.0, 12000.0, FingerChannel::Pinky),
];

/// Events for both hands, sorted by timestamp. Stereo clips drive each hand
/// from its own channel; mono drives both hands from the one channel.
pub fn generate_events(clip: &AudioClip) -> Score {
    let (left, right) = if clip.channels() >= 2 {
        (clip.channel(0), clip.channel(1))
    } else {
        let mono = clip.channel(0);
        (mono.clone(), mono)
    };

    let stft = Stft::new(N_FFT, HOP);
    let mut events = analyze_channel(&stft, &left, clip.sample_rate(), Hand::Left);
    events.extend(analyze_channel(&stft, &right, clip.sample_rate(), Hand::Right));
    Score::from_events(events)
}

pub fn analyze_channel(stft: &Stft, signal: &[f32], sample_rate: u32, hand: Hand) -> Vec<HapticEvent> {
    let onsets = onset_times(stft, signal, sample_rate);
    debug!(hand = hand.label(), onsets = onsets.len(), "detected onsets");
    if onsets.is_empty() {
        return Vec::new();
    }

    let loudness = RmsRange::of(&rms_envelope(signal, N_FFT, HOP));
    let frequencies = stft.frequencies(sample_rate);
    let mut events = Vec::new();

    for onset in onsets {
        let start = seconds_to_sample(onset - SEGMENT_PRE_ONSET, sample_rate).min(signal.len());
        let end = seconds_to_sample(onset + EVENT_DURATION as f64, sample_rate).min(signal.len());
        if start >= end {
            continue;
        }
        let segment = &signal[start..end];

        let nrms = loudness.normalize(rms(segment));
        if nrms < QUIET_SEGMENT {
            continue;
        }

        let energies = band_energies(&stft.magnitudes(segment), &frequencies);
        let max_energy = energies.iter().copied().fold(0.0f32, f32::max);
        if max_energy < SILENT_SEGMENT {
            continue;
        }

        let timestamp = (onset * 1000.0).round() / 1000.0;
        for (&(_, _, finger), &energy) in BANDS.iter().zip(&energies) {
            if energy >= max_energy * BAND_THRESHOLD && energy > BAND_FLOOR {
                events.push(HapticEvent {
                    timestamp,
                    hand,
                    finger,
                    strength: strength(nrms, energy / max_energy),
                    duration: EVENT_DURATION,
                });
            }
        }
    }
    events
}

/// `MIN_STRENGTH` plus the loudness-weighted band share of the remaining range.
pub fn strength(nrms: f32, band_factor: f32) -> u8 {
    let span = (MAX_STRENGTH - MIN_STRENGTH) as f32;
    let value = (MIN_STRENGTH as f32 + nrms * band_factor * span).trunc();
    value.clamp(MIN_STRENGTH as f32, MAX_STRENGTH as f32) as u8
}

/// Mean magnitude per band, over every frame and every bin inside the band.
pub fn band_energies(frames: &[Vec<f32>], frequencies: &[f32]) -> [f32; 5] {
    BANDS.map(|(low, high, _)| {
        let bins: Vec<usize> = frequencies
            .iter()
            .enumerate()
            .filter(|&(_, &f)| f >= low && f <= high)
            .map(|(k, _)| k)
            .collect();
        let count = bins.len() * frames.len();
        if count == 0 {
            return 0.0;
        }
        let total: f32 = frames.iter().map(|frame| bins.iter().map(|&k| frame[k]).sum::<f32>()).sum();
        total / count as f32
    })
}

/// Channel-wide loudness range used to normalise segment RMS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsRange {
    pub min: f32,
    pub range: f32,
}

impl RmsRange {
    pub fn of(envelope: &[f32]) -> Self {
        let min = envelope.iter().copied().fold(f32::INFINITY, f32::min);
        let max = envelope.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if envelope.is_empty() || max - min < RMS_DEGENERATE_RANGE {
            return Self { min: 0.0, range: 0.1 };
        }
        Self { min, range: max - min }
    }

    pub fn normalize(&self, value: f32) -> f32 {
        (value - self.min) / self.range
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Frame RMS with frames centered on multiples of `hop`, zero-padded at the edges.
pub fn rms_envelope(signal: &[f32], frame: usize, hop: usize) -> Vec<f32> {
    let half = frame / 2;
    (0..1 + signal.len() / hop)
        .map(|t| {
            let center = t * hop;
            let lo = center.saturating_sub(half).min(signal.len());
            let hi = (center + half).min(signal.len());
            let sum: f32 = signal[lo..hi].iter().map(|s| s * s).sum();
            (sum / frame as f32).sqrt()
        })
        .collect()
}

/// Onset times in seconds from a spectral-flux envelope.
pub fn onset_times(stft: &Stft, signal: &[f32], sample_rate: u32) -> Vec<f64> {
    let envelope = onset_envelope(&stft.magnitudes(signal));
    let frames_per_second = sample_rate as f64 / stft.hop() as f64;
    pick_peaks(&envelope, frames_per_second)
        .into_iter()
        .map(|frame| frame as f64 / frames_per_second)
        .collect()
}

/// Mean positive change of log magnitude between consecutive frames.
pub fn onset_envelope(frames: &[Vec<f32>]) -> Vec<f32> {
    let to_db = |m: f32| 20.0 * m.max(1e-10).log10();
    let peak_db = frames.iter().flatten().copied().map(to_db).fold(f32::NEG_INFINITY, f32::max);
    let floor = peak_db - TOP_DB;
    let db: Vec<Vec<f32>> = frames
        .iter()
        .map(|frame| frame.iter().map(|&m| to_db(m).max(floor)).collect())
        .collect();

    let mut envelope = vec![0.0; frames.len()];
    for t in 1..db.len() {
        let rise: f32 = db[t].iter().zip(&db[t - 1]).map(|(now, before)| (now - before).max(0.0)).sum();
        envelope[t] = rise / db[t].len().max(1) as f32;
    }
    envelope
}

/// Indices of local maxima that clear the local average by `PEAK_DELTA`
/// after normalising the envelope to 0..1, at least `ONSET_WAIT` apart.
pub fn pick_peaks(envelope: &[f32], frames_per_second: f64) -> Vec<usize> {
    let min = envelope.iter().copied().fold(f32::INFINITY, f32::min);
    let max = envelope.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if envelope.is_empty() || max - min <= 0.0 {
        return Vec::new();
    }
    let normalized: Vec<f32> = envelope.iter().map(|v| (v - min) / (max - min)).collect();

    let frames = |seconds: f64| (seconds * frames_per_second) as usize;
    let pre_max = frames(PEAK_PRE_MAX);
    let pre_avg = frames(PEAK_AVG_WINDOW);
    let post_avg = frames(PEAK_AVG_WINDOW) + 1;
    let wait = frames(ONSET_WAIT);

    let mut peaks: Vec<usize> = Vec::new();
    for (i, &value) in normalized.iter().enumerate() {
        let max_window = &normalized[i.saturating_sub(pre_max)..=i];
        if max_window.iter().any(|&v| v > value) {
            continue;
        }
        let avg_window = &normalized[i.saturating_sub(pre_avg)..(i + post_avg).min(normalized.len())];
        let average = avg_window.iter().sum::<f32>() / avg_window.len() as f32;
        if value < average + PEAK_DELTA {
            continue;
        }
        if peaks.last().is_some_and(|&last| i <= last + wait) {
            continue;
        }
        peaks.push(i);
    }
    peaks
}

fn seconds_to_sample(seconds: f64, sample_rate: u32) -> usize {
    (seconds * sample_rate as f64).max(0.0) as usize
}

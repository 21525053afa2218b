use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::audio::AudioHandle;
use crate::device::DevicePair;
use crate::fingers::FingerTable;
use crate::song::{HapticEvent, Score};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Events written to an open glove.
    pub dispatched: usize,
    /// Events whose glove was not connected.
    pub dropped: usize,
    /// Events whose write returned an error.
    pub failed: usize,
}

impl TickReport {
    pub fn total(&self) -> usize {
        self.dispatched + self.dropped + self.failed
    }
}

/// One running playback of a song: the score cursor, the audio handle and
/// the finger pulses shown while it plays. Dropping it stops the audio.
pub struct PlaybackSession {
    song: PathBuf,
    score: Score,
    start_time: f64,
    cursor: usize,
    audio: Option<Box<dyn AudioHandle>>,
    fingers: FingerTable,
}

impl PlaybackSession {
    pub fn start(song: PathBuf, score: Score, mut audio: Option<Box<dyn AudioHandle>>, now: f64) -> Self {
        if let Some(handle) = audio.as_mut() {
            handle.seek_to_start();
            handle.start();
        }
        info!(
            song = %song.display(),
            events = score.len(),
            audio = audio.is_some(),
            "playback started"
        );
        Self {
            song,
            score,
            start_time: now,
            cursor: 0,
            audio,
            fingers: FingerTable::new(),
        }
    }

    /// Dispatches every event whose timestamp has been reached, in order.
    ///
    /// A long frame does not lose events: everything that became due since the
    /// previous tick is drained here. An event is consumed whether or not its
    /// write succeeded; a pulse sent late would be wrong, so nothing is retried.
    pub fn advance(&mut self, now: f64, devices: &mut DevicePair) -> TickReport {
        let elapsed = self.elapsed(now);
        let mut report = TickReport::default();
        while let Some(event) = self.score.get(self.cursor).copied() {
            if event.timestamp > elapsed {
                break;
            }
            self.dispatch(&event, now, devices, &mut report);
            self.cursor += 1;
        }
        report
    }

    fn dispatch(&mut self, event: &HapticEvent, now: f64, devices: &mut DevicePair, report: &mut TickReport) {
        let command = event.command();
        self.fingers.record_pulse(event.hand, &command, now);

        if !devices.is_open(event.hand) {
            debug!(hand = event.hand.label(), timestamp = event.timestamp, "glove not connected, dropping event");
            report.dropped += 1;
            return;
        }
        match devices.send(event.hand, &command) {
            Ok(()) => report.dispatched += 1,
            Err(e) => {
                warn!(
                    hand = event.hand.label(),
                    finger = event.finger.label(),
                    timestamp = event.timestamp,
                    error = %e,
                    "haptic write failed"
                );
                report.failed += 1;
            }
        }
    }

    pub fn haptics_done(&self) -> bool {
        self.cursor >= self.score.len()
    }

    pub fn audio_done(&self) -> bool {
        self.audio.as_ref().map_or(true, |audio| !audio.is_playing())
    }

    /// Playback lasts as long as the longer of the haptic and audio tracks.
    pub fn is_finished(&self) -> bool {
        self.haptics_done() && self.audio_done()
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        (now - self.start_time).max(0.0)
    }

    pub fn total_seconds(&self) -> f64 {
        let audio = self.audio.as_ref().map_or(0.0, |audio| audio.length_seconds());
        self.score.end_time().max(audio)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn song(&self) -> &Path {
        &self.song
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn fingers(&self) -> &FingerTable {
        &self.fingers
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        info!(
            song = %self.song.display(),
            dispatched = self.cursor,
            of = self.score.len(),
            "playback ended"
        );
    }
}

use std::path::{Path, PathBuf};

use glove_protocol::{FingerChannel, FingerStatus, Hand, HandStatus, PanelStatus};
use tracing::{info, warn};

use crate::audio::{self, AudioBackend, AudioHandle};
use crate::device::DevicePair;
use crate::error::StartError;
use crate::fingers::{finger_tint, FingerTable};
use crate::manual::{ManualDispatcher, ManualReport};
use crate::scheduler::{PlaybackSession, TickReport};
use crate::song;

/// Which dispatcher owns the gloves this tick.
pub enum Mode {
    Idle,
    Playing(PlaybackSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Manual(ManualReport),
    Playback(TickReport),
    /// The session ended this tick and the panel is back in manual mode.
    Finished,
}

/// Everything the frame loop drives: both gloves, the manual finger table
/// and the active playback, if any.
pub struct ControlSession {
    mode: Mode,
    manual: FingerTable,
    dispatcher: ManualDispatcher,
    devices: DevicePair,
    audio: Box<dyn AudioBackend>,
    audio_dir: PathBuf,
    selected: Option<PathBuf>,
    last_error: Option<String>,
}

impl ControlSession {
    pub fn new(devices: DevicePair, audio: Box<dyn AudioBackend>, audio_dir: PathBuf, dispatcher: ManualDispatcher) -> Self {
        Self {
            mode: Mode::Idle,
            manual: FingerTable::new(),
            dispatcher,
            devices,
            audio,
            audio_dir,
            selected: None,
            last_error: None,
        }
    }

    pub fn select_song(&mut self, song: PathBuf) {
        info!(song = %song.display(), "song selected");
        self.selected = Some(song);
    }

    pub fn selected(&self) -> Option<&Path> {
        self.selected.as_deref()
    }

    pub fn set_manual_strength(&mut self, hand: Hand, finger: FingerChannel, strength: u8) -> bool {
        self.manual.set_strength(hand, finger, strength)
    }

    pub fn set_manual_duration(&mut self, hand: Hand, finger: FingerChannel, duration: f32) -> bool {
        self.manual.set_duration(hand, finger, duration)
    }

    pub fn clear_manual(&mut self) {
        self.manual.clear();
    }

    /// Starts the selected song, replacing any running playback.
    ///
    /// The previous playback keeps running when the new song cannot be
    /// loaded. Missing or undecodable audio only degrades to haptics-only;
    /// the start fails when there is neither a haptic event nor audio.
    pub fn start_playback(&mut self, now: f64) -> Result<(), StartError> {
        let result = self.try_start(now);
        if let Err(err) = &result {
            warn!(%err, "cannot start playback");
            self.last_error = Some(err.to_string());
        }
        result
    }

    fn try_start(&mut self, now: f64) -> Result<(), StartError> {
        let song = self.selected.clone().ok_or(StartError::NoSongSelected)?;
        let loaded = song::load_score(&song)?;

        let clip = match audio::load_companion(&song, &self.audio_dir) {
            Ok(clip) => Some(clip),
            Err(err) => {
                warn!(%err, "playing without audio");
                None
            }
        };
        let nothing_to_play = || StartError::NothingToPlay {
            song: audio::companion_base_name(&song),
        };
        if loaded.score.is_empty() && clip.is_none() {
            return Err(nothing_to_play());
        }

        // At most one audio handle is ever live.
        self.stop_playback();

        let handle: Option<Box<dyn AudioHandle>> = clip.and_then(|clip| match self.audio.open(clip) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(%err, "playing without audio");
                None
            }
        });
        if loaded.score.is_empty() && handle.is_none() {
            return Err(nothing_to_play());
        }

        self.last_error = None;
        self.mode = Mode::Playing(PlaybackSession::start(song, loaded.score, handle, now));
        Ok(())
    }

    /// Tears down the running playback, if any. Returns whether one was running.
    pub fn stop_playback(&mut self) -> bool {
        match std::mem::replace(&mut self.mode, Mode::Idle) {
            Mode::Idle => false,
            Mode::Playing(_) => true,
        }
    }

    /// One frame of work: either the manual dispatcher or the scheduler runs, never both.
    pub fn tick(&mut self, now: f64) -> TickOutcome {
        for message in self.audio.drain_errors() {
            warn!(error = %message, "audio output error");
            self.last_error = Some(message);
        }

        let outcome = match &mut self.mode {
            Mode::Idle => TickOutcome::Manual(self.dispatcher.dispatch(&mut self.manual, &mut self.devices, now)),
            Mode::Playing(playback) if playback.is_finished() => TickOutcome::Finished,
            Mode::Playing(playback) => TickOutcome::Playback(playback.advance(now, &mut self.devices)),
        };
        if outcome == TickOutcome::Finished {
            self.mode = Mode::Idle;
        }
        outcome
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.mode, Mode::Playing(_))
    }

    pub fn manual(&self) -> &FingerTable {
        &self.manual
    }

    pub fn devices(&self) -> &DevicePair {
        &self.devices
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn status(&self, now: f64) -> PanelStatus {
        let hands = Hand::ALL.map(|hand| HandStatus {
            connected: self.devices.is_open(hand),
            port: self.devices.name(hand).to_string(),
            fingers: FingerChannel::FINGERS.map(|finger| self.finger_status(hand, finger, now)),
        });

        let (song, elapsed, total) = match &self.mode {
            Mode::Idle => (None, 0.0, 0.0),
            Mode::Playing(playback) => (
                Some(audio::companion_base_name(playback.song())),
                playback.elapsed(now),
                playback.total_seconds(),
            ),
        };

        PanelStatus {
            playing: self.is_playing(),
            song,
            selected: self.selected.as_deref().map(audio::companion_base_name),
            elapsed,
            total,
            hands,
            last_error: self.last_error.clone(),
        }
    }

    fn finger_status(&self, hand: Hand, finger: FingerChannel, now: f64) -> FingerStatus {
        let (strength, duration) = match &self.mode {
            Mode::Idle => self
                .manual
                .get(hand, finger)
                .map_or((0, 0.0), |slot| (slot.strength, slot.duration)),
            Mode::Playing(playback) => playback
                .fingers()
                .get(hand, finger)
                .map_or((0, 0.0), |slot| (slot.pulse_strength(now), slot.duration)),
        };
        FingerStatus {
            finger,
            strength,
            duration,
            tint: finger_tint(strength),
        }
    }
}

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use glove_protocol::{FingerChannel, FingerCommand, Hand};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::LoadError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HapticEvent {
    pub timestamp: f64,
    pub hand: Hand,
    pub finger: FingerChannel,
    pub strength: u8,
    pub duration: f32,
}

impl HapticEvent {
    pub fn command(&self) -> FingerCommand {
        FingerCommand::new(self.finger, self.strength, self.duration)
    }
}

/// On-disk shape of one event, as written by the song generator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SongRecord {
    pub timestamp: f64,
    pub hand_id: u8,
    pub finger_id: u8,
    pub strength: u8,
    pub duration: f32,
}

impl From<&HapticEvent> for SongRecord {
    fn from(event: &HapticEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            hand_id: event.hand as u8,
            finger_id: event.finger.id(),
            strength: event.strength,
            duration: event.duration,
        }
    }
}

/// Events of one song in ascending timestamp order. Equal timestamps keep document order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Score {
    events: Vec<HapticEvent>,
}

impl Score {
    pub fn from_events(mut events: Vec<HapticEvent>) -> Self {
        // sort_by is stable
        events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self { events }
    }

    pub fn events(&self) -> &[HapticEvent] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&HapticEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time at which the last pulse has finished.
    pub fn end_time(&self) -> f64 {
        self.events
            .iter()
            .map(|e| e.timestamp + e.duration as f64)
            .fold(0.0, f64::max)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    NotAnObject,
    Missing(&'static str),
    WrongType(&'static str),
    OutOfRange(&'static str),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotAnObject => write!(f, "record is not an object"),
            SkipReason::Missing(field) => write!(f, "missing field '{field}'"),
            SkipReason::WrongType(field) => write!(f, "field '{field}' has the wrong type"),
            SkipReason::OutOfRange(field) => write!(f, "field '{field}' is out of range"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub struct LoadedSong {
    pub path: PathBuf,
    pub score: Score,
    pub skipped: Vec<SkippedRecord>,
}

pub fn load_score(path: &Path) -> Result<LoadedSong, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    parse_score(path, &text)
}

pub fn parse_score(path: &Path, text: &str) -> Result<LoadedSong, LoadError> {
    let document: Value = serde_json::from_str(text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Array(records) = document else {
        return Err(LoadError::NotAnArray {
            path: path.to_path_buf(),
        });
    };

    let mut events = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match parse_record(record) {
            Ok(event) => events.push(event),
            Err(reason) => {
                warn!(song = %path.display(), record = index, %reason, "skipping haptic record");
                skipped.push(SkippedRecord { index, reason });
            }
        }
    }

    let score = Score::from_events(events);
    if score.is_empty() {
        warn!(song = %path.display(), "song contains no usable haptic events");
    } else {
        info!(
            song = %path.display(),
            events = score.len(),
            skipped = skipped.len(),
            "loaded haptic song"
        );
    }

    Ok(LoadedSong {
        path: path.to_path_buf(),
        score,
        skipped,
    })
}

fn parse_record(record: &Value) -> Result<HapticEvent, SkipReason> {
    let fields = record.as_object().ok_or(SkipReason::NotAnObject)?;

    let timestamp = seconds_field(fields, "timestamp")?;
    let hand_id = integer_field(fields, "hand_id")?;
    let finger_id = integer_field(fields, "finger_id")?;
    let strength = integer_field(fields, "strength")?;
    let duration = seconds_field(fields, "duration")? as f32;
    // The wire field is an f32; a finite f64 can still overflow it.
    if !duration.is_finite() {
        return Err(SkipReason::OutOfRange("duration"));
    }

    let hand = Hand::from_id(hand_id).ok_or(SkipReason::OutOfRange("hand_id"))?;
    let finger = FingerChannel::from_id(finger_id).ok_or(SkipReason::OutOfRange("finger_id"))?;
    let strength = u8::try_from(strength).map_err(|_| SkipReason::OutOfRange("strength"))?;

    Ok(HapticEvent {
        timestamp,
        hand,
        finger,
        strength,
        duration,
    })
}

fn field<'a>(fields: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, SkipReason> {
    fields.get(name).ok_or(SkipReason::Missing(name))
}

fn seconds_field(fields: &Map<String, Value>, name: &'static str) -> Result<f64, SkipReason> {
    let seconds = field(fields, name)?
        .as_f64()
        .ok_or(SkipReason::WrongType(name))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(SkipReason::OutOfRange(name));
    }
    Ok(seconds)
}

fn integer_field(fields: &Map<String, Value>, name: &'static str) -> Result<u64, SkipReason> {
    let value = field(fields, name)?;
    if !(value.is_u64() || value.is_i64()) {
        return Err(SkipReason::WrongType(name));
    }
    // Negative integers are well-typed but never valid ids or strengths.
    value.as_u64().ok_or(SkipReason::OutOfRange(name))
}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

pub const SOCKET_PATH: &str = "/tmp/glove-panel.sock";

pub const HAND_COUNT: usize = 2;
pub const FINGER_COUNT: usize = 5;

/// Size of one device command on the serial link.
pub const COMMAND_LEN: usize = 8;

// Control frames are tiny; anything bigger is a corrupt length prefix.
const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Hand {
    Left = 0,
    Right = 1,
}

impl Hand {
    pub const ALL: [Hand; HAND_COUNT] = [Hand::Left, Hand::Right];

    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            0 => Some(Hand::Left),
            1 => Some(Hand::Right),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Hand::Left => "Left Hand",
            Hand::Right => "Right Hand",
        }
    }
}

/// Finger addressed by a device command. `None` marks a slot that was never assigned.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FingerChannel {
    Thumb = 0,
    Index = 1,
    Middle = 2,
    Ring = 3,
    Pinky = 4,
    #[default]
    None = 5,
}

impl FingerChannel {
    pub const FINGERS: [FingerChannel; FINGER_COUNT] = [
        FingerChannel::Thumb,
        FingerChannel::Index,
        FingerChannel::Middle,
        FingerChannel::Ring,
        FingerChannel::Pinky,
    ];

    /// Maps a song/wire finger id onto a real finger. The sentinel is never a valid id.
    pub fn from_id(id: u64) -> Option<Self> {
        Self::FINGERS.get(usize::try_from(id).ok()?).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn index(self) -> Option<usize> {
        match self {
            FingerChannel::None => None,
            finger => Some(finger as usize),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FingerChannel::Thumb => "Thumb",
            FingerChannel::Index => "Index",
            FingerChannel::Middle => "Middle",
            FingerChannel::Ring => "Ring",
            FingerChannel::Pinky => "Pinky",
            FingerChannel::None => "None",
        }
    }
}

/// One vibration command for one finger. The hand is chosen by which port it is written to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FingerCommand {
    pub finger: FingerChannel,
    pub strength: u8,
    pub duration: f32,
}

impl FingerCommand {
    pub fn new(finger: FingerChannel, strength: u8, duration: f32) -> Self {
        Self {
            finger,
            strength,
            duration,
        }
    }

    /// Layout: finger id, strength, duration as native-endian f32, two zero pad bytes.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut bytes = [0u8; COMMAND_LEN];
        bytes[0] = self.finger.id();
        bytes[1] = self.strength;
        bytes[2..6].copy_from_slice(&self.duration.to_ne_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; COMMAND_LEN]) -> Option<Self> {
        let finger = FingerChannel::from_id(bytes[0] as u64)?;
        let duration = f32::from_ne_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        Some(Self::new(finger, bytes[1], duration))
    }
}

// Control socket messages (UI/client -> panel server)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum PanelCommand {
    SetStrength {
        hand: Hand,
        finger: FingerChannel,
        strength: u8,
    },
    SetDuration {
        hand: Hand,
        finger: FingerChannel,
        duration: f32,
    },
    ClearAll,
    SelectSong(String),
    Play,
    Stop,
    QueryStatus,
    ListSongs,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum PanelReply {
    Ack,
    Status(PanelStatus),
    Songs(Vec<SongEntry>),
    Error(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SongEntry {
    pub name: String,
    pub path: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct FingerStatus {
    pub finger: FingerChannel,
    pub strength: u8,
    pub duration: f32,
    pub tint: [f32; 4],
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HandStatus {
    pub connected: bool,
    pub port: String,
    pub fingers: [FingerStatus; FINGER_COUNT],
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PanelStatus {
    pub playing: bool,
    /// Song currently playing, if any.
    pub song: Option<String>,
    /// Song that `Play` would start.
    pub selected: Option<String>,
    pub elapsed: f64,
    pub total: f64,
    pub hands: [HandStatus; HAND_COUNT],
    pub last_error: Option<String>,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame payload: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the control frame limit")]
    TooLarge(usize),
}

/// Writes one length-prefixed (u32 LE) bincode frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), FrameError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Blocking read of exactly one frame.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, FrameError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

/// Reassembles frames from a non-blocking stream that may deliver partial reads.
#[derive(Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, or `Ok(None)` while more bytes are needed.
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        if self.pending.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes([
            self.pending[0],
            self.pending[1],
            self.pending[2],
            self.pending[3],
        ]) as usize;
        if len > MAX_FRAME_LEN {
            self.pending.clear();
            return Err(FrameError::TooLarge(len));
        }
        if self.pending.len() < 4 + len {
            return Ok(None);
        }
        let frame: Vec<u8> = self.pending.drain(..4 + len).skip(4).collect();
        Ok(Some(bincode::deserialize(&frame)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_layout_matches_device_firmware() {
        let bytes = FingerCommand::new(FingerChannel::Ring, 200, 0.3).encode();
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[1], 200);
        assert_eq!(&bytes[2..6], &0.3f32.to_ne_bytes());
        assert_eq!(&bytes[6..], &[0, 0]);
    }

    #[test]
    fn decode_rejects_sentinel_finger() {
        let mut bytes = FingerCommand::new(FingerChannel::Thumb, 10, 0.2).encode();
        bytes[0] = FingerChannel::None.id();
        assert!(FingerCommand::decode(&bytes).is_none());
    }

    #[test]
    fn finger_ids_stop_at_pinky() {
        assert_eq!(FingerChannel::from_id(4), Some(FingerChannel::Pinky));
        assert_eq!(FingerChannel::from_id(5), None);
        assert_eq!(Hand::from_id(1), Some(Hand::Right));
        assert_eq!(Hand::from_id(2), None);
    }

    #[test]
    fn frame_buffer_waits_for_split_frames() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &PanelCommand::Play).unwrap();
        write_frame(&mut wire, &PanelCommand::SelectSong("intro".into())).unwrap();

        let mut buffer = FrameBuffer::new();
        buffer.extend(&wire[..3]);
        assert!(buffer.next_frame::<PanelCommand>().unwrap().is_none());

        buffer.extend(&wire[3..]);
        assert_eq!(buffer.next_frame::<PanelCommand>().unwrap(), Some(PanelCommand::Play));
        assert_eq!(
            buffer.next_frame::<PanelCommand>().unwrap(),
            Some(PanelCommand::SelectSong("intro".into()))
        );
        assert!(buffer.next_frame::<PanelCommand>().unwrap().is_none());
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&u32::MAX.to_le_bytes());
        assert!(matches!(
            buffer.next_frame::<PanelCommand>(),
            Err(FrameError::TooLarge(_))
        ));
    }
}

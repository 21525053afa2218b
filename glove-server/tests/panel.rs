use std::cell::RefCell;
use std::fs;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use glove_protocol::{read_frame, write_frame, FingerChannel, FingerCommand, Hand, PanelCommand, PanelReply, COMMAND_LEN};
use glove_server::audio::{AudioBackend, AudioClip, AudioHandle};
use glove_server::device::{DeviceChannel, DevicePair};
use glove_server::error::{AudioError, DeviceError};
use glove_server::ipc::{apply_command, ControlServer};
use glove_server::manual::ManualDispatcher;
use glove_server::session::{ControlSession, TickOutcome};

type Wire = Rc<RefCell<Vec<[u8; COMMAND_LEN]>>>;

struct Glove {
    name: &'static str,
    wire: Wire,
}

impl DeviceChannel for Glove {
    fn is_open(&self) -> bool {
        true
    }

    fn write(&mut self, bytes: &[u8; COMMAND_LEN]) -> Result<(), DeviceError> {
        self.wire.borrow_mut().push(*bytes);
        Ok(())
    }

    fn name(&self) -> &str {
        self.name
    }
}

struct Track {
    playing: Rc<RefCell<bool>>,
    length: f64,
}

impl AudioHandle for Track {
    fn start(&mut self) {
        *self.playing.borrow_mut() = true;
    }

    fn stop(&mut self) {
        *self.playing.borrow_mut() = false;
    }

    fn seek_to_start(&mut self) {}

    fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    fn length_seconds(&self) -> f64 {
        self.length
    }
}

#[derive(Default)]
struct Speakers {
    playing: Rc<RefCell<bool>>,
}

impl AudioBackend for Speakers {
    fn open(&mut self, clip: AudioClip) -> Result<Box<dyn AudioHandle>, AudioError> {
        Ok(Box::new(Track {
            playing: self.playing.clone(),
            length: clip.length_seconds(),
        }))
    }

    fn drain_errors(&mut self) -> Vec<String> {
        Vec::new()
    }
}

struct Panel {
    session: ControlSession,
    left: Wire,
    right: Wire,
    playing: Rc<RefCell<bool>>,
}

fn panel(audio_dir: &Path) -> Panel {
    let left = Wire::default();
    let right = Wire::default();
    let devices = DevicePair::new(
        Box::new(Glove { name: "left", wire: left.clone() }),
        Box::new(Glove { name: "right", wire: right.clone() }),
    );
    let speakers = Speakers::default();
    let playing = speakers.playing.clone();
    let session = ControlSession::new(devices, Box::new(speakers), audio_dir.to_path_buf(), ManualDispatcher::new(0.2));
    Panel {
        session,
        left,
        right,
        playing,
    }
}

fn write_silence(path: &Path, seconds: f64) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 4_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(seconds * 4_000.0) as usize * 2 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

const SONG: &str = r#"[
    {"timestamp": 0.30, "hand_id": 1, "finger_id": 2, "strength": 90,  "duration": 0.15},
    {"timestamp": 0.00, "hand_id": 0, "finger_id": 0, "strength": 255, "duration": 0.15},
    {"timestamp": 0.30, "hand_id": 0, "finger_id": 4, "strength": 60,  "duration": 0.15},
    {"timestamp": 0.10, "hand_id": 1, "finger_id": 1, "strength": 120, "duration": 0.15, "note": "ignored"},
    {"timestamp": 0.20, "hand_id": 2, "finger_id": 1, "strength": 120, "duration": 0.15},
    {"timestamp": 0.25, "hand_id": 0, "finger_id": 3, "duration": 0.15}
]"#;

#[test]
fn song_plays_through_at_frame_rate_and_waits_for_audio() {
    let songs = tempfile::tempdir().unwrap();
    let music = tempfile::tempdir().unwrap();
    let song = songs.path().join("groove_haptics.json");
    fs::write(&song, SONG).unwrap();
    write_silence(&music.path().join("groove.wav"), 1.0);

    let mut panel = panel(music.path());
    panel.session.select_song(song);
    panel.session.start_playback(0.0).unwrap();
    assert!(*panel.playing.borrow());

    let mut now = 0.0;
    while now < 0.5 {
        assert!(matches!(panel.session.tick(now), TickOutcome::Playback(_)));
        now += 1.0 / 60.0;
    }

    let left: Vec<FingerCommand> = panel.left.borrow().iter().filter_map(FingerCommand::decode).collect();
    let right: Vec<FingerCommand> = panel.right.borrow().iter().filter_map(FingerCommand::decode).collect();
    assert_eq!(
        left,
        vec![
            FingerCommand::new(FingerChannel::Thumb, 255, 0.15),
            FingerCommand::new(FingerChannel::Pinky, 60, 0.15),
        ]
    );
    assert_eq!(
        right,
        vec![
            FingerCommand::new(FingerChannel::Index, 120, 0.15),
            FingerCommand::new(FingerChannel::Middle, 90, 0.15),
        ]
    );

    // haptics are exhausted but the audio track is still going
    assert!(matches!(panel.session.tick(0.9), TickOutcome::Playback(_)));
    *panel.playing.borrow_mut() = false;
    assert_eq!(panel.session.tick(1.0), TickOutcome::Finished);
    assert!(matches!(panel.session.tick(1.1), TickOutcome::Manual(_)));
}

#[test]
fn control_socket_drives_manual_mode_and_playback() {
    let songs = tempfile::tempdir().unwrap();
    let music = tempfile::tempdir().unwrap();
    fs::write(songs.path().join("groove_haptics.json"), SONG).unwrap();
    let socket = songs.path().join("panel.sock");

    let mut panel = panel(music.path());
    let mut server = ControlServer::bind(&socket).unwrap();
    let mut client = UnixStream::connect(&socket).unwrap();

    let mut send = |server: &mut ControlServer, session: &mut ControlSession, command: PanelCommand, now: f64| {
        write_frame(&mut client, &command).unwrap();
        let mut handled = 0;
        for _ in 0..500 {
            handled += server.poll(|command| apply_command(session, songs.path(), command, now));
            if handled > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        read_frame::<_, PanelReply>(&mut client).unwrap()
    };

    let reply = send(
        &mut server,
        &mut panel.session,
        PanelCommand::SetStrength {
            hand: Hand::Right,
            finger: FingerChannel::Ring,
            strength: 180,
        },
        0.0,
    );
    assert_eq!(reply, PanelReply::Ack);

    for tick in 0..30 {
        panel.session.tick(tick as f64 * 0.01);
    }
    let manual: Vec<FingerCommand> = panel.right.borrow().iter().filter_map(FingerCommand::decode).collect();
    assert_eq!(
        manual,
        vec![
            FingerCommand::new(FingerChannel::Ring, 180, 0.2),
            FingerCommand::new(FingerChannel::Ring, 180, 0.2),
        ]
    );

    assert_eq!(send(&mut server, &mut panel.session, PanelCommand::SelectSong("groove".into()), 1.0), PanelReply::Ack);
    assert_eq!(send(&mut server, &mut panel.session, PanelCommand::Play, 1.0), PanelReply::Ack);
    panel.right.borrow_mut().clear();
    for tick in 0..30 {
        panel.session.tick(1.0 + tick as f64 * 0.01);
    }
    // the held ring finger is not re-sent while the song plays
    let during: Vec<FingerCommand> = panel.right.borrow().iter().filter_map(FingerCommand::decode).collect();
    assert_eq!(during, vec![FingerCommand::new(FingerChannel::Index, 120, 0.15)]);

    match send(&mut server, &mut panel.session, PanelCommand::QueryStatus, 1.3) {
        PanelReply::Status(status) => {
            assert!(status.playing);
            assert_eq!(status.song.as_deref(), Some("groove"));
            assert_eq!(status.hands[1].port, "right");
        }
        other => panic!("unexpected reply {other:?}"),
    }

    assert_eq!(send(&mut server, &mut panel.session, PanelCommand::Stop, 1.4), PanelReply::Ack);
    assert!(!panel.session.is_playing());
}

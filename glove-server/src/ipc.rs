use std::io::{self, Read};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use glove_protocol::{write_frame, FrameBuffer, FrameError, PanelCommand, PanelReply};
use tracing::{debug, info, warn};

use crate::library::SongLibrary;
use crate::session::ControlSession;

struct Client {
    id: usize,
    stream: UnixStream,
    frames: FrameBuffer,
}

/// Non-blocking control socket, polled from the frame loop.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    clients: Vec<Client>,
    next_id: usize,
}

impl ControlServer {
    pub fn bind(path: &Path) -> io::Result<Self> {
        // A previous run may have left its socket file behind.
        let _ = std::fs::remove_file(path);

        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        info!(socket = %path.display(), "control socket listening");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            clients: Vec::new(),
            next_id: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Accepts pending connections, then answers every complete command
    /// waiting on any client. Never blocks. Returns how many commands ran.
    pub fn poll<F>(&mut self, mut handler: F) -> usize
    where
        F: FnMut(PanelCommand) -> PanelReply,
    {
        self.accept_pending();

        let mut handled = 0;
        self.clients.retain_mut(|client| match service_client(client, &mut handler) {
            Ok((count, open)) => {
                handled += count;
                if !open {
                    debug!(client = client.id, "control client disconnected");
                }
                open
            }
            Err(e) => {
                warn!(client = client.id, error = %e, "dropping control client");
                false
            }
        });
        handled
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(error = %e, "failed to set control client non-blocking");
                        continue;
                    }
                    let id = self.next_id;
                    self.next_id += 1;
                    debug!(client = id, "control client connected");
                    self.clients.push(Client {
                        id,
                        stream,
                        frames: FrameBuffer::new(),
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "error accepting control connection");
                    break;
                }
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        info!(socket = %self.path.display(), "control socket closed");
    }
}

/// Reads whatever the client has sent and answers each complete frame.
/// Returns the number of commands handled and whether the client is still connected.
fn service_client<F>(client: &mut Client, handler: &mut F) -> Result<(usize, bool), FrameError>
where
    F: FnMut(PanelCommand) -> PanelReply,
{
    let mut open = true;
    let mut buffer = [0u8; 1024];
    loop {
        match client.stream.read(&mut buffer) {
            Ok(0) => {
                open = false;
                break;
            }
            Ok(n) => client.frames.extend(&buffer[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let mut handled = 0;
    loop {
        let reply = match client.frames.next_frame::<PanelCommand>() {
            Ok(Some(command)) => {
                debug!(client = client.id, ?command, "control command");
                handled += 1;
                handler(command)
            }
            Ok(None) => break,
            Err(FrameError::Codec(e)) => PanelReply::Error(format!("malformed command: {e}")),
            Err(e) => return Err(e),
        };
        if open {
            write_frame(&mut client.stream, &reply)?;
        }
    }
    Ok((handled, open))
}

/// Applies one client command to the session.
pub fn apply_command(session: &mut ControlSession, song_dir: &Path, command: PanelCommand, now: f64) -> PanelReply {
    match command {
        PanelCommand::SetStrength { hand, finger, strength } => {
            if session.set_manual_strength(hand, finger, strength) {
                PanelReply::Ack
            } else {
                PanelReply::Error(format!("{} is not a finger", finger.label()))
            }
        }
        PanelCommand::SetDuration { hand, finger, duration } => {
            if session.set_manual_duration(hand, finger, duration) {
                PanelReply::Ack
            } else {
                PanelReply::Error(format!("{} is not a finger", finger.label()))
            }
        }
        PanelCommand::ClearAll => {
            session.clear_manual();
            PanelReply::Ack
        }
        PanelCommand::SelectSong(query) => match SongLibrary::scan(song_dir).resolve(&query) {
            Some(path) => {
                session.select_song(path);
                PanelReply::Ack
            }
            None => PanelReply::Error(format!("unknown song '{query}'")),
        },
        PanelCommand::Play => match session.start_playback(now) {
            Ok(()) => PanelReply::Ack,
            Err(e) => PanelReply::Error(e.to_string()),
        },
        PanelCommand::Stop => {
            session.stop_playback();
            PanelReply::Ack
        }
        PanelCommand::QueryStatus => PanelReply::Status(session.status(now)),
        PanelCommand::ListSongs => PanelReply::Songs(SongLibrary::scan(song_dir).songs().to_vec()),
    }
}

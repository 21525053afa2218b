use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use glove_protocol::{read_frame, write_frame, FrameError, PanelCommand, PanelReply};
use tracing::debug;

/// Blocking request/reply connection to a running glove server.
pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    pub fn connect(path: &Path) -> std::io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(Duration::from_secs(2)))?;
        Ok(Self { stream })
    }

    pub fn request(&mut self, command: &PanelCommand) -> Result<PanelReply, FrameError> {
        debug!(?command, "sending");
        write_frame(&mut self.stream, command)?;
        let reply = read_frame(&mut self.stream)?;
        debug!(?reply, "received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    #[test]
    fn request_waits_for_the_matching_reply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let command: PanelCommand = read_frame(&mut stream).unwrap();
            let reply = match command {
                PanelCommand::ListSongs => PanelReply::Songs(Vec::new()),
                _ => PanelReply::Error("unexpected".to_string()),
            };
            write_frame(&mut stream, &reply).unwrap();
        });

        let mut client = ControlClient::connect(&path).unwrap();
        assert_eq!(client.request(&PanelCommand::ListSongs).unwrap(), PanelReply::Songs(Vec::new()));
        server.join().unwrap();
    }

    #[test]
    fn connect_fails_without_a_server() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ControlClient::connect(&dir.path().join("absent.sock")).is_err());
    }
}

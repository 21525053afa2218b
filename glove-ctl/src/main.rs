use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use glove_protocol::{FingerChannel, Hand, PanelCommand, PanelReply, PanelStatus, SOCKET_PATH};
use tracing_subscriber::EnvFilter;

mod client;

use client::ControlClient;

/// Command-line remote for a running glove-server
#[derive(Parser, Debug)]
#[command(name = "glove-ctl", version)]
struct Cli {
    /// Control socket of the server
    #[arg(long, global = true, default_value = SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum HandArg {
    Left,
    Right,
}

impl From<HandArg> for Hand {
    fn from(hand: HandArg) -> Self {
        match hand {
            HandArg::Left => Hand::Left,
            HandArg::Right => Hand::Right,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FingerArg {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl From<FingerArg> for FingerChannel {
    fn from(finger: FingerArg) -> Self {
        match finger {
            FingerArg::Thumb => FingerChannel::Thumb,
            FingerArg::Index => FingerChannel::Index,
            FingerArg::Middle => FingerChannel::Middle,
            FingerArg::Ring => FingerChannel::Ring,
            FingerArg::Pinky => FingerChannel::Pinky,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hold a finger at a strength in manual mode (0 releases it)
    Set {
        hand: HandArg,
        finger: FingerArg,
        strength: u8,
        /// Also set the finger's duration in seconds (0-10)
        #[arg(long)]
        duration: Option<f32>,
    },
    /// Release every manual finger
    Clear,
    /// Choose the song that `play` starts (name or path)
    Select { song: String },
    /// Start the selected song, or the given one
    Play { song: Option<String> },
    /// Stop playback
    Stop,
    /// Show playback, connection and finger state
    Status,
    /// List songs in the server's library
    List,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut client = ControlClient::connect(&cli.socket)
        .with_context(|| format!("is glove-server running? cannot connect to {}", cli.socket.display()))?;

    let commands = match cli.command {
        Commands::Set {
            hand,
            finger,
            strength,
            duration,
        } => {
            let (hand, finger) = (Hand::from(hand), FingerChannel::from(finger));
            let mut commands = vec![PanelCommand::SetStrength { hand, finger, strength }];
            if let Some(duration) = duration {
                commands.push(PanelCommand::SetDuration { hand, finger, duration });
            }
            commands
        }
        Commands::Clear => vec![PanelCommand::ClearAll],
        Commands::Select { song } => vec![PanelCommand::SelectSong(song)],
        Commands::Play { song } => {
            let mut commands: Vec<PanelCommand> = song.into_iter().map(PanelCommand::SelectSong).collect();
            commands.push(PanelCommand::Play);
            commands
        }
        Commands::Stop => vec![PanelCommand::Stop],
        Commands::Status => vec![PanelCommand::QueryStatus],
        Commands::List => vec![PanelCommand::ListSongs],
    };

    for command in &commands {
        match client.request(command)? {
            PanelReply::Ack => {}
            PanelReply::Error(message) => bail!("{message}"),
            PanelReply::Status(status) => print_status(&status),
            PanelReply::Songs(songs) => {
                if songs.is_empty() {
                    println!("no songs");
                }
                for song in songs {
                    println!("{:<24} {}", song.name, song.path);
                }
            }
        }
    }
    Ok(())
}

fn print_status(status: &PanelStatus) {
    match &status.song {
        Some(song) if status.playing => {
            println!("playing {song}  {:.1}s / {:.1}s", status.elapsed, status.total)
        }
        _ => println!("manual mode"),
    }
    if let Some(selected) = &status.selected {
        println!("selected {selected}");
    }
    for (hand, state) in Hand::ALL.iter().zip(&status.hands) {
        if state.connected {
            println!("{} ({})", hand.label(), state.port);
        } else {
            println!("{}: could not open {}", hand.label(), state.port);
        }
        for finger in &state.fingers {
            println!("  {:<7} {:>3}  {:.2}s", finger.finger.label(), finger.strength, finger.duration);
        }
    }
    if let Some(error) = &status.last_error {
        println!("error: {error}");
    }
}

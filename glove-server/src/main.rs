use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use glove_server::audio::CpalBackend;
use glove_server::clock::FrameClock;
use glove_server::config::PanelConfig;
use glove_server::device::DevicePair;
use glove_server::ipc::{apply_command, ControlServer};
use glove_server::library::SongLibrary;
use glove_server::manual::ManualDispatcher;
use glove_server::session::{ControlSession, TickOutcome};

#[derive(Parser, Debug)]
#[command(name = "glove-server", version, about = "Drives a pair of haptic gloves from songs or manual control")]
struct Args {
    /// Path to config TOML (written with defaults if missing)
    #[arg(long, default_value = "glove-panel.toml")]
    config: PathBuf,

    /// Song to select and start playing immediately (name or path)
    #[arg(long)]
    song: Option<String>,

    /// Log filter, e.g. `info` or `glove_server=debug`; RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serial port of the left glove (overrides config)
    #[arg(long)]
    left_port: Option<String>,

    /// Serial port of the right glove (overrides config)
    #[arg(long)]
    right_port: Option<String>,

    /// Control socket path (overrides config)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Exit once the song given by --song finishes
    #[arg(long, default_value_t = false)]
    once: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = PanelConfig::load_or_default(&args.config);
    if let Some(port) = args.left_port {
        config.devices.left_port = port;
    }
    if let Some(port) = args.right_port {
        config.devices.right_port = port;
    }
    if let Some(socket) = args.socket {
        config.control.socket_path = socket;
    }
    info!(?config, "starting glove panel");

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = running.clone();
    ctrlc::set_handler(move || {
        info!("received interrupt, shutting down");
        running_for_signal.store(false, Ordering::Relaxed);
    })
    .context("installing Ctrl-C handler")?;

    let devices = DevicePair::open_serial(
        &config.devices.left_port,
        &config.devices.right_port,
        config.devices.baud_rate,
    );
    let mut session = ControlSession::new(
        devices,
        Box::new(CpalBackend::new()),
        config.library.audio_dir.clone(),
        ManualDispatcher::new(config.playback.immediate_interval),
    );
    let mut server = ControlServer::bind(&config.control.socket_path)
        .with_context(|| format!("binding control socket {}", config.control.socket_path.display()))?;

    let clock = FrameClock::new();
    let song_dir = config.library.song_dir.clone();

    if let Some(query) = &args.song {
        autoplay(&mut session, &song_dir, query, clock.now(), args.once)?;
    }
    let exit_when_done = args.once && args.song.is_some();

    let frame = config.playback.frame_interval();
    while running.load(Ordering::Relaxed) {
        let frame_start = Instant::now();
        let now = clock.now();

        server.poll(|command| apply_command(&mut session, &song_dir, command, now));
        if session.tick(now) == TickOutcome::Finished {
            info!("song finished");
            if exit_when_done {
                break;
            }
        }

        let spent = frame_start.elapsed();
        if spent < frame {
            thread::sleep(frame - spent);
        } else {
            debug!(?spent, "frame overran its budget");
        }
    }

    session.stop_playback();
    info!("glove panel stopped");
    Ok(())
}

/// Selects and starts the song named on the command line. Unless the run
/// exists only to play that song, a failure leaves the panel in manual mode.
fn autoplay(session: &mut ControlSession, song_dir: &Path, query: &str, now: f64, once: bool) -> anyhow::Result<()> {
    let started = SongLibrary::scan(song_dir)
        .resolve(query)
        .with_context(|| format!("no song named '{query}' in {}", song_dir.display()))
        .and_then(|song| {
            session.select_song(song);
            Ok(session.start_playback(now)?)
        });
    match started {
        Err(err) if !once => {
            warn!(error = %format!("{err:#}"), "song not started, staying in manual mode");
            Ok(())
        }
        other => other,
    }
}

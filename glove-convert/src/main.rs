use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use glove_server::audio::decode_file;
use glove_server::song::SongRecord;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod analysis;
mod stft;

const SUPPORTED_EXTENSIONS: [&str; 4] = ["wav", "mp3", "flac", "ogg"];

/// Turns every song in a folder into a haptic score for the gloves
#[derive(Parser, Debug)]
#[command(name = "glove-convert", version)]
struct Args {
    /// Folder of audio files to convert
    #[arg(long, default_value = "songs")]
    songs: PathBuf,

    /// Folder the `<name>_haptics.json` files are written to
    #[arg(long, default_value = "haptic_outputs")]
    out: PathBuf,

    /// Log filter; RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !args.songs.is_dir() {
        bail!("songs folder {} not found", args.songs.display());
    }
    fs::create_dir_all(&args.out).with_context(|| format!("creating {}", args.out.display()))?;

    let inputs = audio_files(&args.songs)?;
    if inputs.is_empty() {
        warn!(
            folder = %args.songs.display(),
            extensions = ?SUPPORTED_EXTENSIONS,
            "no audio files to convert"
        );
        return Ok(());
    }

    let mut converted = 0;
    for input in &inputs {
        match convert_file(input, &args.out) {
            Ok(Some(output)) => {
                info!(input = %input.display(), output = %output.display(), "converted");
                converted += 1;
            }
            Ok(None) => info!(input = %input.display(), "no haptic events (too quiet or no onsets)"),
            Err(err) => warn!(input = %input.display(), error = %format!("{err:#}"), "conversion failed"),
        }
    }
    info!("converted {converted} of {} files", inputs.len());
    Ok(())
}

fn audio_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Writes `<out_dir>/<stem>_haptics.json`. Returns `None` when the song yields no events.
fn convert_file(input: &Path, out_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let clip = decode_file(input)?;
    let score = analysis::generate_events(&clip);
    info!(
        input = %input.display(),
        channels = clip.channels(),
        seconds = clip.length_seconds(),
        events = score.len(),
        "analyzed"
    );
    if score.is_empty() {
        return Ok(None);
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = out_dir.join(format!("{stem}_haptics.json"));
    let records: Vec<SongRecord> = score.events().iter().map(SongRecord::from).collect();
    let json = serde_json::to_string_pretty(&records)?;
    fs::write(&output, json).with_context(|| format!("writing {}", output.display()))?;
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glove_server::song::load_score;

    fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn clicks(sample_rate: u32) -> Vec<f32> {
        let mut samples = vec![0.0; sample_rate as usize * 2];
        for start in [0.4, 1.2] {
            let first = (start * sample_rate as f64) as usize;
            let len = sample_rate as usize / 10;
            for i in 0..len {
                let env = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / len as f32).cos());
                samples[first + i] = 0.7 * env * (2.0 * std::f32::consts::PI * 250.0 * i as f32 / sample_rate as f32).sin();
            }
        }
        samples
    }

    #[test]
    fn converted_song_loads_back_as_a_score() {
        let songs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let input = songs.path().join("drums.wav");
        write_wav(&input, &clicks(22_050), 22_050);

        let output = convert_file(&input, out.path()).unwrap().expect("events written");
        assert_eq!(output, out.path().join("drums_haptics.json"));

        let loaded = load_score(&output).unwrap();
        assert!(loaded.skipped.is_empty());
        assert!(!loaded.score.is_empty());
        assert!(loaded.score.events().iter().any(|e| e.hand == glove_protocol::Hand::Left));
        assert!(loaded.score.events().iter().any(|e| e.hand == glove_protocol::Hand::Right));
    }

    #[test]
    fn silent_song_writes_nothing() {
        let songs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let input = songs.path().join("silence.wav");
        write_wav(&input, &vec![0.0; 22_050], 22_050);

        assert_eq!(convert_file(&input, out.path()).unwrap(), None);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn only_supported_extensions_are_picked_up() {
        let songs = tempfile::tempdir().unwrap();
        for name in ["b.MP3", "a.wav", "cover.jpg", "c.flac", "notes.txt"] {
            fs::write(songs.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = audio_files(songs.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.wav", "b.MP3", "c.flac"]);
    }
}

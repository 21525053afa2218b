use std::fs;
use std::path::{Path, PathBuf};

use glove_protocol::SongEntry;
use tracing::{debug, warn};

use crate::audio::companion_base_name;

/// The haptic song files available for selection.
#[derive(Debug, Clone, Default)]
pub struct SongLibrary {
    dir: PathBuf,
    songs: Vec<SongEntry>,
}

impl SongLibrary {
    /// Lists every `*.json` file in `dir`, sorted by file name. A missing
    /// directory yields an empty library.
    pub fn scan(dir: &Path) -> Self {
        let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
                .collect(),
            Err(err) => {
                warn!(dir = %dir.display(), %err, "cannot read song directory");
                Vec::new()
            }
        };
        paths.sort();

        let songs = paths
            .into_iter()
            .map(|path| SongEntry {
                name: companion_base_name(&path),
                path: path.to_string_lossy().into_owned(),
            })
            .collect::<Vec<_>>();
        debug!(dir = %dir.display(), count = songs.len(), "scanned song library");

        Self {
            dir: dir.to_path_buf(),
            songs,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn songs(&self) -> &[SongEntry] {
        &self.songs
    }

    /// Accepts a display name (`intro`), a file name (`intro_haptics.json`) or a path.
    pub fn resolve(&self, query: &str) -> Option<PathBuf> {
        let by_entry = self.songs.iter().find(|song| {
            song.name == query
                || song.path == query
                || Path::new(&song.path).file_name().is_some_and(|name| name == query)
        });
        if let Some(song) = by_entry {
            return Some(PathBuf::from(&song.path));
        }
        let direct = Path::new(query);
        direct.is_file().then(|| direct.to_path_buf())
    }
}

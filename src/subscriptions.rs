//! Persisted list of downloaded playlists, replayed by `update`.
//!
//! One entry per line: `<reference url> <destination>`. The destination is
//! everything after the first space, so it may itself contain spaces.

use crate::catalog::Reference;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR: &str = ".spotify-dl";
const DATA_FILE: &str = "data.dat";

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("cannot locate the home directory")]
    NoHomeDir,

    #[error("subscription file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub reference: Reference,
    pub destination: PathBuf,
}

impl Subscription {
    pub fn new(reference: Reference, destination: impl Into<PathBuf>) -> Self {
        Self {
            reference,
            destination: destination.into(),
        }
    }

    fn to_line(&self) -> String {
        format!("{} {}", self.reference.url(), self.destination.display())
    }

    fn from_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (reference, destination) = line.trim_start().split_once(' ')?;
        if destination.trim().is_empty() {
            return None;
        }
        let reference = Reference::parse(reference).ok()?;
        Some(Self::new(reference, destination))
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionStore {
    path: PathBuf,
}

impl SubscriptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.spotify-dl/data.dat`
    pub fn default_path() -> Result<PathBuf, SubscriptionError> {
        dirs::home_dir()
            .map(|home| home.join(APP_DIR).join(DATA_FILE))
            .ok_or(SubscriptionError::NoHomeDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> SubscriptionError {
        SubscriptionError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// All well-formed entries in file order. A missing file is empty.
    pub fn load(&self) -> Result<Vec<Subscription>, SubscriptionError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let entry = Subscription::from_line(line);
                if entry.is_none() {
                    tracing::warn!("Ignoring malformed subscription line: {}", line);
                }
                entry
            })
            .collect())
    }

    /// Append `entry` unless an identical one is already stored.
    /// Returns whether the file changed.
    pub fn add(&self, entry: &Subscription) -> Result<bool, SubscriptionError> {
        if self.load()?.contains(entry) {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        writeln!(file, "{}", entry.to_line()).map_err(|e| self.io_err(e))?;
        Ok(true)
    }

    /// Drop entries whose destination no longer exists and rewrite the file.
    /// Returns the surviving entries.
    pub fn clean(&self) -> Result<Vec<Subscription>, SubscriptionError> {
        let entries = self.load()?;
        let (valid, stale): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.destination.exists());

        for entry in &stale {
            tracing::info!(
                "Dropping subscription for {}: {} no longer exists",
                entry.reference,
                entry.destination.display()
            );
        }

        if self.path.exists() {
            let content: String = valid.iter().map(|e| format!("{}\n", e.to_line())).collect();
            fs::write(&self.path, content).map_err(|e| self.io_err(e))?;
        }
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferenceKind;
    use tempfile::tempdir;

    fn playlist(id: &str) -> Reference {
        Reference::new(ReferenceKind::Playlist, id)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = SubscriptionStore::new(dir.path().join("data.dat"));
        assert!(store.load().unwrap().is_empty());
        assert!(store.clean().unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_add_skips_duplicates() {
        let dir = tempdir().unwrap();
        let store = SubscriptionStore::new(dir.path().join("nested").join("data.dat"));
        let entry = Subscription::new(playlist("abc"), dir.path().join("My Music"));

        assert!(store.add(&entry).unwrap());
        assert!(!store.add(&entry).unwrap());
        assert!(store.add(&Subscription::new(playlist("def"), dir.path())).unwrap());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], entry);
    }

    #[test]
    fn test_destination_with_spaces_round_trips() {
        let line = "https://open.spotify.com/playlist/abc /home/me/My Music/Mix";
        let entry = Subscription::from_line(line).unwrap();
        assert_eq!(entry.destination, PathBuf::from("/home/me/My Music/Mix"));
        assert_eq!(entry.to_line(), line);
    }

    #[test]
    fn test_destination_trailing_space_round_trips() {
        let line = "https://open.spotify.com/playlist/abc /music/Mix ";
        let entry = Subscription::from_line(line).unwrap();
        assert_eq!(entry.destination, PathBuf::from("/music/Mix "));
        assert_eq!(entry.to_line(), line);

        let crlf = Subscription::from_line("https://open.spotify.com/playlist/abc /music/Mix\r").unwrap();
        assert_eq!(crlf.destination, PathBuf::from("/music/Mix"));
    }

    #[test]
    fn test_malformed_lines_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.dat");
        fs::write(
            &path,
            "garbage\nhttps://open.spotify.com/playlist/abc /tmp/x\nnot-a-url /tmp/y\n\n",
        )
        .unwrap();
        let loaded = SubscriptionStore::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].reference.id, "abc");
    }

    #[test]
    fn test_clean_drops_missing_destinations() {
        let dir = tempdir().unwrap();
        let store = SubscriptionStore::new(dir.path().join("data.dat"));
        let kept = Subscription::new(playlist("keep"), dir.path());
        let dropped = Subscription::new(playlist("drop"), dir.path().join("deleted"));
        store.add(&kept).unwrap();
        store.add(&dropped).unwrap();

        let valid = store.clean().unwrap();

        assert_eq!(valid, vec![kept.clone()]);
        assert_eq!(store.load().unwrap(), vec![kept]);
    }
}

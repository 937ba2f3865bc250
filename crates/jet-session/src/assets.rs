//! Configuration asset source
//!
//! Lists and reads the `.ovpn` profiles a shell offers to the user.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File extension of configuration profiles
pub const CONFIG_EXTENSION: &str = "ovpn";

/// Errors from a configuration source
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid config name: {0}")]
    InvalidName(String),

    #[error("Config not found: {0}")]
    NotFound(String),
}

/// Source of named configuration texts
pub trait ConfigSource: Send + Sync {
    /// Identifiers of every available configuration, in display order
    fn list(&self) -> Result<Vec<String>, AssetError>;

    /// Full text of one configuration
    fn read(&self, id: &str) -> Result<String, AssetError>;
}

/// `.ovpn` files in a single directory
#[derive(Debug, Clone)]
pub struct DirectoryConfigSource {
    dir: PathBuf,
}

impl DirectoryConfigSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory being listed
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn profile_path(&self, id: &str) -> Result<PathBuf, AssetError> {
        let is_plain_name = !id.is_empty()
            && !id.contains(['/', '\\'])
            && id != "."
            && id != "..";

        if !is_plain_name || !has_config_extension(Path::new(id)) {
            return Err(AssetError::InvalidName(id.to_string()));
        }
        Ok(self.dir.join(id))
    }
}

fn has_config_extension(path: &Path) -> bool {
    path.extension().map(|e| e == CONFIG_EXTENSION).unwrap_or(false)
}

impl ConfigSource for DirectoryConfigSource {
    fn list(&self) -> Result<Vec<String>, AssetError> {
        let mut configs = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();

            if !path.is_file() || !has_config_extension(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                configs.push(name.to_string());
            }
        }

        configs.sort();
        debug!("Found {} configs in {}", configs.len(), self.dir.display());
        Ok(configs)
    }

    fn read(&self, id: &str) -> Result<String, AssetError> {
        let path = self.profile_path(id)?;

        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(AssetError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("japan.ovpn"), "remote jp.example.com 1194\n").unwrap();
        fs::write(dir.path().join("germany.ovpn"), "remote de.example.com 443\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();
        fs::create_dir(dir.path().join("nested.ovpn")).unwrap();
        dir
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let dir = populated_dir();
        let source = DirectoryConfigSource::new(dir.path());

        assert_eq!(source.list().unwrap(), vec!["germany.ovpn", "japan.ovpn"]);
    }

    #[test]
    fn test_read() {
        let dir = populated_dir();
        let source = DirectoryConfigSource::new(dir.path());

        assert_eq!(source.read("germany.ovpn").unwrap(), "remote de.example.com 443\n");
        assert!(matches!(source.read("missing.ovpn"), Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_read_rejects_paths() {
        let dir = populated_dir();
        let source = DirectoryConfigSource::new(dir.path());

        for bad in ["../secret.ovpn", "a/b.ovpn", "notes.txt", "", ".."] {
            assert!(
                matches!(source.read(bad), Err(AssetError::InvalidName(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_missing_directory() {
        let source = DirectoryConfigSource::new("/nonexistent/jet-configs");
        assert!(matches!(source.list(), Err(AssetError::Io(_))));
    }
}

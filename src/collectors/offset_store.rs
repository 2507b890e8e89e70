use crate::error::CollectorError;
use log::warn;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Prefix of every offset file name
pub const OFFSET_FILE_PREFIX: &str = ".last_offset_";

/// Persistence for per-file read cursors
///
/// Implementations must return `0` for a path that has never been saved.
#[cfg_attr(test, mockall::automock)]
pub trait OffsetStore: Send + Sync {
    /// Last persisted byte offset for `path`
    fn load(&self, path: &Path) -> Result<u64, CollectorError>;

    /// Persist `offset` as the new cursor for `path`
    fn save(&self, path: &Path, offset: u64) -> Result<(), CollectorError>;
}

/// Stores each cursor as a decimal number in its own file under a directory
#[derive(Debug, Clone)]
pub struct FileOffsetStore {
    dir: PathBuf,
}

impl FileOffsetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the offset file for `path`
    pub fn offset_file(&self, path: &Path) -> PathBuf {
        self.dir.join(format!(
            "{}{}",
            OFFSET_FILE_PREFIX,
            sanitize_path(&path.to_string_lossy())
        ))
    }
}

impl OffsetStore for FileOffsetStore {
    fn load(&self, path: &Path) -> Result<u64, CollectorError> {
        let file = self.offset_file(path);
        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(CollectorError::Read {
                    path: file,
                    source: e,
                })
            }
        };

        match content.trim().parse::<u64>() {
            Ok(offset) => Ok(offset),
            Err(_) => {
                warn!(
                    "Ignoring unreadable offset {:?} in {}, starting {} from the beginning",
                    content.trim(),
                    file.display(),
                    path.display()
                );
                Ok(0)
            }
        }
    }

    fn save(&self, path: &Path, offset: u64) -> Result<(), CollectorError> {
        let persist_err = |e: std::io::Error| CollectorError::OffsetPersist {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&self.dir).map_err(persist_err)?;

        // Write then rename so a crash never leaves a half-written cursor
        let file = self.offset_file(path);
        let mut tmp = file.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, offset.to_string()).map_err(persist_err)?;
        fs::rename(&tmp, &file).map_err(persist_err)?;
        Ok(())
    }
}

/// Flatten a path into a single file name component
pub fn sanitize_path(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

//! File-based long-term memory — one JSON-lines file per key.
//!
//! Each line is a JSON-encoded `Message`. Appends open the key's file in
//! append mode under the key's lock; reads parse the whole file under the
//! same lock, so a read never observes half an append.
//!
//! Storage location: `<dir>/<key>.jsonl`, default `~/.parley/memory/`. Keys
//! are percent-encoded into file names, so distinct keys never share a file.

use dashmap::DashMap;
use parley_core::error::MemoryError;
use parley_core::memory::LongTermMemory;
use parley_core::message::Message;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub struct FileBackend {
    dir: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileBackend {
    /// Create a backend rooted at `dir`. The directory is created on first
    /// write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File memory backend ready");
        Self {
            dir,
            locks: DashMap::new(),
        }
    }

    /// Default directory: `~/.parley/memory`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".parley").join("memory")
    }

    /// File holding `key`. Bytes outside `[A-Za-z0-9_-]` become `%XX`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut safe = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                safe.push(char::from(byte));
            } else {
                safe.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{safe}.jsonl"))
    }

    fn lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks.entry(path.to_path_buf()).or_default().clone()
    }

    fn load(path: &Path, key: &str) -> Result<Vec<Message>, MemoryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Message>(line) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    warn!(key, error = %e, "Skipping corrupted memory line");
                    None
                }
            })
            .collect())
    }
}

impl LongTermMemory for FileBackend {
    fn append(&self, key: &str, messages: &[Message]) -> Result<(), MemoryError> {
        let mut buf = String::new();
        for msg in messages {
            let line = serde_json::to_string(msg).map_err(|e| MemoryError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let path = self.path_for(key);
        let lock = self.lock(&path);
        let _guard = lock
            .lock()
            .map_err(|_| MemoryError::Storage(format!("memory lock for {key} is poisoned")))?;

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            MemoryError::Storage(format!("Failed to create memory directory: {e}"))
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| MemoryError::Storage(format!("Failed to open {}: {e}", path.display())))?;
        file.write_all(buf.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| MemoryError::Storage(format!("Failed to write {}: {e}", path.display())))?;

        debug!(key, count = messages.len(), "Appended to long-term memory");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<Message>, MemoryError> {
        let path = self.path_for(key);
        let lock = self.lock(&path);
        let _guard = lock
            .lock()
            .map_err(|_| MemoryError::Storage(format!("memory lock for {key} is poisoned")))?;
        Self::load(&path, key)
    }

    fn name(&self) -> &str {
        "file"
    }
}

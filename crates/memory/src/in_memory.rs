//! In-memory long-term memory — for tests and ephemeral sessions.

use dashmap::DashMap;
use parley_core::error::MemoryError;
use parley_core::memory::LongTermMemory;
use parley_core::message::Message;
use std::sync::{Arc, RwLock};

/// A process-local store: one `RwLock`ed log per key.
///
/// The map itself only guards key creation; appends and reads lock the
/// key's own log, so different keys never contend.
#[derive(Default)]
pub struct InMemoryBackend {
    logs: DashMap<String, Arc<RwLock<Vec<Message>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, key: &str) -> Arc<RwLock<Vec<Message>>> {
        self.logs.entry(key.to_string()).or_default().clone()
    }

    /// Keys that have at least one stored message.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.logs.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl LongTermMemory for InMemoryBackend {
    fn append(&self, key: &str, messages: &[Message]) -> Result<(), MemoryError> {
        let log = self.log(key);
        let mut guard = log
            .write()
            .map_err(|_| MemoryError::Storage(format!("memory lock for {key} is poisoned")))?;
        guard.extend_from_slice(messages);
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<Message>, MemoryError> {
        let Some(log) = self.logs.get(key).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let guard = log
            .read()
            .map_err(|_| MemoryError::Storage(format!("memory lock for {key} is poisoned")))?;
        Ok(guard.clone())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

//! Long-term memory trait — an append-only log of messages per key.
//!
//! Keys are user ids or chat group ids. The agent reads a key when it
//! builds a reasoning prompt and appends to it only when a task is
//! finalized. The calls are synchronous so that both the blocking and the
//! async agent drivers can use the same store; implementations keep the
//! critical section per key and short.

use crate::error::MemoryError;
use crate::message::Message;

pub trait LongTermMemory: Send + Sync {
    /// Append messages to the log stored under `key`.
    fn append(&self, key: &str, messages: &[Message]) -> Result<(), MemoryError>;

    /// A consistent snapshot of everything stored under `key`.
    /// Unknown keys read as empty.
    fn read(&self, key: &str) -> Result<Vec<Message>, MemoryError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

//! Long-term memory backends for Parley.
//!
//! Both backends keep one log per key and one lock per key, so tasks of
//! different users finalize concurrently and readers always see either
//! the whole of an append or none of it.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileBackend;
pub use in_memory::InMemoryBackend;

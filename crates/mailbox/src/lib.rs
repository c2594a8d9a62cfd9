//! Per-user coordination between the transport layer and the agent.
//!
//! - **Mailbox**: inbound queue plus a single-slot outbound reply per user
//! - **AccountRegistry**: which users and chat groups may talk to the agent
//! - **ChattingStatusTracker**: at most one in-flight task per user
//! - **SessionConfig**: live per-user flags that may change mid-task
//!
//! Every registry is keyed by user id with per-key synchronization, so
//! users never wait on each other.

pub mod accounts;
pub mod chatting;
pub mod format;
pub mod mailbox;
pub mod session;

pub use accounts::AccountRegistry;
pub use chatting::{ChattingGuard, ChattingStatusTracker};
pub use mailbox::Mailbox;
pub use session::{AgentReply, ChatMessage, MailboxMessage, SessionConfig};

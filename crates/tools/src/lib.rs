//! Built-in tools for Parley.
//!
//! Tools give the agent the ability to interact with the user and the
//! world: ask a follow-up question, look up the date, and perform
//! operations that need the user's explicit consent first.

pub mod authorize;
pub mod date_time;
pub mod notes;
pub mod query_user;

pub use authorize::{
    AuthorizerSettings, CollectAndAuthorizeTool, GatedOperation, OperationAuthorizer,
};

use parley_core::tool::ToolRegistry;
use parley_mailbox::Mailbox;
use std::path::PathBuf;
use std::sync::Arc;

/// Create a registry with every built-in tool.
///
/// `notes_dir` is where `save_note` writes; the authorizer's timeout is
/// also used for `query_user`.
pub fn default_registry(
    mailbox: Arc<Mailbox>,
    authorizer: Arc<OperationAuthorizer>,
    notes_dir: PathBuf,
) -> ToolRegistry {
    let timeout = authorizer.settings().timeout;
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(query_user::QueryUserTool::new(mailbox, timeout)));
    registry.register(Box::new(date_time::CurrentDateTimeTool));
    registry.register(Box::new(date_time::DateTimeFromNowTool));
    registry.register(Box::new(CollectAndAuthorizeTool::new(
        Arc::new(notes::SaveNoteOperation::new(notes_dir)),
        authorizer,
    )));
    registry
}

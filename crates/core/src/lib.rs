//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley interactive
//! agent engine. Every collaborator the engine talks to (LLM, tools,
//! long-term memory) is defined as a trait here; implementations live in
//! their respective crates.
//!
//! ## Design Philosophy
//!
//! All crates depend inward on core. Swapping an LLM backend or a memory
//! store is a matter of handing a different `Arc<dyn Trait>` to the agent.

pub mod error;
pub mod event;
pub mod llm;
pub mod memory;
pub mod message;
pub mod reasoning;
pub mod tool;
pub mod tool_log;

// Re-export key types at crate root for ergonomics
pub use error::{AgentError, Error, Result};
pub use event::{AgentEvent, EventBus};
pub use llm::{Llm, LlmResponse, PromptTemplate};
pub use memory::LongTermMemory;
pub use message::{Message, Role};
pub use reasoning::{ObservationSource, ReasoningStep};
pub use tool::{Tool, ToolContext, ToolMetadata, ToolOutput, ToolRegistry};
pub use tool_log::{SystemLog, ToolLog};

//! The Parley agent — a ReAct loop that can pause to talk to its user.
//!
//! Each task cycles **Reason → Act → Observe**:
//!
//! 1. **Reason**: the LLM sees the tools, the chat history, and the trace
//!    so far, and proposes a thought with an action or an answer
//! 2. **Act**: the named tool runs, isolated from panics
//! 3. **Observe**: its output joins the trace; a `return_direct` tool ends
//!    the task on the spot
//!
//! With instruct mode on, the user may redirect each proposal before it is
//! acted on. With comment mode on, the user sees each observation and may
//! comment before the next round. Both waits are bounded.

pub mod executor;
pub mod formatter;
pub mod parser;
pub mod runner;
pub mod task;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use executor::{ExecState, ExecutorSettings, StepExecutor, StepOutput, truncate_observation};
pub use formatter::{ReActFormatter, ReasoningFormatter};
pub use runner::TaskRunner;
pub use task::{AgentResponse, Step, Task, TaskState};

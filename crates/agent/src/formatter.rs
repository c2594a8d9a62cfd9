//! Turning history, tools, and the reasoning trace into LLM messages.
//!
//! The trace is replayed as a dialogue: thoughts and actions become
//! assistant turns, observations become user turns.

use parley_core::llm::PromptTemplate;
use parley_core::message::Message;
use parley_core::reasoning::ReasoningStep;
use parley_core::tool::ToolMetadata;

/// Renders prompts for the REASON phase and the instruct re-reason.
pub trait ReasoningFormatter: Send + Sync {
    fn format(
        &self,
        tools: &[ToolMetadata],
        history: &[Message],
        reasoning: &[ReasoningStep],
    ) -> Vec<Message>;

    /// The prompt used after the user commented on a completion.
    fn format_instruct(
        &self,
        tools: &[ToolMetadata],
        history: &[Message],
        reasoning: &[ReasoningStep],
        previous: &str,
        suggestion: &str,
    ) -> Vec<Message>;
}

pub const REACT_SYSTEM_HEADER: &str = r#"You are designed to help with a variety of tasks, from answering questions to providing summaries to other types of analyses.

## Tools
You have access to a wide variety of tools. You are responsible for using the tools in any sequence you deem appropriate to complete the task at hand. This may require breaking the task into subtasks and using different tools to complete each subtask.

You have access to the following tools:
{tool_desc}

To answer the question using tools, think step by step and use the following format.

```
Thought: What is my target in this step, and which tool helps me reach it?
Action: tool name (one of {tool_names})
Action Input: the input to the tool, as a JSON object (e.g. {"input": "hello world", "num_beams": 5})
```

Please ALWAYS start with a Thought. Use valid JSON for the Action Input, never single quotes.

The user will then respond in the following format:

```
Observation: tool response
```

## Output Format
When you can answer, you MUST respond in one of the following two formats. Never use a tool call as your answer.

```
Thought: I can answer without using any more tools.
Answer: [your answer here]
```

```
Thought: I cannot answer the question with the provided tools.
Answer: Sorry, I cannot answer your query.
```

## Current Conversation
Below is the current conversation consisting of interleaving human and assistant messages.
"#;

pub const INSTRUCT_SUFFIX: &str = r#"
## Revision
Your previous response was:
{prev_response}

The user reviewed it and replied:
{suggestion}

Revise your response taking the user's reply into account. Keep to the output formats above.
"#;

/// The default Thought/Action/Observation formatter.
pub struct ReActFormatter {
    system_header: String,
}

impl ReActFormatter {
    pub fn new() -> Self {
        Self {
            system_header: REACT_SYSTEM_HEADER.to_string(),
        }
    }

    /// Replace the system header. It may use `{tool_desc}` and `{tool_names}`.
    pub fn with_system_header(mut self, header: impl Into<String>) -> Self {
        self.system_header = header.into();
        self
    }

    fn tool_descriptions(tools: &[ToolMetadata]) -> String {
        tools
            .iter()
            .map(|t| format!("> Tool Name: {}\nTool Description: {}\n", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn header(&self, tools: &[ToolMetadata]) -> String {
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        PromptTemplate::new(self.system_header.as_str()).format(&[
            ("tool_desc", &Self::tool_descriptions(tools)),
            ("tool_names", &names.join(", ")),
        ])
    }

    fn assemble(system: String, history: &[Message], reasoning: &[ReasoningStep]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(1 + history.len() + reasoning.len());
        messages.push(Message::system(system));
        messages.extend(history.iter().cloned());
        messages.extend(reasoning.iter().map(|step| match step {
            ReasoningStep::Observation { .. } => Message::user(step.render()),
            _ => Message::assistant(step.render()),
        }));
        messages
    }
}

impl Default for ReActFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningFormatter for ReActFormatter {
    fn format(
        &self,
        tools: &[ToolMetadata],
        history: &[Message],
        reasoning: &[ReasoningStep],
    ) -> Vec<Message> {
        Self::assemble(self.header(tools), history, reasoning)
    }

    fn format_instruct(
        &self,
        tools: &[ToolMetadata],
        history: &[Message],
        reasoning: &[ReasoningStep],
        previous: &str,
        suggestion: &str,
    ) -> Vec<Message> {
        let suffix = PromptTemplate::new(INSTRUCT_SUFFIX).format(&[
            ("prev_response", previous),
            ("suggestion", suggestion),
        ]);
        Self::assemble(self.header(tools) + &suffix, history, reasoning)
    }
}

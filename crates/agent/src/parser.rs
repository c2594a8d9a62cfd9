//! Parsing a ReAct completion into a [`ReasoningStep`].
//!
//! Accepted shapes:
//!
//! ```text
//! Thought: ...            Thought: ...
//! Action: tool_name       Answer: ...
//! Action Input: {...}
//! ```
//!
//! A completion without any `Thought:` is taken as an implicit answer.

use parley_core::error::AgentError;
use parley_core::reasoning::ReasoningStep;
use regex_lite::Regex;
use std::sync::LazyLock;

static ACTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)Thought:\s*(.*?)\s*Action:\s*([A-Za-z0-9_\-]+)[^\n]*\n\s*Action Input:\s*(.*)").ok()
});

static ANSWER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)Thought:\s*(.*?)\s*Answer:\s*(.*)").ok());

const IMPLICIT_THOUGHT: &str = "(Implicit) I can answer without any more tools!";

fn parse_error(reason: impl Into<String>, raw: &str) -> AgentError {
    AgentError::ReasoningParse {
        reason: reason.into(),
        raw: raw.to_string(),
    }
}

/// Parse the text after `Action Input:`.
///
/// Anything containing `{` must be a JSON object (single quotes are
/// tolerated). Other non-empty input is passed through as a string.
fn parse_action_input(input: &str, raw: &str) -> Result<serde_json::Value, AgentError> {
    let input = input.trim().trim_end_matches("```").trim();
    if input.starts_with('[') {
        return Err(parse_error("Action Input must be a JSON object", raw));
    }
    let (Some(start), Some(end)) = (input.find('{'), input.rfind('}')) else {
        if input.contains('{') {
            return Err(parse_error("unbalanced braces in Action Input", raw));
        }
        return Ok(if input.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::Value::String(input.to_string())
        });
    };
    if end < start {
        return Err(parse_error("unbalanced braces in Action Input", raw));
    }
    let candidate = &input[start..=end];
    serde_json::from_str::<serde_json::Value>(candidate)
        .or_else(|_| serde_json::from_str(&candidate.replace('\'', "\"")))
        .map_err(|e| parse_error(format!("Action Input is not valid JSON: {e}"), raw))
        .and_then(|value| {
            if value.is_object() {
                Ok(value)
            } else {
                Err(parse_error("Action Input must be a JSON object", raw))
            }
        })
}

/// Parse one completion. `Answer:` wins over `Action:` when both appear.
pub fn parse(output: &str) -> Result<ReasoningStep, AgentError> {
    let text = output.trim();
    if text.is_empty() {
        return Err(parse_error("empty completion", output));
    }

    if !text.contains("Thought:") {
        let answer = text.strip_prefix("Answer:").map(str::trim).unwrap_or(text);
        return Ok(ReasoningStep::Done {
            thought: IMPLICIT_THOUGHT.to_string(),
            answer: answer.to_string(),
        });
    }

    if text.contains("Answer:") {
        let caps = ANSWER
            .as_ref()
            .and_then(|re| re.captures(text))
            .ok_or_else(|| parse_error("could not extract the final answer", output))?;
        return Ok(ReasoningStep::Done {
            thought: caps[1].trim().to_string(),
            answer: caps[2].trim().to_string(),
        });
    }

    if text.contains("Action:") {
        let caps = ACTION
            .as_ref()
            .and_then(|re| re.captures(text))
            .ok_or_else(|| parse_error("could not extract the tool use", output))?;
        return Ok(ReasoningStep::ThoughtAction {
            thought: caps[1].trim().to_string(),
            tool_name: caps[2].trim().to_string(),
            args: parse_action_input(&caps[3], output)?,
        });
    }

    Err(parse_error(
        "a Thought must be followed by an Action or an Answer",
        output,
    ))
}

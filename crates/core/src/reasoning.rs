//! Reasoning steps — the append-only trace of one task.
//!
//! A well-formed trace is a series of `ThoughtAction` steps, each followed
//! by its tool `Observation`, ending with exactly one `Done`. Observations
//! from the user or the engine itself (suggestions, parse fallbacks) may
//! appear between pairs; they never rewrite an earlier thought.

use serde::{Deserialize, Serialize};

/// Who produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    /// The result of the action right before it.
    Tool,
    /// Something the user said mid-task.
    User,
    /// A note from the engine: a parse fallback, a failed LLM call.
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReasoningStep {
    /// The model decided to call a tool.
    ThoughtAction {
        thought: String,
        tool_name: String,
        args: serde_json::Value,
    },
    /// Something the model should take into account next round.
    Observation {
        text: String,
        return_direct: bool,
        source: ObservationSource,
    },
    /// The final answer.
    Done { thought: String, answer: String },
}

impl ReasoningStep {
    /// A tool result.
    pub fn observation(text: impl Into<String>) -> Self {
        Self::observed(ObservationSource::Tool, text)
    }

    pub fn from_user(text: impl Into<String>) -> Self {
        Self::observed(ObservationSource::User, text)
    }

    pub fn from_system(text: impl Into<String>) -> Self {
        Self::observed(ObservationSource::System, text)
    }

    fn observed(source: ObservationSource, text: impl Into<String>) -> Self {
        ReasoningStep::Observation {
            text: text.into(),
            return_direct: false,
            source,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ReasoningStep::Done { .. })
    }

    /// Render in the Thought/Action/Observation/Answer text format the
    /// model is prompted with.
    pub fn render(&self) -> String {
        match self {
            ReasoningStep::ThoughtAction {
                thought,
                tool_name,
                args,
            } => format!("Thought: {thought}\nAction: {tool_name}\nAction Input: {args}"),
            ReasoningStep::Observation { text, .. } => format!("Observation: {text}"),
            ReasoningStep::Done { thought, answer } => {
                format!("Thought: {thought}\nAnswer: {answer}")
            }
        }
    }

    /// Check the shape of a trace that may still be in progress. `Done` may
    /// only be the last step, every `ThoughtAction` must be answered by the
    /// tool observation right after it, and a tool observation must follow
    /// an action.
    pub fn validate_sequence(steps: &[ReasoningStep]) -> Result<(), String> {
        for (i, step) in steps.iter().enumerate() {
            match step {
                ReasoningStep::Done { .. } if i + 1 != steps.len() => {
                    return Err(format!("Done at position {i} is not the last step"));
                }
                ReasoningStep::ThoughtAction { tool_name, .. } => {
                    if !matches!(
                        steps.get(i + 1),
                        Some(ReasoningStep::Observation {
                            source: ObservationSource::Tool,
                            ..
                        })
                    ) {
                        return Err(format!(
                            "action `{tool_name}` at position {i} has no observation"
                        ));
                    }
                }
                ReasoningStep::Observation {
                    source: ObservationSource::Tool,
                    ..
                } => {
                    let follows_action = i
                        .checked_sub(1)
                        .and_then(|prev| steps.get(prev))
                        .is_some_and(|prev| matches!(prev, ReasoningStep::ThoughtAction { .. }));
                    if !follows_action {
                        return Err(format!(
                            "tool observation at position {i} follows no action"
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Check a finished trace: well-formed and ending in exactly one `Done`.
    pub fn validate_complete(steps: &[ReasoningStep]) -> Result<(), String> {
        Self::validate_sequence(steps)?;
        match steps.iter().filter(|s| s.is_done()).count() {
            1 if steps.last().is_some_and(|s| s.is_done()) => Ok(()),
            0 => Err("the trace has no Done".to_string()),
            n => Err(format!("the trace has {n} Done steps")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(tool: &str) -> ReasoningStep {
        ReasoningStep::ThoughtAction {
            thought: "need a tool".into(),
            tool_name: tool.into(),
            args: serde_json::json!({"q": 1}),
        }
    }

    fn done() -> ReasoningStep {
        ReasoningStep::Done {
            thought: "finished".into(),
            answer: "42".into(),
        }
    }

    #[test]
    fn well_formed_sequences_validate() {
        let steps = vec![
            action("a"),
            ReasoningStep::observation("x"),
            ReasoningStep::from_user("User's suggestion: try b"),
            action("b"),
            ReasoningStep::observation("y"),
            done(),
        ];
        assert!(ReasoningStep::validate_complete(&steps).is_ok());
        assert!(ReasoningStep::validate_complete(&[done()]).is_ok());
    }

    #[test]
    fn engine_notes_may_open_a_trace() {
        let steps = vec![
            ReasoningStep::from_system("Could not parse the completion"),
            action("a"),
            ReasoningStep::observation("x"),
            done(),
        ];
        assert!(ReasoningStep::validate_complete(&steps).is_ok());
    }

    #[test]
    fn trace_without_done_is_incomplete() {
        let steps = vec![action("a"), ReasoningStep::observation("x")];
        assert!(ReasoningStep::validate_sequence(&steps).is_ok());
        let err = ReasoningStep::validate_complete(&steps).unwrap_err();
        assert!(err.contains("no Done"));
        assert!(ReasoningStep::validate_complete(&[]).is_err());
    }

    #[test]
    fn orphan_tool_observation_is_rejected() {
        let steps = vec![ReasoningStep::observation("from nowhere"), done()];
        assert!(ReasoningStep::validate_complete(&steps).is_err());

        let steps = vec![
            action("a"),
            ReasoningStep::observation("x"),
            ReasoningStep::observation("second result"),
            done(),
        ];
        let err = ReasoningStep::validate_sequence(&steps).unwrap_err();
        assert!(err.contains("position 2"));
    }

    #[test]
    fn action_answered_by_the_user_is_rejected() {
        let steps = vec![action("a"), ReasoningStep::from_user("hi"), done()];
        assert!(ReasoningStep::validate_complete(&steps).is_err());
    }

    #[test]
    fn observation_source_is_serialized() {
        let json = serde_json::to_value(ReasoningStep::from_user("hi")).unwrap();
        assert_eq!(json["kind"], "observation");
        assert_eq!(json["source"], "user");
    }

    #[test]
    fn dangling_action_is_rejected() {
        let steps = vec![action("a"), done()];
        assert!(ReasoningStep::validate_sequence(&steps).is_err());
    }

    #[test]
    fn early_done_is_rejected() {
        let steps = vec![done(), ReasoningStep::observation("late")];
        assert!(ReasoningStep::validate_sequence(&steps).is_err());
    }

    #[test]
    fn render_uses_react_keywords() {
        let text = action("search").render();
        assert!(text.contains("Action: search"));
        assert!(text.contains("Action Input: {\"q\":1}"));
        assert_eq!(ReasoningStep::observation("ok").render(), "Observation: ok");
        assert!(done().render().ends_with("Answer: 42"));
    }
}

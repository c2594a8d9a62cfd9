//! Turning a free-text user reply into agree / disagree / abort.
//!
//! Strict mode matches a fixed vocabulary. Otherwise a constrained LLM call
//! must answer with one of two sentinel words; anything else counts as the
//! safe choice (disagree at CONFIRM, abort at COLLECT).

use parley_core::llm::PromptTemplate;

/// Replies accepted as consent in strict mode.
pub const STRICT_AGREE_WORDS: &[&str] = &["yes", "y", "ok", "okay", "是", "好"];

/// Replies accepted as a request to stop collecting in strict mode.
pub const STRICT_ABORT_WORDS: &[&str] = &["no", "n", "cancel", "abort", "stop", "否", "取消"];

pub const AGREE_WORD: &str = "yes";
pub const DISAGREE_WORD: &str = "no";

pub const CONFIRM_QUERY: &str = "The assistant is about to perform the following operation on \
behalf of the user:\n{description}\n\nDo you agree? Reply yes to proceed or no to cancel.";

pub const STRICT_CONFIRM_QUERY: &str = "The assistant is about to perform the following \
operation on behalf of the user:\n{description}\n\nReply exactly one of: {words}. Any other \
reply cancels the operation.";

pub fn confirm_classifier() -> PromptTemplate {
    PromptTemplate::new(
        "A user was asked to approve an operation.\n\
         Operation:\n{description}\n\n\
         The user's reply:\n{response}\n\n\
         Does the user agree to perform the operation? \
         Answer with exactly one word: {agree_word} or {disagree_word}.",
    )
}

pub fn abort_classifier() -> PromptTemplate {
    PromptTemplate::new(
        "A user is being asked for information needed by the operation `{operation}`.\n\
         The user's reply:\n{response}\n\n\
         Does the user want to stop and cancel the operation? \
         Answer with exactly one word: {abort_word} or {continue_word}.",
    )
}

/// Lowercase and strip surrounding whitespace and punctuation.
fn normalize(reply: &str) -> String {
    reply
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace() || "。！，".contains(c))
        .to_lowercase()
}

pub fn strict_agree(reply: &str) -> bool {
    let word = normalize(reply);
    STRICT_AGREE_WORDS.contains(&word.as_str())
}

pub fn strict_abort(reply: &str) -> bool {
    let word = normalize(reply);
    STRICT_ABORT_WORDS.contains(&word.as_str())
}

/// Read a classifier answer. Only alphabetic characters count, so
/// `"Yes."` and `" YES"` both match; `"yes, but no"` does not.
pub fn classifier_says(raw: &str, word: &str) -> bool {
    let letters: String = raw
        .chars()
        .filter(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase();
    letters == word
}

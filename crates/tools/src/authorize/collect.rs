//! COLLECT helpers: which fields are missing, how to ask, how to read the
//! answer.

use super::{FieldSpec, Params};
use serde_json::Value;

/// Rounds of questions before COLLECT gives up.
pub const MAX_COLLECT_ROUNDS: usize = 3;

/// The text of a field value. Strings count when not blank; numbers and
/// booleans are rendered. Anything else is no usable value.
pub fn text_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The text of `params[name]`, as [`missing_fields`] sees it.
pub fn field_text(params: &Params, name: &str) -> Option<String> {
    text_value(params.get(name))
}

fn is_blank(value: Option<&Value>) -> bool {
    text_value(value).is_none()
}

/// Required fields with no usable value in `params`.
pub fn missing_fields(required: &[FieldSpec], params: &Params) -> Vec<FieldSpec> {
    required
        .iter()
        .filter(|f| is_blank(params.get(&f.name)))
        .cloned()
        .collect()
}

/// One consolidated question for all missing fields.
pub fn question(operation: &str, missing: &[FieldSpec]) -> String {
    let mut q = format!(
        "To perform the operation `{operation}`, please provide the following information \
         (one `name: value` per line), or reply `cancel` to stop:"
    );
    for field in missing {
        q.push_str(&format!("\n- {}: {}", field.name, field.description));
    }
    q
}

/// Extract field values from a reply.
///
/// Accepts a JSON object, or `name: value` / `name = value` lines matched
/// case-insensitively against the missing field names. When exactly one
/// field is missing and nothing matched, the whole reply is its value.
pub fn parse_reply(reply: &str, missing: &[FieldSpec]) -> Params {
    let mut found = Params::new();

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(reply.trim()) {
        for field in missing {
            if let Some(v) = map.get(&field.name)
                && !is_blank(Some(v))
            {
                found.insert(field.name.clone(), v.clone());
            }
        }
        return found;
    }

    for line in reply.lines() {
        let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('=')) else {
            continue;
        };
        let key = key.trim().trim_start_matches('-').trim();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if let Some(field) = missing.iter().find(|f| f.name.eq_ignore_ascii_case(key)) {
            found.insert(field.name.clone(), Value::String(value.to_string()));
        }
    }

    if found.is_empty() && missing.len() == 1 && !reply.trim().is_empty() {
        found.insert(
            missing[0].name.clone(),
            Value::String(reply.trim().to_string()),
        );
    }
    found
}

/// `name: value` lines for logs and descriptions.
pub fn render_params(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}: {s}"),
            other => format!("{k}: {other}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("title", "Title of the note"),
            FieldSpec::new("content", "Body of the note"),
        ]
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut params = Params::new();
        params.insert("title".into(), Value::String("  ".into()));
        params.insert("content".into(), Value::String("body".into()));
        let missing = missing_fields(&fields(), &params);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "title");
    }

    #[test]
    fn scalars_are_text_and_containers_are_missing() {
        let mut params = Params::new();
        params.insert("title".into(), serde_json::json!(3));
        params.insert("content".into(), serde_json::json!(["a", "b"]));
        let missing = missing_fields(&fields(), &params);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "content");
        assert_eq!(field_text(&params, "title").as_deref(), Some("3"));
        assert_eq!(field_text(&params, "content"), None);
    }

    #[test]
    fn question_lists_every_missing_field() {
        let q = question("save_note", &fields());
        assert!(q.contains("save_note"));
        assert!(q.contains("- title: Title of the note"));
        assert!(q.contains("- content: Body of the note"));
    }

    #[test]
    fn parses_key_value_lines() {
        let found = parse_reply("Title: Weekly sync\ncontent = discuss results", &fields());
        assert_eq!(found["title"], "Weekly sync");
        assert_eq!(found["content"], "discuss results");
    }

    #[test]
    fn parses_json_object() {
        let found = parse_reply(r#"{"title": "T", "unrelated": 1}"#, &fields());
        assert_eq!(found.len(), 1);
        assert_eq!(found["title"], "T");
    }

    #[test]
    fn bare_reply_fills_single_missing_field() {
        let found = parse_reply("just the body", &fields()[1..]);
        assert_eq!(found["content"], "just the body");

        let none = parse_reply("just the body", &fields());
        assert!(none.is_empty());
    }

    #[test]
    fn render_is_one_line_per_param() {
        let mut params = Params::new();
        params.insert("title".into(), Value::String("T".into()));
        params.insert("count".into(), serde_json::json!(3));
        // serde_json maps iterate in key order
        assert_eq!(render_params(&params), "count: 3\ntitle: T");
    }
}

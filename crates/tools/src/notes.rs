//! Save-note operation — appends a Markdown note to the user's notebook.
//!
//! Writing a file on the user's behalf is a side effect, so this runs as a
//! [`GatedOperation`] behind [`CollectAndAuthorizeTool`](crate::authorize::CollectAndAuthorizeTool).

use crate::authorize::collect::field_text;
use crate::authorize::{FieldSpec, GatedOperation, OperationResult, Params};
use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::ToolContext;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const NAME: &str = "save_note";

pub struct SaveNoteOperation {
    dir: PathBuf,
}

impl SaveNoteOperation {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.parley/notes`, or `./.parley/notes` without a home directory.
    pub fn default_dir() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".parley")
            .join("notes")
    }

    /// `<dir>/<user>.md`, with bytes outside `[A-Za-z0-9_-]` as `%XX` so
    /// two users never share a notebook.
    fn notebook(&self, user_id: &str) -> PathBuf {
        let mut stem = String::with_capacity(user_id.len());
        for byte in user_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                stem.push(char::from(byte));
            } else {
                stem.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{stem}.md"))
    }

    fn field(params: &Params, name: &str) -> Result<String, ToolError> {
        field_text(params, name)
            .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{name}' argument")))
    }

    fn render(title: &str, content: &str) -> String {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M");
        format!("## {title}\n_{stamp}_\n\n{content}\n\n")
    }

    fn failed(reason: impl std::fmt::Display) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            reason: reason.to_string(),
        }
    }

    fn append(path: &Path, text: &str) -> Result<(), ToolError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Self::failed)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Self::failed)?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.flush())
            .map_err(Self::failed)
    }

    fn result(path: &Path, title: &str) -> OperationResult {
        OperationResult {
            output: format!("Saved the note \"{title}\" to {}", path.display()),
            log_to_user: Some(format!("Note \"{title}\" saved.")),
            references: vec![path.display().to_string()],
        }
    }
}

#[async_trait]
impl GatedOperation for SaveNoteOperation {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Save a note to the user's notebook."
    }

    fn required_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("title", "A short title for the note"),
            FieldSpec::new("content", "The text of the note"),
        ]
    }

    fn describe(&self, params: &Params) -> String {
        let title = field_text(params, "title").unwrap_or_default();
        let content = field_text(params, "content").unwrap_or_default();
        format!("Save a note titled \"{title}\" with the content:\n{content}")
    }

    fn execute(&self, params: &Params, ctx: &ToolContext) -> Result<OperationResult, ToolError> {
        let title = Self::field(params, "title")?;
        let content = Self::field(params, "content")?;
        let path = self.notebook(&ctx.user_id);
        Self::append(&path, &Self::render(&title, &content))?;
        Ok(Self::result(&path, &title))
    }

    async fn aexecute(
        &self,
        params: &Params,
        ctx: &ToolContext,
    ) -> Result<OperationResult, ToolError> {
        let title = Self::field(params, "title")?;
        let content = Self::field(params, "content")?;
        let path = self.notebook(&ctx.user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Self::failed)?;
        }
        let text = Self::render(&title, &content);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(Self::failed)?;
        file.write_all(text.as_bytes()).await.map_err(Self::failed)?;
        // tokio hands the write to a blocking thread; flush waits for it
        // and surfaces its error.
        file.flush().await.map_err(Self::failed)?;
        Ok(Self::result(&path, &title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(title: &str, content: &str) -> Params {
        let mut p = Params::new();
        p.insert("title".into(), title.into());
        p.insert("content".into(), content.into());
        p
    }

    #[test]
    fn execute_appends_to_the_users_notebook() {
        let dir = tempfile::tempdir().unwrap();
        let op = SaveNoteOperation::new(dir.path());
        let ctx = ToolContext::new("alice");

        op.execute(&params("One", "first"), &ctx).unwrap();
        let result = op.execute(&params("Two", "second"), &ctx).unwrap();

        let text = std::fs::read_to_string(dir.path().join("alice.md")).unwrap();
        assert!(text.contains("## One"));
        assert!(text.contains("## Two\n"));
        assert!(text.find("first").unwrap() < text.find("second").unwrap());
        assert_eq!(result.references.len(), 1);
        assert!(result.output.contains("\"Two\""));
    }

    #[test]
    fn notebook_names_are_encoded() {
        let op = SaveNoteOperation::new("/tmp/notes");
        assert_eq!(
            op.notebook("../evil user"),
            PathBuf::from("/tmp/notes/%2E%2E%2Fevil%20user.md")
        );
        assert_ne!(op.notebook("a.b"), op.notebook("a_b"));
    }

    #[test]
    fn numeric_fields_are_saved_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let op = SaveNoteOperation::new(dir.path());
        let mut p = Params::new();
        p.insert("title".into(), serde_json::json!(3));
        p.insert("content".into(), "third draft".into());
        assert!(crate::authorize::collect::missing_fields(&op.required_fields(), &p).is_empty());

        let result = op.execute(&p, &ToolContext::new("alice")).unwrap();
        assert!(result.output.contains("\"3\""));
        assert!(op.describe(&p).contains("\"3\""));
    }

    #[test]
    fn missing_field_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let op = SaveNoteOperation::new(dir.path());
        let mut p = Params::new();
        p.insert("title".into(), "only a title".into());
        assert!(matches!(
            op.execute(&p, &ToolContext::new("alice")),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn description_shows_title_and_content() {
        let op = SaveNoteOperation::new("/tmp");
        let d = op.describe(&params("Plan", "buy reagents"));
        assert!(d.contains("\"Plan\""));
        assert!(d.contains("buy reagents"));
    }

    #[tokio::test]
    async fn async_execute_matches_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let op = SaveNoteOperation::new(dir.path());
        let result = op
            .aexecute(&params("Async", "body"), &ToolContext::new("bob"))
            .await
            .unwrap();
        // Everything is on disk by the time the call returns.
        let text = std::fs::read_to_string(dir.path().join("bob.md")).unwrap();
        assert!(text.contains("## Async"));
        assert!(text.ends_with("body\n\n"));
        assert_eq!(result.references, vec![dir.path().join("bob.md").display().to_string()]);
        assert_eq!(result.log_to_user.as_deref(), Some("Note \"Async\" saved."));
    }
}

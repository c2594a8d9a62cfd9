//! Merging queued fragments into one message for the agent.

use crate::session::{ChatMessage, MailboxMessage};
use chrono::{Local, NaiveDateTime};

/// Header describing who the agent is talking to and when.
pub fn system_header(user_id: &str, group_id: Option<&str>, now: NaiveDateTime) -> String {
    let date = now.format("%Y-%m-%d");
    let time = now.format("%H:%M:%S");
    match group_id {
        Some(group) => format!(
            "You are chatting in a group chat\nChat group id: {group}\nUser id: {user_id}\n\
             Current date: {date}\nCurrent time: {time}"
        ),
        None => format!(
            "You are chatting with a user one-to-one\nUser id: {user_id}\n\
             Current date: {date}\nCurrent time: {time}"
        ),
    }
}

/// Merge drained fragments, oldest first. Uploaded files are numbered
/// across the whole batch; their paths go into the system message and the
/// accompanying text is labelled with the file numbers.
pub fn merge(user_id: &str, fragments: &[ChatMessage]) -> MailboxMessage {
    merge_at(user_id, fragments, Local::now().naive_local())
}

pub(crate) fn merge_at(
    user_id: &str,
    fragments: &[ChatMessage],
    now: NaiveDateTime,
) -> MailboxMessage {
    let group_id = fragments.iter().rev().find_map(|f| f.chat_group_id.clone());
    let mut system_lines = vec![system_header(user_id, group_id.as_deref(), now)];
    let mut user_lines = Vec::with_capacity(fragments.len());
    let mut file_no = 0usize;

    for fragment in fragments {
        if fragment.file_paths.is_empty() {
            user_lines.push(fragment.text.clone());
            continue;
        }
        let mut numbers = Vec::with_capacity(fragment.file_paths.len());
        for path in &fragment.file_paths {
            file_no += 1;
            system_lines.push(format!("Path of File {file_no}: {path}"));
            numbers.push(file_no.to_string());
        }
        let label = if numbers.len() == 1 {
            format!("File {}", numbers[0])
        } else {
            format!("Files {}", numbers.join(", "))
        };
        user_lines.push(format!("The user query about the {label}:\n{}", fragment.text));
    }

    MailboxMessage {
        user_id: user_id.to_string(),
        system_msg: system_lines.join("\n"),
        user_msg: user_lines.join("\n"),
        chat_group_id: group_id,
        timed_out: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn plain_fragments_join_with_newlines() {
        let msg = merge_at(
            "alice",
            &[ChatMessage::new("alice", "first"), ChatMessage::new("alice", "second")],
            at(),
        );
        assert_eq!(msg.user_msg, "first\nsecond");
        assert_eq!(
            msg.system_msg,
            "You are chatting with a user one-to-one\nUser id: alice\n\
             Current date: 2024-05-01\nCurrent time: 09:30:00"
        );
        assert!(!msg.timed_out);
    }

    #[test]
    fn files_are_numbered_across_fragments() {
        let msg = merge_at(
            "alice",
            &[
                ChatMessage::new("alice", "summarize this").with_files(vec!["/up/a.pdf".into()]),
                ChatMessage::new("alice", "and compare").with_files(vec![
                    "/up/b.pdf".into(),
                    "/up/c.pdf".into(),
                ]),
            ],
            at(),
        );
        assert!(msg.system_msg.contains("Path of File 1: /up/a.pdf"));
        assert!(msg.system_msg.contains("Path of File 3: /up/c.pdf"));
        assert!(msg.user_msg.starts_with("The user query about the File 1:\nsummarize this"));
        assert!(msg.user_msg.contains("The user query about the Files 2, 3:\nand compare"));
    }

    #[test]
    fn group_header_names_the_group() {
        let msg = merge_at("bob", &[ChatMessage::new("bob", "hi").in_group("lab")], at());
        assert_eq!(msg.chat_group_id.as_deref(), Some("lab"));
        assert!(msg.system_msg.starts_with("You are chatting in a group chat\nChat group id: lab"));
    }
}

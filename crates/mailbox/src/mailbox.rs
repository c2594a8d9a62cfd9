//! The per-user mailbox.
//!
//! Inbound: a queue of [`ChatMessage`] fragments. A reader drains the whole
//! queue at once and receives a single merged [`MailboxMessage`], or the
//! "no reply" sentinel when the wait bound elapses.
//!
//! Outbound: a single slot holding the latest [`AgentReply`]. Writing
//! replaces, reading takes.
//!
//! Waiting comes in two flavors with the same bounded semantics: a blocking
//! one built on a `Condvar` and an async one built on `tokio::sync::Notify`.

use crate::accounts::AccountRegistry;
use crate::format;
use crate::session::{AgentReply, ChatMessage, MailboxMessage, SessionConfig};
use dashmap::DashMap;
use parley_core::error::MailboxError;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Everything the mailbox keeps for one user.
#[derive(Default)]
struct UserSlot {
    inbox: Mutex<VecDeque<ChatMessage>>,
    arrived: Condvar,
    notify: Notify,
    reply: Mutex<Option<AgentReply>>,
    session: Mutex<Option<SessionConfig>>,
}

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
/// Every critical section here leaves the data consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Mailbox {
    accounts: Arc<AccountRegistry>,
    slots: DashMap<String, Arc<UserSlot>>,
    session_defaults: SessionConfig,
}

impl Mailbox {
    pub fn new(accounts: Arc<AccountRegistry>) -> Self {
        Self {
            accounts,
            slots: DashMap::new(),
            session_defaults: SessionConfig::default(),
        }
    }

    /// Flags for users who have not sent a message yet.
    pub fn with_session_defaults(mut self, defaults: SessionConfig) -> Self {
        self.session_defaults = defaults;
        self
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    /// The user's slot. Only registered users get one, so lookups for
    /// arbitrary ids never grow the map.
    fn slot(&self, user_id: &str) -> Option<Arc<UserSlot>> {
        if let Some(slot) = self.slots.get(user_id) {
            return Some(slot.clone());
        }
        self.accounts
            .is_user(user_id)
            .then(|| self.slots.entry(user_id.to_string()).or_default().clone())
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    // ── Inbound ──

    /// Queue a fragment from a registered user and adopt its session flags.
    pub fn put_user_message(&self, msg: ChatMessage) -> Result<(), MailboxError> {
        if let Err(e) = self
            .accounts
            .check_sender(&msg.user_id, msg.chat_group_id.as_deref())
        {
            warn!(user_id = %msg.user_id, error = %e, "Rejected inbound message");
            return Err(e);
        }

        let Some(slot) = self.slot(&msg.user_id) else {
            return Err(MailboxError::UnregisteredUser(msg.user_id));
        };
        *lock(&slot.session) = Some(msg.session);
        {
            let mut inbox = lock(&slot.inbox);
            debug!(user_id = %msg.user_id, queued = inbox.len() + 1, "User message queued");
            inbox.push_back(msg);
        }
        slot.arrived.notify_all();
        slot.notify.notify_one();
        Ok(())
    }

    fn drain(&self, user_id: &str, inbox: &mut VecDeque<ChatMessage>) -> Option<MailboxMessage> {
        if inbox.is_empty() {
            return None;
        }
        let fragments: Vec<ChatMessage> = inbox.drain(..).collect();
        debug!(user_id, fragments = fragments.len(), "Drained user messages");
        Some(format::merge(user_id, &fragments))
    }

    /// Non-blocking read: the merged queue, if anything is queued.
    pub fn try_get_user_message(&self, user_id: &str) -> Option<MailboxMessage> {
        let slot = self.slots.get(user_id)?.clone();
        let mut inbox = lock(&slot.inbox);
        self.drain(user_id, &mut inbox)
    }

    /// Block until something is queued or `timeout` elapses.
    /// Unregistered users can never be sent anything, so their wait ends
    /// at once with the sentinel.
    pub fn get_user_message(&self, user_id: &str, timeout: Duration) -> MailboxMessage {
        let Some(slot) = self.slot(user_id) else {
            warn!(user_id, "Waiting on the mailbox of an unregistered user");
            return MailboxMessage::no_reply(user_id, timeout.as_secs());
        };
        let inbox = lock(&slot.inbox);
        let (mut inbox, _) = slot
            .arrived
            .wait_timeout_while(inbox, timeout, |q| q.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        match self.drain(user_id, &mut inbox) {
            Some(msg) => msg,
            None => {
                info!(user_id, timeout_secs = timeout.as_secs(), "Mailbox wait timed out");
                MailboxMessage::no_reply(user_id, timeout.as_secs())
            }
        }
    }

    /// Async counterpart of [`get_user_message`](Self::get_user_message).
    pub async fn aget_user_message(&self, user_id: &str, timeout: Duration) -> MailboxMessage {
        let Some(slot) = self.slot(user_id) else {
            warn!(user_id, "Waiting on the mailbox of an unregistered user");
            return MailboxMessage::no_reply(user_id, timeout.as_secs());
        };
        let deadline = Instant::now() + timeout;
        loop {
            let drained = {
                let mut inbox = lock(&slot.inbox);
                self.drain(user_id, &mut inbox)
            };
            if let Some(msg) = drained {
                return msg;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let woke = !remaining.is_zero()
                && tokio::time::timeout(remaining, slot.notify.notified())
                    .await
                    .is_ok();
            if !woke {
                // A put may land between the timeout firing and here.
                return self
                    .try_get_user_message(user_id)
                    .unwrap_or_else(|| {
                        info!(user_id, timeout_secs = timeout.as_secs(), "Mailbox wait timed out");
                        MailboxMessage::no_reply(user_id, timeout.as_secs())
                    });
            }
        }
    }

    // ── Session flags ──

    /// The user's live flags.
    pub fn session(&self, user_id: &str) -> SessionConfig {
        self.slots
            .get(user_id)
            .and_then(|slot| *lock(&slot.session))
            .unwrap_or(self.session_defaults)
    }

    pub fn set_session(&self, user_id: &str, session: SessionConfig) {
        match self.slot(user_id) {
            Some(slot) => *lock(&slot.session) = Some(session),
            None => warn!(user_id, "Ignoring session flags for an unregistered user"),
        }
    }

    // ── Outbound ──

    /// Replace the user's reply slot.
    pub fn put_agent_reply(&self, user_id: &str, text: &str, references: Vec<String>, inner: bool) {
        let Some(slot) = self.slot(user_id) else {
            warn!(user_id, "Dropping a reply to an unregistered user");
            return;
        };
        let reply_in_speech = self.session(user_id).reply_in_speech;
        let reply = AgentReply {
            text: text.to_string(),
            references,
            inner,
            reply_in_speech,
        };
        if lock(&slot.reply).replace(reply).is_some() {
            debug!(user_id, "Replaced an unread agent reply");
        }
    }

    /// Take the user's reply, or the "please wait" sentinel if none is ready.
    pub fn get_agent_reply(&self, user_id: &str) -> AgentReply {
        self.slots
            .get(user_id)
            .and_then(|slot| lock(&slot.reply).take())
            .unwrap_or_else(AgentReply::please_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NO_REPLY_TEXT;
    use std::collections::HashMap;

    fn mailbox() -> Arc<Mailbox> {
        let accounts = AccountRegistry::from_parts(
            &["alice".to_string(), "bob".to_string()],
            &HashMap::new(),
        );
        Arc::new(Mailbox::new(Arc::new(accounts)))
    }

    #[test]
    fn unregistered_sender_is_rejected() {
        let mb = mailbox();
        let err = mb
            .put_user_message(ChatMessage::new("mallory", "hi"))
            .unwrap_err();
        assert_eq!(err, MailboxError::UnregisteredUser("mallory".into()));
        assert!(mb.try_get_user_message("mallory").is_none());
    }

    #[test]
    fn lookups_for_unknown_ids_allocate_nothing() {
        let mb = mailbox();
        for i in 0..1000 {
            let id = format!("ghost-{i}");
            assert!(mb.try_get_user_message(&id).is_none());
            assert!(mb.get_agent_reply(&id).is_please_wait());
            mb.put_agent_reply(&id, "hello?", Vec::new(), false);
        }
        assert_eq!(mb.slot_count(), 0);

        let started = Instant::now();
        let msg = mb.get_user_message("ghost-0", Duration::from_secs(30));
        assert!(msg.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(mb.slot_count(), 0);
    }

    #[tokio::test]
    async fn async_wait_for_unknown_id_returns_at_once() {
        let mb = mailbox();
        let msg = mb.aget_user_message("ghost", Duration::from_secs(30)).await;
        assert!(msg.timed_out);
        assert_eq!(mb.slot_count(), 0);
    }

    #[test]
    fn get_drains_and_merges_the_whole_queue() {
        let mb = mailbox();
        mb.put_user_message(ChatMessage::new("alice", "one")).unwrap();
        mb.put_user_message(ChatMessage::new("alice", "two")).unwrap();

        let msg = mb.get_user_message("alice", Duration::from_millis(10));
        assert_eq!(msg.user_msg, "one\ntwo");
        assert!(!msg.timed_out);
        assert!(mb.try_get_user_message("alice").is_none());
    }

    #[test]
    fn blocking_get_times_out_with_sentinel() {
        let mb = mailbox();
        let start = Instant::now();
        let msg = mb.get_user_message("alice", Duration::from_millis(50));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(msg.timed_out);
        assert_eq!(msg.user_msg, NO_REPLY_TEXT);
    }

    #[test]
    fn blocking_get_wakes_on_arrival() {
        let mb = mailbox();
        let writer = {
            let mb = mb.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                mb.put_user_message(ChatMessage::new("alice", "late but in time"))
                    .unwrap();
            })
        };
        let msg = mb.get_user_message("alice", Duration::from_secs(5));
        writer.join().unwrap();
        assert_eq!(msg.user_msg, "late but in time");
    }

    #[tokio::test(start_paused = true)]
    async fn async_get_times_out_with_sentinel() {
        let mb = mailbox();
        let msg = mb.aget_user_message("alice", Duration::from_secs(240)).await;
        assert!(msg.timed_out);
    }

    #[tokio::test]
    async fn async_get_returns_message_arriving_before_deadline() {
        let mb = mailbox();
        let writer = {
            let mb = mb.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                mb.put_user_message(ChatMessage::new("alice", "just in time"))
                    .unwrap();
            })
        };
        let msg = mb.aget_user_message("alice", Duration::from_secs(5)).await;
        writer.await.unwrap();
        assert_eq!(msg.user_msg, "just in time");
        assert!(!msg.timed_out);
    }

    #[tokio::test]
    async fn async_get_sees_already_queued_message() {
        let mb = mailbox();
        mb.put_user_message(ChatMessage::new("alice", "early")).unwrap();
        let msg = mb.aget_user_message("alice", Duration::from_millis(1)).await;
        assert_eq!(msg.user_msg, "early");
    }

    #[test]
    fn put_overwrites_live_session() {
        let mb = mailbox();
        assert_eq!(mb.session("alice"), SessionConfig::default());
        let flags = SessionConfig {
            enable_instruct: true,
            enable_comment: false,
            reply_in_speech: true,
        };
        mb.put_user_message(ChatMessage::new("alice", "hi").with_session(flags))
            .unwrap();
        assert_eq!(mb.session("alice"), flags);
        assert_eq!(mb.session("bob"), SessionConfig::default());
    }

    #[test]
    fn reply_slot_replaces_and_drains() {
        let mb = mailbox();
        assert!(mb.get_agent_reply("alice").is_please_wait());

        mb.put_agent_reply("alice", "thinking...", vec![], true);
        mb.put_agent_reply("alice", "final", vec!["/ref/a".into()], false);

        let reply = mb.get_agent_reply("alice");
        assert_eq!(reply.text, "final");
        assert!(!reply.inner);
        assert_eq!(reply.references, vec!["/ref/a"]);
        assert!(mb.get_agent_reply("alice").is_please_wait());
    }

    #[test]
    fn reply_carries_speech_flag() {
        let mb = mailbox();
        mb.set_session(
            "alice",
            SessionConfig {
                reply_in_speech: true,
                ..SessionConfig::default()
            },
        );
        mb.put_agent_reply("alice", "spoken", vec![], false);
        assert!(mb.get_agent_reply("alice").reply_in_speech);
    }

    #[test]
    fn users_do_not_see_each_others_messages() {
        let mb = mailbox();
        mb.put_user_message(ChatMessage::new("alice", "for alice")).unwrap();
        let bob = mb.get_user_message("bob", Duration::from_millis(10));
        assert!(bob.timed_out);
        assert_eq!(
            mb.try_get_user_message("alice").unwrap().user_msg,
            "for alice"
        );
    }
}

//! The COLLECT → DESCRIBE → CONFIRM → EXECUTE/ABORT driver.
//!
//! `authorize` blocks on the mailbox and the LLM; `aauthorize` awaits them.
//! Both walk the same phases and make the same decisions for the same
//! replies.

use super::collect::{self, MAX_COLLECT_ROUNDS};
use super::verdict::{self, AGREE_WORD, DISAGREE_WORD};
use super::{AuthPhase, GatedOperation, OperationOutcome, OperationResult, Params};
use parley_core::error::{LlmError, ToolError};
use parley_core::event::{AgentEvent, EventBus};
use parley_core::llm::{Llm, PromptTemplate};
use parley_core::tool::ToolContext;
use parley_core::tool_log::SystemLog;
use parley_mailbox::{Mailbox, MailboxMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct AuthorizerSettings {
    /// Match confirmations against a fixed vocabulary instead of the LLM.
    pub strict: bool,
    /// Wait bound for each question put to the user.
    pub timeout: Duration,
}

impl Default for AuthorizerSettings {
    fn default() -> Self {
        Self {
            strict: false,
            timeout: Duration::from_secs(240),
        }
    }
}

pub struct OperationAuthorizer {
    mailbox: Arc<Mailbox>,
    llm: Arc<dyn Llm>,
    settings: AuthorizerSettings,
    events: Option<Arc<EventBus>>,
}

/// What the caller learned from one reply during COLLECT.
enum CollectStep {
    Continue,
    Abort(String),
}

impl OperationAuthorizer {
    pub fn new(mailbox: Arc<Mailbox>, llm: Arc<dyn Llm>, settings: AuthorizerSettings) -> Self {
        Self {
            mailbox,
            llm,
            settings,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> AuthorizerSettings {
        self.settings
    }

    fn enter(&self, op: &dyn GatedOperation, ctx: &ToolContext, phase: AuthPhase) {
        debug!(user_id = %ctx.user_id, operation = op.name(), phase = %phase, "Authorization phase");
        if let Some(events) = &self.events {
            events.publish(AgentEvent::AuthorizationPhase {
                user_id: ctx.user_id.clone(),
                operation: op.name().to_string(),
                phase: phase.to_string(),
            });
        }
    }

    fn ask(&self, ctx: &ToolContext, text: &str) {
        self.mailbox.put_agent_reply(&ctx.user_id, text, Vec::new(), true);
    }

    fn confirm_query(&self, description: &str) -> String {
        if self.settings.strict {
            PromptTemplate::new(verdict::STRICT_CONFIRM_QUERY).format(&[
                ("description", description),
                ("words", &verdict::STRICT_AGREE_WORDS.join(" / ")),
            ])
        } else {
            PromptTemplate::new(verdict::CONFIRM_QUERY).format(&[("description", description)])
        }
    }

    fn initial_params(args: &serde_json::Value) -> Params {
        match args {
            serde_json::Value::Object(map) => map.clone(),
            _ => Params::new(),
        }
    }

    // ── Decisions shared by both drivers ──

    /// Interpret an abort-classifier answer. Classifier failure aborts.
    fn abort_verdict(raw: Result<String, LlmError>) -> bool {
        match raw {
            Ok(text) => !verdict::classifier_says(&text, DISAGREE_WORD),
            Err(e) => {
                warn!(error = %e, "Abort classifier failed, treating reply as abort");
                true
            }
        }
    }

    /// Interpret a consent-classifier answer. Classifier failure disagrees.
    fn agree_verdict(raw: Result<String, LlmError>) -> bool {
        match raw {
            Ok(text) => verdict::classifier_says(&text, AGREE_WORD),
            Err(e) => {
                warn!(error = %e, "Consent classifier failed, treating reply as disagree");
                false
            }
        }
    }

    fn after_reply(
        &self,
        reply: &MailboxMessage,
        wants_abort: bool,
        missing: &[super::FieldSpec],
        params: &mut Params,
    ) -> CollectStep {
        if reply.timed_out || wants_abort {
            return CollectStep::Abort(reply.user_msg.clone());
        }
        params.extend(collect::parse_reply(&reply.user_msg, missing));
        CollectStep::Continue
    }

    // ── Outcomes ──

    fn abort(
        &self,
        op: &dyn GatedOperation,
        ctx: &ToolContext,
        phase: AuthPhase,
        description: &str,
        response: &str,
        params: Params,
    ) -> OperationOutcome {
        self.enter(op, ctx, AuthPhase::Abort);
        let user = &ctx.user_id;
        let output = match phase {
            AuthPhase::Collect => format!(
                "The user {user} aborted collecting the information needed by the operation `{}`; \
                 it was not performed.\n\nThe user's response is as follows:\n{response}",
                op.name()
            ),
            _ => format!(
                "The user {user} declined the operation; it was not performed.\n\
                 The operation is described as follows:\n{description}\n\n\
                 The user's response is as follows:\n{response}"
            ),
        };
        info!(user_id = %user, operation = op.name(), phase = %phase, "Operation aborted");
        self.publish(ctx, op, true);
        OperationOutcome {
            output,
            log_to_user: Some(format!("The operation `{}` was cancelled.", op.name())),
            log_to_system: SystemLog {
                description: format!(
                    "The operation `{}` was not performed: the user declined at {phase}.",
                    op.name()
                ),
                references: Vec::new(),
            },
            aborted: true,
            params,
        }
    }

    fn executed(
        &self,
        op: &dyn GatedOperation,
        ctx: &ToolContext,
        description: String,
        result: Result<OperationResult, ToolError>,
        params: Params,
    ) -> OperationOutcome {
        self.publish(ctx, op, false);
        match result {
            Ok(result) => {
                info!(user_id = %ctx.user_id, operation = op.name(), "Operation executed");
                OperationOutcome {
                    output: result.output,
                    log_to_user: result.log_to_user,
                    log_to_system: SystemLog {
                        description,
                        references: result.references,
                    },
                    aborted: false,
                    params,
                }
            }
            Err(e) => {
                warn!(user_id = %ctx.user_id, operation = op.name(), error = %e, "Operation failed");
                OperationOutcome {
                    output: format!("The operation `{}` failed: {e}", op.name()),
                    log_to_user: None,
                    log_to_system: SystemLog {
                        description: format!("Failed to perform:\n{description}\nError: {e}"),
                        references: Vec::new(),
                    },
                    aborted: false,
                    params,
                }
            }
        }
    }

    fn publish(&self, ctx: &ToolContext, op: &dyn GatedOperation, aborted: bool) {
        if let Some(events) = &self.events {
            events.publish(AgentEvent::AuthorizationResolved {
                user_id: ctx.user_id.clone(),
                operation: op.name().to_string(),
                aborted,
            });
        }
    }

    // ── Blocking driver ──

    fn wants_abort(&self, op: &dyn GatedOperation, reply: &str) -> bool {
        if self.settings.strict {
            return verdict::strict_abort(reply);
        }
        Self::abort_verdict(self.llm.predict(
            &verdict::abort_classifier(),
            &[
                ("operation", op.name()),
                ("response", reply),
                ("abort_word", AGREE_WORD),
                ("continue_word", DISAGREE_WORD),
            ],
        ))
    }

    fn agrees(&self, description: &str, reply: &str) -> bool {
        if self.settings.strict {
            return verdict::strict_agree(reply);
        }
        Self::agree_verdict(self.llm.predict(
            &verdict::confirm_classifier(),
            &[
                ("description", description),
                ("response", reply),
                ("agree_word", AGREE_WORD),
                ("disagree_word", DISAGREE_WORD),
            ],
        ))
    }

    /// Run the whole flow, blocking on the user and the LLM.
    pub fn authorize(
        &self,
        op: &dyn GatedOperation,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> OperationOutcome {
        let mut params = Self::initial_params(args);
        let required = op.required_fields();

        for round in 0..MAX_COLLECT_ROUNDS {
            let missing = collect::missing_fields(&required, &params);
            if missing.is_empty() {
                break;
            }
            debug!(operation = op.name(), round, missing = missing.len(), "Missing fields");
            self.enter(op, ctx, AuthPhase::Collect);
            self.ask(ctx, &collect::question(op.name(), &missing));
            let reply = self.mailbox.get_user_message(&ctx.user_id, self.settings.timeout);
            let abort = !reply.timed_out && self.wants_abort(op, &reply.user_msg);
            if let CollectStep::Abort(resp) = self.after_reply(&reply, abort, &missing, &mut params) {
                return self.abort(op, ctx, AuthPhase::Collect, "", &resp, params);
            }
        }
        if !collect::missing_fields(&required, &params).is_empty() {
            return self.abort(
                op,
                ctx,
                AuthPhase::Collect,
                "",
                "The required information was not provided.",
                params,
            );
        }

        self.enter(op, ctx, AuthPhase::Describe);
        let description = op.describe(&params);
        self.enter(op, ctx, AuthPhase::Confirm);
        self.ask(ctx, &self.confirm_query(&description));
        let reply = self.mailbox.get_user_message(&ctx.user_id, self.settings.timeout);
        if reply.timed_out || !self.agrees(&description, &reply.user_msg) {
            return self.abort(op, ctx, AuthPhase::Confirm, &description, &reply.user_msg, params);
        }

        self.enter(op, ctx, AuthPhase::Execute);
        let result = op.execute(&params, ctx);
        self.executed(op, ctx, description, result, params)
    }

    // ── Async driver ──

    async fn awants_abort(&self, op: &dyn GatedOperation, reply: &str) -> bool {
        if self.settings.strict {
            return verdict::strict_abort(reply);
        }
        Self::abort_verdict(
            self.llm
                .apredict(
                    &verdict::abort_classifier(),
                    &[
                        ("operation", op.name()),
                        ("response", reply),
                        ("abort_word", AGREE_WORD),
                        ("continue_word", DISAGREE_WORD),
                    ],
                )
                .await,
        )
    }

    async fn aagrees(&self, description: &str, reply: &str) -> bool {
        if self.settings.strict {
            return verdict::strict_agree(reply);
        }
        Self::agree_verdict(
            self.llm
                .apredict(
                    &verdict::confirm_classifier(),
                    &[
                        ("description", description),
                        ("response", reply),
                        ("agree_word", AGREE_WORD),
                        ("disagree_word", DISAGREE_WORD),
                    ],
                )
                .await,
        )
    }

    /// Run the whole flow, awaiting the user and the LLM.
    pub async fn aauthorize(
        &self,
        op: &dyn GatedOperation,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> OperationOutcome {
        let mut params = Self::initial_params(args);
        let required = op.required_fields();

        for round in 0..MAX_COLLECT_ROUNDS {
            let missing = collect::missing_fields(&required, &params);
            if missing.is_empty() {
                break;
            }
            debug!(operation = op.name(), round, missing = missing.len(), "Missing fields");
            self.enter(op, ctx, AuthPhase::Collect);
            self.ask(ctx, &collect::question(op.name(), &missing));
            let reply = self
                .mailbox
                .aget_user_message(&ctx.user_id, self.settings.timeout)
                .await;
            let abort = !reply.timed_out && self.awants_abort(op, &reply.user_msg).await;
            if let CollectStep::Abort(resp) = self.after_reply(&reply, abort, &missing, &mut params) {
                return self.abort(op, ctx, AuthPhase::Collect, "", &resp, params);
            }
        }
        if !collect::missing_fields(&required, &params).is_empty() {
            return self.abort(
                op,
                ctx,
                AuthPhase::Collect,
                "",
                "The required information was not provided.",
                params,
            );
        }

        self.enter(op, ctx, AuthPhase::Describe);
        let description = op.describe(&params);
        self.enter(op, ctx, AuthPhase::Confirm);
        self.ask(ctx, &self.confirm_query(&description));
        let reply = self
            .mailbox
            .aget_user_message(&ctx.user_id, self.settings.timeout)
            .await;
        if reply.timed_out || !self.aagrees(&description, &reply.user_msg).await {
            return self.abort(op, ctx, AuthPhase::Confirm, &description, &reply.user_msg, params);
        }

        self.enter(op, ctx, AuthPhase::Execute);
        let result = op.aexecute(&params, ctx).await;
        self.executed(op, ctx, description, result, params)
    }
}

#[cfg(test)]
mod tests {
    use super::super::FieldSpec;
    use super::*;
    use async_trait::async_trait;
    use parley_core::llm::LlmResponse;
    use parley_core::message::Message;
    use parley_mailbox::{AccountRegistry, ChatMessage};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts executions so tests can prove EXECUTE never ran.
    struct CountingOp {
        runs: AtomicUsize,
    }

    impl GatedOperation for CountingOp {
        fn name(&self) -> &str {
            "book_instrument"
        }
        fn description(&self) -> &str {
            "Book a lab instrument"
        }
        fn required_fields(&self) -> Vec<FieldSpec> {
            vec![
                FieldSpec::new("instrument", "Instrument name"),
                FieldSpec::new("slot", "Time slot"),
            ]
        }
        fn describe(&self, params: &Params) -> String {
            format!("Book:\n{}", collect::render_params(params))
        }
        fn execute(&self, _params: &Params, _ctx: &ToolContext) -> Result<OperationResult, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(OperationResult {
                output: "booked".into(),
                log_to_user: Some("Your booking is confirmed.".into()),
                references: vec!["booking/42".into()],
            })
        }
    }

    /// Replies with scripted classifier answers.
    struct ScriptedLlm {
        answers: Mutex<Vec<Result<String, LlmError>>>,
    }

    impl ScriptedLlm {
        fn new(answers: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers),
            })
        }
    }

    #[async_trait]
    impl Llm for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }
        fn chat(&self, _messages: &[Message]) -> Result<LlmResponse, LlmError> {
            let mut answers = self.answers.lock().unwrap();
            assert!(!answers.is_empty(), "classifier called more often than scripted");
            answers.remove(0).map(LlmResponse::new)
        }
        async fn achat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
            self.chat(messages)
        }
    }

    fn setup(strict: bool, llm: Arc<dyn Llm>) -> (Arc<Mailbox>, OperationAuthorizer) {
        let accounts = AccountRegistry::from_parts(&["alice".to_string()], &HashMap::new());
        let mailbox = Arc::new(Mailbox::new(Arc::new(accounts)));
        let auth = OperationAuthorizer::new(
            mailbox.clone(),
            llm,
            AuthorizerSettings {
                strict,
                timeout: Duration::from_millis(200),
            },
        );
        (mailbox, auth)
    }

    fn say(mailbox: &Mailbox, text: &str) {
        mailbox
            .put_user_message(ChatMessage::new("alice", text))
            .unwrap();
    }

    fn op() -> CountingOp {
        CountingOp {
            runs: AtomicUsize::new(0),
        }
    }

    fn full_args() -> serde_json::Value {
        serde_json::json!({"instrument": "SEM", "slot": "Mon 9am"})
    }

    #[test]
    fn strict_yes_executes() {
        let (mailbox, auth) = setup(true, ScriptedLlm::new(vec![]));
        let op = op();
        say(&mailbox, "yes");
        let out = auth.authorize(&op, &full_args(), &ToolContext::new("alice"));
        assert!(!out.aborted);
        assert_eq!(out.output, "booked");
        assert_eq!(out.log_to_system.references, vec!["booking/42"]);
        assert_eq!(op.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_at_confirm_aborts_without_side_effects() {
        let (mailbox, auth) = setup(true, ScriptedLlm::new(vec![]));
        let op = op();
        say(&mailbox, "no");
        let out = auth.authorize(&op, &full_args(), &ToolContext::new("alice"));
        assert!(out.aborted);
        assert!(out.output.contains("declined"));
        assert!(out.output.contains("SEM"));
        assert_eq!(op.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn confirm_question_is_an_inner_reply() {
        let (mailbox, auth) = setup(true, ScriptedLlm::new(vec![]));
        let op = op();
        let out = auth.authorize(&op, &full_args(), &ToolContext::new("alice"));
        // Nobody answered: timeout means disagree.
        assert!(out.aborted);
        let reply = mailbox.get_agent_reply("alice");
        assert!(reply.inner);
        assert!(reply.text.contains("Mon 9am"));
        assert_eq!(op.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn collect_fills_missing_fields_then_confirms() {
        let (mailbox, auth) = setup(true, ScriptedLlm::new(vec![]));
        let op = op();
        say(&mailbox, "instrument: XRD\nslot: Tue 2pm");
        let writer = {
            let mailbox = mailbox.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                say(&mailbox, "ok");
            })
        };
        let out = auth.authorize(&op, &serde_json::json!({}), &ToolContext::new("alice"));
        writer.join().unwrap();
        assert!(!out.aborted, "{}", out.output);
        assert_eq!(out.params["instrument"], "XRD");
        assert_eq!(op.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_during_collect_aborts() {
        let (mailbox, auth) = setup(true, ScriptedLlm::new(vec![]));
        let op = op();
        say(&mailbox, "cancel");
        let out = auth.authorize(&op, &serde_json::json!({"instrument": "SEM"}), &ToolContext::new("alice"));
        assert!(out.aborted);
        assert!(out.output.contains("aborted collecting"));
        assert_eq!(op.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn classifier_garbage_means_disagree() {
        let llm = ScriptedLlm::new(vec![Ok("I believe the user is happy".into())]);
        let (mailbox, auth) = setup(false, llm);
        let op = op();
        say(&mailbox, "sure, go ahead");
        let out = auth.authorize(&op, &full_args(), &ToolContext::new("alice"));
        assert!(out.aborted);
        assert_eq!(op.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn classifier_error_means_disagree() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Network("down".into()))]);
        let (mailbox, auth) = setup(false, llm);
        let op = op();
        say(&mailbox, "yes");
        assert!(auth.authorize(&op, &full_args(), &ToolContext::new("alice")).aborted);
    }

    fn phases(rx: &mut tokio::sync::broadcast::Receiver<Arc<AgentEvent>>) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::AuthorizationPhase { phase, .. } = event.as_ref() {
                seen.push(phase.clone());
            }
        }
        seen
    }

    #[test]
    fn phases_are_published_in_order() {
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let (mailbox, auth) = setup(true, ScriptedLlm::new(vec![]));
        let auth = auth.with_events(events);
        let op = op();

        say(&mailbox, "slot: Fri 10am");
        let writer = {
            let mailbox = mailbox.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                say(&mailbox, "yes");
            })
        };
        let out = auth.authorize(&op, &serde_json::json!({"instrument": "SEM"}), &ToolContext::new("alice"));
        writer.join().unwrap();
        assert!(!out.aborted, "{}", out.output);
        assert_eq!(phases(&mut rx), vec!["COLLECT", "DESCRIBE", "CONFIRM", "EXECUTE"]);

        say(&mailbox, "no");
        let out = auth.authorize(&op, &full_args(), &ToolContext::new("alice"));
        assert!(out.aborted);
        assert_eq!(phases(&mut rx), vec!["DESCRIBE", "CONFIRM", "ABORT"]);
    }

    #[tokio::test]
    async fn async_classifier_yes_executes() {
        let llm = ScriptedLlm::new(vec![Ok("Yes.".into())]);
        let (mailbox, auth) = setup(false, llm);
        let op = op();
        say(&mailbox, "go for it");
        let out = auth
            .aauthorize(&op, &full_args(), &ToolContext::new("alice"))
            .await;
        assert!(!out.aborted);
        assert_eq!(out.log_to_user.as_deref(), Some("Your booking is confirmed."));
        assert_eq!(op.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_no_aborts() {
        let (mailbox, auth) = setup(true, ScriptedLlm::new(vec![]));
        let op = op();
        say(&mailbox, "no");
        let out = auth
            .aauthorize(&op, &full_args(), &ToolContext::new("alice"))
            .await;
        assert!(out.aborted);
        assert_eq!(op.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_collect_with_non_strict_abort_check() {
        // First classifier call: "does the user want to abort?" -> no.
        // Second: "does the user agree?" -> yes.
        let llm = ScriptedLlm::new(vec![Ok("no".into()), Ok("yes".into())]);
        let (mailbox, auth) = setup(false, llm);
        let op = op();
        say(&mailbox, "Tue 2pm");
        let pending = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                say(&mailbox, "yes");
            })
        };
        let out = auth
            .aauthorize(&op, &serde_json::json!({"instrument": "SEM"}), &ToolContext::new("alice"))
            .await;
        pending.await.unwrap();
        assert!(!out.aborted, "{}", out.output);
        assert_eq!(out.params["slot"], "Tue 2pm");
    }
}

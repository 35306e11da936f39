//! Command pipeline
//!
//! Runs one command invocation through a fixed sequence of stages:
//! Validate, RateCheck, Authorize, Log, Execute. Any stage may
//! short-circuit to Rejected with a polite reply; only Execute can fail.
//! The stage order is observable: an invocation that is both invalid and
//! over quota is rejected for validation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditOutcome, AuditRecord, AuditSink};
use crate::auth::Role;
use crate::cache::{CacheKey, ResultCache};
use crate::commands::{
    CommandCategory, CommandError, CommandRegistry, HandlerContext, Services,
};
use crate::metrics::names;
use crate::ratelimit::{ActionClass, RateLimiter, RateQuotas};

/// Bounds enforced by the validate stage.
pub const MAX_COMMAND_LEN: usize = 50;
pub const MAX_ARG_LEN: usize = 500;

const INVALID_INPUT_REPLY: &str = "That input doesn't look right. Please try again.";
const GENERIC_FAILURE_REPLY: &str = "Something went wrong on my side. Please try again later.";

/// A parsed inbound command, before any gate has run.
#[derive(Debug, Clone)]
pub struct InboundCommand {
    pub sender_id: String,
    pub conversation_id: String,
    pub command: String,
    pub args: Vec<String>,
}

/// Pipeline stages, in order. Terminal states are the last three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Validated,
    RateChecked,
    Authorized,
    Logged,
    Executed,
    Completed,
    Rejected,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Created => "created",
            Stage::Validated => "validated",
            Stage::RateChecked => "rate_checked",
            Stage::Authorized => "authorized",
            Stage::Logged => "logged",
            Stage::Executed => "executed",
            Stage::Completed => "completed",
            Stage::Rejected => "rejected",
            Stage::Failed => "failed",
        }
    }
}

/// Transient per-invocation state. Created per inbound command and
/// discarded once the pipeline completes; never persisted.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: String,
    pub sender_id: String,
    pub conversation_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub stage: Stage,
}

impl Invocation {
    fn new(cmd: InboundCommand) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: cmd.sender_id,
            conversation_id: cmd.conversation_id,
            command: cmd.command,
            args: cmd.args,
            received_at: Utc::now(),
            stage: Stage::Created,
        }
    }
}

/// Terminal result of one invocation, with the chat reply to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { reply: String },
    Rejected { reply: String },
    Failed { reply: String },
}

impl Outcome {
    pub fn reply(&self) -> &str {
        match self {
            Outcome::Completed { reply } | Outcome::Rejected { reply } | Outcome::Failed { reply } => {
                reply
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    fn audit_outcome(&self) -> AuditOutcome {
        match self {
            Outcome::Completed { .. } => AuditOutcome::Completed,
            Outcome::Rejected { .. } => AuditOutcome::Rejected,
            Outcome::Failed { .. } => AuditOutcome::Failed,
        }
    }
}

/// The ordered middleware pipeline.
pub struct CommandProcessor {
    registry: Arc<CommandRegistry>,
    limiter: Arc<RateLimiter>,
    quotas: RateQuotas,
    cache: Arc<ResultCache>,
    audit: Arc<dyn AuditSink>,
    services: Services,
}

impl CommandProcessor {
    pub fn new(
        registry: Arc<CommandRegistry>,
        limiter: Arc<RateLimiter>,
        quotas: RateQuotas,
        cache: Arc<ResultCache>,
        audit: Arc<dyn AuditSink>,
        services: Services,
    ) -> Self {
        Self {
            registry,
            limiter,
            quotas,
            cache,
            audit,
            services,
        }
    }

    /// Run one invocation to a terminal outcome. Never panics and never
    /// propagates an error: every path ends in a chat-ready reply.
    pub async fn process(&self, cmd: InboundCommand) -> Outcome {
        let mut inv = Invocation::new(cmd);
        let prefix = self.services.config.command_prefix();

        // Validate
        if let Err(reason) = validate(&inv) {
            debug!(invocation = %inv.id, reason = %reason, "input rejected by validation");
            return self.reject(&mut inv, INVALID_INPUT_REPLY.to_string(), Some(reason));
        }
        inv.stage = Stage::Validated;

        // RateCheck: quotas are category-driven; the first violated quota
        // wins. Unknown commands fall back to the general quotas and are
        // rejected at Authorize (fail closed).
        let category = self
            .registry
            .get(&inv.command)
            .map(|h| h.category())
            .unwrap_or(CommandCategory::General);
        if let Some(reply) = self.rate_check(&inv, category) {
            warn!(
                invocation = %inv.id,
                sender = %inv.sender_id,
                command = %inv.command,
                "rate limit exceeded"
            );
            return self.reject(&mut inv, reply, Some("rate limited".to_string()));
        }
        inv.stage = Stage::RateChecked;

        // Authorize
        let Some(handler) = self.registry.get(&inv.command) else {
            let reply = format!("Unknown command '{}'. Try {}help.", inv.command, prefix);
            return self.reject(
                &mut inv,
                reply,
                Some("unknown command".to_string()),
            );
        };
        let role = self.services.guard.role_of(&inv.sender_id);
        if !role.satisfies(handler.required_role()) {
            warn!(
                invocation = %inv.id,
                sender = %inv.sender_id,
                command = %inv.command,
                role = %role,
                required = %handler.required_role(),
                "permission denied"
            );
            let err = CommandError::PermissionDenied {
                required: handler.required_role(),
            };
            return self.reject(&mut inv, err.user_message(&prefix), Some(err.to_string()));
        }
        inv.stage = Stage::Authorized;

        // Log: record the accepted invocation and bump usage counters. A
        // sink error never fails the invocation.
        self.record(&inv, AuditOutcome::Accepted, None);
        self.services.metrics.counter(names::COMMANDS_RECEIVED).inc();
        info!(
            invocation = %inv.id,
            sender = %inv.sender_id,
            conversation = %inv.conversation_id,
            command = %inv.command,
            "command accepted"
        );
        inv.stage = Stage::Logged;

        // Execute
        let cache_key = CacheKey::new(&inv.command, &inv.args, &inv.sender_id);
        if handler.cacheable() {
            if let Some(hit) = self.cache.get(&cache_key) {
                debug!(invocation = %inv.id, command = %inv.command, "cache hit");
                return self.complete(&mut inv, hit);
            }
        }

        let ctx = HandlerContext {
            transport: self.services.transport.clone(),
            conversation_id: inv.conversation_id.clone(),
            sender_id: inv.sender_id.clone(),
            sender_role: role,
            args: inv.args.clone(),
            command_index: self.registry.list(),
            services: self.services.clone(),
        };
        inv.stage = Stage::Executed;
        match handler.execute(&ctx).await {
            Ok(reply) => {
                if handler.cacheable() {
                    self.cache.put(cache_key, reply.clone());
                }
                self.complete(&mut inv, reply)
            }
            Err(err) if err.is_rejection() => {
                let reply = err.user_message(&prefix);
                self.reject(&mut inv, reply, Some(err.to_string()))
            }
            Err(err) => {
                error!(
                    invocation = %inv.id,
                    command = %inv.command,
                    error = %err,
                    "command execution failed"
                );
                let mut reply = GENERIC_FAILURE_REPLY.to_string();
                // Diagnostic detail only for trusted senders.
                if role.satisfies(Role::Admin) {
                    reply.push_str(&format!(" ({})", err));
                }
                self.fail(&mut inv, reply, Some(err.to_string()))
            }
        }
    }

    /// Category-driven quota evaluation; returns the quota-specific
    /// warning of the first violation.
    fn rate_check(&self, inv: &Invocation, category: CommandCategory) -> Option<String> {
        if !self
            .limiter
            .check(&inv.sender_id, ActionClass::Command, self.quotas.commands)
        {
            return Some(
                "You're sending commands too quickly. Give it a minute.".to_string(),
            );
        }
        if !self.limiter.check(
            &inv.conversation_id,
            ActionClass::Message,
            self.quotas.messages,
        ) {
            return Some(
                "This conversation is getting too busy. Try again shortly.".to_string(),
            );
        }
        match category {
            CommandCategory::Fun => {
                let kind = inv.args.first().map(|s| s.to_lowercase()).unwrap_or_default();
                let key = format!("{}:{}", inv.sender_id, kind);
                if !self
                    .limiter
                    .check(&key, ActionClass::FunStart, self.quotas.fun_starts)
                {
                    return Some(
                        "You're starting fun loops too often. Slow down a little.".to_string(),
                    );
                }
            }
            CommandCategory::Admin => {
                if !self.limiter.check(
                    &inv.sender_id,
                    ActionClass::AdminAction,
                    self.quotas.admin_actions,
                ) {
                    return Some(
                        "Too many admin actions in a row. Try again in a minute.".to_string(),
                    );
                }
            }
            CommandCategory::General => {}
        }
        None
    }

    fn complete(&self, inv: &mut Invocation, reply: String) -> Outcome {
        inv.stage = Stage::Completed;
        self.services.metrics.counter(names::COMMANDS_EXECUTED).inc();
        let outcome = Outcome::Completed { reply };
        self.record(inv, outcome.audit_outcome(), None);
        outcome
    }

    fn reject(&self, inv: &mut Invocation, reply: String, detail: Option<String>) -> Outcome {
        inv.stage = Stage::Rejected;
        self.services.metrics.counter(names::COMMANDS_REJECTED).inc();
        let outcome = Outcome::Rejected { reply };
        self.record(inv, outcome.audit_outcome(), detail);
        outcome
    }

    fn fail(&self, inv: &mut Invocation, reply: String, detail: Option<String>) -> Outcome {
        inv.stage = Stage::Failed;
        self.services.metrics.counter(names::COMMANDS_FAILED).inc();
        let outcome = Outcome::Failed { reply };
        self.record(inv, outcome.audit_outcome(), detail);
        outcome
    }

    fn record(&self, inv: &Invocation, outcome: AuditOutcome, detail: Option<String>) {
        let record = AuditRecord {
            ts: Utc::now(),
            invocation_id: inv.id.clone(),
            sender_id: inv.sender_id.clone(),
            conversation_id: inv.conversation_id.clone(),
            command: inv.command.clone(),
            args: inv.args.clone(),
            outcome,
            detail,
        };
        if let Err(e) = self.audit.record(&record) {
            warn!(invocation = %inv.id, error = %e, "audit sink write failed");
        }
    }
}

/// Content filter: length bounds, no control characters, ids present.
/// The reason string is for server logs only; callers reply with the
/// generic invalid-input message.
fn validate(inv: &Invocation) -> Result<(), String> {
    if inv.sender_id.trim().is_empty() {
        return Err("missing sender id".to_string());
    }
    if inv.conversation_id.trim().is_empty() {
        return Err("missing conversation id".to_string());
    }
    let name_len = inv.command.chars().count();
    if name_len == 0 || name_len > MAX_COMMAND_LEN {
        return Err(format!("command name length {} out of bounds", name_len));
    }
    if inv.command.chars().any(char::is_control) {
        return Err("command name contains control characters".to_string());
    }
    for (i, arg) in inv.args.iter().enumerate() {
        if arg.chars().count() > MAX_ARG_LEN {
            return Err(format!("argument {} too long", i));
        }
        if arg.chars().any(char::is_control) {
            return Err(format!("argument {} contains control characters", i));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::FileAuditLog;
    use crate::auth::{hash_subject, RoleGuard};
    use crate::commands::builtins::register_builtins;
    use crate::commands::CommandHandler;
    use crate::config::{BotConfig, ConfigStore};
    use crate::funloop::{FunLoopConfig, FunLoopEngine, TemplateLibrary};
    use crate::metrics::MetricsRegistry;
    use crate::ratelimit::Quota;
    use crate::transport::{DynTransport, MemoryTransport};
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    struct BoomCommand;

    #[async_trait]
    impl CommandHandler for BoomCommand {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn required_role(&self) -> Role {
            Role::User
        }
        async fn execute(&self, _ctx: &HandlerContext) -> Result<String, CommandError> {
            Err(CommandError::Internal("kaboom".to_string()))
        }
    }

    struct TestBot {
        processor: CommandProcessor,
        cache: Arc<ResultCache>,
        services: Services,
        _dir: tempfile::TempDir,
    }

    fn make_bot(quotas: RateQuotas) -> TestBot {
        let dir = tempfile::tempdir().unwrap();
        let dyn_transport: DynTransport = Arc::new(MemoryTransport::new());
        let guard = Arc::new(RoleGuard::new(
            Some(hash_subject("owner1")),
            ["admin1".to_string()],
        ));
        let config = Arc::new(ConfigStore::in_memory(
            dir.path().join("config.json"),
            BotConfig::default(),
        ));
        let metrics = Arc::new(MetricsRegistry::new());
        let fun = Arc::new(FunLoopEngine::new(
            dyn_transport.clone(),
            Arc::new(TemplateLibrary::builtin()),
            FunLoopConfig {
                tick_interval: Duration::from_millis(10),
                jitter: Duration::ZERO,
                max_duration: Duration::from_secs(60),
            },
            metrics.clone(),
        ));
        let services = Services {
            transport: dyn_transport,
            guard,
            config,
            fun,
            metrics,
            started_at: Instant::now(),
        };

        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry).unwrap();
        registry.register(Arc::new(BoomCommand)).unwrap();

        let cache = Arc::new(ResultCache::default());
        let audit = Arc::new(FileAuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let processor = CommandProcessor::new(
            Arc::new(registry),
            Arc::new(RateLimiter::new()),
            quotas,
            cache.clone(),
            audit,
            services.clone(),
        );
        TestBot {
            processor,
            cache,
            services,
            _dir: dir,
        }
    }

    fn cmd(sender: &str, command: &str, args: &[&str]) -> InboundCommand {
        InboundCommand {
            sender_id: sender.to_string(),
            conversation_id: "t1".to_string(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_completed_command() {
        let bot = make_bot(RateQuotas::default());
        let outcome = bot.processor.process(cmd("stranger", "ping", &[])).await;
        assert_eq!(
            outcome,
            Outcome::Completed {
                reply: "pong".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_command_rejected_with_help_hint() {
        let bot = make_bot(RateQuotas::default());
        let outcome = bot.processor.process(cmd("stranger", "nosuch", &[])).await;
        assert!(outcome.is_rejected());
        assert!(outcome.reply().contains("!help"));
    }

    #[tokio::test]
    async fn test_stranger_startfun_rejected_at_authorize() {
        let bot = make_bot(RateQuotas::default());
        let outcome = bot
            .processor
            .process(cmd("stranger", "startfun", &["chor"]))
            .await;
        assert!(outcome.is_rejected());
        assert!(outcome.reply().contains("admin access"));
        // No loop state was created.
        assert!(!bot.services.fun.is_active("t1"));
    }

    #[tokio::test]
    async fn test_owner_satisfies_admin_tier() {
        let bot = make_bot(RateQuotas::default());
        let outcome = bot
            .processor
            .process(cmd("owner1", "startfun", &["chor"]))
            .await;
        assert!(outcome.is_completed());
        assert!(bot.services.fun.is_active("t1"));
        bot.services.fun.stop("t1").unwrap();
    }

    #[tokio::test]
    async fn test_validation_rejects_control_characters() {
        let bot = make_bot(RateQuotas::default());
        let outcome = bot
            .processor
            .process(cmd("stranger", "ping", &["a\u{0}b"]))
            .await;
        assert!(outcome.is_rejected());
        assert_eq!(outcome.reply(), INVALID_INPUT_REPLY);
    }

    #[tokio::test]
    async fn test_validation_rejects_oversized_input() {
        let bot = make_bot(RateQuotas::default());

        let long_name = "x".repeat(MAX_COMMAND_LEN + 1);
        let outcome = bot.processor.process(cmd("stranger", &long_name, &[])).await;
        assert_eq!(outcome.reply(), INVALID_INPUT_REPLY);

        let long_arg = "y".repeat(MAX_ARG_LEN + 1);
        let outcome = bot
            .processor
            .process(cmd("stranger", "ping", &[&long_arg]))
            .await;
        assert_eq!(outcome.reply(), INVALID_INPUT_REPLY);
    }

    #[tokio::test]
    async fn test_validation_requires_ids() {
        let bot = make_bot(RateQuotas::default());
        let mut invocation = cmd("", "ping", &[]);
        let outcome = bot.processor.process(invocation.clone()).await;
        assert_eq!(outcome.reply(), INVALID_INPUT_REPLY);

        invocation = cmd("stranger", "ping", &[]);
        invocation.conversation_id = String::new();
        let outcome = bot.processor.process(invocation).await;
        assert_eq!(outcome.reply(), INVALID_INPUT_REPLY);
    }

    #[tokio::test]
    async fn test_validation_short_circuits_before_rate_limit() {
        // A zero-allowance quota would reject everything at RateCheck,
        // but invalid input must be rejected by Validate first.
        let mut quotas = RateQuotas::default();
        quotas.commands = Quota::new(0, Duration::from_secs(60));
        let bot = make_bot(quotas);

        let outcome = bot
            .processor
            .process(cmd("stranger", "ping", &["a\u{0}b"]))
            .await;
        assert_eq!(outcome.reply(), INVALID_INPUT_REPLY);

        // Valid input now hits the quota message instead.
        let outcome = bot.processor.process(cmd("stranger", "ping", &[])).await;
        assert!(outcome.reply().contains("too quickly"));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_after_quota() {
        let mut quotas = RateQuotas::default();
        quotas.commands = Quota::new(2, Duration::from_secs(60));
        let bot = make_bot(quotas);

        assert!(bot
            .processor
            .process(cmd("stranger", "ping", &[]))
            .await
            .is_completed());
        assert!(bot
            .processor
            .process(cmd("stranger", "ping", &[]))
            .await
            .is_completed());

        let outcome = bot.processor.process(cmd("stranger", "ping", &[])).await;
        assert!(outcome.is_rejected());
        assert!(outcome.reply().contains("too quickly"));
    }

    #[tokio::test]
    async fn test_cacheable_command_served_from_cache() {
        let bot = make_bot(RateQuotas::default());

        let first = bot.processor.process(cmd("stranger", "help", &[])).await;
        assert!(first.is_completed());
        assert_eq!(bot.cache.len(), 1);

        let second = bot.processor.process(cmd("stranger", "help", &[])).await;
        assert_eq!(first.reply(), second.reply());
        assert_eq!(bot.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_execution_generic_for_user() {
        let bot = make_bot(RateQuotas::default());
        let outcome = bot.processor.process(cmd("stranger", "boom", &[])).await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.reply(), GENERIC_FAILURE_REPLY);
    }

    #[tokio::test]
    async fn test_failed_execution_detail_for_admin() {
        let bot = make_bot(RateQuotas::default());
        let outcome = bot.processor.process(cmd("admin1", "boom", &[])).await;
        assert!(outcome.is_failed());
        assert!(outcome.reply().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_handler_notfound_maps_to_rejection() {
        let bot = make_bot(RateQuotas::default());
        let outcome = bot
            .processor
            .process(cmd("admin1", "startfun", &["nosuch"]))
            .await;
        assert!(outcome.is_rejected());
        assert!(outcome.reply().contains("fun type 'nosuch'"));
        assert!(outcome.reply().contains("!listfun"));
    }

    #[tokio::test]
    async fn test_outcomes_recorded_in_audit_log() {
        let bot = make_bot(RateQuotas::default());
        bot.processor.process(cmd("stranger", "ping", &[])).await;
        bot.processor.process(cmd("stranger", "nosuch", &[])).await;

        let raw = std::fs::read_to_string(bot._dir.path().join("audit.jsonl")).unwrap();
        let outcomes: Vec<AuditRecord> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        // ping: accepted + completed; nosuch: rejected.
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].outcome, AuditOutcome::Accepted);
        assert_eq!(outcomes[1].outcome, AuditOutcome::Completed);
        assert_eq!(outcomes[2].outcome, AuditOutcome::Rejected);
    }
}

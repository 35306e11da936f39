//! Inbound event dispatch
//!
//! Front door of the gateway: decides whether a chat event is a command
//! (configurable prefix, whitespace-split arguments), runs it through
//! the pipeline, and delivers the reply.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ConfigStore;
use crate::pipeline::{CommandProcessor, InboundCommand, Outcome};
use crate::transport::{DynTransport, MessageContent};

/// A raw inbound chat event.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub sender_id: String,
    pub conversation_id: String,
    pub text: String,
}

/// Parse `text` as a prefixed command.
///
/// Returns the lowercased command name and whitespace-split arguments,
/// or None when the text is not a command.
pub fn parse_command(text: &str, prefix: &str) -> Option<(String, Vec<String>)> {
    let rest = text.trim().strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let command = parts.next()?.to_lowercase();
    let args = parts.map(|s| s.to_string()).collect();
    Some((command, args))
}

/// Wires inbound events to the pipeline and replies to the transport.
pub struct Dispatcher {
    processor: Arc<CommandProcessor>,
    transport: DynTransport,
    config: Arc<ConfigStore>,
}

impl Dispatcher {
    pub fn new(
        processor: Arc<CommandProcessor>,
        transport: DynTransport,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            processor,
            transport,
            config,
        }
    }

    /// Handle one inbound event end to end.
    ///
    /// Non-command text is ignored (None). For commands, the pipeline
    /// outcome's reply is delivered best-effort and the conversation is
    /// marked read; neither delivery error fails the invocation.
    pub async fn handle_event(&self, event: &InboundEvent) -> Option<Outcome> {
        let prefix = self.config.command_prefix();
        let (command, args) = parse_command(&event.text, &prefix)?;
        debug!(
            sender = %event.sender_id,
            conversation = %event.conversation_id,
            command = %command,
            "inbound command"
        );

        let outcome = self
            .processor
            .process(InboundCommand {
                sender_id: event.sender_id.clone(),
                conversation_id: event.conversation_id.clone(),
                command,
                args,
            })
            .await;

        if let Err(e) = self
            .transport
            .send_message(
                &event.conversation_id,
                MessageContent::text(outcome.reply().to_string()),
            )
            .await
        {
            warn!(
                conversation = %event.conversation_id,
                error = %e,
                "reply undelivered"
            );
        }
        if let Err(e) = self.transport.mark_as_read(&event.conversation_id).await {
            debug!(conversation = %event.conversation_id, error = %e, "mark-as-read failed");
        }
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::FileAuditLog;
    use crate::auth::{hash_subject, RoleGuard};
    use crate::cache::ResultCache;
    use crate::commands::builtins::register_builtins;
    use crate::commands::{CommandRegistry, Services};
    use crate::config::BotConfig;
    use crate::funloop::{FunLoopConfig, FunLoopEngine, TemplateLibrary};
    use crate::metrics::MetricsRegistry;
    use crate::ratelimit::{RateLimiter, RateQuotas};
    use crate::transport::MemoryTransport;
    use std::time::{Duration, Instant};

    #[test]
    fn test_parse_prefixed_command() {
        let parsed = parse_command("!startfun murgi", "!");
        assert_eq!(
            parsed,
            Some(("startfun".to_string(), vec!["murgi".to_string()]))
        );
    }

    #[test]
    fn test_parse_lowercases_name_only() {
        let parsed = parse_command("!STARTFUN Murgi", "!");
        assert_eq!(
            parsed,
            Some(("startfun".to_string(), vec!["Murgi".to_string()]))
        );
    }

    #[test]
    fn test_parse_ignores_unprefixed_text() {
        assert_eq!(parse_command("hello there", "!"), None);
        assert_eq!(parse_command("", "!"), None);
        assert_eq!(parse_command("!", "!"), None);
        assert_eq!(parse_command("   ", "!"), None);
    }

    #[test]
    fn test_parse_custom_prefix() {
        assert_eq!(
            parse_command("::help", "::"),
            Some(("help".to_string(), vec![]))
        );
        assert_eq!(parse_command("!help", "::"), None);
    }

    #[test]
    fn test_parse_splits_on_whitespace() {
        let parsed = parse_command("!addadmin  user42   extra", "!");
        assert_eq!(
            parsed,
            Some((
                "addadmin".to_string(),
                vec!["user42".to_string(), "extra".to_string()]
            ))
        );
    }

    fn make_dispatcher(dir: &tempfile::TempDir) -> (Dispatcher, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let guard = Arc::new(RoleGuard::new(Some(hash_subject("owner1")), []));
        let config = Arc::new(crate::config::ConfigStore::in_memory(
            dir.path().join("config.json"),
            BotConfig::default(),
        ));
        let metrics = Arc::new(MetricsRegistry::new());
        let fun = Arc::new(FunLoopEngine::new(
            transport.clone(),
            Arc::new(TemplateLibrary::builtin()),
            FunLoopConfig {
                tick_interval: Duration::from_millis(10),
                jitter: Duration::ZERO,
                max_duration: Duration::from_secs(60),
            },
            metrics.clone(),
        ));
        let services = Services {
            transport: transport.clone(),
            guard,
            config: config.clone(),
            fun,
            metrics,
            started_at: Instant::now(),
        };
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry).unwrap();
        let processor = Arc::new(CommandProcessor::new(
            Arc::new(registry),
            Arc::new(RateLimiter::new()),
            RateQuotas::default(),
            Arc::new(ResultCache::default()),
            Arc::new(FileAuditLog::open(dir.path().join("audit.jsonl")).unwrap()),
            services,
        ));
        (
            Dispatcher::new(processor, transport.clone(), config),
            transport,
        )
    }

    #[tokio::test]
    async fn test_handle_event_replies_and_marks_read() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, transport) = make_dispatcher(&dir);

        let outcome = dispatcher
            .handle_event(&InboundEvent {
                sender_id: "stranger".to_string(),
                conversation_id: "t1".to_string(),
                text: "!ping".to_string(),
            })
            .await
            .expect("command event");
        assert!(outcome.is_completed());

        assert_eq!(transport.texts_to("t1"), vec!["pong".to_string()]);
        assert_eq!(transport.read_marks(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_handle_event_ignores_plain_chatter() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, transport) = make_dispatcher(&dir);

        let outcome = dispatcher
            .handle_event(&InboundEvent {
                sender_id: "stranger".to_string(),
                conversation_id: "t1".to_string(),
                text: "good morning everyone".to_string(),
            })
            .await;
        assert!(outcome.is_none());
        assert_eq!(transport.sent_count(), 0);
    }
}

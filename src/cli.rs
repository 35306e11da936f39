//! CLI surface
//!
//! `banter` runs the gateway with a local REPL wired to a console
//! transport; `banter hash-id` prints the one-way hash to commit as
//! `ownerHash` in the config file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audit::FileAuditLog;
use crate::auth::RoleGuard;
use crate::cache::ResultCache;
use crate::commands::builtins::register_builtins;
use crate::commands::{CommandRegistry, Services};
use crate::config::{default_config_path, ConfigStore};
use crate::dispatch::{Dispatcher, InboundEvent};
use crate::funloop::{FunLoopConfig, FunLoopEngine, TemplateLibrary};
use crate::pipeline::CommandProcessor;
use crate::ratelimit::{spawn_sweeper, RateLimiter};
use crate::transport::{
    ChatTransport, Credentials, DynTransport, MessageContent, SendAck, Session, ThreadInfo,
    TransportResult, UserInfo,
};

#[derive(Debug, Parser)]
#[command(
    name = "banter",
    about = "Command-dispatch gateway for an automated chat account",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BANTER_GIT_HASH"), ")")
)]
pub struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info", global = true)]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway with a local REPL (the default).
    Run,
    /// Print the one-way hash of a subject id.
    HashId { id: String },
}

/// Transport that prints sends to stdout. Backs the local REPL so loop
/// ticks and replies are visible as they happen.
#[derive(Debug, Default)]
pub struct ConsoleTransport;

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn login(&self, credentials: &Credentials) -> TransportResult<Session> {
        Ok(Session {
            account_id: credentials.identifier.clone(),
            established_at: Utc::now(),
        })
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: MessageContent,
    ) -> TransportResult<SendAck> {
        match &content {
            MessageContent::Text(text) => println!("[bot -> {}] {}", conversation_id, text),
            MessageContent::Attachment { path, caption } => println!(
                "[bot -> {}] <attachment {}> {}",
                conversation_id,
                path,
                caption.as_deref().unwrap_or("")
            ),
        }
        Ok(SendAck {
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn get_user_info(&self, ids: &[String]) -> TransportResult<HashMap<String, UserInfo>> {
        Ok(ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    UserInfo {
                        id: id.clone(),
                        name: None,
                    },
                )
            })
            .collect())
    }

    async fn get_thread_info(&self, conversation_id: &str) -> TransportResult<ThreadInfo> {
        Ok(ThreadInfo {
            id: conversation_id.to_string(),
            name: None,
            participant_count: 0,
        })
    }

    async fn mark_as_read(&self, _conversation_id: &str) -> TransportResult<()> {
        Ok(())
    }
}

/// Run the gateway until EOF or Ctrl-C.
pub async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    crate::logging::init(&cli.log_filter);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let store = Arc::new(ConfigStore::load_or_default(&config_path)?);
    let cfg = store.get();

    let transport: DynTransport = Arc::new(ConsoleTransport);
    let guard = Arc::new(RoleGuard::new(
        cfg.owner_hash.clone(),
        cfg.admins.iter().cloned(),
    ));
    let metrics = crate::metrics::global_registry();
    let templates = match &cfg.fun.templates_path {
        Some(path) => Arc::new(TemplateLibrary::from_file(path)?),
        None => Arc::new(TemplateLibrary::builtin()),
    };
    let fun = Arc::new(FunLoopEngine::new(
        transport.clone(),
        templates,
        FunLoopConfig {
            tick_interval: cfg.fun.tick_interval(),
            jitter: cfg.fun.jitter(),
            max_duration: cfg.fun.max_duration(),
        },
        metrics.clone(),
    ));
    let services = Services {
        transport: transport.clone(),
        guard,
        config: store.clone(),
        fun: fun.clone(),
        metrics,
        started_at: Instant::now(),
    };

    let mut registry = CommandRegistry::new();
    register_builtins(&mut registry)?;

    let quotas = cfg.rate.quotas();
    let limiter = Arc::new(RateLimiter::new());
    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        limiter.clone(),
        Duration::from_secs(60),
        quotas.max_window() * 2,
        shutdown.clone(),
    );

    let audit_path = cfg
        .audit_log
        .clone()
        .unwrap_or_else(|| config_path.with_file_name("audit.jsonl"));
    let audit = Arc::new(FileAuditLog::open(&audit_path)?);

    let processor = Arc::new(CommandProcessor::new(
        Arc::new(registry),
        limiter,
        quotas,
        Arc::new(ResultCache::default()),
        audit,
        services.clone(),
    ));
    let dispatcher = Dispatcher::new(processor, transport, store);

    info!(
        config = %config_path.display(),
        audit = %audit_path.display(),
        "gateway ready; type '<sender>@<conversation> <text>', Ctrl-C to exit"
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                match line? {
                    Some(line) => handle_line(&dispatcher, &line).await,
                    None => break,
                }
            }
        }
    }

    // Teardown: stop the sweeper and every running loop.
    shutdown.cancel();
    let _ = sweeper.await;
    let stopped = services.fun.stop_all();
    info!(stopped, "shutdown complete");
    Ok(())
}

async fn handle_line(dispatcher: &Dispatcher, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let parsed = line
        .split_once(' ')
        .and_then(|(origin, text)| origin.split_once('@').map(|(s, c)| (s, c, text)));
    let Some((sender, conversation, text)) = parsed else {
        eprintln!("usage: <sender>@<conversation> <text>");
        return;
    };
    let event = InboundEvent {
        sender_id: sender.to_string(),
        conversation_id: conversation.to_string(),
        text: text.to_string(),
    };
    if dispatcher.handle_event(&event).await.is_none() {
        debug!("ignored non-command input");
    }
}

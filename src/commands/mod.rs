//! Command framework
//!
//! Registry and handler trait for chat commands. Every command carries a
//! required trust tier and a category that drives rate limiting; the
//! registry is populated once at startup and rejects duplicate names.

pub mod builtins;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::auth::{Role, RoleGuard};
use crate::config::ConfigStore;
use crate::funloop::FunLoopEngine;
use crate::metrics::MetricsRegistry;
use crate::transport::{DynTransport, TransportError};

/// Errors a command can produce.
///
/// Rejection-class variants surface as polite chat replies; transport and
/// internal errors are failures logged with full detail server-side.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("invalid input")]
    Validation,

    #[error("permission denied: requires {required} access")]
    PermissionDenied { required: Role },

    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// Whether this error is a rejection (polite reply, no system error)
    /// rather than a failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CommandError::Transport(_) | CommandError::Internal(_))
    }

    /// Polite chat reply for rejection-class errors. Failure-class errors
    /// get the pipeline's generic reply instead; nothing here leaks which
    /// validation pattern matched.
    pub fn user_message(&self, prefix: &str) -> String {
        match self {
            CommandError::Validation => {
                "That input doesn't look right. Please try again.".to_string()
            }
            CommandError::PermissionDenied { required } => {
                format!("Sorry, this command needs {} access.", required)
            }
            CommandError::RateLimited { message } => message.clone(),
            CommandError::NotFound { what } => {
                format!("{} not found, try {}help or {}listfun.", what, prefix, prefix)
            }
            CommandError::Transport(_) | CommandError::Internal(_) => {
                "Something went wrong on my side. Please try again later.".to_string()
            }
        }
    }
}

/// Rate-limit category of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    General,
    /// Fun-loop starts: additionally limited per (sender, fun kind).
    Fun,
    /// Admin mutations: additionally limited per sender.
    Admin,
}

impl CommandCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCategory::General => "general",
            CommandCategory::Fun => "fun",
            CommandCategory::Admin => "admin",
        }
    }
}

/// Shared service handles injected into every handler invocation.
///
/// Constructed once at process start; all fields are cheap clones.
#[derive(Clone)]
pub struct Services {
    pub transport: DynTransport,
    pub guard: Arc<RoleGuard>,
    pub config: Arc<ConfigStore>,
    pub fun: Arc<FunLoopEngine>,
    pub metrics: Arc<MetricsRegistry>,
    pub started_at: Instant,
}

/// Per-invocation context a handler executes against.
#[derive(Clone)]
pub struct HandlerContext {
    pub transport: DynTransport,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: Role,
    pub args: Vec<String>,
    /// Snapshot of the registry for help-style commands.
    pub command_index: Vec<CommandInfo>,
    pub services: Services,
}

/// A chat command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Minimum trust tier allowed to run this command.
    fn required_role(&self) -> Role;

    fn category(&self) -> CommandCategory {
        CommandCategory::General
    }

    /// Whether successful replies may be served from the result cache.
    /// Only idempotent, state-free commands opt in.
    fn cacheable(&self) -> bool {
        false
    }

    /// Run the command and produce the chat reply.
    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError>;
}

/// Registration errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("command '{0}' is already registered")]
    Duplicate(String),
}

/// Display/permission info about a registered command.
#[derive(Debug, Clone)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    pub required_role: Role,
    pub category: CommandCategory,
    pub cacheable: bool,
}

/// Name → handler map, fixed after startup.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; duplicate names are an error.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> Result<(), RegistryError> {
        let name = handler.name().to_lowercase();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        info!(command = %name, role = %handler.required_role(), "registered command");
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Look up a handler, case-insensitive.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&name.to_lowercase()).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(&name.to_lowercase())
    }

    /// Info for every registered command, sorted by name.
    pub fn list(&self) -> Vec<CommandInfo> {
        let mut infos: Vec<CommandInfo> = self
            .handlers
            .iter()
            .map(|(name, handler)| CommandInfo {
                name: name.clone(),
                description: handler.description().to_string(),
                required_role: handler.required_role(),
                category: handler.category(),
                cacheable: handler.cacheable(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoCommand;

    #[async_trait]
    impl CommandHandler for EchoCommand {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments back"
        }

        fn required_role(&self) -> Role {
            Role::User
        }

        async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
            Ok(ctx.args.join(" "))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(EchoCommand)).unwrap();

        assert!(registry.has("echo"));
        assert!(registry.has("ECHO"));
        assert!(registry.get("echo").is_some());
        assert!(!registry.has("nosuch"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(EchoCommand)).unwrap();

        let err = registry.register(Arc::new(EchoCommand)).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_is_sorted() {
        struct Named(&'static str);

        #[async_trait]
        impl CommandHandler for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                "test"
            }
            fn required_role(&self) -> Role {
                Role::User
            }
            async fn execute(&self, _ctx: &HandlerContext) -> Result<String, CommandError> {
                Ok(String::new())
            }
        }

        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(Named("zulu"))).unwrap();
        registry.register(Arc::new(Named("alpha"))).unwrap();

        let names: Vec<String> = registry.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["alpha", "zulu"]);
    }

    #[test]
    fn test_error_classification() {
        assert!(CommandError::Validation.is_rejection());
        assert!(CommandError::NotFound {
            what: "x".to_string()
        }
        .is_rejection());
        assert!(!CommandError::Internal("boom".to_string()).is_rejection());
        assert!(!CommandError::Transport(TransportError::NotConnected).is_rejection());
    }

    #[test]
    fn test_user_messages_do_not_leak_detail() {
        let msg = CommandError::Validation.user_message("!");
        assert!(!msg.contains("control"));

        let msg = CommandError::NotFound {
            what: "fun type 'x'".to_string(),
        }
        .user_message("!");
        assert!(msg.contains("!help"));

        let msg = CommandError::PermissionDenied {
            required: Role::Owner,
        }
        .user_message("!");
        assert!(msg.contains("owner"));
    }
}

//! Built-in commands
//!
//! The command surface shipped with the bot: discovery (`help`,
//! `listfun`), liveness (`ping`, `uptime`, `stats`), fun-loop control,
//! and the owner-gated admin list.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    CommandCategory, CommandError, CommandHandler, CommandRegistry, HandlerContext, RegistryError,
};
use crate::auth::Role;
use crate::funloop::FunLoopError;

/// Register every built-in command.
pub fn register_builtins(registry: &mut CommandRegistry) -> Result<(), RegistryError> {
    registry.register(Arc::new(HelpCommand))?;
    registry.register(Arc::new(PingCommand))?;
    registry.register(Arc::new(UptimeCommand))?;
    registry.register(Arc::new(StatsCommand))?;
    registry.register(Arc::new(ListFunCommand))?;
    registry.register(Arc::new(StartFunCommand))?;
    registry.register(Arc::new(StopFunCommand))?;
    registry.register(Arc::new(StopAllCommand))?;
    registry.register(Arc::new(AddAdminCommand))?;
    registry.register(Arc::new(RemoveAdminCommand))?;
    registry.register(Arc::new(AdminsCommand))?;
    Ok(())
}

/// List the commands visible to the caller's role.
pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "List the commands you can use"
    }

    fn required_role(&self) -> Role {
        Role::User
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let prefix = ctx.services.config.command_prefix();
        let mut lines = vec!["Available commands:".to_string()];
        for info in &ctx.command_index {
            if ctx.sender_role.satisfies(info.required_role) {
                lines.push(format!("{}{} - {}", prefix, info.name, info.description));
            }
        }
        Ok(lines.join("\n"))
    }
}

pub struct PingCommand;

#[async_trait]
impl CommandHandler for PingCommand {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Check that the bot is alive"
    }

    fn required_role(&self) -> Role {
        Role::User
    }

    async fn execute(&self, _ctx: &HandlerContext) -> Result<String, CommandError> {
        Ok("pong".to_string())
    }
}

pub struct UptimeCommand;

#[async_trait]
impl CommandHandler for UptimeCommand {
    fn name(&self) -> &str {
        "uptime"
    }

    fn description(&self) -> &str {
        "Show how long the bot has been running"
    }

    fn required_role(&self) -> Role {
        Role::User
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let secs = ctx.services.started_at.elapsed().as_secs();
        Ok(format!(
            "Up {}h {}m {}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        ))
    }
}

/// Counter snapshot plus active loop count.
pub struct StatsCommand;

#[async_trait]
impl CommandHandler for StatsCommand {
    fn name(&self) -> &str {
        "stats"
    }

    fn description(&self) -> &str {
        "Show usage statistics"
    }

    fn required_role(&self) -> Role {
        Role::User
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let mut lines = vec![format!(
            "Active fun loops: {}",
            ctx.services.fun.active_count()
        )];
        for (name, value) in ctx.services.metrics.snapshot() {
            lines.push(format!("{}: {}", name, value));
        }
        Ok(lines.join("\n"))
    }
}

pub struct ListFunCommand;

#[async_trait]
impl CommandHandler for ListFunCommand {
    fn name(&self) -> &str {
        "listfun"
    }

    fn description(&self) -> &str {
        "List the available fun types"
    }

    fn required_role(&self) -> Role {
        Role::User
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let summary = ctx.services.fun.template_summary();
        if summary.is_empty() {
            return Ok("No fun types are loaded.".to_string());
        }
        let types = summary
            .iter()
            .map(|(name, count)| format!("{} ({})", name, count))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("Fun types: {}", types))
    }
}

/// Start a repeating fun loop in the current conversation.
pub struct StartFunCommand;

#[async_trait]
impl CommandHandler for StartFunCommand {
    fn name(&self) -> &str {
        "startfun"
    }

    fn description(&self) -> &str {
        "Start a fun message loop: startfun <type>"
    }

    fn required_role(&self) -> Role {
        Role::Admin
    }

    fn category(&self) -> CommandCategory {
        CommandCategory::Fun
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let prefix = ctx.services.config.command_prefix();
        let Some(kind) = ctx.args.first() else {
            return Ok(format!(
                "Usage: {}startfun <type>. See {}listfun for the types.",
                prefix, prefix
            ));
        };
        match ctx
            .services
            .fun
            .start(&ctx.conversation_id, kind, &ctx.sender_id)
        {
            Ok(()) => Ok(format!(
                "Started the {} fun loop here. {}stopfun ends it.",
                kind.to_lowercase(),
                prefix
            )),
            Err(FunLoopError::AlreadyActive { .. }) => Ok(format!(
                "A fun loop is already running in this conversation. {}stopfun it first.",
                prefix
            )),
            Err(FunLoopError::UnknownKind { kind })
            | Err(FunLoopError::EmptyTemplates { kind }) => Err(CommandError::NotFound {
                what: format!("fun type '{}'", kind),
            }),
            Err(other) => Err(CommandError::Internal(other.to_string())),
        }
    }
}

/// Stop this conversation's fun loop.
pub struct StopFunCommand;

#[async_trait]
impl CommandHandler for StopFunCommand {
    fn name(&self) -> &str {
        "stopfun"
    }

    fn description(&self) -> &str {
        "Stop the fun loop in this conversation"
    }

    fn required_role(&self) -> Role {
        Role::Admin
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        match ctx.services.fun.stop(&ctx.conversation_id) {
            Ok(summary) => Ok(format!(
                "Stopped the {} fun loop: {} messages over {}s.",
                summary.kind,
                summary.messages_sent,
                summary.duration.as_secs()
            )),
            Err(FunLoopError::NotActive { .. }) => {
                Ok("No fun loop is running in this conversation.".to_string())
            }
            Err(other) => Err(CommandError::Internal(other.to_string())),
        }
    }
}

/// Stop every active fun loop, in every conversation.
pub struct StopAllCommand;

#[async_trait]
impl CommandHandler for StopAllCommand {
    fn name(&self) -> &str {
        "stopall"
    }

    fn description(&self) -> &str {
        "Stop all fun loops everywhere"
    }

    fn required_role(&self) -> Role {
        Role::Owner
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let stopped = ctx.services.fun.stop_all();
        Ok(format!("Stopped {} fun loop(s).", stopped))
    }
}

/// Add an admin id. Persists to the config file before acknowledging.
pub struct AddAdminCommand;

#[async_trait]
impl CommandHandler for AddAdminCommand {
    fn name(&self) -> &str {
        "addadmin"
    }

    fn description(&self) -> &str {
        "Grant admin access: addadmin <id>"
    }

    fn required_role(&self) -> Role {
        Role::Owner
    }

    fn category(&self) -> CommandCategory {
        CommandCategory::Admin
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let prefix = ctx.services.config.command_prefix();
        let Some(id) = ctx.args.first() else {
            return Ok(format!("Usage: {}addadmin <id>.", prefix));
        };
        match ctx.services.config.add_admin(id) {
            Ok(true) => {
                ctx.services.guard.add_admin(id.clone());
                Ok(format!("{} is now an admin.", id))
            }
            Ok(false) => Ok(format!("{} is already an admin.", id)),
            Err(e) => Err(CommandError::Internal(format!(
                "admin list not saved: {}",
                e
            ))),
        }
    }
}

pub struct RemoveAdminCommand;

#[async_trait]
impl CommandHandler for RemoveAdminCommand {
    fn name(&self) -> &str {
        "removeadmin"
    }

    fn description(&self) -> &str {
        "Revoke admin access: removeadmin <id>"
    }

    fn required_role(&self) -> Role {
        Role::Owner
    }

    fn category(&self) -> CommandCategory {
        CommandCategory::Admin
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let prefix = ctx.services.config.command_prefix();
        let Some(id) = ctx.args.first() else {
            return Ok(format!("Usage: {}removeadmin <id>.", prefix));
        };
        match ctx.services.config.remove_admin(id) {
            Ok(true) => {
                ctx.services.guard.remove_admin(id);
                Ok(format!("{} is no longer an admin.", id))
            }
            Ok(false) => Ok(format!("{} is not an admin.", id)),
            Err(e) => Err(CommandError::Internal(format!(
                "admin list not saved: {}",
                e
            ))),
        }
    }
}

pub struct AdminsCommand;

#[async_trait]
impl CommandHandler for AdminsCommand {
    fn name(&self) -> &str {
        "admins"
    }

    fn description(&self) -> &str {
        "List admin ids"
    }

    fn required_role(&self) -> Role {
        Role::Owner
    }

    fn category(&self) -> CommandCategory {
        CommandCategory::Admin
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<String, CommandError> {
        let admins = ctx.services.guard.admins();
        if admins.is_empty() {
            Ok("No admins are configured.".to_string())
        } else {
            Ok(format!("Admins: {}", admins.join(", ")))
        }
    }
}

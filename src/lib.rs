//! banterbot
//!
//! Command-dispatch gateway for an automated chat account. Inbound chat
//! events run through a staged pipeline (validate, rate-limit, authorize,
//! log, execute) against a registry of role-gated commands, with at most
//! one repeating "fun" message loop per conversation on top. The chat
//! network itself is behind the [`transport::ChatTransport`] seam.

pub mod audit;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod funloop;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod ratelimit;
pub mod transport;

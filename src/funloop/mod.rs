//! Fun loop engine
//!
//! Runs at most one repeating templated broadcast per conversation.
//! Each loop is a spawned task driven by a schedule-anchored timer; a
//! CancellationToken per loop is the single authoritative active flag.
//! Every tick re-checks the token before sending, so a stop that lands
//! while a tick is queued can never produce a late send. Loops end on
//! explicit stop, on a send failure, or at a fixed auto-expiry bound.

pub mod templates;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics::{names, MetricsRegistry};
use crate::transport::{DynTransport, MessageContent, TransportError};

pub use templates::{TemplateError, TemplateLibrary, TemplateSet};

/// Engine tuning. Tests shrink these to milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct FunLoopConfig {
    /// Base interval between ticks.
    pub tick_interval: Duration,
    /// Upper bound on the per-tick delay added to the base interval.
    pub jitter: Duration,
    /// Auto-expiry bound measured from loop creation.
    pub max_duration: Duration,
}

impl Default for FunLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            jitter: Duration::from_millis(250),
            max_duration: Duration::from_secs(300),
        }
    }
}

/// Fun loop errors
#[derive(Debug, thiserror::Error)]
pub enum FunLoopError {
    #[error("a fun loop is already active in conversation {conversation_id}")]
    AlreadyActive { conversation_id: String },

    #[error("unknown fun type: {kind}")]
    UnknownKind { kind: String },

    #[error("fun type {kind} has no messages")]
    EmptyTemplates { kind: String },

    #[error("no fun loop is active in conversation {conversation_id}")]
    NotActive { conversation_id: String },
}

/// Mutable counters shared between a loop task and the engine table.
#[derive(Debug)]
struct LoopProgress {
    cursor: AtomicU64,
    messages_sent: AtomicU64,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
}

/// Table entry for one active loop.
#[derive(Debug)]
struct ActiveLoop {
    /// Distinguishes this loop instance from any later loop in the same
    /// conversation, so expiry and stop can race safely.
    serial: u64,
    kind: String,
    started_by: String,
    token: CancellationToken,
    progress: Arc<LoopProgress>,
}

/// What a stopped loop did.
#[derive(Debug, Clone)]
pub struct LoopSummary {
    pub kind: String,
    pub started_by: String,
    pub started_at: DateTime<Utc>,
    pub messages_sent: u64,
    pub duration: Duration,
}

struct EngineInner {
    transport: DynTransport,
    templates: Arc<TemplateLibrary>,
    config: FunLoopConfig,
    metrics: Arc<MetricsRegistry>,
    loops: Mutex<HashMap<String, ActiveLoop>>,
    next_serial: AtomicU64,
}

/// Per-conversation repeating broadcaster.
pub struct FunLoopEngine {
    inner: Arc<EngineInner>,
}

impl FunLoopEngine {
    pub fn new(
        transport: DynTransport,
        templates: Arc<TemplateLibrary>,
        config: FunLoopConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                transport,
                templates,
                config,
                metrics,
                loops: Mutex::new(HashMap::new()),
                next_serial: AtomicU64::new(1),
            }),
        }
    }

    /// Start a loop in `conversation_id`.
    ///
    /// The single-loop invariant is enforced under the table lock: two
    /// back-to-back starts for the same conversation can never both
    /// succeed.
    pub fn start(
        &self,
        conversation_id: &str,
        kind: &str,
        started_by: &str,
    ) -> Result<(), FunLoopError> {
        let inner = &self.inner;
        let set = inner
            .templates
            .get(kind)
            .ok_or_else(|| FunLoopError::UnknownKind {
                kind: kind.to_string(),
            })?;
        if set.messages.is_empty() {
            return Err(FunLoopError::EmptyTemplates {
                kind: kind.to_string(),
            });
        }

        let token = CancellationToken::new();
        let progress = Arc::new(LoopProgress {
            cursor: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        });
        let serial;
        {
            let mut loops = inner.loops.lock();
            if loops.contains_key(conversation_id) {
                return Err(FunLoopError::AlreadyActive {
                    conversation_id: conversation_id.to_string(),
                });
            }
            serial = inner.next_serial.fetch_add(1, Ordering::Relaxed);
            loops.insert(
                conversation_id.to_string(),
                ActiveLoop {
                    serial,
                    kind: set.name.clone(),
                    started_by: started_by.to_string(),
                    token: token.clone(),
                    progress: progress.clone(),
                },
            );
        }

        inner.metrics.counter(names::FUN_LOOPS_STARTED).inc();
        info!(
            conversation = %conversation_id,
            kind = %set.name,
            started_by = %started_by,
            "fun loop started"
        );

        tokio::spawn(run_loop(
            inner.clone(),
            conversation_id.to_string(),
            set,
            serial,
            token,
            progress,
        ));
        Ok(())
    }

    /// Stop the loop in `conversation_id`.
    ///
    /// Cancels the loop's timer and pending expiry; idempotent-safe
    /// against an in-flight tick (the tick's token check catches it).
    pub fn stop(&self, conversation_id: &str) -> Result<LoopSummary, FunLoopError> {
        let removed = self.inner.loops.lock().remove(conversation_id);
        match removed {
            Some(active) => {
                active.token.cancel();
                self.inner.metrics.counter(names::FUN_LOOPS_STOPPED).inc();
                let summary = summarize(&active);
                info!(
                    conversation = %conversation_id,
                    kind = %summary.kind,
                    messages = summary.messages_sent,
                    "fun loop stopped"
                );
                Ok(summary)
            }
            None => Err(FunLoopError::NotActive {
                conversation_id: conversation_id.to_string(),
            }),
        }
    }

    /// Stop every active loop, best-effort; returns the number stopped.
    pub fn stop_all(&self) -> usize {
        let conversations: Vec<String> = self.inner.loops.lock().keys().cloned().collect();
        let mut stopped = 0;
        for conversation_id in conversations {
            if self.stop(&conversation_id).is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.inner.loops.lock().contains_key(conversation_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.loops.lock().len()
    }

    /// Kind of the active loop in a conversation, if any.
    pub fn active_kind(&self, conversation_id: &str) -> Option<String> {
        self.inner
            .loops
            .lock()
            .get(conversation_id)
            .map(|a| a.kind.clone())
    }

    /// (name, message count) of the loaded template sets.
    pub fn template_summary(&self) -> Vec<(String, usize)> {
        self.inner.templates.summary()
    }
}

impl EngineInner {
    /// Remove the table entry only if it still belongs to loop `serial`.
    /// Whichever of stop/expiry/failure removes first wins; the others
    /// see None and do nothing.
    fn finish(&self, conversation_id: &str, serial: u64) -> Option<ActiveLoop> {
        let mut loops = self.loops.lock();
        match loops.get(conversation_id) {
            Some(active) if active.serial == serial => loops.remove(conversation_id),
            _ => None,
        }
    }

    async fn expire(&self, conversation_id: &str, serial: u64) {
        if let Some(active) = self.finish(conversation_id, serial) {
            active.token.cancel();
            self.metrics.counter(names::FUN_LOOPS_EXPIRED).inc();
            let summary = summarize(&active);
            info!(
                conversation = %conversation_id,
                kind = %summary.kind,
                messages = summary.messages_sent,
                "fun loop expired"
            );
            let notice = format!(
                "⏰ The {} fun loop expired after {}s ({} messages sent).",
                summary.kind,
                summary.duration.as_secs(),
                summary.messages_sent
            );
            if let Err(e) = self
                .transport
                .send_message(conversation_id, MessageContent::text(notice))
                .await
            {
                warn!(conversation = %conversation_id, error = %e, "expiry notice undelivered");
            }
        }
    }

    async fn fail(&self, conversation_id: &str, serial: u64, error: TransportError) {
        self.metrics.counter(names::TRANSPORT_SEND_ERRORS).inc();
        if let Some(active) = self.finish(conversation_id, serial) {
            active.token.cancel();
            self.metrics.counter(names::FUN_LOOPS_STOPPED).inc();
            warn!(
                conversation = %conversation_id,
                kind = %active.kind,
                error = %error,
                "fun loop terminated by send failure"
            );
            if let Err(e) = self
                .transport
                .send_message(
                    conversation_id,
                    MessageContent::text("The fun loop stopped: a message could not be delivered."),
                )
                .await
            {
                warn!(conversation = %conversation_id, error = %e, "failure notice undelivered");
            }
        }
    }
}

fn summarize(active: &ActiveLoop) -> LoopSummary {
    LoopSummary {
        kind: active.kind.clone(),
        started_by: active.started_by.clone(),
        started_at: active.progress.started_at_utc,
        messages_sent: active.progress.messages_sent.load(Ordering::Relaxed),
        duration: active.progress.started_at.elapsed(),
    }
}

/// Bounded per-tick delay derived by hashing (conversation, tick): varies
/// message to message so the cadence reads as human pacing, without an
/// OS RNG.
fn jitter_for(conversation_id: &str, tick: u64, bound: Duration) -> Duration {
    let bound_ms = bound.as_millis() as u64;
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    let mut hasher = DefaultHasher::new();
    conversation_id.hash(&mut hasher);
    tick.hash(&mut hasher);
    Duration::from_millis(hasher.finish() % (bound_ms + 1))
}

/// Flavor decoration on every Nth message. Presentation only.
fn decorate(set: &TemplateSet, base: &str, tick: u64) -> String {
    if set.decorate_every > 0 && (tick + 1) % set.decorate_every == 0 {
        format!("{} 😜", base)
    } else {
        base.to_string()
    }
}

async fn run_loop(
    inner: Arc<EngineInner>,
    conversation_id: String,
    set: Arc<TemplateSet>,
    serial: u64,
    token: CancellationToken,
    progress: Arc<LoopProgress>,
) {
    let deadline = tokio::time::Instant::now() + inner.config.max_duration;
    let mut next = tokio::time::Instant::now()
        + inner.config.tick_interval
        + jitter_for(&conversation_id, 0, inner.config.jitter);

    loop {
        tokio::select! {
            // Cancellation and expiry take priority over a due tick.
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {
                inner.expire(&conversation_id, serial).await;
                return;
            }
            _ = tokio::time::sleep_until(next) => {}
        }

        // A stop may have landed while this tick was queued; never send
        // after cancellation.
        if token.is_cancelled() {
            return;
        }

        let tick = progress.messages_sent.load(Ordering::Relaxed);
        let index = (progress.cursor.load(Ordering::Relaxed) as usize) % set.messages.len();
        let body = decorate(&set, &set.messages[index], tick);
        if let Err(e) = inner
            .transport
            .send_message(&conversation_id, MessageContent::text(body))
            .await
        {
            inner.fail(&conversation_id, serial, e).await;
            return;
        }
        progress.cursor.fetch_add(1, Ordering::Relaxed);
        let sent = progress.messages_sent.fetch_add(1, Ordering::Relaxed) + 1;

        if set.status_every > 0 && sent % set.status_every == 0 {
            let status = format!(
                "🔁 {}: {} messages and counting ({}s in).",
                set.name,
                sent,
                progress.started_at.elapsed().as_secs()
            );
            if let Err(e) = inner
                .transport
                .send_message(&conversation_id, MessageContent::text(status))
                .await
            {
                inner.fail(&conversation_id, serial, e).await;
                return;
            }
        }

        // Cadence is anchored to the schedule, not to send latency.
        next += inner.config.tick_interval + jitter_for(&conversation_id, sent, inner.config.jitter);
        let now = tokio::time::Instant::now();
        if next < now {
            next = now;
        }
    }
}

//! Chat transport seam
//!
//! Defines the interface to the external chat network. The gateway core
//! only ever talks to the network through this trait; the wire protocol
//! itself lives outside this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur against the chat network
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Lookup failed: {0}")]
    LookupFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Content of an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain text message
    Text(String),
    /// File attachment with optional caption
    Attachment {
        path: String,
        caption: Option<String>,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Attachment { .. } => None,
        }
    }
}

/// Acknowledgement returned by a successful send.
#[derive(Debug, Clone)]
pub struct SendAck {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Directory information about a chat user.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub id: String,
    pub name: Option<String>,
}

/// Directory information about a conversation.
#[derive(Debug, Clone, Default)]
pub struct ThreadInfo {
    pub id: String,
    pub name: Option<String>,
    pub participant_count: usize,
}

/// Login credentials for the chat network.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

/// An established session with the chat network.
#[derive(Debug, Clone)]
pub struct Session {
    pub account_id: String,
    pub established_at: DateTime<Utc>,
}

/// Asynchronous, fallible interface to the chat network.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Establish a session.
    async fn login(&self, credentials: &Credentials) -> TransportResult<Session>;

    /// Send a message into a conversation.
    async fn send_message(
        &self,
        conversation_id: &str,
        content: MessageContent,
    ) -> TransportResult<SendAck>;

    /// Look up users by id.
    async fn get_user_info(&self, ids: &[String]) -> TransportResult<HashMap<String, UserInfo>>;

    /// Look up a conversation.
    async fn get_thread_info(&self, conversation_id: &str) -> TransportResult<ThreadInfo>;

    /// Mark a conversation as read.
    async fn mark_as_read(&self, conversation_id: &str) -> TransportResult<()>;
}

/// Type-erased transport handle injected into the pipeline and engine.
pub type DynTransport = std::sync::Arc<dyn ChatTransport>;

/// A message recorded by [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub conversation_id: String,
    pub content: MessageContent,
    pub at: DateTime<Utc>,
}

/// In-memory transport double.
///
/// Records every send for later inspection and supports failure injection.
/// Used by the test suite and by the local REPL.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: RwLock<Vec<SentMessage>>,
    read_marks: RwLock<Vec<String>>,
    failing: AtomicBool,
    next_id: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All recorded sends, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().clone()
    }

    /// Recorded sends targeting one conversation.
    pub fn sent_to(&self, conversation_id: &str) -> Vec<SentMessage> {
        self.sent
            .read()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Text bodies sent to one conversation.
    pub fn texts_to(&self, conversation_id: &str) -> Vec<String> {
        self.sent_to(conversation_id)
            .iter()
            .filter_map(|m| m.content.as_text().map(|t| t.to_string()))
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().len()
    }

    /// Conversations marked as read, in order.
    pub fn read_marks(&self) -> Vec<String> {
        self.read_marks.read().clone()
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn login(&self, credentials: &Credentials) -> TransportResult<Session> {
        if credentials.identifier.is_empty() {
            return Err(TransportError::LoginFailed("empty identifier".to_string()));
        }
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
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected failure".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let at = Utc::now();
        self.sent.write().push(SentMessage {
            conversation_id: conversation_id.to_string(),
            content,
            at,
        });
        Ok(SendAck {
            message_id: format!("mem-{}", id),
            timestamp: at,
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

    async fn mark_as_read(&self, conversation_id: &str) -> TransportResult<()> {
        self.read_marks.write().push(conversation_id.to_string());
        Ok(())
    }
}

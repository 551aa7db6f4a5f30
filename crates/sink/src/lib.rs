//! Outbound message sink abstraction.
//!
//! Platform adapters (Telegram, Discord, ...) implement [`MessageSink`];
//! the dispatch core only ever talks to this trait. Failure categories the
//! core must react to (content unchanged, platform length cap) are typed
//! variants of [`SinkError`], never string matches on error text.

pub mod error;
pub mod memory;

use async_trait::async_trait;

pub use error::{Result, SinkError};

/// Opaque handle to a message the sink has created. Edits and deletes
/// address the message through this handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub String);

impl std::fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound mutation surface for one chat platform.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Create a new message and return its handle.
    async fn send(&self, to: &str, text: &str) -> Result<MessageHandle>;

    /// Replace the content of an existing message.
    ///
    /// Returns [`SinkError::NotModified`] when the platform rejects an edit
    /// with identical content; callers treat that as success.
    async fn edit(&self, to: &str, handle: &MessageHandle, text: &str) -> Result<()>;

    /// Remove an existing message.
    async fn delete(&self, to: &str, handle: &MessageHandle) -> Result<()>;

    /// Platform message length cap in characters.
    fn max_message_len(&self) -> usize {
        4096
    }
}

use std::error::Error as StdError;

/// Crate-wide result type for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Typed outbound-transport errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The platform rejected an edit because the content is unchanged.
    /// Callers treat this as success.
    #[error("message content not modified")]
    NotModified,

    /// Content exceeds the platform message length cap.
    #[error("message exceeds platform limit of {limit} characters")]
    MessageTooLong { limit: usize },

    /// A requested message handle no longer exists.
    #[error("unknown message handle: {handle}")]
    UnknownMessage { handle: String },

    /// Wrapped transport failure from the platform client.
    #[error("sink transport failed: {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl SinkError {
    #[must_use]
    pub fn transport(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn unknown_message(handle: impl std::fmt::Display) -> Self {
        Self::UnknownMessage {
            handle: handle.to_string(),
        }
    }

    /// Whether this error means the content already matches (success).
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_modified_is_detected_by_variant() {
        assert!(SinkError::NotModified.is_not_modified());
        assert!(!SinkError::MessageTooLong { limit: 4096 }.is_not_modified());
    }
}

//! Agent-turn event stream types.

use std::pin::Pin;

use tokio_stream::Stream;

use crate::types::{ModelRef, TurnCounts};

/// One event from a streaming agent turn.
///
/// Text and reasoning deltas carry the *full accumulated text so far*, not
/// an increment: the upstream runtime may restart mid-turn and resend a
/// shorter baseline, which downstream consumers detect and resync from.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Full reply text accumulated so far.
    TextDelta { text: String },
    /// Full reasoning text accumulated so far.
    ReasoningDelta { text: String },
    /// A tool invocation has started.
    ToolStart { name: String, args: String },
    /// Progress update for a running tool.
    ToolUpdate { name: String, args: String },
    /// A tool invocation finished.
    ToolEnd { name: String, is_error: bool },
    /// The runtime committed to a model for this turn.
    ModelSelected { provider: String, model: String },
    /// A candidate model failed and the runtime is moving on.
    Fallback {
        error: String,
        failed_model: ModelRef,
        next: Option<ModelRef>,
    },
    /// Terminal: the turn completed.
    Final(TurnResult),
    /// Terminal: the turn failed.
    Error(String),
}

impl AgentEvent {
    /// Whether this event ends the turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final(_) | Self::Error(_))
    }
}

/// Terminal result of a successful agent turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnResult {
    /// Whether the runtime queued a final payload for delivery.
    pub queued_final: bool,
    pub counts: TurnCounts,
}

/// Boxed event stream returned by a model invocation.
pub type EventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events() {
        assert!(AgentEvent::Final(TurnResult::default()).is_terminal());
        assert!(AgentEvent::Error("boom".into()).is_terminal());
        assert!(
            !AgentEvent::TextDelta {
                text: "hi".into()
            }
            .is_terminal()
        );
    }
}

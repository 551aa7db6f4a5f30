//! In-memory [`MessageSink`] used by unit tests and local development.
//!
//! Mirrors the platform behaviors the dispatch core must handle: identical
//! edits are rejected with [`SinkError::NotModified`], over-long content is
//! rejected with [`SinkError::MessageTooLong`], and arbitrary failures can
//! be injected per call.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use {async_trait::async_trait, tokio::time::Instant};

use crate::{MessageHandle, MessageSink, Result, SinkError};

/// One recorded sink operation.
#[derive(Debug, Clone)]
pub struct SinkCall {
    pub kind: SinkCallKind,
    pub handle: String,
    pub text: String,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCallKind {
    Send,
    Edit,
    Delete,
}

#[derive(Default)]
struct MemoryState {
    messages: HashMap<String, String>,
    calls: Vec<SinkCall>,
    next_id: u64,
    failures: VecDeque<SinkError>,
}

/// In-memory sink recording every successful mutation with a timestamp.
pub struct MemorySink {
    state: Mutex<MemoryState>,
    max_len: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl MemorySink {
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_len,
        }
    }

    /// Queue an error to be returned by the next sink operation.
    pub fn push_failure(&self, error: SinkError) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failures.push_back(error);
    }

    /// All recorded operations, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SinkCall> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.calls.clone()
    }

    /// Current content of a live message, if any.
    #[must_use]
    pub fn content(&self, handle: &MessageHandle) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.messages.get(&handle.0).cloned()
    }

    /// Number of live (not deleted) messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.messages.len()
    }

    /// Texts of all live messages, in handle order.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<_> = state.messages.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, text)| text.clone()).collect()
    }

    fn take_failure(state: &mut MemoryState) -> Option<SinkError> {
        state.failures.pop_front()
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, _to: &str, text: &str) -> Result<MessageHandle> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = Self::take_failure(&mut state) {
            return Err(err);
        }
        if text.chars().count() > self.max_len {
            return Err(SinkError::MessageTooLong {
                limit: self.max_len,
            });
        }
        state.next_id += 1;
        let id = format!("{:04}", state.next_id);
        state.messages.insert(id.clone(), text.to_string());
        state.calls.push(SinkCall {
            kind: SinkCallKind::Send,
            handle: id.clone(),
            text: text.to_string(),
            at: Instant::now(),
        });
        Ok(MessageHandle(id))
    }

    async fn edit(&self, _to: &str, handle: &MessageHandle, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = Self::take_failure(&mut state) {
            return Err(err);
        }
        if text.chars().count() > self.max_len {
            return Err(SinkError::MessageTooLong {
                limit: self.max_len,
            });
        }
        let Some(current) = state.messages.get(&handle.0) else {
            return Err(SinkError::unknown_message(handle));
        };
        if current == text {
            return Err(SinkError::NotModified);
        }
        state.messages.insert(handle.0.clone(), text.to_string());
        state.calls.push(SinkCall {
            kind: SinkCallKind::Edit,
            handle: handle.0.clone(),
            text: text.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn delete(&self, _to: &str, handle: &MessageHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = Self::take_failure(&mut state) {
            return Err(err);
        }
        if state.messages.remove(&handle.0).is_none() {
            return Err(SinkError::unknown_message(handle));
        }
        state.calls.push(SinkCall {
            kind: SinkCallKind::Delete,
            handle: handle.0.clone(),
            text: String::new(),
            at: Instant::now(),
        });
        Ok(())
    }

    fn max_message_len(&self) -> usize {
        self.max_len
    }
}

//! Draft throttle engine.
//!
//! One [`DraftThrottle`] owns the single in-progress, editable message for
//! one streaming reply. Callers push the desired full text as often as they
//! like via [`DraftThrottle::update`]; the engine coalesces updates into
//! rate-limited send/edit mutations on one message handle, with at most one
//! mutation in flight and at least the throttle window between successive
//! mutations. Intermediate states may be dropped, but the last `update`
//! before [`DraftThrottle::flush`] is always delivered.
//!
//! Draft failures never propagate to the primary reply path: an over-long
//! render or a sink failure permanently stops the engine and reports
//! through the warning channel.

use std::sync::Arc;

use {
    plume_sink::{MessageHandle, MessageSink},
    tokio::{
        sync::{mpsc, oneshot},
        time::{Duration, Instant, sleep_until},
    },
    tracing::{debug, warn},
};

/// Tunables for one draft.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleOptions {
    /// Minimum spacing between successive outbound mutations.
    pub throttle_ms: u64,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self { throttle_ms: 300 }
    }
}

/// Non-fatal draft problems reported on the side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftWarning {
    /// Rendered content exceeds the platform length cap; the engine stopped.
    MessageTooLong { len: usize, limit: usize },
    /// The sink rejected a mutation; the engine stopped.
    SinkFailed { context: String },
}

/// What a [`DraftThrottle::flush`] actually accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Handle of the draft message, if one was ever created.
    pub handle: Option<MessageHandle>,
    /// Whether the latest updated content reached the sink. False when the
    /// engine stopped before or during the flush.
    pub sent: bool,
}

enum Cmd {
    Update(String),
    Flush(oneshot::Sender<FlushOutcome>),
    Handle(oneshot::Sender<Option<MessageHandle>>),
    Stop,
    Delete(oneshot::Sender<()>),
}

/// Handle to a running draft worker.
pub struct DraftThrottle {
    tx: mpsc::UnboundedSender<Cmd>,
}

impl DraftThrottle {
    /// Spawn the worker task for one draft. Returns the handle and the
    /// warning side channel.
    pub fn spawn(
        sink: Arc<dyn MessageSink>,
        to: impl Into<String>,
        options: ThrottleOptions,
    ) -> (Self, mpsc::UnboundedReceiver<DraftWarning>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (warn_tx, warn_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            sink,
            to: to.into(),
            throttle: Duration::from_millis(options.throttle_ms),
            warn_tx,
            pending: None,
            last_sent: None,
            handle: None,
            last_send_at: None,
            deadline: None,
            stopped: false,
        };
        tokio::spawn(worker.run(rx));
        (Self { tx }, warn_rx)
    }

    /// Replace the desired draft content. May be called arbitrarily often;
    /// consecutive calls within one throttle window coalesce.
    pub fn update(&self, text: impl Into<String>) {
        let _ = self.tx.send(Cmd::Update(text.into()));
    }

    /// Force the latest pending content out and wait for completion.
    /// The outcome reports the message handle (if a draft exists) and
    /// whether the content actually went out, so callers can tell a
    /// finalized draft apart from one frozen by a stopped engine.
    pub async fn flush(&self) -> FlushOutcome {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(Cmd::Flush(ack)).is_err() {
            return FlushOutcome::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Current message handle, if a draft message has been created. Does
    /// not force out pending content.
    pub async fn handle(&self) -> Option<MessageHandle> {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(Cmd::Handle(ack)).is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Cancel all future sends. Idempotent; safe from completion, error,
    /// and timeout paths alike.
    pub fn stop(&self) {
        let _ = self.tx.send(Cmd::Stop);
    }

    /// Remove the rendered message, if one exists and the engine is not
    /// stopped.
    pub async fn delete(&self) {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(Cmd::Delete(ack)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Worker {
    sink: Arc<dyn MessageSink>,
    to: String,
    throttle: Duration,
    warn_tx: mpsc::UnboundedSender<DraftWarning>,
    pending: Option<String>,
    last_sent: Option<String>,
    handle: Option<MessageHandle>,
    last_send_at: Option<Instant>,
    deadline: Option<Instant>,
    stopped: bool,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Cmd>) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                // Drain queued commands before firing the timer so that
                // back-to-back updates coalesce into one mutation.
                biased;
                cmd = rx.recv() => match cmd {
                    None => break,
                    Some(Cmd::Update(text)) => self.on_update(text),
                    Some(Cmd::Flush(ack)) => {
                        self.deadline = None;
                        if !self.stopped {
                            self.send_pending().await;
                        }
                        let _ = ack.send(FlushOutcome {
                            handle: self.handle.clone(),
                            sent: !self.stopped,
                        });
                    },
                    Some(Cmd::Handle(ack)) => {
                        let _ = ack.send(self.handle.clone());
                    },
                    Some(Cmd::Stop) => {
                        self.stopped = true;
                        self.pending = None;
                        self.deadline = None;
                    },
                    Some(Cmd::Delete(ack)) => {
                        self.delete_message().await;
                        let _ = ack.send(());
                    },
                },
                _ = wait_deadline(deadline), if deadline.is_some() => {
                    self.deadline = None;
                    self.send_pending().await;
                },
            }
        }
    }

    fn on_update(&mut self, text: String) {
        if self.stopped {
            return;
        }
        self.pending = Some(text);
        if self.deadline.is_none() {
            let now = Instant::now();
            let earliest = self.last_send_at.map_or(now, |at| at + self.throttle);
            self.deadline = Some(earliest.max(now));
        }
    }

    async fn send_pending(&mut self) {
        let Some(text) = self.pending.take() else {
            return;
        };
        let text = text.trim().to_string();
        if text.is_empty() || self.last_sent.as_deref() == Some(text.as_str()) {
            return;
        }

        let limit = self.sink.max_message_len();
        let len = text.chars().count();
        if len > limit {
            self.stopped = true;
            warn!(len, limit, "draft content exceeds platform limit, stopping draft updates");
            let _ = self.warn_tx.send(DraftWarning::MessageTooLong { len, limit });
            return;
        }

        let result = match &self.handle {
            Some(handle) => self.sink.edit(&self.to, handle, &text).await.map(|()| None),
            None => self.sink.send(&self.to, &text).await.map(Some),
        };
        self.last_send_at = Some(Instant::now());

        match result {
            Ok(Some(handle)) => {
                debug!(%handle, chat_id = %self.to, "draft message created");
                self.handle = Some(handle);
                self.last_sent = Some(text);
            },
            Ok(None) => {
                self.last_sent = Some(text);
            },
            Err(err) if err.is_not_modified() => {
                self.last_sent = Some(text);
            },
            Err(err) => {
                self.stopped = true;
                self.pending = None;
                warn!(chat_id = %self.to, error = %err, "draft send failed, stopping draft updates");
                let _ = self.warn_tx.send(DraftWarning::SinkFailed {
                    context: err.to_string(),
                });
            },
        }
    }

    async fn delete_message(&mut self) {
        if self.stopped {
            return;
        }
        // Deleting the draft discards whatever was queued for it.
        self.pending = None;
        self.deadline = None;
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.sink.delete(&self.to, &handle).await {
                warn!(chat_id = %self.to, error = %err, "draft delete failed");
                let _ = self.warn_tx.send(DraftWarning::SinkFailed {
                    context: err.to_string(),
                });
            }
            self.last_sent = None;
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

//! One dispatch call per reply: model selection, event multiplexing,
//! draft driving, and finalization.

use std::{future::Future, sync::Arc};

use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use {
    plume_chunker::BlockChunker,
    plume_common::{
        clock::Clock,
        event::{AgentEvent, EventStream, TurnResult},
        types::{ModelRef, SessionRoute},
    },
    plume_draft::{DraftThrottle, ThrottleOptions},
    plume_fallback::{AllModelsFailed, FallbackAttempt, FallbackController, ModelError},
    plume_sink::{MessageHandle, MessageSink},
};

use crate::{
    cache::RecentSendCache,
    finalize::{UNDELIVERED_NOTICE, needs_fallback_notice},
    render::{RenderState, compose_render},
};

/// Dispatcher tunables.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherOptions {
    /// Draft throttle window.
    pub throttle_ms: u64,
    /// How long a failure notice suppresses an identical one.
    pub notice_ttl_ms: u64,
    /// Size cap for the recent-notice cache.
    pub notice_cache_max: usize,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            throttle_ms: 300,
            notice_ttl_ms: 60_000,
            notice_cache_max: 256,
        }
    }
}

/// What one dispatch call produced. Dispatch itself never fails: every
/// failure mode degrades into a report plus at most one labeled notice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Whether reply content reached the user.
    pub delivered: bool,
    /// Finalized reply text, if the turn produced one.
    pub final_text: Option<String>,
    /// The model that streamed the reply.
    pub model: Option<ModelRef>,
    /// Skips and failures recorded during candidate selection.
    pub attempts: Vec<FallbackAttempt>,
    /// Whether a failure notice was sent this call.
    pub notice_sent: bool,
}

enum Terminal {
    Final(TurnResult),
    Error(String),
}

/// Drives one streaming reply end to end against a [`MessageSink`].
pub struct ReplyDispatcher {
    sink: Arc<dyn MessageSink>,
    fallback: FallbackController,
    recent: RecentSendCache,
    options: DispatcherOptions,
}

impl ReplyDispatcher {
    #[must_use]
    pub fn new(
        sink: Arc<dyn MessageSink>,
        fallback: FallbackController,
        clock: Arc<dyn Clock>,
        options: DispatcherOptions,
    ) -> Self {
        let recent = RecentSendCache::new(clock, options.notice_ttl_ms, options.notice_cache_max);
        Self {
            sink,
            fallback,
            recent,
            options,
        }
    }

    /// Run one reply. Selects a model, consumes its event stream into the
    /// composed draft, and finalizes on the terminal event. The first
    /// terminal event wins; anything after it is ignored.
    pub async fn dispatch<F, Fut>(
        &self,
        route: &SessionRoute,
        to: &str,
        candidates: &[ModelRef],
        invoke: F,
    ) -> DispatchReport
    where
        F: FnMut(ModelRef) -> Fut,
        Fut: Future<Output = Result<EventStream, ModelError>>,
    {
        info!(session = %route, candidates = candidates.len(), "dispatching reply");

        let selected = match self.fallback.select_and_stream(candidates, invoke).await {
            Ok(selected) => selected,
            Err(failure) => {
                warn!(session = %route, error = %failure, "no model available");
                let notice_sent = self.send_notice(route, to, &exhaustion_notice(&failure)).await;
                return DispatchReport {
                    attempts: failure.attempts,
                    notice_sent,
                    ..DispatchReport::default()
                };
            },
        };

        let (draft, _warnings) = DraftThrottle::spawn(
            Arc::clone(&self.sink),
            to,
            ThrottleOptions {
                throttle_ms: self.options.throttle_ms,
            },
        );
        let mut chunker = BlockChunker::new();
        let mut state = RenderState {
            model_status: Some(selected.model.to_string()),
            streaming: true,
            ..RenderState::default()
        };

        let mut stream = selected.stream;
        let mut terminal = None;
        while let Some(event) = stream.next().await {
            match event {
                AgentEvent::TextDelta { text } => {
                    let outcome = chunker.append(&text);
                    let committed = chunker.drain(false).is_some();
                    if outcome.resynced || committed {
                        state.body = chunker.committed().to_string();
                        draft.update(compose_render(&state));
                    }
                },
                AgentEvent::ReasoningDelta { text } => {
                    state.reasoning = text;
                    draft.update(compose_render(&state));
                },
                AgentEvent::ToolStart { name, .. } | AgentEvent::ToolUpdate { name, .. } => {
                    state.tool_status = Some(format!("running {name}"));
                    draft.update(compose_render(&state));
                },
                AgentEvent::ToolEnd { name, is_error } => {
                    state.tool_status = is_error.then(|| format!("{name} failed"));
                    draft.update(compose_render(&state));
                },
                AgentEvent::ModelSelected { provider, model } => {
                    state.model_status = Some(format!("{provider}/{model}"));
                    draft.update(compose_render(&state));
                },
                AgentEvent::Fallback {
                    error,
                    failed_model,
                    next,
                } => {
                    warn!(session = %route, model = %failed_model, error = %error, "mid-turn fallback");
                    state.model_status = Some(match next {
                        Some(next) => format!("{failed_model} unavailable, trying {next}"),
                        None => format!("{failed_model} unavailable"),
                    });
                    draft.update(compose_render(&state));
                },
                AgentEvent::Final(result) => {
                    terminal = Some(Terminal::Final(result));
                    break;
                },
                AgentEvent::Error(message) => {
                    terminal = Some(Terminal::Error(message));
                    break;
                },
            }
        }
        let terminal = terminal
            .unwrap_or_else(|| Terminal::Error("stream ended without a terminal event".into()));

        match terminal {
            Terminal::Final(result) => {
                self.finalize(route, to, &draft, &mut chunker, result, selected.model, selected.attempts)
                    .await
            },
            Terminal::Error(message) => {
                self.fail(route, to, &draft, &mut chunker, message, selected.model, selected.attempts)
                    .await
            },
        }
    }

    /// Terminal `Final`: force out the remaining buffer, strip the
    /// transient sections, and flush the draft into the permanent reply.
    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        route: &SessionRoute,
        to: &str,
        draft: &DraftThrottle,
        chunker: &mut BlockChunker,
        result: TurnResult,
        model: ModelRef,
        attempts: Vec<FallbackAttempt>,
    ) -> DispatchReport {
        chunker.drain(true);
        let final_text = chunker.committed().trim().to_string();
        debug!(
            session = %route,
            len = final_text.len(),
            queued_final = result.queued_final,
            "finalizing reply"
        );

        let mut delivered = false;
        if final_text.is_empty() {
            // Tool-only or silent turn. Clear any transient status draft.
            draft.delete().await;
            draft.stop();
        } else {
            let finalized = RenderState {
                body: final_text.clone(),
                ..RenderState::default()
            };
            draft.update(compose_render(&finalized));
            let outcome = draft.flush().await;
            draft.stop();
            delivered = outcome.sent && outcome.handle.is_some();

            if !delivered {
                // The engine stopped before the final content went out,
                // leaving either no message or a frozen streaming draft.
                // One direct attempt against the sink.
                delivered = self
                    .deliver_direct(route, to, outcome.handle.as_ref(), &final_text)
                    .await;
            }
        }

        let mut notice_sent = false;
        if needs_fallback_notice(delivered, result.counts.non_silent) {
            notice_sent = self.send_notice(route, to, UNDELIVERED_NOTICE).await;
        }

        DispatchReport {
            delivered,
            final_text: (!final_text.is_empty()).then_some(final_text),
            model: Some(model),
            attempts,
            notice_sent,
        }
    }

    /// Terminal `Error`: if content already reached the user the draft is
    /// finalized with what was committed plus a labeled interruption line;
    /// otherwise the status draft is removed and one notice is sent.
    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        route: &SessionRoute,
        to: &str,
        draft: &DraftThrottle,
        chunker: &mut BlockChunker,
        message: String,
        model: ModelRef,
        attempts: Vec<FallbackAttempt>,
    ) -> DispatchReport {
        warn!(session = %route, error = %message, "agent turn failed");

        chunker.drain(true);
        let body = chunker.committed().trim().to_string();

        if !body.is_empty() {
            let final_text = format!("{body}\n\n⚠️ Reply interrupted: {message}");
            draft.update(final_text.clone());
            let outcome = draft.flush().await;
            draft.stop();
            let mut delivered = outcome.sent && outcome.handle.is_some();
            if !delivered {
                delivered = self
                    .deliver_direct(route, to, outcome.handle.as_ref(), &final_text)
                    .await;
            }
            if delivered {
                return DispatchReport {
                    delivered: true,
                    final_text: Some(final_text),
                    model: Some(model),
                    attempts,
                    notice_sent: false,
                };
            }
        } else {
            // Only transient status was ever rendered; remove it.
            draft.delete().await;
            draft.stop();
        }
        let notice_sent = self
            .send_notice(route, to, &format!("⚠️ Agent failed: {message}"))
            .await;
        DispatchReport {
            delivered: false,
            final_text: None,
            model: Some(model),
            attempts,
            notice_sent,
        }
    }

    /// Last-resort delivery bypassing the throttle: edit the existing
    /// draft if one exists, otherwise send fresh. `NotModified` counts as
    /// delivered.
    async fn deliver_direct(
        &self,
        route: &SessionRoute,
        to: &str,
        handle: Option<&MessageHandle>,
        text: &str,
    ) -> bool {
        let result = match handle {
            Some(handle) => self.sink.edit(to, handle, text).await,
            None => self.sink.send(to, text).await.map(|_| ()),
        };
        match result {
            Ok(()) => true,
            Err(err) if err.is_not_modified() => true,
            Err(err) => {
                warn!(session = %route, error = %err, "final reply send failed");
                false
            },
        }
    }

    /// Send a labeled notice at most once per TTL per (session, chat,
    /// text). Returns whether a message actually went out.
    async fn send_notice(&self, route: &SessionRoute, to: &str, text: &str) -> bool {
        let key = format!("{route}|{to}|{text}");
        if !self.recent.insert_if_absent(&key) {
            debug!(session = %route, "duplicate notice suppressed");
            return false;
        }
        match self.sink.send(to, text).await {
            Ok(_) => true,
            Err(err) => {
                warn!(session = %route, error = %err, "notice send failed");
                false
            },
        }
    }
}

fn exhaustion_notice(failure: &AllModelsFailed) -> String {
    if failure.all_in_cooldown {
        match failure.retry_after_ms {
            Some(ms) => format!(
                "⚠️ All models are cooling down; retry in ~{}s.",
                ms.div_ceil(1000)
            ),
            None => "⚠️ All models are cooling down.".to_string(),
        }
    } else {
        let last_error = failure
            .attempts
            .iter()
            .rev()
            .find(|attempt| !attempt.skipped)
            .map_or_else(|| "unknown error".to_string(), |attempt| attempt.error.clone());
        format!("⚠️ All models failed. Last error: {last_error}")
    }
}

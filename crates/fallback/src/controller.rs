//! The candidate walk: skip hot keys, invoke the rest in priority order.

use std::{future::Future, sync::Arc};

use tracing::{debug, info, warn};

use {
    plume_common::{
        clock::Clock,
        event::EventStream,
        types::ModelRef,
    },
    plume_ledger::{BackoffPolicy, CooldownLedger, LedgerStore},
};

use crate::error::{AllModelsFailed, ModelError};

/// One recorded skip-or-failure while walking the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackAttempt {
    pub model: ModelRef,
    pub error: String,
    pub at_ms: u64,
    pub cooldown_until_ms: Option<u64>,
    /// True when the candidate was never invoked (cooldown skip).
    pub skipped: bool,
}

/// A transform applied to the selected event stream at construction time.
/// Transforms are folded left-to-right, so ordering is auditable and each
/// one is independently testable.
pub type StreamTransform = Arc<dyn Fn(EventStream) -> EventStream + Send + Sync>;

/// Notification hook fired when a candidate fails and the walk moves on.
/// Receives the error, the failed candidate, and the next candidate if any.
pub type FallbackHook = Arc<dyn Fn(&ModelError, &ModelRef, Option<&ModelRef>) + Send + Sync>;

/// Result of a successful walk.
pub struct SelectedStream {
    pub model: ModelRef,
    pub stream: EventStream,
    /// Skips and failures recorded before this candidate succeeded.
    pub attempts: Vec<FallbackAttempt>,
}

impl std::fmt::Debug for SelectedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedStream")
            .field("model", &self.model)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Walks an ordered candidate list under the cooldown ledger discipline.
pub struct FallbackController {
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    transforms: Vec<StreamTransform>,
    on_fallback: Option<FallbackHook>,
}

impl FallbackController {
    #[must_use]
    pub fn new(store: Arc<LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            backoff: BackoffPolicy::default(),
            transforms: Vec::new(),
            on_fallback: None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_transforms(mut self, transforms: Vec<StreamTransform>) -> Self {
        self.transforms = transforms;
        self
    }

    #[must_use]
    pub fn with_fallback_hook(mut self, hook: FallbackHook) -> Self {
        self.on_fallback = Some(hook);
        self
    }

    /// Walk `candidates` strictly in priority order, never concurrently.
    /// Candidates whose ledger entry is cooling down or disabled are
    /// recorded as skips without being invoked. The first live candidate
    /// whose `invoke` succeeds has its ledger entry reset and its stream
    /// returned with the configured transforms applied.
    pub async fn select_and_stream<F, Fut>(
        &self,
        candidates: &[ModelRef],
        mut invoke: F,
    ) -> Result<SelectedStream, AllModelsFailed>
    where
        F: FnMut(ModelRef) -> Fut,
        Fut: Future<Output = Result<EventStream, ModelError>>,
    {
        let mut ledger = match self.store.load().await {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(error = %err, "cooldown ledger load failed, assuming empty");
                CooldownLedger::default()
            },
        };

        let mut attempts: Vec<FallbackAttempt> = Vec::new();
        let mut attempted_any = false;

        for (index, candidate) in candidates.iter().enumerate() {
            let key = candidate.ledger_key();
            let now = self.clock.now_ms();

            if !ledger.is_available(&key, &candidate.model_id, now) {
                let until = ledger.next_available_ms(&key, &candidate.model_id);
                debug!(model = %candidate, cooldown_until_ms = ?until, "skipping candidate in cooldown");
                attempts.push(FallbackAttempt {
                    model: candidate.clone(),
                    error: "in cooldown".into(),
                    at_ms: now,
                    cooldown_until_ms: until,
                    skipped: true,
                });
                continue;
            }

            attempted_any = true;
            match invoke(candidate.clone()).await {
                Ok(stream) => {
                    let _ = self
                        .apply(ledger, {
                            let key = key.clone();
                            let model = candidate.model_id.clone();
                            move |l: &mut CooldownLedger| l.record_success(&key, &model)
                        })
                        .await;
                    info!(model = %candidate, failed_attempts = attempts.len(), "model selected");
                    let stream = self
                        .transforms
                        .iter()
                        .fold(stream, |stream, transform| transform(stream));
                    return Ok(SelectedStream {
                        model: candidate.clone(),
                        stream,
                        attempts,
                    });
                },
                Err(err) => {
                    warn!(
                        model = %candidate,
                        kind = ?err.kind,
                        error = %err.message,
                        "model invocation failed"
                    );

                    if !err.kind.advances_fallback() {
                        attempts.push(FallbackAttempt {
                            model: candidate.clone(),
                            error: err.message.clone(),
                            at_ms: now,
                            cooldown_until_ms: None,
                            skipped: false,
                        });
                        return Err(AllModelsFailed {
                            attempts,
                            all_in_cooldown: false,
                            retry_after_ms: None,
                        });
                    }

                    let backoff = self.backoff;
                    let hint_ms = err.retry_after.map(|d| d.as_millis() as u64);
                    ledger = if err.kind.disables() {
                        let until = now.saturating_add(backoff.disabled_ms);
                        self.apply(ledger, {
                            let key = key.clone();
                            let model = candidate.model_id.clone();
                            let reason = err.message.clone();
                            move |l: &mut CooldownLedger| {
                                l.record_disabled(&key, &model, now, until, reason.clone())
                            }
                        })
                        .await
                    } else {
                        self.apply(ledger, {
                            let key = key.clone();
                            let model = candidate.model_id.clone();
                            move |l: &mut CooldownLedger| {
                                let count = l.error_count(&key).saturating_add(1);
                                let delay = backoff.delay_with_hint_ms(count, hint_ms);
                                l.record_failure(&key, &model, now, delay);
                            }
                        })
                        .await
                    };

                    attempts.push(FallbackAttempt {
                        model: candidate.clone(),
                        error: err.message.clone(),
                        at_ms: now,
                        cooldown_until_ms: ledger.next_available_ms(&key, &candidate.model_id),
                        skipped: false,
                    });

                    if let Some(hook) = &self.on_fallback {
                        hook(&err, candidate, candidates.get(index + 1));
                    }
                },
            }
        }

        let now = self.clock.now_ms();
        let retry_after_ms = candidates
            .iter()
            .filter_map(|c| ledger.next_available_ms(&c.ledger_key(), &c.model_id))
            .filter(|&at| at > now)
            .map(|at| at - now)
            .min();

        Err(AllModelsFailed {
            attempts,
            all_in_cooldown: !attempted_any,
            retry_after_ms,
        })
    }

    /// Apply a mutation read-merge-write through the store; on persistence
    /// failure, fall back to the in-memory copy so the walk stays correct.
    async fn apply<F>(&self, current: CooldownLedger, mutation: F) -> CooldownLedger
    where
        F: FnOnce(&mut CooldownLedger) + Clone + Send + 'static,
    {
        match self.store.mutate(mutation.clone()).await {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(error = %err, "cooldown ledger update failed, keeping in-memory state");
                let mut ledger = current;
                mutation(&mut ledger);
                ledger
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::Duration,
    };

    use tokio_stream::StreamExt;

    use {
        super::*,
        plume_common::{clock::ManualClock, event::AgentEvent},
    };

    const NOW: u64 = 1_000_000;

    fn stream_of(events: Vec<AgentEvent>) -> EventStream {
        Box::pin(tokio_stream::iter(events))
    }

    fn candidate(provider: &str, model: &str) -> ModelRef {
        ModelRef::new(provider, model)
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<LedgerStore>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(LedgerStore::new(dir.path().join("cooldowns.json")));
            Self {
                _dir: dir,
                store,
                clock: Arc::new(ManualClock::new(NOW)),
            }
        }

        fn controller(&self) -> FallbackController {
            let clock = Arc::clone(&self.clock) as Arc<dyn Clock>;
            FallbackController::new(Arc::clone(&self.store), clock)
                .with_backoff(BackoffPolicy::default().without_jitter())
        }
    }

    /// Invoke closure that fails for listed providers and succeeds otherwise,
    /// recording every invocation.
    fn scripted_invoke(
        calls: &Arc<Mutex<Vec<String>>>,
        failures: Vec<(&'static str, ModelError)>,
    ) -> impl FnMut(ModelRef) -> std::pin::Pin<Box<dyn Future<Output = Result<EventStream, ModelError>> + Send>>
    {
        let calls = Arc::clone(calls);
        move |model: ModelRef| {
            let calls = Arc::clone(&calls);
            let failure = failures
                .iter()
                .find(|(provider, _)| *provider == model.provider)
                .map(|(_, err)| err.clone());
            Box::pin(async move {
                calls
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(model.provider.clone());
                match failure {
                    Some(err) => Err(err),
                    None => Ok(stream_of(vec![AgentEvent::TextDelta { text: "ok".into() }])),
                }
            })
        }
    }

    #[tokio::test]
    async fn first_candidate_success_records_no_attempts() {
        let fixture = Fixture::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let selected = fixture
            .controller()
            .select_and_stream(
                &[candidate("good", "m1"), candidate("backup", "m2")],
                scripted_invoke(&calls, vec![]),
            )
            .await
            .unwrap();

        assert_eq!(selected.model.provider, "good");
        assert!(selected.attempts.is_empty());
        assert_eq!(*calls.lock().unwrap(), vec!["good"]);
    }

    #[tokio::test]
    async fn cooled_candidates_are_skipped_not_invoked() {
        let fixture = Fixture::new();
        fixture
            .store
            .mutate(|l| {
                l.record_failure("a:default", "m1", NOW, 60_000);
                l.record_failure("b:default", "m2", NOW, 60_000);
            })
            .await
            .unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let selected = fixture
            .controller()
            .select_and_stream(
                &[
                    candidate("a", "m1"),
                    candidate("b", "m2"),
                    candidate("c", "m3"),
                ],
                scripted_invoke(&calls, vec![]),
            )
            .await
            .unwrap();

        assert_eq!(selected.model.provider, "c");
        assert_eq!(selected.attempts.len(), 2);
        assert!(selected.attempts.iter().all(|a| a.skipped));
        assert_eq!(*calls.lock().unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn three_transient_failures_then_success() {
        let fixture = Fixture::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let failures = vec![
            ("a", ModelError::transient("500 internal server error")),
            ("b", ModelError::transient("503 service unavailable")),
            ("c", ModelError::transient("connection reset")),
        ];
        let selected = fixture
            .controller()
            .select_and_stream(
                &[
                    candidate("a", "m1"),
                    candidate("b", "m2"),
                    candidate("c", "m3"),
                    candidate("d", "m4"),
                ],
                scripted_invoke(&calls, failures),
            )
            .await
            .unwrap();

        assert_eq!(selected.model.provider, "d");
        assert_eq!(selected.attempts.len(), 3);
        assert!(selected.attempts.iter().all(|a| !a.skipped));

        let ledger = fixture.store.load().await.unwrap();
        for key in ["a:default", "b:default", "c:default"] {
            assert_eq!(ledger.error_count(key), 1);
        }
    }

    #[tokio::test]
    async fn exhaustion_all_in_cooldown_reports_min_retry() {
        let fixture = Fixture::new();
        fixture
            .store
            .mutate(|l| {
                l.record_failure("a:default", "m1", NOW, 90_000);
                l.record_failure("b:default", "m2", NOW, 30_000);
                l.record_failure("c:default", "m3", NOW, 60_000);
            })
            .await
            .unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let err = fixture
            .controller()
            .select_and_stream(
                &[
                    candidate("a", "m1"),
                    candidate("b", "m2"),
                    candidate("c", "m3"),
                ],
                scripted_invoke(&calls, vec![]),
            )
            .await
            .unwrap_err();

        assert!(err.all_in_cooldown);
        assert_eq!(err.retry_after_ms, Some(30_000));
        assert_eq!(err.attempts.len(), 3);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhaustion_after_failures_is_not_all_in_cooldown() {
        let fixture = Fixture::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let failures = vec![
            ("a", ModelError::transient("500")),
            ("b", ModelError::transient("502")),
        ];
        let err = fixture
            .controller()
            .select_and_stream(
                &[candidate("a", "m1"), candidate("b", "m2")],
                scripted_invoke(&calls, failures),
            )
            .await
            .unwrap_err();

        assert!(!err.all_in_cooldown);
        assert_eq!(err.attempts.len(), 2);
        // Both just failed, so the earliest cooldown is the base backoff.
        assert_eq!(err.retry_after_ms, Some(10_000));
    }

    #[tokio::test]
    async fn rate_limit_hint_seeds_cooldown() {
        let fixture = Fixture::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let failures = vec![(
            "limited",
            ModelError::rate_limited("429 too many requests", Some(Duration::from_secs(120))),
        )];
        let _ = fixture
            .controller()
            .select_and_stream(
                &[candidate("limited", "m1"), candidate("ok", "m2")],
                scripted_invoke(&calls, failures),
            )
            .await
            .unwrap();

        let ledger = fixture.store.load().await.unwrap();
        assert_eq!(
            ledger.next_available_ms("limited:default", "m1"),
            Some(NOW + 120_000)
        );
    }

    #[tokio::test]
    async fn auth_error_disables_key_with_reason() {
        let fixture = Fixture::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let failures = vec![("locked", ModelError::auth("401 unauthorized"))];
        let _ = fixture
            .controller()
            .select_and_stream(
                &[candidate("locked", "m1"), candidate("ok", "m2")],
                scripted_invoke(&calls, failures),
            )
            .await
            .unwrap();

        let ledger = fixture.store.load().await.unwrap();
        let entry = &ledger.entries["locked:default"];
        assert_eq!(entry.disabled_reason.as_deref(), Some("401 unauthorized"));
        assert_eq!(
            entry.disabled_until_ms,
            Some(NOW + BackoffPolicy::default().disabled_ms)
        );
    }

    #[tokio::test]
    async fn invalid_request_terminates_the_walk() {
        let fixture = Fixture::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let failures = vec![("bad", ModelError::invalid_request("400 bad request"))];
        let err = fixture
            .controller()
            .select_and_stream(
                &[candidate("bad", "m1"), candidate("ok", "m2")],
                scripted_invoke(&calls, failures),
            )
            .await
            .unwrap_err();

        assert!(!err.all_in_cooldown);
        assert_eq!(err.attempts.len(), 1);
        assert_eq!(*calls.lock().unwrap(), vec!["bad"]);
    }

    #[tokio::test]
    async fn success_resets_error_count() {
        let fixture = Fixture::new();
        fixture
            .store
            .mutate(|l| {
                // Expired cooldown, surviving error count.
                l.record_failure("flaky:default", "m1", NOW - 120_000, 1_000);
            })
            .await
            .unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let _ = fixture
            .controller()
            .select_and_stream(&[candidate("flaky", "m1")], scripted_invoke(&calls, vec![]))
            .await
            .unwrap();

        let ledger = fixture.store.load().await.unwrap();
        assert_eq!(ledger.error_count("flaky:default"), 0);
    }

    #[tokio::test]
    async fn transforms_fold_left_to_right() {
        let fixture = Fixture::new();

        fn suffix_transform(suffix: &'static str) -> StreamTransform {
            Arc::new(move |stream: EventStream| -> EventStream {
                Box::pin(stream.map(move |event| match event {
                    AgentEvent::TextDelta { text } => AgentEvent::TextDelta {
                        text: format!("{text}{suffix}"),
                    },
                    other => other,
                }))
            })
        }

        let controller = fixture
            .controller()
            .with_transforms(vec![suffix_transform("1"), suffix_transform("2")]);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let selected = controller
            .select_and_stream(&[candidate("good", "m1")], scripted_invoke(&calls, vec![]))
            .await
            .unwrap();

        let events: Vec<AgentEvent> = selected.stream.collect().await;
        assert_eq!(
            events,
            vec![AgentEvent::TextDelta {
                text: "ok12".into()
            }]
        );
    }

    #[tokio::test]
    async fn hook_receives_failed_model_and_next_candidate() {
        let fixture = Fixture::new();
        let seen: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));

        let hook: FallbackHook = {
            let seen = Arc::clone(&seen);
            Arc::new(move |_err, failed, next| {
                seen.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push((failed.provider.clone(), next.map(|n| n.provider.clone())));
            })
        };

        let calls = Arc::new(Mutex::new(Vec::new()));
        let failures = vec![
            ("a", ModelError::transient("500")),
            ("b", ModelError::transient("502")),
        ];
        let _ = fixture
            .controller()
            .with_fallback_hook(hook)
            .select_and_stream(
                &[
                    candidate("a", "m1"),
                    candidate("b", "m2"),
                    candidate("c", "m3"),
                ],
                scripted_invoke(&calls, failures),
            )
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("a".to_string(), Some("b".to_string())),
                ("b".to_string(), Some("c".to_string())),
            ]
        );
    }
}

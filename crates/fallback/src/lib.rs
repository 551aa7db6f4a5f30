//! Model fallback controller with per-model cooldown discipline.
//!
//! Walks an ordered candidate list, skipping candidates whose cooldown
//! ledger entry is still hot, invoking the rest one at a time. Failures are
//! classified into a typed taxonomy; retryable ones advance the walk and
//! extend the candidate's cooldown, fatal/auth ones disable the key. When
//! every candidate is skipped or failed the walk surfaces one terminal
//! [`AllModelsFailed`] error.

pub mod classify;
pub mod controller;
pub mod error;

pub use {
    classify::classify_message,
    controller::{
        FallbackAttempt, FallbackController, FallbackHook, SelectedStream, StreamTransform,
    },
    error::{AllModelsFailed, ModelError, ModelErrorKind},
};

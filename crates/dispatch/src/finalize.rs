//! Delivery finalizer: decides whether an explicit fallback notice is owed.

/// Notice sent when the agent produced a visible reply that never reached
/// the user.
pub const UNDELIVERED_NOTICE: &str = "⚠️ A reply was generated but could not be delivered.";

/// True iff the turn produced at least one non-silent payload and none of
/// them reached the user. Tool-only/silent turns owe nothing.
#[must_use]
pub fn needs_fallback_notice(delivered: bool, non_silent_count: usize) -> bool {
    non_silent_count > 0 && !delivered
}

// ── Background loop plumbing ──
//
// Shared by the poller and the scanner: the loop phase, cancellable
// delays, and lock access that survives a poisoned mutex.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use strum::Display;
use tokio_util::sync::CancellationToken;

/// Phase of a single-flight background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoopPhase {
    #[default]
    Idle,
    Scheduled,
    Running,
}

/// Sleep for `duration` unless `cancel` fires first.
/// Returns `false` when cancelled.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

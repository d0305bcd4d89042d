use std::time::Duration;

use anyhow::Result;
use rusqlite::ErrorCode;
use tracing::warn;

/// Attempt budget for transactions that lose a write-write race.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubled on every retry.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// True when the error chain contains a SQLite busy/locked failure.
pub fn is_transient_conflict(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    })
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// attempt budget is spent. `op` receives the 1-based attempt number and must
/// be a complete unit of work: it is re-run from scratch on every retry.
pub fn with_conflict_retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_transient_conflict(&e) => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Transaction conflict on attempt {}/{}, retrying in {:?}: {}",
                    attempt, policy.max_attempts, delay, e
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

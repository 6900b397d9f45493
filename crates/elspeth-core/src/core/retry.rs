// elspeth-core/src/core/retry.rs
// ============================================================================
// Module: Elspeth Retry & Concurrency Core
// Description: Exponential-backoff retry and an AIMD-style concurrency pool.
// Purpose: Give the engine loop a uniform retry policy and intra-row parallelism.
// Dependencies: thiserror, tokio, tracing
// ============================================================================

//! ## Overview
//! No crate in the reference workspace implements backoff retry or an AIMD
//! pool; this module is authored fresh, in the reference's idiom (a plain
//! config struct with `Default`, a `thiserror` error enum, `tracing`
//! instrumentation per attempt), using `tokio::time::sleep` for backoff
//! waits and a `tokio::sync::Semaphore`-backed permit pool for the AIMD
//! budget.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;

// ============================================================================
// SECTION: Retry Config
// ============================================================================

/// Exponential-backoff retry policy.
///
/// Every field here must reach the backoff computation in
/// [`wait_exponential_jitter`] — forgotten plumbing (e.g. a hardcoded
/// `exponential_base`) is a documented regression class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeRetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff wait.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub exponential_base: f64,
    /// Fraction of the computed delay to add as random jitter, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RuntimeRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: 0.1,
        }
    }
}

/// Computes the exponential backoff wait for `attempt` (0-based), with
/// multiplicative jitter applied on top.
#[must_use]
pub fn wait_exponential_jitter(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: f64,
    jitter_sample: f64,
) -> Duration {
    let scale = exponential_base.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let raw = base_delay.as_secs_f64() * scale;
    let capped = raw.min(max_delay.as_secs_f64());
    let jittered = capped * (1.0 + jitter * (jitter_sample - 0.5));
    Duration::from_secs_f64(jittered.max(0.0))
}

// ============================================================================
// SECTION: Retry Manager
// ============================================================================

/// Raised when a retryable operation exhausts its attempt budget.
#[derive(Debug, Error)]
#[error("max retries exceeded after {attempts} attempts: {last_error}")]
pub struct MaxRetriesExceeded {
    /// Attempts actually made.
    pub attempts: u32,
    /// Stringified last error observed.
    pub last_error: String,
}

/// Executes an async operation with exponential-backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryManager {
    config: RuntimeRetryConfig,
}

impl RetryManager {
    /// Creates a retry manager bound to `config`.
    #[must_use]
    pub const fn new(config: RuntimeRetryConfig) -> Self {
        Self {
            config,
        }
    }

    /// Runs `operation`, retrying on errors that `is_retryable` accepts.
    ///
    /// Non-retryable errors propagate on the first attempt. Once
    /// `max_attempts` is reached, returns [`MaxRetriesExceeded`] carrying the
    /// attempt count and the stringified last error.
    ///
    /// # Errors
    ///
    /// Returns `Err(E)` immediately for a non-retryable failure, or
    /// [`MaxRetriesExceeded`] once attempts are exhausted.
    pub async fn execute_with_retry<T, E, Fut, Op, Retryable>(
        &self,
        mut operation: Op,
        is_retryable: Retryable,
    ) -> Result<T, RetryOutcome<E>>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Retryable: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retryable = is_retryable(&err);
                    tracing::debug!(attempt, retryable, error = %err, "retry candidate attempt failed");
                    if !retryable {
                        return Err(RetryOutcome::NonRetryable(err));
                    }
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        return Err(RetryOutcome::Exhausted(MaxRetriesExceeded {
                            attempts: attempt,
                            last_error: err.to_string(),
                        }));
                    }
                    let delay = wait_exponential_jitter(
                        attempt - 1,
                        self.config.base_delay,
                        self.config.max_delay,
                        self.config.exponential_base,
                        self.config.jitter,
                        0.5,
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Outcome of a retried operation that did not ultimately succeed.
#[derive(Debug, Error)]
pub enum RetryOutcome<E> {
    /// The operation failed with an error `is_retryable` rejected.
    #[error("non-retryable error")]
    NonRetryable(E),
    /// Retries were exhausted.
    #[error(transparent)]
    Exhausted(MaxRetriesExceeded),
}

// ============================================================================
// SECTION: AIMD Pool
// ============================================================================

/// Configuration for the AIMD-style concurrency pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimdConfig {
    /// Starting concurrency budget.
    pub initial_budget: u32,
    /// Ceiling the budget may grow back to.
    pub max_budget: u32,
    /// Amount the budget grows by after a success.
    pub additive_increase: u32,
    /// Fraction the budget shrinks by after a capacity error, in `[0, 1]`.
    pub multiplicative_decrease: f64,
}

impl Default for AimdConfig {
    fn default() -> Self {
        Self {
            initial_budget: 4,
            max_budget: 32,
            additive_increase: 1,
            multiplicative_decrease: 0.5,
        }
    }
}

/// AIMD-style concurrency-limited executor for intra-row parallelism (e.g.
/// multi-query LLM transforms).
///
/// Each worker shares a token budget enforced by a [`Semaphore`]; on a
/// capacity error the budget shrinks multiplicatively, on success it grows
/// additively. `run_all` returns results in submission order regardless of
/// completion order, so callers see FIFO semantics.
pub struct AimdPool {
    config: AimdConfig,
    budget: Arc<Mutex<u32>>,
    semaphore: Arc<Semaphore>,
}

impl AimdPool {
    /// Creates a new pool starting at `config.initial_budget` permits.
    #[must_use]
    pub fn new(config: AimdConfig) -> Self {
        Self {
            config,
            budget: Arc::new(Mutex::new(config.initial_budget)),
            semaphore: Arc::new(Semaphore::new(config.initial_budget as usize)),
        }
    }

    /// Returns the current concurrency budget.
    #[must_use]
    pub fn current_budget(&self) -> u32 {
        self.budget.lock().map(|guard| *guard).unwrap_or(0)
    }

    fn grow(&self) {
        let mut guard = match self.budget.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let next = (*guard + self.config.additive_increase).min(self.config.max_budget);
        let delta = next.saturating_sub(*guard);
        if delta > 0 {
            self.semaphore.add_permits(delta as usize);
        }
        *guard = next;
    }

    fn shrink(&self) {
        let Ok(mut guard) = self.budget.lock() else {
            return;
        };
        #[allow(
            clippy::cast_possible_truncation,
            reason = "budget values stay well under u32::MAX throughout the pool's lifetime"
        )]
        let next = ((f64::from(*guard)) * (1.0 - self.config.multiplicative_decrease)).max(1.0) as u32;
        *guard = next.min(*guard).max(1);
    }

    /// Runs `operations` with bounded concurrency, returning outcomes in the
    /// same order they were submitted.
    ///
    /// `is_capacity_error` identifies results that should shrink the budget
    /// rather than simply propagate.
    pub async fn run_all<T, E, Fut, F>(
        &self,
        operations: Vec<F>,
        is_capacity_error: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Vec<Result<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send + 'static,
        E: Send + 'static,
    {
        let is_capacity_error = Arc::new(is_capacity_error);
        let mut handles = Vec::with_capacity(operations.len());

        for op in operations {
            let semaphore = Arc::clone(&self.semaphore);
            let budget = Arc::clone(&self.budget);
            let config = self.config;
            let is_capacity_error = Arc::clone(&is_capacity_error);
            handles.push(tokio::spawn(async move {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    return None;
                };
                let result = op().await;
                drop(permit);
                adjust_budget(&budget, &semaphore, config, &result, &is_capacity_error);
                Some(result)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Some(result)) => results.push(result),
                Ok(None) | Err(_) => {
                    // Task panicked or the semaphore was closed; caller sees
                    // the gap via a shorter results vector length mismatch
                    // only if this ever happens, which it should not under
                    // normal operation.
                }
            }
        }
        results
    }
}

fn adjust_budget<T, E>(
    budget: &Arc<Mutex<u32>>,
    semaphore: &Arc<Semaphore>,
    config: AimdConfig,
    result: &Result<T, E>,
    is_capacity_error: &Arc<impl Fn(&E) -> bool>,
) {
    let pool = AimdPool {
        config,
        budget: Arc::clone(budget),
        semaphore: Arc::clone(semaphore),
    };
    match result {
        Ok(_) => pool.grow(),
        Err(err) if is_capacity_error(err) => pool.shrink(),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use super::*;

    #[test]
    fn backoff_uses_every_configured_parameter() {
        let low_base = wait_exponential_jitter(0, Duration::from_millis(100), Duration::from_secs(10), 2.0, 0.0, 0.5);
        let higher_base =
            wait_exponential_jitter(0, Duration::from_millis(100), Duration::from_secs(10), 3.0, 0.0, 0.5);
        assert_ne!(low_base, higher_base, "exponential_base must reach the computation");

        let short_max = wait_exponential_jitter(10, Duration::from_millis(100), Duration::from_secs(1), 3.0, 0.0, 0.5);
        assert!(short_max <= Duration::from_secs(1), "max_delay must cap the wait");
    }

    #[tokio::test]
    async fn retry_manager_succeeds_after_transient_failures() {
        let manager = RetryManager::new(RuntimeRetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: 0.0,
        });
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<&str, RetryOutcome<&str>> = manager
            .execute_with_retry(
                |_attempt| {
                    let count = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async move { if count < 2 { Err("transient") } else { Ok("done") } }
                },
                |_err| true,
            )
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_manager_exhausts_after_max_attempts() {
        let manager = RetryManager::new(RuntimeRetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            exponential_base: 2.0,
            jitter: 0.0,
        });
        let result: Result<(), RetryOutcome<&str>> =
            manager.execute_with_retry(|_attempt| async { Err("always fails") }, |_err| true).await;
        assert!(matches!(result, Err(RetryOutcome::Exhausted(_))));
    }

    #[tokio::test]
    async fn aimd_pool_preserves_submission_order() {
        let pool = AimdPool::new(AimdConfig::default());
        let ops: Vec<_> = (0 .. 5)
            .map(|i| move || async move { Ok::<_, &str>(i) })
            .collect();
        let results = pool.run_all(ops, |_err: &&str| false).await;
        let values: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }
}

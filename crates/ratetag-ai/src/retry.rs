//! Bounded retry with exponential backoff around a [`Predictor`].
//!
//! Backoff waits block the calling thread. Async callers should run the
//! whole retrying call on a blocking task.

use std::time::{Duration, Instant};

use rand::Rng;
use ratetag_core::{Record, RetryConfig};
use tracing::{debug, warn};

use crate::error::PredictError;
use crate::registry::Predictor;

/// What to return once every attempt has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Return the last error (interactive callers).
    Raise,
    /// Return one fallback record per input (batch callers).
    Degrade,
}

/// Delay schedule between attempts.
#[derive(Debug, Clone)]
pub struct BackoffCalculator;

impl BackoffCalculator {
    /// Delay after the failed attempt `attempt` (0-based): the initial backoff
    /// grown by the multiplier, capped, then spread by up to `jitter_factor`
    /// either way.
    pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
        let grown = config.initial_backoff_ms as f64
            * f64::from(config.backoff_multiplier).powi(attempt.min(64) as i32);
        let capped = grown.min(config.max_backoff_ms as f64);

        let spread = f64::from(config.jitter_factor.clamp(0.0, 1.0));
        let factor = if spread > 0.0 {
            1.0 + rand::rng().random_range(-spread..=spread)
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).round().max(0.0) as u64)
    }
}

#[derive(Debug)]
pub struct MaxRetriesExceeded<E> {
    pub last: E,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    /// Run `operation(attempt)` until it succeeds or `max_attempts` is used up.
    ///
    /// `on_backoff(&err, delay, next_attempt)` runs before each sleep.
    pub fn execute_with_retry<T, E, Op, OnBackoff>(
        config: &RetryConfig,
        operation: Op,
        on_backoff: OnBackoff,
    ) -> Result<T, MaxRetriesExceeded<E>>
    where
        Op: FnMut(u32) -> Result<T, E>,
        OnBackoff: Fn(&E, Duration, u32),
    {
        Self::execute_until(config, None, operation, on_backoff)
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), but no further
    /// attempt is scheduled once its backoff would end past `deadline`.
    pub fn execute_until<T, E, Op, OnBackoff>(
        config: &RetryConfig,
        deadline: Option<Instant>,
        mut operation: Op,
        on_backoff: OnBackoff,
    ) -> Result<T, MaxRetriesExceeded<E>>
    where
        Op: FnMut(u32) -> Result<T, E>,
        OnBackoff: Fn(&E, Duration, u32),
    {
        let max = config.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            let err = match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let exhausted = MaxRetriesExceeded {
                last: err,
                attempts: attempt + 1,
            };
            if attempt + 1 >= max {
                return Err(exhausted);
            }

            let delay = BackoffCalculator::calculate_delay(config, attempt);
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                debug!(attempt, "deadline reached, not retrying");
                return Err(exhausted);
            }

            let next_attempt = attempt + 1;
            debug!(
                attempt,
                next_attempt,
                delay_ms = delay.as_millis() as u64,
                "retry backoff"
            );
            on_backoff(&exhausted.last, delay, next_attempt);
            std::thread::sleep(delay);

            attempt = next_attempt;
        }
    }

    /// Retrying prediction.
    ///
    /// Only [`PredictError`]s are retried. On exhaustion, `policy` decides
    /// between returning the last error and degrading to fallback records.
    pub fn predict_with_retry(
        predictor: &dyn Predictor,
        inputs: &[String],
        categories: Option<&[String]>,
        config: &RetryConfig,
        policy: ExhaustionPolicy,
    ) -> Result<Vec<Record>, PredictError> {
        Self::predict_until(predictor, inputs, categories, config, policy, None)
    }

    /// Retrying prediction that gives up scheduling attempts at `deadline`.
    pub fn predict_until(
        predictor: &dyn Predictor,
        inputs: &[String],
        categories: Option<&[String]>,
        config: &RetryConfig,
        policy: ExhaustionPolicy,
        deadline: Option<Instant>,
    ) -> Result<Vec<Record>, PredictError> {
        let result = Self::execute_until(
            config,
            deadline,
            |_| predictor.predict(inputs, categories),
            |err, delay, next_attempt| {
                warn!(
                    error = %err,
                    category = err.category().unwrap_or("-"),
                    attempt = next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "prediction failed, retrying"
                );
            },
        );

        match result {
            Ok(records) => Ok(records),
            Err(MaxRetriesExceeded { last, attempts }) => match policy {
                ExhaustionPolicy::Raise => Err(last),
                ExhaustionPolicy::Degrade => {
                    let categories = predictor.resolve_categories(categories);
                    warn!(
                        error = %last,
                        attempts,
                        rows = inputs.len(),
                        "error during prediction after retries, emitting fallback records"
                    );
                    Ok(inputs
                        .iter()
                        .map(|input| Record::fallback(input.as_str(), &categories))
                        .collect())
                }
            },
        }
    }
}

//! Execution Controller
//!
//! Generic bounded-concurrency, rate-limited, retrying task runner used by the
//! comparison orchestrator and by external stage drivers.
//!
//! # Architecture
//!
//! ```text
//! items ──chunks(batch_size)──► batch ──► per item:
//!                                          1. rate-limit wait (min_delay spacing)
//!                                          2. semaphore permit (concurrency ceiling)
//!                                          3. processor(item), up to retry_attempts tries,
//!                                             try k delayed by (k-1) × retry_delay
//! ```
//!
//! Cancellation is coarse: the token is consulted once per batch boundary, so a
//! cancel request drains the current batch before stopping. With
//! `continue_on_error = false` the first exhausted item aborts the run: items of
//! the current batch still waiting for a permit are skipped and no further batch
//! starts.
//!
//! # Example
//!
//! ```ignore
//! let controller = ExecutionController::new(ExecutionConfig::default());
//! let outcome = controller
//!     .process_all(ids, |id| async move { enrich(id).await })
//!     .await;
//! info!(succeeded = outcome.succeeded.len(), failed = outcome.failed.len());
//! ```

use crate::context::{spacing_limiter, DirectLimiter};
use futures::stream::{self, StreamExt};
use reelcheck_common::config::ExecutionSettings;
use reelcheck_common::time::millis_to_duration;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Controller knobs
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Minimum spacing between two item starts (zero = unlimited)
    pub min_delay: Duration,
    pub continue_on_error: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::from(&ExecutionSettings::default())
    }
}

impl From<&ExecutionSettings> for ExecutionConfig {
    fn from(settings: &ExecutionSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            concurrency: settings.concurrency.max(1),
            retry_attempts: settings.retry_attempts.max(1),
            retry_delay: millis_to_duration(settings.retry_delay_ms),
            min_delay: Duration::ZERO,
            continue_on_error: settings.continue_on_error,
        }
    }
}

impl ExecutionConfig {
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }
}

/// Emitted after every processed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    /// Extrapolated from the running average item duration
    pub eta_ms: u64,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// An item that exhausted its retries
#[derive(Debug)]
pub struct FailedItem<T, E> {
    pub item: T,
    pub error: E,
    pub attempts: u32,
}

/// Result of one `process_all` run
#[derive(Debug)]
pub struct ExecutionOutcome<T, R, E> {
    pub run_id: Uuid,
    pub succeeded: Vec<R>,
    pub failed: Vec<FailedItem<T, E>>,
    /// Items never started (abort or cancellation)
    pub skipped: Vec<T>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

enum ItemOutcome<T, R, E> {
    Succeeded(R),
    Failed(FailedItem<T, E>),
    Skipped(T),
}

/// Bounded-concurrency retrying runner
pub struct ExecutionController {
    config: ExecutionConfig,
    limiter: Option<Arc<DirectLimiter>>,
    cancel_token: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl ExecutionController {
    pub fn new(config: ExecutionConfig) -> Self {
        let limiter = spacing_limiter(config.min_delay).map(Arc::new);
        Self {
            config,
            limiter,
            cancel_token: CancellationToken::new(),
            progress: None,
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Run `processor` over every item
    ///
    /// Completion order across items is unspecified.
    pub async fn process_all<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        processor: F,
    ) -> ExecutionOutcome<T, R, E>
    where
        T: Clone,
        E: Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
    {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let total = items.len();
        let semaphore = Semaphore::new(self.config.concurrency);
        let abort = CancellationToken::new();

        let mut outcome = ExecutionOutcome {
            run_id,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            duration_ms: 0,
            cancelled: false,
        };

        info!(
            run_id = %run_id,
            total,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Execution run starting"
        );

        let mut remaining = items.into_iter().peekable();
        let mut batch_index = 0usize;

        while remaining.peek().is_some() {
            if self.cancel_token.is_cancelled() {
                outcome.cancelled = true;
                outcome.skipped.extend(remaining.by_ref());
                info!(run_id = %run_id, batch_index, "Run cancelled at batch boundary");
                break;
            }
            if abort.is_cancelled() {
                outcome.skipped.extend(remaining.by_ref());
                break;
            }

            let batch: Vec<T> = remaining.by_ref().take(self.config.batch_size).collect();
            let batch_len = batch.len();
            debug!(run_id = %run_id, batch_index, batch_len, "Batch starting");

            let processor = &processor;
            let semaphore = &semaphore;
            let abort = &abort;
            let mut in_flight = stream::iter(batch)
                .map(|item| self.run_item(item, processor, semaphore, abort))
                .buffer_unordered(batch_len);

            while let Some(item_outcome) = in_flight.next().await {
                match item_outcome {
                    ItemOutcome::Succeeded(r) => outcome.succeeded.push(r),
                    ItemOutcome::Failed(failed) => {
                        warn!(
                            run_id = %run_id,
                            attempts = failed.attempts,
                            error = %failed.error,
                            "Item failed after retries"
                        );
                        if !self.config.continue_on_error && !abort.is_cancelled() {
                            warn!(run_id = %run_id, "Aborting run: continue_on_error is off");
                            abort.cancel();
                        }
                        outcome.failed.push(failed);
                    }
                    ItemOutcome::Skipped(item) => {
                        outcome.skipped.push(item);
                        continue;
                    }
                }
                self.report_progress(&outcome, total, start);
            }

            batch_index += 1;
        }

        outcome.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            cancelled = outcome.cancelled,
            duration_ms = outcome.duration_ms,
            "Execution run finished"
        );
        outcome
    }

    async fn run_item<T, R, E, F, Fut>(
        &self,
        item: T,
        processor: &F,
        semaphore: &Semaphore,
        abort: &CancellationToken,
    ) -> ItemOutcome<T, R, E>
    where
        T: Clone,
        E: Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
    {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        // Semaphore is never closed
        let Ok(_permit) = semaphore.acquire().await else {
            return ItemOutcome::Skipped(item);
        };
        if abort.is_cancelled() {
            return ItemOutcome::Skipped(item);
        }

        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if attempt > 1 {
                let delay = self.config.retry_delay * (attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying item");
                tokio::time::sleep(delay).await;
            }

            match processor(item.clone()).await {
                Ok(result) => return ItemOutcome::Succeeded(result),
                Err(error) if attempt >= max_attempts => {
                    return ItemOutcome::Failed(FailedItem {
                        item,
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    debug!(attempt, error = %error, "Item attempt failed");
                }
            }
        }
    }

    fn report_progress<T, R, E>(&self, outcome: &ExecutionOutcome<T, R, E>, total: usize, start: Instant) {
        let Some(callback) = &self.progress else {
            return;
        };
        let succeeded = outcome.succeeded.len();
        let failed = outcome.failed.len();
        let processed = succeeded + failed;
        let remaining = total.saturating_sub(processed) as u64;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        callback(ProgressEvent {
            processed,
            succeeded,
            failed,
            total,
            eta_ms: eta_ms(elapsed_ms, processed as u64, remaining),
        });
    }
}

/// Remaining time at the running average item duration
fn eta_ms(elapsed_ms: u64, processed: u64, remaining: u64) -> u64 {
    if processed == 0 {
        return 0;
    }
    elapsed_ms.saturating_mul(remaining) / processed
}

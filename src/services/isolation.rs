//! Failure containment for feed blocks
//!
//! Every block runs on its own task under a deadline. Optional blocks
//! ([`run_block`]) never fail: timeouts, errors and panics become an empty
//! section plus one classified log line. The required block
//! ([`run_required`]) gets the same deadline and panic boundary but hands the
//! error back to the caller.
use std::{any::Any, future::Future, time::Duration};

use tokio::task::JoinError;

use crate::error::{AppError, AppResult, FailureClass};

/// How an optional block ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Completed,
    /// The block failed; its error was classified
    Failed(FailureClass),
    Panicked,
    TimedOut,
}

/// Runs an optional block, yielding an empty result on any failure
pub async fn run_block<T, F>(label: &'static str, timeout: Duration, block: F) -> Vec<T>
where
    T: Send + 'static,
    F: Future<Output = AppResult<Vec<T>>> + Send + 'static,
{
    run_block_with_outcome(label, timeout, block).await.0
}

/// Like [`run_block`], also reporting how the block ended
pub async fn run_block_with_outcome<T, F>(
    label: &'static str,
    timeout: Duration,
    block: F,
) -> (Vec<T>, BlockOutcome)
where
    T: Send + 'static,
    F: Future<Output = AppResult<Vec<T>>> + Send + 'static,
{
    match supervise(timeout, block).await {
        Ok(items) => (items, BlockOutcome::Completed),
        Err(Contained::Failed(e)) => {
            let class = e.failure_class();
            log_failure(label, class, &e);
            (Vec::new(), BlockOutcome::Failed(class))
        }
        Err(Contained::Panicked(message)) => {
            tracing::error!(block = label, panic = %message, "Feed block panicked");
            (Vec::new(), BlockOutcome::Panicked)
        }
        Err(Contained::TimedOut) => {
            tracing::error!(
                block = label,
                timeout_ms = timeout.as_millis() as u64,
                "Feed block timed out"
            );
            (Vec::new(), BlockOutcome::TimedOut)
        }
    }
}

/// Runs the required block under the same deadline and panic boundary,
/// converting both into errors for the caller
pub async fn run_required<T, F>(label: &'static str, timeout: Duration, block: F) -> AppResult<T>
where
    T: Send + 'static,
    F: Future<Output = AppResult<T>> + Send + 'static,
{
    match supervise(timeout, block).await {
        Ok(value) => Ok(value),
        Err(Contained::Failed(e)) => Err(e),
        Err(Contained::Panicked(message)) => Err(AppError::Internal(format!(
            "{} panicked: {}",
            label, message
        ))),
        Err(Contained::TimedOut) => Err(AppError::Timeout(timeout)),
    }
}

enum Contained {
    Failed(AppError),
    Panicked(String),
    TimedOut,
}

async fn supervise<T, F>(timeout: Duration, block: F) -> Result<T, Contained>
where
    T: Send + 'static,
    F: Future<Output = AppResult<T>> + Send + 'static,
{
    let mut handle = tokio::spawn(block);

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(Contained::Failed(e)),
        Ok(Err(join_error)) => Err(Contained::Panicked(join_message(join_error))),
        Err(_) => {
            // Cancels the block's future; a statement already sent to the database may still complete.
            handle.abort();
            Err(Contained::TimedOut)
        }
    }
}

fn log_failure(label: &'static str, class: FailureClass, error: &AppError) {
    let message = failure_message(class);
    match class {
        FailureClass::Empty => tracing::trace!(block = label, "{}", message),
        FailureClass::DataShape | FailureClass::CacheUnavailable => {
            tracing::warn!(block = label, error = %error, "{}", message)
        }
        FailureClass::Timeout | FailureClass::Fault => {
            tracing::error!(block = label, error = %error, "{}", message)
        }
    }
}

fn failure_message(class: FailureClass) -> &'static str {
    match class {
        FailureClass::Empty => "Feed block found nothing",
        FailureClass::DataShape => "Feed block returned malformed data",
        FailureClass::CacheUnavailable => "Feed block could not reach the cache store",
        FailureClass::Timeout => "Feed block timed out",
        FailureClass::Fault => "Feed block failed",
    }
}

fn join_message(error: JoinError) -> String {
    if error.is_panic() {
        panic_message(error.into_panic())
    } else {
        "task cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

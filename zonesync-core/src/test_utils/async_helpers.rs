//! Async test helpers
//!
//! Timeouts around channel receives and watch conditions, so a broken
//! test fails instead of hanging.

use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};

/// Default timeout for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that should fail fast (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Receive from a channel with a timeout
pub async fn recv_timeout<T>(
    rx: &mut mpsc::Receiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Collect `count` messages, each within `per_message_timeout`
pub async fn collect_n<T>(
    rx: &mut mpsc::Receiver<T>,
    count: usize,
    per_message_timeout: Duration,
) -> Result<Vec<T>, RecvTimeoutError> {
    let mut results = Vec::with_capacity(count);
    for _ in 0..count {
        results.push(recv_timeout(rx, per_message_timeout).await?);
    }
    Ok(results)
}

/// Drain whatever is buffered without waiting
pub fn try_drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut results = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        results.push(msg);
    }
    results
}

/// Wait until the watched value satisfies `predicate`, returning a copy of it.
///
/// Panics after [`DEFAULT_TEST_TIMEOUT`].
pub async fn wait_for_watch<T, F>(rx: &mut watch::Receiver<T>, predicate: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    match timeout(DEFAULT_TEST_TIMEOUT, rx.wait_for(predicate)).await {
        Ok(Ok(value)) => value.clone(),
        Ok(Err(_)) => panic!("watch sender dropped before condition was met"),
        Err(_) => panic!("condition not met within {:?}", DEFAULT_TEST_TIMEOUT),
    }
}

/// Assert a future completes within `duration`
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Assert a future does NOT complete within `duration`
pub async fn assert_times_out<F, T>(duration: Duration, future: F)
where
    F: Future<Output = T>,
{
    if timeout(duration, future).await.is_ok() {
        panic!("Expected future to time out, but it completed within {:?}", duration);
    }
}

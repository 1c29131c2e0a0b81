//! Wall-clock bounds for analysis waits and long address-space scans.
//!
//! `with_timeout` wraps an async wait (used by
//! `AddressSpace::update_analysis_and_wait_async`), and `IterationTimeout`
//! is checked from inside search loops that may walk gigabytes of bytes.

use crate::error::{Result, VspaceError};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Timeout configuration for a named operation
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Maximum duration for the operation
    pub duration: Duration,
    /// Whether to log when the deadline is hit
    pub log_warnings: bool,
    /// Operation name for logging
    pub operation_name: String,
}

impl TimeoutConfig {
    pub fn new(seconds: u64, operation: impl Into<String>) -> Self {
        Self {
            duration: Duration::from_secs(seconds),
            log_warnings: true,
            operation_name: operation.into(),
        }
    }

    /// Sub-second deadlines, mostly for tests and interactive callers.
    pub fn from_duration(duration: Duration, operation: impl Into<String>) -> Self {
        Self {
            duration,
            log_warnings: true,
            operation_name: operation.into(),
        }
    }

    /// Disable the error log on expiry.
    pub fn quiet(mut self) -> Self {
        self.log_warnings = false;
        self
    }
}

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(config: TimeoutConfig, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(
        operation = %config.operation_name,
        timeout_ms = config.duration.as_millis() as u64,
        "Starting bounded operation"
    );

    match timeout(config.duration, future).await {
        Ok(result) => {
            debug!(operation = %config.operation_name, "Bounded operation finished");
            result
        }
        Err(_) => {
            if config.log_warnings {
                error!(
                    operation = %config.operation_name,
                    timeout_ms = config.duration.as_millis() as u64,
                    "Operation timed out"
                );
            }
            Err(VspaceError::Timeout {
                seconds: config.duration.as_secs(),
            })
        }
    }
}

/// Synchronous deadline check for scan loops.
///
/// The clock is only consulted every `check_interval` iterations.
pub struct IterationTimeout {
    start: Instant,
    max_duration: Duration,
    check_interval: usize,
    iteration_count: usize,
    operation_name: String,
}

impl IterationTimeout {
    pub fn new(seconds: u64, operation: impl Into<String>) -> Self {
        Self::from_duration(Duration::from_secs(seconds), operation)
    }

    pub fn from_duration(max_duration: Duration, operation: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            max_duration,
            check_interval: 1000,
            iteration_count: 0,
            operation_name: operation.into(),
        }
    }

    /// Set how often (in iterations) the clock is read
    pub fn with_check_interval(mut self, interval: usize) -> Self {
        self.check_interval = interval.max(1);
        self
    }

    /// Count one iteration and fail once the deadline has passed.
    pub fn check(&mut self) -> Result<()> {
        self.iteration_count += 1;

        if self.iteration_count % self.check_interval == 0 {
            let elapsed = self.start.elapsed();

            if elapsed > self.max_duration {
                error!(
                    operation = %self.operation_name,
                    iterations = self.iteration_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Scan exceeded its deadline"
                );
                return Err(VspaceError::Timeout {
                    seconds: elapsed.as_secs(),
                });
            }

            if elapsed > self.max_duration / 2 && self.iteration_count % (self.check_interval * 64) == 0 {
                warn!(
                    operation = %self.operation_name,
                    iterations = self.iteration_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Scan still running"
                );
            }
        }

        Ok(())
    }

    pub fn iterations(&self) -> usize {
        self.iteration_count
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Macro for adding timeout checks to loops
#[macro_export]
macro_rules! check_timeout {
    ($timeout:expr) => {
        $timeout.check()?
    };
    ($timeout:expr, $msg:expr) => {
        $timeout.check().map_err(|e| {
            tracing::error!("Timeout in {}: {}", $msg, e);
            e
        })?
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_async_timeout_success() {
        let config = TimeoutConfig::new(1, "wait_idle");

        let result = with_timeout(config, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(7)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_async_timeout_failure() {
        let config = TimeoutConfig::from_duration(Duration::from_millis(50), "wait_idle").quiet();

        let result: Result<i32> = with_timeout(config, async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(7)
        })
        .await;

        assert!(matches!(result, Err(VspaceError::Timeout { .. })));
    }

    #[test]
    fn test_iteration_timeout_expires() {
        let mut t = IterationTimeout::from_duration(Duration::from_millis(20), "scan")
            .with_check_interval(5);
        for _ in 0..4 {
            t.check().unwrap();
        }
        std::thread::sleep(Duration::from_millis(40));
        let mut hit = false;
        for _ in 0..5 {
            if t.check().is_err() {
                hit = true;
                break;
            }
        }
        assert!(hit);
    }

    #[test]
    fn test_iteration_counter() {
        let mut t = IterationTimeout::new(60, "counter").with_check_interval(0);
        for _ in 0..50 {
            t.check().unwrap();
        }
        assert_eq!(t.iterations(), 50);
    }
}

//! Bounded retry over the record store.
//!
//! [`RetryingExecutor`] runs one unit of work against a freshly acquired connection,
//! classifies any failure with [`classify`] and retries transient faults with a linear
//! backoff. All attempt bookkeeping is local to one call, so a single executor can be
//! shared freely between concurrent report requests.

mod classifier;

pub use classifier::{classify, is_transient};

use crate::db::ConnectionSource;
use crate::errors::{FaultClass, ReportError, StoreFault};
use futures::future::BoxFuture;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Future returned by one attempt of an operation; borrows the attempt's connection.
pub type AttemptFuture<'c, T> = BoxFuture<'c, Result<T, StoreFault>>;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Unit of the linear backoff
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Wait that follows failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Runs data-store operations with bounded retry.
pub struct RetryingExecutor<S> {
    source: Arc<S>,
    policy: RetryPolicy,
}

impl<S> Clone for RetryingExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            policy: self.policy,
        }
    }
}

impl<S: ConnectionSource> RetryingExecutor<S> {
    pub fn new(source: Arc<S>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute `op` with retries and no caller-imposed cancellation.
    pub async fn execute<T, F>(&self, operation: &str, op: F) -> Result<T, ReportError>
    where
        T: Send,
        F: for<'c> Fn(&'c S::Connection) -> AttemptFuture<'c, T> + Send + Sync,
    {
        self.execute_with_cancel(operation, &CancellationToken::new(), op)
            .await
    }

    /// Execute `op` with retries, giving up at the next suspension point once `cancel` fires.
    ///
    /// Each attempt gets its own connection, which is released before the outcome is
    /// inspected. A permanent fault or the last allowed attempt ends the call with
    /// [`ReportError::ReportGenerationFailed`] carrying the last fault verbatim.
    pub async fn execute_with_cancel<T, F>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, ReportError>
    where
        T: Send,
        F: for<'c> Fn(&'c S::Connection) -> AttemptFuture<'c, T> + Send + Sync,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                warn!(operation = %operation, attempts = attempt, "Operation cancelled");
                return Err(ReportError::Cancelled { attempts: attempt });
            }

            attempt += 1;
            let start = Instant::now();
            let result = match self.source.acquire().await {
                Ok(conn) => {
                    let result = op(&conn).await;
                    self.source.release(conn).await;
                    result
                }
                Err(fault) => Err(fault),
            };
            histogram!("sales_reports.query.duration", start.elapsed(), "operation" => operation.to_string());

            let fault = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = %operation, attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(fault) => fault,
            };

            let class = classify(&fault);
            if class == FaultClass::Permanent || attempt >= max_attempts {
                if class == FaultClass::Transient {
                    counter!("sales_reports.retry.exhausted", 1, "operation" => operation.to_string());
                }
                error!(
                    operation = %operation,
                    attempts = attempt,
                    class = %class,
                    code = fault.code().unwrap_or("-"),
                    error = %fault.message,
                    "Operation failed"
                );
                return Err(ReportError::ReportGenerationFailed {
                    class,
                    attempts: attempt,
                    fault,
                });
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                operation = %operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                code = fault.code().unwrap_or("-"),
                error = %fault.message,
                "Transient store fault, retrying"
            );
            counter!("sales_reports.retry.attempt", 1, "operation" => operation.to_string());

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(operation = %operation, attempts = attempt, "Operation cancelled during backoff");
                    return Err(ReportError::Cancelled { attempts: attempt });
                }
                _ = sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Connection that remembers which acquisition produced it.
    struct FakeConn {
        serial: u32,
    }

    #[derive(Default)]
    struct FakeSource {
        acquired: AtomicU32,
        released: Mutex<Vec<u32>>,
        acquire_faults: Mutex<VecDeque<StoreFault>>,
    }

    #[async_trait]
    impl ConnectionSource for FakeSource {
        type Connection = FakeConn;

        async fn acquire(&self) -> Result<FakeConn, StoreFault> {
            if let Some(fault) = self.acquire_faults.lock().unwrap().pop_front() {
                return Err(fault);
            }
            let serial = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FakeConn { serial })
        }

        async fn release(&self, conn: FakeConn) {
            self.released.lock().unwrap().push(conn.serial);
        }
    }

    /// Operation that fails with the scripted faults, then succeeds.
    struct Script {
        faults: Mutex<VecDeque<StoreFault>>,
        calls: AtomicU32,
        seen: Mutex<Vec<u32>>,
    }

    impl Script {
        fn new(faults: Vec<StoreFault>) -> Arc<Self> {
            Arc::new(Self {
                faults: Mutex::new(faults.into()),
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn run(&self, conn: &FakeConn) -> Result<u32, StoreFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(conn.serial);
            match self.faults.lock().unwrap().pop_front() {
                Some(fault) => Err(fault),
                None => Ok(42),
            }
        }
    }

    fn executor(source: Arc<FakeSource>) -> RetryingExecutor<FakeSource> {
        RetryingExecutor::new(source, RetryPolicy::default())
    }

    fn transient() -> StoreFault {
        StoreFault::new("08006", "connection reset")
    }

    async fn run_script(
        exec: &RetryingExecutor<FakeSource>,
        script: &Arc<Script>,
    ) -> Result<u32, ReportError> {
        let script = script.clone();
        exec.execute("test_op", move |conn| {
            let script = script.clone();
            Box::pin(async move { script.run(conn) })
        })
        .await
    }

    fn assert_two_waits(elapsed: Duration) {
        assert!(
            elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(2000),
            "expected 500ms + 1000ms of backoff, got {:?}",
            elapsed
        );
    }

    #[test]
    fn delay_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn success_consumes_no_retry() {
        let source = Arc::new(FakeSource::default());
        let exec = executor(source.clone());
        let script = Script::new(vec![]);

        let started = tokio::time::Instant::now();
        assert_eq!(run_script(&exec, &script).await.unwrap(), 42);

        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(*source.released.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_two_transient_faults() {
        let source = Arc::new(FakeSource::default());
        let exec = executor(source.clone());
        let script = Script::new(vec![transient(), StoreFault::new("40P01", "deadlock")]);

        let started = tokio::time::Instant::now();
        assert_eq!(run_script(&exec, &script).await.unwrap(), 42);

        assert_eq!(script.calls.load(Ordering::SeqCst), 3);
        // Two waits: 500ms after the first failure, 1000ms after the second.
        assert_two_waits(started.elapsed());
        // A fresh connection per attempt, each released.
        assert_eq!(*script.seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*source.released.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_transient_faults() {
        let source = Arc::new(FakeSource::default());
        let exec = executor(source.clone());
        let script = Script::new(vec![
            transient(),
            transient(),
            StoreFault::new("53300", "too many connections"),
            transient(),
        ]);

        let started = tokio::time::Instant::now();
        let err = run_script(&exec, &script).await.unwrap_err();

        assert_matches!(
            &err,
            ReportError::ReportGenerationFailed { class: FaultClass::Transient, attempts: 3, fault }
                if fault.code() == Some("53300")
        );
        assert_eq!(script.calls.load(Ordering::SeqCst), 3);
        // No wait after the last attempt.
        assert_two_waits(started.elapsed());
        assert_eq!(source.released.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_fault_fails_immediately() {
        let source = Arc::new(FakeSource::default());
        let exec = executor(source.clone());
        let script = Script::new(vec![StoreFault::new("42601", "syntax error")]);

        let started = tokio::time::Instant::now();
        let err = run_script(&exec, &script).await.unwrap_err();

        assert_matches!(
            err,
            ReportError::ReportGenerationFailed { class: FaultClass::Permanent, attempts: 1, .. }
        );
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(*source.released.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn acquisition_faults_are_retried_too() {
        let source = Arc::new(FakeSource::default());
        source
            .acquire_faults
            .lock()
            .unwrap()
            .push_back(StoreFault::new(crate::errors::CODE_CONNECTION_ACQUIRE, "pool exhausted"));
        let exec = executor(source.clone());
        let script = Script::new(vec![]);

        assert_eq!(run_script(&exec, &script).await.unwrap(), 42);
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.acquired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_waits() {
        let source = Arc::new(FakeSource::default());
        let exec = RetryingExecutor::new(
            source,
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(500),
            },
        );
        let script = Script::new(vec![transient()]);

        let started = tokio::time::Instant::now();
        let err = run_script(&exec, &script).await.unwrap_err();
        assert_matches!(err, ReportError::ReportGenerationFailed { attempts: 1, .. });
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let source = Arc::new(FakeSource::default());
        let exec = executor(source.clone());
        let script = Script::new(vec![transient(), transient()]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let op_script = script.clone();
        let err = exec
            .execute_with_cancel("test_op", &cancel, move |conn| {
                let script = op_script.clone();
                Box::pin(async move { script.run(conn) })
            })
            .await
            .unwrap_err();

        assert_matches!(err, ReportError::Cancelled { attempts: 1 });
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*source.released.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn cancelled_token_prevents_any_attempt() {
        let source = Arc::new(FakeSource::default());
        let exec = executor(source.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = exec
            .execute_with_cancel("test_op", &cancel, |_conn| Box::pin(async { Ok(1u32) }))
            .await
            .unwrap_err();

        assert_matches!(err, ReportError::Cancelled { attempts: 0 });
        assert_eq!(source.acquired.load(Ordering::SeqCst), 0);
    }
}

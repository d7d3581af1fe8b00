//! Batch executor
//!
//! Runs an ordered list of calls against a [`CallExecutor`], sequentially or
//! in parallel, under one deadline shared by the whole batch. Every item gets
//! exactly one entry in the response, in input order:
//! - a failing or panicking item only fails its own entry
//! - items unfinished at the deadline get `BatchTimeout`
//! - items finished before the deadline keep their results

use crate::config::{BatchConfig, BatchMode};
use crate::context::RequestContext;
use crate::dispatch::{panic_message, Call, CallExecutor};
use crate::error::DispatchError;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// One request of a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Caller-chosen correlation id, echoed back
    pub id: Value,

    /// The parsed call, or the error parsing produced
    pub call: Result<Call, DispatchError>,
}

impl BatchItem {
    pub fn new(id: impl Into<Value>, call: Call) -> Self {
        Self {
            id: id.into(),
            call: Ok(call),
        }
    }

    /// An item that already failed before execution
    pub fn failed(id: impl Into<Value>, error: DispatchError) -> Self {
        Self {
            id: id.into(),
            call: Err(error),
        }
    }
}

/// Outcome of one item
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub id: Value,
    pub outcome: Result<Value, DispatchError>,
}

/// Outcomes of a batch, in input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResponse {
    pub entries: Vec<BatchEntry>,
}

impl BatchResponse {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter()
    }

    /// Number of entries that timed out
    pub fn timed_out(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Err(DispatchError::BatchTimeout { .. })))
            .count()
    }
}

impl IntoIterator for BatchResponse {
    type Item = BatchEntry;
    type IntoIter = std::vec::IntoIter<BatchEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Run a call, containing panics of the executor itself
async fn isolated<E: CallExecutor + ?Sized>(
    executor: &E,
    call: Call,
    ctx: &RequestContext,
) -> Result<Value, DispatchError> {
    let label = call.label();
    match AssertUnwindSafe(executor.execute(call, ctx)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(DispatchError::HandlerExecution {
            name: label,
            message: format!("handler panicked: {}", panic_message(payload.as_ref())),
            data: None,
        }),
    }
}

/// Executes batches against a shared executor
pub struct BatchExecutor<E: CallExecutor> {
    executor: Arc<E>,
    config: BatchConfig,
}

impl<E: CallExecutor> std::fmt::Debug for BatchExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: CallExecutor> BatchExecutor<E> {
    pub fn new(executor: Arc<E>, config: BatchConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run a batch in the configured mode
    pub async fn run(&self, items: Vec<BatchItem>, ctx: &RequestContext) -> Result<BatchResponse, DispatchError> {
        self.run_with_mode(items, self.config.mode, ctx).await
    }

    /// Run a batch in `mode`
    ///
    /// # Errors
    ///
    /// The whole batch is rejected with `InvalidRequest` when empty and with
    /// `BatchSizeExceeded` when over `max_items`. Every other failure is
    /// reported per item.
    pub async fn run_with_mode(
        &self,
        items: Vec<BatchItem>,
        mode: BatchMode,
        ctx: &RequestContext,
    ) -> Result<BatchResponse, DispatchError> {
        if items.is_empty() {
            return Err(DispatchError::invalid_request("empty batch"));
        }
        if items.len() > self.config.max_items {
            return Err(DispatchError::BatchSizeExceeded {
                size: items.len(),
                max: self.config.max_items,
            });
        }

        let deadline = Instant::now() + self.config.timeout;
        debug!(items = items.len(), ?mode, "Running batch");

        let response = match mode {
            BatchMode::Sequential => self.run_sequential(items, deadline, ctx).await,
            BatchMode::Parallel => self.run_parallel(items, deadline, ctx).await,
        };

        let timed_out = response.timed_out();
        if timed_out > 0 {
            warn!(
                timed_out,
                items = response.len(),
                timeout = ?self.config.timeout,
                "Batch deadline elapsed"
            );
        }
        Ok(response)
    }

    fn timeout_error(&self) -> DispatchError {
        DispatchError::BatchTimeout {
            timeout: self.config.timeout,
        }
    }

    async fn run_sequential(&self, items: Vec<BatchItem>, deadline: Instant, ctx: &RequestContext) -> BatchResponse {
        let sleep = sleep_until(deadline);
        tokio::pin!(sleep);

        let mut expired = false;
        let mut entries = Vec::with_capacity(items.len());

        for item in items {
            expired = expired || Instant::now() >= deadline;
            let outcome = match item.call {
                _ if expired => Err(self.timeout_error()),
                Err(e) => Err(e),
                Ok(call) => {
                    tokio::select! {
                        outcome = isolated(self.executor.as_ref(), call, ctx) => outcome,
                        _ = &mut sleep => {
                            expired = true;
                            Err(self.timeout_error())
                        }
                    }
                }
            };
            entries.push(BatchEntry { id: item.id, outcome });
        }

        BatchResponse { entries }
    }

    async fn run_parallel(&self, items: Vec<BatchItem>, deadline: Instant, ctx: &RequestContext) -> BatchResponse {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut ids = Vec::with_capacity(items.len());
        let mut slots: Vec<Option<Result<Value, DispatchError>>> = Vec::with_capacity(items.len());
        let mut labels = Vec::with_capacity(items.len());
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            ids.push(item.id);
            match item.call {
                Err(e) => {
                    labels.push(String::new());
                    slots.push(Some(Err(e)));
                }
                Ok(call) => {
                    labels.push(call.label());
                    slots.push(None);

                    let executor = Arc::clone(&self.executor);
                    let semaphore = Arc::clone(&semaphore);
                    let ctx = ctx.clone();
                    tasks.spawn(async move {
                        // never closed
                        let _permit = semaphore.acquire_owned().await.ok();
                        (index, isolated(executor.as_ref(), call, &ctx).await)
                    });
                }
            }
        }

        let sleep = sleep_until(deadline);
        tokio::pin!(sleep);
        let mut expired = false;

        while !tasks.is_empty() {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => slots[index] = Some(outcome),
                    Some(Err(e)) => warn!(error = %e, "Batch task failed to join"),
                    None => break,
                },
                _ = &mut sleep => {
                    expired = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        let entries = ids
            .into_iter()
            .zip(slots)
            .zip(labels)
            .map(|((id, slot), label)| BatchEntry {
                id,
                outcome: slot.unwrap_or_else(|| {
                    if expired {
                        Err(self.timeout_error())
                    } else {
                        Err(DispatchError::HandlerExecution {
                            name: label,
                            message: "task ended without a result".to_string(),
                            data: None,
                        })
                    }
                }),
            })
            .collect();

        BatchResponse { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes `tools/call` arguments after sleeping `arguments.sleep_ms`
    #[derive(Default)]
    struct SleepyExecutor {
        started: AtomicUsize,
        peak: AtomicUsize,
        running: AtomicUsize,
    }

    #[async_trait]
    impl CallExecutor for SleepyExecutor {
        async fn execute(&self, call: Call, _ctx: &RequestContext) -> Result<Value, DispatchError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let outcome = match call {
                Call::CallTool { name, arguments } => {
                    let ms = arguments["sleep_ms"].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    match name.as_str() {
                        "panic" => panic!("item exploded"),
                        "fail" => Err(DispatchError::HandlerExecution {
                            name,
                            message: "failed".to_string(),
                            data: None,
                        }),
                        _ => Ok(json!({"name": name, "slept": ms})),
                    }
                }
                other => Ok(json!(other.method())),
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn call(name: &str, sleep_ms: u64) -> Call {
        Call::CallTool {
            name: name.to_string(),
            arguments: json!({"sleep_ms": sleep_ms}),
        }
    }

    fn executor(config: BatchConfig) -> (Arc<SleepyExecutor>, BatchExecutor<SleepyExecutor>) {
        let inner = Arc::new(SleepyExecutor::default());
        (Arc::clone(&inner), BatchExecutor::new(inner, config))
    }

    fn config(timeout_ms: u64) -> BatchConfig {
        BatchConfig {
            timeout: Duration::from_millis(timeout_ms),
            ..BatchConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_preserves_input_order() {
        let (_, batch) = executor(config(1_000));
        let items = vec![
            BatchItem::new(1, call("slow", 300)),
            BatchItem::new(2, call("fast", 10)),
            BatchItem::new(3, call("medium", 100)),
        ];
        let response = batch.run(items, &RequestContext::new()).await.unwrap();
        let ids: Vec<Value> = response.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(response.entries[0].outcome, Ok(json!({"name": "slow", "slept": 300})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_runs_concurrently() {
        let (_, batch) = executor(config(1_000));
        let started = Instant::now();
        let items = (0..4).map(|i| BatchItem::new(i, call("t", 200))).collect();
        let response = batch.run(items, &RequestContext::new()).await.unwrap();
        assert!(response.iter().all(|e| e.outcome.is_ok()));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let (inner, batch) = executor(BatchConfig {
            max_concurrency: 2,
            ..config(5_000)
        });
        let items = (0..6).map(|i| BatchItem::new(i, call("t", 50))).collect();
        batch.run(items, &RequestContext::new()).await.unwrap();
        assert_eq!(inner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_isolation() {
        let (_, batch) = executor(config(1_000));
        let items = vec![
            BatchItem::new("a", call("ok", 0)),
            BatchItem::new("b", call("fail", 0)),
            BatchItem::new("c", call("panic", 0)),
            BatchItem::failed("d", DispatchError::unknown("bogus")),
            BatchItem::new("e", call("ok", 0)),
        ];
        for mode in [BatchMode::Parallel, BatchMode::Sequential] {
            let response = batch
                .run_with_mode(items.clone(), mode, &RequestContext::new())
                .await
                .unwrap();
            let kinds: Vec<&str> = response
                .iter()
                .map(|e| match &e.outcome {
                    Ok(_) => "ok",
                    Err(err) => err.kind(),
                })
                .collect();
            assert_eq!(
                kinds,
                vec!["ok", "handler_execution_error", "handler_execution_error", "unknown_method", "ok"]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_timeout_keeps_finished_results() {
        let (_, batch) = executor(config(100));
        let items = vec![
            BatchItem::new(1, call("fast", 10)),
            BatchItem::new(2, call("slow", 10_000)),
            BatchItem::new(3, call("fast", 50)),
        ];
        let started = Instant::now();
        let response = batch.run(items, &RequestContext::new()).await.unwrap();

        assert!(started.elapsed() <= Duration::from_millis(150));
        assert!(response.entries[0].outcome.is_ok());
        assert_eq!(
            response.entries[1].outcome,
            Err(DispatchError::BatchTimeout {
                timeout: Duration::from_millis(100)
            })
        );
        assert!(response.entries[2].outcome.is_ok());
        assert_eq!(response.timed_out(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_timeout_skips_unstarted_items() {
        let (inner, batch) = executor(BatchConfig {
            mode: BatchMode::Sequential,
            ..config(100)
        });
        let items = vec![
            BatchItem::new(1, call("fast", 30)),
            BatchItem::new(2, call("slow", 500)),
            BatchItem::new(3, call("fast", 1)),
        ];
        let response = batch.run(items, &RequestContext::new()).await.unwrap();

        assert!(response.entries[0].outcome.is_ok());
        assert_eq!(response.entries[1].outcome.as_ref().unwrap_err().kind(), "batch_timeout");
        assert_eq!(response.entries[2].outcome.as_ref().unwrap_err().kind(), "batch_timeout");
        assert_eq!(inner.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_runs_one_at_a_time() {
        let (inner, batch) = executor(config(5_000));
        let items = (0..3).map(|i| BatchItem::new(i, call("t", 20))).collect();
        batch
            .run_with_mode(items, BatchMode::Sequential, &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(inner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_size_limits() {
        let (_, batch) = executor(BatchConfig {
            max_items: 2,
            ..BatchConfig::default()
        });
        let ctx = RequestContext::new();

        let items = (0..3).map(|i| BatchItem::new(i, Call::Ping)).collect();
        assert_eq!(
            batch.run(items, &ctx).await.unwrap_err(),
            DispatchError::BatchSizeExceeded { size: 3, max: 2 }
        );

        assert_eq!(batch.run(Vec::new(), &ctx).await.unwrap_err().kind(), "invalid_request");

        let items = (0..2).map(|i| BatchItem::new(i, Call::Ping)).collect();
        assert_eq!(batch.run(items, &ctx).await.unwrap().len(), 2);
    }
}

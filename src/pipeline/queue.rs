//! Priority-aware translation queue
//!
//! Multiplexes realtime and history-grade translation requests against a
//! bounded number of concurrent handler invocations. High-priority items
//! jump ahead of normal and low ones; duplicates by segment id are dropped;
//! failures retry up to the configured budget.

use crate::config::QueueConfig;
use crate::domain::models::TranslationRequest;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Performs the actual translation for one queued request
#[async_trait]
pub trait TranslationHandler: Send + Sync {
    async fn handle(&self, request: &TranslationRequest) -> Result<()>;
}

/// Invoked when a request has exhausted its retry budget
pub type QueueErrorHandler = Box<dyn Fn(&TranslationRequest, &str) + Send + Sync>;

/// Point-in-time queue statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub active_count: usize,
    pub queued_count: usize,
    pub completed_count: u64,
    pub error_count: u64,
    pub average_processing_time_ms: f64,
}

struct QueueState {
    queue: VecDeque<TranslationRequest>,
    active: HashSet<String>,
    completed_count: u64,
    error_count: u64,
    total_processing_ms: u128,
}

struct QueueInner {
    config: QueueConfig,
    handler: Arc<dyn TranslationHandler>,
    state: Mutex<QueueState>,
    closed: AtomicBool,
    error_handler: Mutex<Option<QueueErrorHandler>>,
}

/// Bounded-concurrency, priority-ordered, duplicate-suppressing queue
#[derive(Clone)]
pub struct TranslationQueue {
    inner: Arc<QueueInner>,
}

impl TranslationQueue {
    pub fn new(config: QueueConfig, handler: Arc<dyn TranslationHandler>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                handler,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    active: HashSet::new(),
                    completed_count: 0,
                    error_count: 0,
                    total_processing_ms: 0,
                }),
                closed: AtomicBool::new(false),
                error_handler: Mutex::new(None),
            }),
        }
    }

    /// Install a callback for requests dropped after their last retry
    pub fn set_error_handler(&self, handler: QueueErrorHandler) {
        *self.inner.error_handler.lock().unwrap() = Some(handler);
    }

    /// Add a request. Duplicates are dropped with a warning; a full queue
    /// rejects the request.
    pub fn enqueue(&self, request: TranslationRequest) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AppError::Queue("queue is closed".to_string()));
        }

        {
            let mut state = self.inner.state.lock().unwrap();

            let duplicate = state.active.contains(&request.segment_id)
                || state
                    .queue
                    .iter()
                    .any(|queued| queued.segment_id == request.segment_id);
            if duplicate {
                log::warn!(
                    "Dropping duplicate translation request for {}",
                    request.segment_id
                );
                return Ok(());
            }

            if state.queue.len() >= self.inner.config.max_queue_size {
                return Err(AppError::Queue(format!(
                    "queue full ({} items)",
                    state.queue.len()
                )));
            }

            // High before normal before low; FIFO within a class
            let position = state
                .queue
                .iter()
                .position(|queued| queued.priority < request.priority)
                .unwrap_or(state.queue.len());
            state.queue.insert(position, request);
        }

        QueueInner::dispatch(&self.inner);
        Ok(())
    }

    /// Stop accepting new requests; in-flight items continue
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Accept requests again for a new session
    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
    }

    /// Wait until active and queued are empty, bounded by `grace`.
    /// Returns false when items were abandoned.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let stats = self.stats();
            if stats.active_count == 0 && stats.queued_count == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "Abandoning {} active and {} queued translations after grace period",
                    stats.active_count,
                    stats.queued_count
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().unwrap();
        QueueStats {
            active_count: state.active.len(),
            queued_count: state.queue.len(),
            completed_count: state.completed_count,
            error_count: state.error_count,
            average_processing_time_ms: if state.completed_count > 0 {
                state.total_processing_ms as f64 / state.completed_count as f64
            } else {
                0.0
            },
        }
    }
}

impl QueueInner {
    /// Fill free concurrency slots from the queue head
    fn dispatch(inner: &Arc<QueueInner>) {
        loop {
            let request = {
                let mut state = inner.state.lock().unwrap();
                if state.active.len() >= inner.config.max_concurrency {
                    return;
                }
                match state.queue.pop_front() {
                    Some(request) => {
                        state.active.insert(request.segment_id.clone());
                        request
                    }
                    None => return,
                }
            };

            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                QueueInner::run_one(inner, request).await;
            });
        }
    }

    async fn run_one(inner: Arc<QueueInner>, request: TranslationRequest) {
        let started = Instant::now();
        let timeout = Duration::from_millis(inner.config.request_timeout_ms);

        let failure = match tokio::time::timeout(timeout, inner.handler.handle(&request)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {:?}", timeout)),
        };

        let mut exhausted: Option<String> = None;
        {
            let mut state = inner.state.lock().unwrap();
            state.active.remove(&request.segment_id);
            match failure {
                None => {
                    state.completed_count += 1;
                    state.total_processing_ms += started.elapsed().as_millis();
                }
                Some(reason) => {
                    if request.attempts < inner.config.max_retries {
                        log::warn!(
                            "Translation for {} failed ({}), retrying",
                            request.segment_id,
                            reason
                        );
                        let mut retry = request.clone();
                        retry.attempts += 1;
                        state.queue.push_front(retry);
                    } else {
                        log::error!(
                            "Translation for {} failed after {} attempts: {}",
                            request.segment_id,
                            request.attempts + 1,
                            reason
                        );
                        state.error_count += 1;
                        exhausted = Some(reason);
                    }
                }
            }
        }

        if let Some(reason) = exhausted {
            if let Some(callback) = inner.error_handler.lock().unwrap().as_ref() {
                callback(&request, &reason);
            }
        }

        QueueInner::dispatch(&inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TranslationPriority;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Semaphore;

    fn request(id: &str, priority: TranslationPriority) -> TranslationRequest {
        TranslationRequest::new(
            id.to_string(),
            "text".to_string(),
            "en".to_string(),
            "ja".to_string(),
            priority,
            "corr-1".to_string(),
        )
    }

    /// Handler that records start order and blocks on a semaphore
    struct GatedHandler {
        order: Mutex<Vec<String>>,
        gate: Semaphore,
    }

    impl GatedHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                order: Mutex::new(Vec::new()),
                gate: Semaphore::new(0),
            })
        }
    }

    #[async_trait]
    impl TranslationHandler for GatedHandler {
        async fn handle(&self, request: &TranslationRequest) -> Result<()> {
            self.order.lock().unwrap().push(request.segment_id.clone());
            let _permit = self.gate.acquire().await.unwrap();
            Ok(())
        }
    }

    async fn wait_for<F: Fn(&QueueStats) -> bool>(queue: &TranslationQueue, predicate: F) {
        for _ in 0..200 {
            if predicate(&queue.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached; stats: {:?}", queue.stats());
    }

    #[tokio::test]
    async fn test_high_priority_dispatches_before_earlier_normals() {
        let handler = GatedHandler::new();
        let config = QueueConfig {
            max_concurrency: 1,
            ..QueueConfig::default()
        };
        let queue = TranslationQueue::new(config, handler.clone());

        queue.enqueue(request("n1", TranslationPriority::Normal)).unwrap();
        wait_for(&queue, |s| s.active_count == 1).await;

        queue.enqueue(request("l1", TranslationPriority::Low)).unwrap();
        queue.enqueue(request("n2", TranslationPriority::Normal)).unwrap();
        queue.enqueue(request("h1", TranslationPriority::High)).unwrap();

        handler.gate.add_permits(4);
        wait_for(&queue, |s| s.completed_count == 4).await;

        let order = handler.order.lock().unwrap().clone();
        assert_eq!(order, vec!["n1", "h1", "n2", "l1"]);
    }

    #[tokio::test]
    async fn test_concurrency_bound_holds() {
        let handler = GatedHandler::new();
        let queue = TranslationQueue::new(QueueConfig::default(), handler.clone());

        for i in 0..5 {
            queue
                .enqueue(request(&format!("s{}", i), TranslationPriority::Normal))
                .unwrap();
        }
        wait_for(&queue, |s| s.active_count == 3).await;
        assert_eq!(queue.stats().queued_count, 2);

        handler.gate.add_permits(5);
        wait_for(&queue, |s| s.completed_count == 5).await;
        assert_eq!(queue.stats().active_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_segment_id_dropped() {
        let handler = GatedHandler::new();
        let queue = TranslationQueue::new(QueueConfig::default(), handler.clone());

        queue.enqueue(request("dup", TranslationPriority::Normal)).unwrap();
        wait_for(&queue, |s| s.active_count == 1).await;
        // Same id while active: dropped, not queued
        queue.enqueue(request("dup", TranslationPriority::Normal)).unwrap();
        assert_eq!(queue.stats().queued_count, 0);

        handler.gate.add_permits(1);
        wait_for(&queue, |s| s.completed_count == 1).await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let handler = GatedHandler::new();
        let config = QueueConfig {
            max_concurrency: 1,
            max_queue_size: 2,
            ..QueueConfig::default()
        };
        let queue = TranslationQueue::new(config, handler.clone());

        queue.enqueue(request("a", TranslationPriority::Normal)).unwrap();
        wait_for(&queue, |s| s.active_count == 1).await;
        queue.enqueue(request("b", TranslationPriority::Normal)).unwrap();
        queue.enqueue(request("c", TranslationPriority::Normal)).unwrap();

        let result = queue.enqueue(request("d", TranslationPriority::Normal));
        assert!(matches!(result, Err(AppError::Queue(_))));

        handler.gate.add_permits(3);
        wait_for(&queue, |s| s.completed_count == 3).await;
    }

    /// Handler that fails on the first call per id, then succeeds
    struct FlakyHandler {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl TranslationHandler for FlakyHandler {
        async fn handle(&self, _request: &TranslationRequest) -> Result<()> {
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::Llm("transient failure".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let handler = Arc::new(FlakyHandler {
            failures_remaining: AtomicU32::new(1),
        });
        let queue = TranslationQueue::new(QueueConfig::default(), handler);

        queue.enqueue(request("flaky", TranslationPriority::Normal)).unwrap();
        wait_for(&queue, |s| s.completed_count == 1).await;
        assert_eq!(queue.stats().error_count, 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_counts_error() {
        let handler = Arc::new(FlakyHandler {
            failures_remaining: AtomicU32::new(10),
        });
        let queue = TranslationQueue::new(QueueConfig::default(), handler);

        queue.enqueue(request("doomed", TranslationPriority::Normal)).unwrap();
        wait_for(&queue, |s| s.error_count == 1).await;
        assert_eq!(queue.stats().completed_count, 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        struct SlowHandler;
        #[async_trait]
        impl TranslationHandler for SlowHandler {
            async fn handle(&self, _request: &TranslationRequest) -> Result<()> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
        }

        let config = QueueConfig {
            request_timeout_ms: 20,
            max_retries: 0,
            ..QueueConfig::default()
        };
        let queue = TranslationQueue::new(config, Arc::new(SlowHandler));
        queue.enqueue(request("slow", TranslationPriority::Normal)).unwrap();
        wait_for(&queue, |s| s.error_count == 1).await;
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_drains() {
        let handler = GatedHandler::new();
        let queue = TranslationQueue::new(QueueConfig::default(), handler.clone());
        queue.enqueue(request("a", TranslationPriority::Normal)).unwrap();
        queue.close();
        assert!(queue.enqueue(request("b", TranslationPriority::Normal)).is_err());

        handler.gate.add_permits(1);
        assert!(queue.drain(Duration::from_secs(1)).await);
    }
}

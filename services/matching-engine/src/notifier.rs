//! Bounded user-notification queue
//!
//! The matching thread only ever enqueues; a dedicated worker task performs
//! the push I/O through [`PushSink`] (the external WebSocket fabric). The
//! queue drops the oldest message on overflow — overflow is a symptom
//! surfaced through the metrics, not a fault that may block matching.

use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use services_common::{EngineResult, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One message destined for a user's connections
#[derive(Debug, Clone)]
pub struct NotifierMessage {
    /// Target user
    pub user_id: UserId,
    /// JSON payload to push
    pub payload: serde_json::Value,
}

/// The push fabric the worker delivers into
#[async_trait]
pub trait PushSink: Send + Sync {
    /// Deliver one message to all of the user's connections
    async fn push(&self, message: &NotifierMessage) -> EngineResult<()>;
}

/// Default sink when no push endpoint is configured: log and move on
pub struct LogSink;

#[async_trait]
impl PushSink for LogSink {
    async fn push(&self, message: &NotifierMessage) -> EngineResult<()> {
        debug!(user_id = %message.user_id, "notification (no push endpoint)");
        Ok(())
    }
}

/// Test sink that records every delivered message
#[derive(Default)]
pub struct CollectSink {
    messages: Mutex<Vec<NotifierMessage>>,
}

impl CollectSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far
    #[must_use]
    pub fn delivered(&self) -> Vec<NotifierMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl PushSink for CollectSink {
    async fn push(&self, message: &NotifierMessage) -> EngineResult<()> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

/// Bounded MPSC front of the push fabric
pub struct Notifier {
    queue: Arc<ArrayQueue<NotifierMessage>>,
    wakeup: Arc<Notify>,
    running: Arc<AtomicBool>,
    metrics: Arc<EngineMetrics>,
}

impl Notifier {
    /// Start the worker and return the enqueue handle plus its task
    pub fn start(
        capacity: usize,
        sink: Arc<dyn PushSink>,
        metrics: Arc<EngineMetrics>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let notifier = Arc::new(Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            wakeup: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(true)),
            metrics,
        });

        let worker = {
            let queue = Arc::clone(&notifier.queue);
            let wakeup = Arc::clone(&notifier.wakeup);
            let running = Arc::clone(&notifier.running);
            tokio::spawn(async move {
                loop {
                    while let Some(message) = queue.pop() {
                        if let Err(e) = sink.push(&message).await {
                            warn!(user_id = %message.user_id, error = %e, "notification push failed");
                        }
                    }
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    wakeup.notified().await;
                }
                debug!("notifier worker stopped");
            })
        };

        (notifier, worker)
    }

    /// Enqueue without blocking; on overflow the oldest queued message is
    /// displaced and counted.
    pub fn push(&self, user_id: &str, payload: serde_json::Value) {
        let message = NotifierMessage {
            user_id: user_id.to_string(),
            payload,
        };
        if self.queue.force_push(message).is_some() {
            EngineMetrics::incr(&self.metrics.notifications_dropped);
            warn!("notifier queue full, dropped oldest message");
        }
        self.wakeup.notify_one();
    }

    /// Messages currently waiting
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Wait for the queue to empty, up to `budget`
    pub async fn drain(&self, budget: Duration) {
        let deadline = tokio::time::Instant::now() + budget;
        while !self.queue.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(pending = self.queue.len(), "notifier drain budget exhausted");
                return;
            }
            self.wakeup.notify_one();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Signal the worker to exit once the queue is empty
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.wakeup.notify_one();
    }
}

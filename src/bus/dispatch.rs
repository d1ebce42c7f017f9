// bus/dispatch.rs - Per-subscriber dispatch task

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::{BusConfig, Subscriber};
use crate::message::{Message, MessageValidator};
use crate::observability::{
    record_dispatch_dropped, record_dispatch_latency, record_dispatch_retry,
    record_validation_failure,
};

/// Decrements the in-flight counter when the dispatch finishes, even on panic
pub(crate) struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One delivery of one message to one subscriber
pub(crate) struct DispatchTask {
    pub(crate) message: Arc<Message>,
    pub(crate) subscriber: Subscriber,
    pub(crate) config: BusConfig,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) _in_flight: InFlightGuard,
}

impl DispatchTask {
    pub(crate) async fn run(self) {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(topic = self.message.kind(), "Dispatch pool closed, message dropped");
                return;
            }
        };

        // Messages are immutable once published, but the dispatcher does not
        // trust that the publisher ran the validator
        if let Err(e) = MessageValidator::validate(&self.message) {
            warn!(topic = self.message.kind(), error = %e, "Invalid message reached dispatch");
            record_validation_failure(self.message.kind(), "dispatch");
            return;
        }

        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.invoke(attempt).await {
                Ok(()) => {
                    debug!(
                        topic = self.message.kind(),
                        subscription = self.subscriber.id.0,
                        attempt,
                        "Delivered"
                    );
                    record_dispatch_latency(self.message.kind(), started.elapsed());
                    return;
                }
                Err(e) => {
                    warn!(
                        topic = self.message.kind(),
                        source = self.message.source(),
                        subscription = self.subscriber.id.0,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Subscriber callback failed"
                    );
                    if attempt < max_attempts {
                        record_dispatch_retry(self.message.kind());
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
            }
        }

        error!(
            topic = self.message.kind(),
            source = self.message.source(),
            subscription = self.subscriber.id.0,
            attempts = max_attempts,
            "Dropping message after exhausting retries"
        );
        record_dispatch_dropped(self.message.kind());
    }

    /// Run the callback once, converting panics into errors
    async fn invoke(&self, attempt: u32) -> anyhow::Result<()> {
        let handler = self.subscriber.handler.clone();
        let message = self.message.clone();

        let future = match std::panic::catch_unwind(AssertUnwindSafe(move || handler(message))) {
            Ok(future) => future,
            Err(panic) => anyhow::bail!("callback panicked: {}", panic_message(&panic)),
        };

        let future = AssertUnwindSafe(future).catch_unwind();
        tokio::pin!(future);

        let outcome = tokio::select! {
            outcome = &mut future => outcome,
            _ = tokio::time::sleep(self.config.soft_timeout) => {
                warn!(
                    topic = self.message.kind(),
                    subscription = self.subscriber.id.0,
                    attempt,
                    timeout_ms = self.config.soft_timeout.as_millis() as u64,
                    "Subscriber callback exceeded soft timeout"
                );
                (&mut future).await
            }
        };

        match outcome {
            Ok(result) => result,
            Err(panic) => anyhow::bail!("callback panicked: {}", panic_message(&panic)),
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// bus/mod.rs - Asynchronous Publish/Subscribe Message Bus

//! Topic-keyed publish/subscribe router.
//!
//! `publish` validates a message, appends it to the append-only history and
//! schedules one independent dispatch task per matching subscriber. Dispatch
//! tasks run on the tokio runtime captured when the bus was created and are
//! gated by a semaphore, so at most `max_concurrent_dispatch` callbacks run at
//! once. The publisher never waits on, and is never told about, subscriber
//! execution.
//!
//! # Delivery guarantees
//!
//! - Invalid messages are logged and never delivered.
//! - A failing (or panicking) callback is invoked at most `max_attempts` times
//!   with a fixed backoff between attempts, then the delivery is dropped.
//! - A slow callback past `soft_timeout` is logged but never cancelled.
//! - No ordering across topics, subscribers, or successive publishes.
//!
//! # Example
//!
//! ```ignore
//! let bus = Arc::new(MessageBus::new(BusConfig::default())?);
//!
//! bus.subscribe(topics::INVENTORY, |msg| async move {
//!     tracing::info!(source = msg.source(), "inventory received");
//!     Ok(())
//! });
//!
//! bus.publish(Message::new(topics::INVENTORY, "miner", "builder"))?;
//! ```

mod dispatch;

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::message::{Message, MessageValidator, ValidationError};
use crate::observability::{record_message_published, record_validation_failure};
use dispatch::{DispatchTask, InFlightGuard};

/// Default retry bound per dispatch
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Boxed future returned by subscriber callbacks
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

type Handler = Arc<dyn Fn(Arc<Message>) -> HandlerFuture + Send + Sync>;

/// Bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Dispatch configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Size of the dispatch worker pool
    pub max_concurrent_dispatch: usize,

    /// Total callback invocations per dispatch before dropping
    pub max_attempts: u32,

    /// Fixed delay between attempts
    pub retry_backoff: Duration,

    /// Invocations slower than this are logged
    pub soft_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatch: 16,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(100),
            soft_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle returned by [`MessageBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
pub(crate) struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

/// Publish/subscribe router
pub struct MessageBus {
    config: BusConfig,

    /// Subscribers by message kind
    subscribers: DashMap<String, Vec<Subscriber>>,

    /// Append-only log of every accepted message
    history: RwLock<Vec<Arc<Message>>>,

    /// Worker pool permits
    permits: Arc<Semaphore>,

    /// Scheduled dispatches not yet finished
    in_flight: Arc<AtomicUsize>,

    next_subscription: AtomicU64,

    runtime: Handle,
}

impl MessageBus {
    /// Create a bus bound to the current tokio runtime
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        let runtime = Handle::try_current().map_err(|e| BusError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create a bus that dispatches onto an explicit runtime
    pub fn with_runtime(config: BusConfig, runtime: Handle) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_dispatch.max(1)));
        Self {
            config,
            subscribers: DashMap::new(),
            history: RwLock::new(Vec::new()),
            permits,
            in_flight: Arc::new(AtomicUsize::new(0)),
            next_subscription: AtomicU64::new(1),
            runtime,
        }
    }

    /// Register a callback for messages of `kind`
    pub fn subscribe<F, Fut>(&self, kind: &str, callback: F) -> SubscriptionId
    where
        F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(move |msg| callback(msg).boxed());

        self.subscribers
            .entry(kind.to_string())
            .or_default()
            .push(Subscriber { id, handler });

        debug!(topic = kind, subscription = id.0, "Subscribed");
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.subscribers.iter_mut() {
            let before = entry.len();
            entry.retain(|s| s.id != id);
            removed |= entry.len() != before;
        }
        if removed {
            debug!(subscription = id.0, "Unsubscribed");
        }
        removed
    }

    /// Number of callbacks registered for `kind`
    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.subscribers.get(kind).map(|s| s.len()).unwrap_or(0)
    }

    /// Validate, record and fan out a message
    ///
    /// Returns the number of dispatch tasks scheduled. Never waits on
    /// subscribers.
    pub fn publish(&self, message: Message) -> Result<usize, BusError> {
        if let Err(e) = MessageValidator::validate(&message) {
            warn!(
                topic = message.kind(),
                source = message.source(),
                error = %e,
                "Dropping invalid message"
            );
            record_validation_failure(message.kind(), "publish");
            return Err(e.into());
        }

        let message = Arc::new(message);
        self.history.write().push(message.clone());

        let subscribers: Vec<Subscriber> = self
            .subscribers
            .get(message.kind())
            .map(|s| s.value().clone())
            .unwrap_or_default();

        debug!(
            topic = message.kind(),
            source = message.source(),
            target = message.target(),
            subscribers = subscribers.len(),
            "Message published"
        );
        record_message_published(message.kind());

        for subscriber in &subscribers {
            let task = DispatchTask {
                message: message.clone(),
                subscriber: subscriber.clone(),
                config: self.config.clone(),
                permits: self.permits.clone(),
                _in_flight: InFlightGuard::new(self.in_flight.clone()),
            };
            self.runtime.spawn(task.run());
        }

        Ok(subscribers.len())
    }

    /// Snapshot of every accepted message in publish order
    pub fn history(&self) -> Vec<Arc<Message>> {
        self.history.read().clone()
    }

    /// Accepted messages of one kind
    pub fn history_of(&self, kind: &str) -> Vec<Arc<Message>> {
        self.history
            .read()
            .iter()
            .filter(|m| m.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// Dispatch tasks scheduled but not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no dispatch is in flight; false on timeout
    ///
    /// Dispatches scheduled by callbacks while waiting are included.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }
}

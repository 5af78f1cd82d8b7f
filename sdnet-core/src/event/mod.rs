//! Listener delivery
//!
//! Every subscriber gets its own bounded queue and worker task so that a
//! slow consumer never blocks the producer or the other subscribers. What
//! happens when a queue is full is decided by [`OverflowPolicy`].

use crate::config::{EventConfig, OverflowPolicy};
use crate::error::SdnResult;
use crate::metrics_otel;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Subscriber for events of type `E`
#[async_trait]
pub trait EventListener<E>: Send + Sync
where
    E: Send + 'static,
{
    /// Handle one event. Errors are logged and do not stop delivery.
    async fn on_event(&self, event: E) -> SdnResult<()>;

    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Filter applied by the worker before `on_event`
    fn is_relevant(&self, _event: &E) -> bool {
        true
    }
}

/// Handle returned by [`ListenerRegistry::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Subscription<E> {
    name: String,
    sender: mpsc::Sender<E>,
    worker: JoinHandle<()>,
}

/// Fan-out of events to registered listeners
pub struct ListenerRegistry<E> {
    source: String,
    config: EventConfig,
    next_id: AtomicU64,
    subscriptions: Mutex<BTreeMap<ListenerId, Subscription<E>>>,
}

impl<E> ListenerRegistry<E>
where
    E: Clone + Send + 'static,
{
    pub fn new(source: impl Into<String>, config: EventConfig) -> Self {
        Self {
            source: source.into(),
            config,
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a listener and spawn its worker
    pub fn add_listener(&self, listener: Arc<dyn EventListener<E>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, mut receiver) = mpsc::channel::<E>(self.config.queue_capacity);
        let name = listener.name().to_string();
        let source = self.source.clone();

        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if !listener.is_relevant(&event) {
                    continue;
                }
                if let Err(e) = listener.on_event(event).await {
                    warn!(
                        "Listener {} on {} failed to handle event: {}",
                        listener.name(),
                        source,
                        e
                    );
                }
            }
            debug!("Listener {} on {} stopped", listener.name(), source);
        });

        debug!("Registered listener {} on {}", name, self.source);
        self.subscriptions.lock().insert(
            id,
            Subscription {
                name,
                sender,
                worker,
            },
        );
        id
    }

    /// Close the listener's queue and wait for its worker to drain it
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let subscription = self.subscriptions.lock().remove(&id);
        match subscription {
            Some(Subscription {
                name,
                sender,
                worker,
            }) => {
                drop(sender);
                if let Err(e) = worker.await {
                    warn!("Worker of listener {} ended abnormally: {}", name, e);
                }
                true
            }
            None => false,
        }
    }

    /// Deliver an event to every listener queue
    pub async fn post(&self, event: E) {
        let targets: Vec<(String, mpsc::Sender<E>)> = self
            .subscriptions
            .lock()
            .values()
            .map(|s| (s.name.clone(), s.sender.clone()))
            .collect();

        for (name, sender) in targets {
            match self.config.overflow_policy {
                OverflowPolicy::DropNewest => match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            "Queue of listener {} on {} is full, dropping event",
                            name, self.source
                        );
                        metrics_otel::record_listener_drop(&name);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("Listener {} on {} is closed", name, self.source);
                    }
                },
                OverflowPolicy::Backpressure => {
                    if sender.send(event.clone()).await.is_err() {
                        debug!("Listener {} on {} is closed", name, self.source);
                    }
                }
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Remove every listener, joining all workers
    pub async fn shutdown(&self) {
        let ids: Vec<ListenerId> = self.subscriptions.lock().keys().copied().collect();
        join_all(ids.into_iter().map(|id| self.remove_listener(id))).await;
    }
}

/// Listener forwarding events into an unbounded channel, mostly for tests
/// and for bridging into `select!` loops
pub struct ChannelListener<E> {
    name: String,
    sender: mpsc::UnboundedSender<E>,
}

impl<E: Send + 'static> ChannelListener<E> {
    pub fn new(name: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<E>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                name: name.into(),
                sender,
            }),
            receiver,
        )
    }
}

#[async_trait]
impl<E: Send + 'static> EventListener<E> for ChannelListener<E> {
    async fn on_event(&self, event: E) -> SdnResult<()> {
        // The receiving side going away is not an error for the producer
        let _ = self.sender.send(event);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

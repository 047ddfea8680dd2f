//! Type-keyed publish/subscribe queue with a single ordered consumer.

use crate::error::{HerdError, HerdResult};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Handle returned by `subscribe`, used to remove that one callback later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// A boxed asynchronous subscriber callback.
pub type Callback<T> = Arc<dyn Fn(T) -> BoxFuture<'static, HerdResult<()>> + Send + Sync>;

pub(crate) fn boxed_callback<T, F, Fut>(callback: F) -> Callback<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HerdResult<()>> + Send + 'static,
{
    Arc::new(move |payload| callback(payload).boxed())
}

/// Run one subscriber, converting a panic into an error so the caller can
/// log it and carry on with the next subscriber.
pub(crate) async fn invoke_isolated<T: Send + 'static>(
    callback: &Callback<T>,
    payload: T,
) -> HerdResult<()> {
    let callback = Arc::clone(callback);
    match AssertUnwindSafe(async move { callback(payload).await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(HerdError::from_panic(panic.as_ref())),
    }
}

type SubscriberMap<T> = HashMap<String, Vec<(SubscriptionId, Callback<T>)>>;

struct Envelope<T> {
    event_type: String,
    payload: T,
}

struct Worker<T> {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<mpsc::UnboundedReceiver<Envelope<T>>>,
}

struct Queue<T> {
    sender: mpsc::UnboundedSender<Envelope<T>>,
    /// Present while no consumer is running.
    receiver: Option<mpsc::UnboundedReceiver<Envelope<T>>>,
    worker: Option<Worker<T>>,
    /// Set when `start` was called while a consumer was shutting down.
    restart: bool,
}

/// Asynchronous event bus.
///
/// `publish` enqueues onto a FIFO. One background consumer drains it and, for
/// each item, awaits every subscriber registered for that event type in
/// registration order before taking the next item. Subscriber errors and
/// panics are logged and never interrupt delivery. Items published under an
/// event type with no subscribers are dropped.
///
/// The bus is generic over its payload so the same machinery carries
/// [`crate::ObservationEvent`]s, [`crate::Event`]s or any other cloneable type.
pub struct EventBus<T> {
    subscribers: Arc<RwLock<SubscriberMap<T>>>,
    queue: Mutex<Queue<T>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// An empty, stopped bus.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            queue: Mutex::new(Queue {
                sender,
                receiver: Some(receiver),
                worker: None,
                restart: false,
            }),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Register `callback` for `event_type`. Callbacks run in registration order.
    pub fn subscribe<F, Fut>(&self, event_type: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HerdResult<()>> + Send + 'static,
    {
        let event_type = event_type.into();
        let id = SubscriptionId::next();
        debug!(event_type = %event_type, subscription = id.0, "Subscribed");
        self.subscribers
            .write()
            .entry(event_type)
            .or_default()
            .push((id, boxed_callback(callback)));
        id
    }

    /// Remove one subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, event_type: &str, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write();
        let Some(list) = subs.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subs.remove(event_type);
        }
        removed
    }

    /// Number of callbacks registered for `event_type`.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Whether the consumer loop is alive.
    pub fn is_running(&self) -> bool {
        self.queue
            .lock()
            .worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawn the consumer loop. Does nothing if it is already running.
    ///
    /// Called while `stop` is waiting for the old consumer, the new one is
    /// spawned as soon as that consumer has exited.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut queue = self.queue.lock();
        if queue.worker.is_some() {
            return;
        }
        let Some(receiver) = queue.receiver.take() else {
            queue.restart = true;
            return;
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(consume(
            receiver,
            Arc::clone(&self.subscribers),
            Arc::clone(&self.pending),
            Arc::clone(&self.idle),
            shutdown_rx,
        ));
        queue.worker = Some(Worker { shutdown, handle });
        info!("Event bus started");
    }

    /// Stop the consumer loop and wait for it to exit.
    ///
    /// A delivery in progress is abandoned at its next suspension point.
    /// Items still queued are kept and delivered after the next `start`.
    /// A `publish` that lands while the consumer is shutting down restarts
    /// it once the shutdown completes, so its item is not stranded.
    pub async fn stop(&self) {
        let worker = {
            let mut queue = self.queue.lock();
            queue.restart = false;
            queue.worker.take()
        };
        let Some(worker) = worker else {
            return;
        };
        let _ = worker.shutdown.send(true);
        let restart = match worker.handle.await {
            Ok(receiver) => {
                let mut queue = self.queue.lock();
                queue.receiver = Some(receiver);
                std::mem::take(&mut queue.restart)
            }
            Err(e) => {
                // The receiver went down with the task; start over with a fresh queue.
                error!(error = %e, "Event bus consumer terminated abnormally");
                let (sender, receiver) = mpsc::unbounded_channel();
                let mut queue = self.queue.lock();
                queue.sender = sender;
                queue.receiver = Some(receiver);
                queue.restart = false;
                self.pending.store(0, Ordering::SeqCst);
                self.idle.notify_waiters();
                false
            }
        };
        info!("Event bus stopped");
        if restart {
            debug!("Start requested during shutdown; restarting event bus");
            self.start();
        }
    }

    /// Enqueue `payload` under `event_type`, starting the consumer if needed.
    pub async fn publish(&self, event_type: impl Into<String>, payload: T) {
        self.start();
        self.enqueue(event_type, payload);
    }

    /// Enqueue `payload` without starting the consumer. Usable outside a
    /// tokio runtime; the item is delivered once the bus runs.
    pub fn enqueue(&self, event_type: impl Into<String>, payload: T) {
        let envelope = Envelope {
            event_type: event_type.into(),
            payload,
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = self.queue.lock().sender.send(envelope);
        if sent.is_err() {
            self.finish_one();
            error!("Event bus queue closed; event dropped");
        }
    }

    /// Resolve once every item published so far has been delivered.
    ///
    /// Only makes progress while the consumer is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

async fn consume<T: Clone + Send + 'static>(
    mut receiver: mpsc::UnboundedReceiver<Envelope<T>>,
    subscribers: Arc<RwLock<SubscriberMap<T>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<Envelope<T>> {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = receiver.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let stopped = tokio::select! {
            biased;
            _ = shutdown.changed() => true,
            _ = deliver(&subscribers, envelope) => false,
        };

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            idle.notify_waiters();
        }
        if stopped {
            break;
        }
    }
    receiver
}

async fn deliver<T: Clone + Send + 'static>(
    subscribers: &RwLock<SubscriberMap<T>>,
    envelope: Envelope<T>,
) {
    let callbacks: Vec<(SubscriptionId, Callback<T>)> = subscribers
        .read()
        .get(&envelope.event_type)
        .cloned()
        .unwrap_or_default();

    if callbacks.is_empty() {
        debug!(event_type = %envelope.event_type, "No subscribers; event dropped");
        return;
    }

    for (id, callback) in &callbacks {
        if let Err(e) = invoke_isolated(callback, envelope.payload.clone()).await {
            error!(
                event_type = %envelope.event_type,
                subscription = id.0,
                error = %e,
                "Subscriber failed"
            );
        }
    }
}

//! Instance cache and subscriber fan-out.
//!
//! The cache holds the latest [`DiscoveryEvent`] and a set of subscriber
//! channels. Every [`Cache::update`] replaces the state and sends the new
//! event to each subscriber.
//!
//! ## Subscription ordering
//!
//! [`Cache::register`] does not replay the current state. A subscriber
//! registered between two updates receives only the later one. Consumers
//! that need the current value register first and then call
//! [`Cache::state`]; the event they read either precedes or equals the
//! first event delivered to them.
//!
//! ## Slow subscribers
//!
//! Delivery is a backpressured `send().await` with no timeout: a full
//! subscriber channel stalls the fan-out, and later updates queue behind
//! it on the publish gate. Reads and (de)registration are never stalled. A
//! pending send is released when its subscriber is deregistered, when its
//! receiver is dropped, or when the cache is stopped.
//!
//! [`Cache::queued_updates`] counts updates parked on the gate. The
//! instancer skips its refresh tick while any are queued, so a stalled
//! subscriber holds at most one delivering and one queued update instead
//! of an ever-growing backlog of finished lookups.

use std::sync::atomic::{AtomicUsize, Ordering};

use beacon_core::DiscoveryEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A registered subscriber channel.
#[derive(Clone)]
struct Subscriber {
    tx: mpsc::Sender<DiscoveryEvent>,
    /// Cancelled on deregistration to release a pending send.
    removed: CancellationToken,
}

/// Latest discovery state plus the channels it is broadcast to.
///
/// ## Example
///
/// ```rust
/// use beacon_core::DiscoveryEvent;
/// use beacon_discovery::Cache;
/// use tokio::sync::mpsc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let cache = Cache::new();
/// let (tx, mut rx) = mpsc::channel(8);
/// cache.register(tx);
///
/// cache.update(DiscoveryEvent::Instances(vec![])).await;
/// assert_eq!(rx.recv().await, Some(DiscoveryEvent::Instances(vec![])));
/// # });
/// ```
pub struct Cache {
    state: Mutex<DiscoveryEvent>,
    subscribers: Mutex<Vec<Subscriber>>,
    /// Serializes publishers so all subscribers see one order.
    publish: tokio::sync::Mutex<()>,
    /// Updates waiting for the publish gate.
    queued: AtomicUsize,
    stopped: CancellationToken,
}

/// Counts one update as queued until dropped.
struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Cache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DiscoveryEvent::default()),
            subscribers: Mutex::new(Vec::new()),
            publish: tokio::sync::Mutex::new(()),
            queued: AtomicUsize::new(0),
            stopped: CancellationToken::new(),
        }
    }

    /// Replace the state and deliver `event` to every subscriber.
    ///
    /// Returns once every subscriber in the snapshot taken at publish time
    /// has either received the event or been skipped. Does nothing after
    /// [`Cache::stop`].
    pub async fn update(&self, event: DiscoveryEvent) {
        let queued = Queued::enter(&self.queued);
        let _gate = tokio::select! {
            biased;
            _ = self.stopped.cancelled() => {
                tracing::debug!("cache stopped, dropping update");
                return;
            }
            gate = self.publish.lock() => gate,
        };
        drop(queued);

        if self.stopped.is_cancelled() {
            tracing::debug!("cache stopped, dropping update");
            return;
        }

        *self.state.lock() = event.clone();
        let subscribers = self.subscribers.lock().clone();

        for subscriber in subscribers {
            tokio::select! {
                biased;
                _ = self.stopped.cancelled() => {
                    tracing::debug!("cache stopped, abandoning delivery");
                    return;
                }
                _ = subscriber.removed.cancelled() => {
                    tracing::trace!("subscriber deregistered during delivery");
                }
                sent = subscriber.tx.send(event.clone()) => {
                    if sent.is_err() {
                        tracing::trace!("subscriber receiver dropped, skipping");
                    }
                }
            }
        }
    }

    /// The current state.
    ///
    /// Before the first update this is the empty sentinel,
    /// `DiscoveryEvent::Instances(vec![])`.
    #[must_use]
    pub fn state(&self) -> DiscoveryEvent {
        self.state.lock().clone()
    }

    /// Add a channel to the fan-out set.
    ///
    /// Registering a channel that is already registered has no effect.
    /// Has no effect after [`Cache::stop`].
    pub fn register(&self, tx: mpsc::Sender<DiscoveryEvent>) {
        let mut subscribers = self.subscribers.lock();
        // `stop` cancels before draining under this lock, so checking here
        // cannot race a concurrent stop.
        if self.stopped.is_cancelled() {
            tracing::debug!("cache stopped, ignoring register");
            return;
        }
        if subscribers.iter().any(|s| s.tx.same_channel(&tx)) {
            tracing::debug!("channel already registered");
            return;
        }
        subscribers.push(Subscriber {
            tx,
            removed: CancellationToken::new(),
        });
    }

    /// Remove a channel from the fan-out set.
    ///
    /// Identity is channel identity: any sender of the registered channel
    /// removes it. A send to it that is pending in [`Cache::update`] is
    /// abandoned.
    pub fn deregister(&self, tx: &mpsc::Sender<DiscoveryEvent>) {
        let mut subscribers = self.subscribers.lock();
        match subscribers.iter().position(|s| s.tx.same_channel(tx)) {
            Some(index) => {
                let subscriber = subscribers.swap_remove(index);
                subscriber.removed.cancel();
            }
            None => tracing::debug!("channel not registered"),
        }
    }

    /// Permanently disable updates and drop every subscriber.
    ///
    /// Releases any delivery blocked in [`Cache::update`]. Idempotent.
    pub fn stop(&self) {
        self.stopped.cancel();
        for subscriber in self.subscribers.lock().drain(..) {
            subscriber.removed.cancel();
        }
    }

    /// Check if the cache has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Number of updates waiting for an earlier update to finish delivery.
    #[must_use]
    pub fn queued_updates(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

//! Listener registry and ordered event dispatch
//!
//! A `ListenerHub` keeps the caller callbacks of one store keyed by config
//! or service key and delivers events to them on a single dispatch task,
//! away from the network receive path.
//!
//! Delivery rules:
//! - jobs run in enqueue order; for one key, listeners are called in
//!   registration order
//! - the listener set is read when a job runs, so a listener that was
//!   unregistered before its call started is skipped
//! - a panicking listener is caught and logged; the remaining listeners and
//!   jobs are unaffected

use std::any::Any;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Invokes one listener with one event.
pub type Deliver<L, E> = Arc<dyn Fn(&L, &E) + Send + Sync>;

enum Job<K, L: ?Sized, E> {
    Broadcast { key: K, event: E },
    Targeted { key: K, listener: Arc<L>, event: E },
}

/// Identity of a listener is the allocation it lives in.
pub fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

type Registry<K, L> = DashMap<K, Vec<Arc<L>>>;

pub struct ListenerHub<K, L: ?Sized, E> {
    name: &'static str,
    listeners: Arc<Registry<K, L>>,
    tx: mpsc::UnboundedSender<Job<K, L, E>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<K, L, E> ListenerHub<K, L, E>
where
    K: Clone + Eq + Hash + std::fmt::Display + Send + Sync + 'static,
    L: ?Sized + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Create a hub and spawn its dispatch task. Must be called inside a
    /// tokio runtime.
    pub fn new(name: &'static str, deliver: Deliver<L, E>) -> Self {
        let listeners: Arc<Registry<K, L>> = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(dispatch_loop(name, listeners.clone(), rx, deliver));

        Self {
            name,
            listeners,
            tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Append a listener for `key`. Returns the new listener count.
    pub fn register(&self, key: K, listener: Arc<L>) -> usize {
        let mut entry = self.listeners.entry(key).or_default();
        entry.push(listener);
        entry.len()
    }

    /// Remove a listener for `key`. Returns the remaining count, or `None`
    /// if the listener was not registered.
    pub fn unregister(&self, key: &K, listener: &Arc<L>) -> Option<usize> {
        let remaining = {
            let mut entry = self.listeners.get_mut(key)?;
            let position = entry.iter().position(|l| same_listener(l, listener))?;
            entry.remove(position);
            entry.len()
        };
        if remaining == 0 {
            self.listeners.remove_if(key, |_, v| v.is_empty());
        }
        Some(remaining)
    }

    pub fn listener_count(&self, key: &K) -> usize {
        self.listeners.get(key).map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_registered(&self, key: &K, listener: &Arc<L>) -> bool {
        self.listeners
            .get(key)
            .map(|v| v.iter().any(|l| same_listener(l, listener)))
            .unwrap_or(false)
    }

    /// Keys with at least one listener.
    pub fn keys(&self) -> Vec<K> {
        self.listeners.iter().map(|e| e.key().clone()).collect()
    }

    /// Enqueue an event for every listener of `key`.
    pub fn dispatch(&self, key: K, event: E) {
        if self.tx.send(Job::Broadcast { key, event }).is_err() {
            debug!(hub = self.name, "Dispatch task stopped, event dropped");
        }
    }

    /// Enqueue an event for a single listener of `key`.
    pub fn dispatch_to(&self, key: K, listener: Arc<L>, event: E) {
        if self
            .tx
            .send(Job::Targeted {
                key,
                listener,
                event,
            })
            .is_err()
        {
            debug!(hub = self.name, "Dispatch task stopped, event dropped");
        }
    }

    /// Stop the dispatch task. Queued jobs are discarded.
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.listeners.clear();
    }
}

impl<K, L: ?Sized, E> Drop for ListenerHub<K, L, E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn dispatch_loop<K, L, E>(
    name: &'static str,
    listeners: Arc<Registry<K, L>>,
    mut rx: mpsc::UnboundedReceiver<Job<K, L, E>>,
    deliver: Deliver<L, E>,
) where
    K: Clone + Eq + Hash + std::fmt::Display + Send + Sync + 'static,
    L: ?Sized + Send + Sync + 'static,
    E: Send + 'static,
{
    let still_registered = |key: &K, listener: &Arc<L>| {
        listeners
            .get(key)
            .map(|v| v.iter().any(|l| same_listener(l, listener)))
            .unwrap_or(false)
    };

    while let Some(job) = rx.recv().await {
        match job {
            Job::Broadcast { key, event } => {
                let snapshot: Vec<Arc<L>> = match listeners.get(&key) {
                    Some(v) => v.clone(),
                    None => continue,
                };
                for listener in snapshot {
                    if still_registered(&key, &listener) {
                        invoke(name, &key, &deliver, &listener, &event);
                    }
                }
            }
            Job::Targeted {
                key,
                listener,
                event,
            } => {
                if still_registered(&key, &listener) {
                    invoke(name, &key, &deliver, &listener, &event);
                }
            }
        }
    }

    debug!(hub = name, "Dispatch loop ended");
}

fn invoke<K, L, E>(name: &'static str, key: &K, deliver: &Deliver<L, E>, listener: &Arc<L>, event: &E)
where
    K: std::fmt::Display,
    L: ?Sized,
{
    let result = catch_unwind(AssertUnwindSafe(|| deliver(listener, event)));
    if let Err(panic) = result {
        error!(
            hub = name,
            key = %key,
            "Listener panicked: {}",
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

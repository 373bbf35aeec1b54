//! One-shot configuration gate
//!
//! Tasks that must not run with an unknown cluster identity wait on the
//! gate; the first `open` publishes the value and releases every waiter.
//! Later opens are ignored.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ConfigGate<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T: Clone> ConfigGate<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publish the value. Returns false if the gate was already open.
    pub fn open(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(value);
            true
        })
    }

    /// Value if the gate is open, without waiting
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the gate opens and return the published value
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            // the sender is owned by this gate, so the channel stays open
            let _ = rx.changed().await;
        }
    }
}

impl<T: Clone> Default for ConfigGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

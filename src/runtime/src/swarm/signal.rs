//! Closed-exactly-once completion signals.
//!
//! A `Signal` is the closing side of a one-shot broadcast: any number of
//! `SignalHandle` clones can await it, and closing releases them all.
//! Dropping an unclosed `Signal` also releases waiters; that is what lets
//! a destroyed session release every task blocked on it.

use tokio::sync::watch;

/// The closing side of a completion signal.
#[derive(Debug)]
pub struct Signal {
    tx: watch::Sender<bool>,
}

/// An awaitable view of a completion signal.
#[derive(Debug, Clone)]
pub struct SignalHandle {
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// Create a signal and a handle to await it.
    pub fn new() -> (Signal, SignalHandle) {
        let (tx, rx) = watch::channel(false);
        (Signal { tx }, SignalHandle { rx })
    }

    /// Another handle to await this signal.
    pub fn handle(&self) -> SignalHandle {
        SignalHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Close the signal, releasing all waiters. Consumes the signal so a
    /// closed signal cannot be closed again.
    pub fn close(self) {
        let _ = self.tx.send(true);
    }
}

impl SignalHandle {
    /// Wait until the signal is closed (or its owner is dropped).
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender dropped without closing: the owning task is gone.
    }

    /// Whether the signal has been explicitly closed.
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Whether waiting would return immediately (closed or abandoned).
    pub fn is_released(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

//! Typed publish/subscribe
//!
//! A `Signal` wraps a tokio broadcast channel. Emitting never blocks and never
//! runs subscriber code, so the owner can emit while holding its own lock and
//! subscribers always observe emissions in mutation order. Clearing the signal
//! drops the sender: every receiver sees `Closed` once it has drained what was
//! already sent, and later subscribers get an already-closed receiver.

use std::sync::RwLock;

use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct Signal<T> {
    sender: RwLock<Option<broadcast::Sender<T>>>,
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(tx)),
        }
    }

    /// Subscribe to future emissions
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (_tx, rx) = broadcast::channel(1);
                rx
            }
        }
    }

    /// Emit a value, returning how many subscribers will receive it
    pub fn emit(&self, value: T) -> usize {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            // A send error only means nobody is listening
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Disconnect every subscriber. Idempotent.
    pub fn clear(&self) {
        let mut guard = self.sender.write().unwrap_or_else(|e| e.into_inner());
        guard.take();
    }

    pub fn is_cleared(&self) -> bool {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        guard.is_none()
    }
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_emit_reaches_every_subscriber_in_order() {
        let signal = Signal::new();
        let mut a = signal.subscribe();
        let mut b = signal.subscribe();

        assert_eq!(signal.emit(1), 2);
        assert_eq!(signal.emit(2), 2);

        assert_eq!(a.try_recv().unwrap(), 1);
        assert_eq!(a.try_recv().unwrap(), 2);
        assert_eq!(b.try_recv().unwrap(), 1);
        assert_eq!(b.try_recv().unwrap(), 2);
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let signal: Signal<u32> = Signal::new();
        assert_eq!(signal.emit(7), 0);
    }

    #[test]
    fn test_clear_closes_receivers_after_drain() {
        let signal = Signal::new();
        let mut rx = signal.subscribe();
        signal.emit("last");
        signal.clear();

        assert_eq!(rx.try_recv().unwrap(), "last");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
        assert_eq!(signal.emit("dropped"), 0);
        assert!(signal.is_cleared());
    }

    #[test]
    fn test_subscribe_after_clear_is_closed() {
        let signal: Signal<()> = Signal::new();
        signal.clear();
        signal.clear();
        let mut rx = signal.subscribe();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
        assert_eq!(signal.subscriber_count(), 0);
    }
}

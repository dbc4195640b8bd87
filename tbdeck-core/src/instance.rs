//! Client-side handle for one running instance
//!
//! Handles are created by the manager only. Termination fires exactly once,
//! when the manager decides the instance is gone; after that the handle is
//! inert.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::manager::{ManagerError, WeakManager};
use crate::model::Model;
use crate::signal::Signal;

#[derive(Clone, Debug)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

#[derive(Debug)]
struct InstanceInner {
    model: Model,
    terminated: AtomicBool,
    on_terminated: Signal<()>,
    manager: WeakManager,
}

impl Instance {
    pub(crate) fn new(model: Model, manager: WeakManager) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                model,
                terminated: AtomicBool::new(false),
                on_terminated: Signal::with_capacity(1),
                manager,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.model.name
    }

    /// The model as it was when the handle was created
    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Receiver for the termination event. Closed right after it fires.
    pub fn subscribe_terminated(&self) -> broadcast::Receiver<()> {
        self.inner.on_terminated.subscribe()
    }

    /// Resolves once the handle has been terminated
    pub async fn terminated(&self) {
        let mut rx = self.inner.on_terminated.subscribe();
        if self.is_terminated() {
            return;
        }
        // Ok and Closed both mean termination happened
        let _ = rx.recv().await;
    }

    /// Ask the owning manager to shut this instance down.
    ///
    /// A no-op once the handle is terminated.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        if self.is_terminated() {
            return Ok(());
        }
        match self.inner.manager.upgrade() {
            Some(manager) => manager.shutdown(self.name()).await,
            None => Err(ManagerError::Disposed),
        }
    }

    /// Fire termination. Returns false if it had already fired.
    pub(crate) fn terminate(&self) -> bool {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::debug!(name = %self.name(), "instance terminated");
        self.inner.on_terminated.emit(());
        self.inner.on_terminated.clear();
        true
    }

    /// Whether both values refer to the same handle
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Handles taken out of the live set that still owe a termination.
///
/// Dropping the batch terminates whatever is left in it, so a cancelled
/// operation cannot leak a handle that never fires.
#[derive(Debug, Default)]
pub(crate) struct RetiredHandles(Vec<Instance>);

impl RetiredHandles {
    pub(crate) fn new(handles: Vec<Instance>) -> Self {
        Self(handles)
    }

    /// Move out every handle for `name` into a batch of its own
    pub(crate) fn take_named(&mut self, name: &str) -> RetiredHandles {
        let (named, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.0).into_iter().partition(|h| h.name() == name);
        self.0 = rest;
        RetiredHandles(named)
    }
}

impl Drop for RetiredHandles {
    fn drop(&mut self) {
        for handle in self.0.drain(..) {
            handle.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn detached(name: &str) -> Instance {
        Instance::new(Model::new(name, "/logs", None), WeakManager::detached())
    }

    #[test]
    fn test_terminate_fires_once() {
        let instance = detached("1");
        let mut rx = instance.subscribe_terminated();

        assert!(instance.terminate());
        assert!(!instance.terminate());
        assert!(instance.is_terminated());

        assert!(rx.try_recv().is_ok());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
    }

    #[test]
    fn test_clones_share_termination() {
        let a = detached("1");
        let b = a.clone();
        a.terminate();
        assert!(b.is_terminated());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&detached("1")));
    }

    #[tokio::test]
    async fn test_terminated_resolves_after_the_fact() {
        let instance = detached("1");
        instance.terminate();
        instance.terminated().await;
    }

    #[tokio::test]
    async fn test_terminated_wakes_waiter() {
        let instance = detached("1");
        let waiter = {
            let instance = instance.clone();
            tokio::spawn(async move { instance.terminated().await })
        };
        tokio::task::yield_now().await;
        instance.terminate();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_after_termination_is_noop() {
        let instance = detached("1");
        instance.terminate();
        assert!(instance.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_without_manager_reports_disposed() {
        let instance = detached("1");
        assert!(matches!(instance.shutdown().await, Err(ManagerError::Disposed)));
    }

    #[test]
    fn test_retired_handles_terminate_on_drop() {
        let a = detached("a");
        let b = detached("b");
        let mut batch = RetiredHandles::new(vec![a.clone(), b.clone()]);

        let only_a = batch.take_named("a");
        drop(batch);
        assert!(b.is_terminated());
        assert!(!a.is_terminated());

        drop(only_a);
        assert!(a.is_terminated());
    }
}

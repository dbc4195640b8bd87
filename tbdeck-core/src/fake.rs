//! In-memory control plane
//!
//! Simulates the server side for demos and tests: names are handed out as the
//! smallest free integer (optionally prefixed), creating an instance for a
//! logdir that is already served returns the existing one, and deleting an
//! unknown name answers `NotFound`. Tests can inject failures, hold requests
//! in flight, and change server state out of band.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::model::Model;

/// Holds requests until released
#[derive(Debug)]
struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    fn hold(&self) {
        self.open.send_replace(false);
    }

    fn release(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives as long as the fake, so this only returns when open
        let _ = rx.wait_for(|open| *open).await;
    }
}

#[derive(Debug, Default)]
struct FakeState {
    instances: Vec<Model>,
    failing_lists: usize,
    failing_creates: usize,
    failing_shutdowns: BTreeSet<String>,
    list_calls: usize,
    create_calls: usize,
    shutdown_calls: Vec<String>,
}

#[derive(Debug)]
pub struct FakeControlPlane {
    name_prefix: String,
    state: Mutex<FakeState>,
    list_gate: Gate,
    shutdown_gate: Gate,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    /// Hand out names as `<prefix><n>`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: prefix.into(),
            state: Mutex::new(FakeState::default()),
            list_gate: Gate::new(),
            shutdown_gate: Gate::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_available_name(&self, state: &FakeState) -> String {
        (1u64..)
            .map(|n| format!("{}{}", self.name_prefix, n))
            .find(|name| !state.instances.iter().any(|m| &m.name == name))
            .unwrap_or_default()
    }

    /// Add an instance as if another client had started it
    pub fn insert(&self, model: Model) {
        let mut state = self.lock();
        state.instances.retain(|m| m.name != model.name);
        state.instances.push(model);
    }

    /// Remove an instance as if it had died. Returns whether it existed.
    pub fn kill(&self, name: &str) -> bool {
        let mut state = self.lock();
        let before = state.instances.len();
        state.instances.retain(|m| m.name != name);
        state.instances.len() != before
    }

    pub fn set_reload_time(&self, name: &str, reload_time: Option<f64>) {
        let mut state = self.lock();
        if let Some(model) = state.instances.iter_mut().find(|m| m.name == name) {
            model.reload_time = reload_time;
        }
    }

    /// Mark every instance as reloaded at `now`
    pub fn reload_all(&self, now: f64) {
        let mut state = self.lock();
        for model in &mut state.instances {
            model.reload_time = Some(now);
        }
    }

    pub fn instances(&self) -> Vec<Model> {
        self.lock().instances.clone()
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.lock().failing_lists = count;
    }

    pub fn fail_next_creates(&self, count: usize) {
        self.lock().failing_creates = count;
    }

    /// Make every delete of `name` fail with a server error
    pub fn fail_shutdowns_of(&self, name: &str) {
        self.lock().failing_shutdowns.insert(name.to_string());
    }

    /// Hold list requests after their snapshot is taken, until released
    pub fn hold_lists(&self) {
        self.list_gate.hold();
    }

    pub fn release_lists(&self) {
        self.list_gate.release();
    }

    /// Hold delete requests before they touch server state, until released
    pub fn hold_shutdowns(&self) {
        self.shutdown_gate.hold();
    }

    pub fn release_shutdowns(&self) {
        self.shutdown_gate.release();
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    pub fn shutdown_calls(&self) -> Vec<String> {
        self.lock().shutdown_calls.clone()
    }
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn list_running(&self) -> Result<Vec<Model>, ControlPlaneError> {
        let snapshot = {
            let mut state = self.lock();
            state.list_calls += 1;
            if state.failing_lists > 0 {
                state.failing_lists -= 1;
                Err(ControlPlaneError::Transport {
                    message: "connection refused".into(),
                })
            } else {
                Ok(state.instances.clone())
            }
        };
        self.list_gate.pass().await;
        snapshot
    }

    async fn start_new(&self, logdir: &str) -> Result<Model, ControlPlaneError> {
        let mut state = self.lock();
        state.create_calls += 1;
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(ControlPlaneError::Status {
                status: 500,
                message: "failed to launch".into(),
            });
        }
        if let Some(existing) = state.instances.iter().find(|m| m.logdir == logdir) {
            return Ok(existing.clone());
        }
        let model = Model::new(self.next_available_name(&state), logdir, None);
        state.instances.push(model.clone());
        Ok(model)
    }

    async fn shutdown(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.lock().shutdown_calls.push(name.to_string());
        self.shutdown_gate.pass().await;

        let mut state = self.lock();
        if state.failing_shutdowns.contains(name) {
            return Err(ControlPlaneError::Status {
                status: 500,
                message: format!("could not stop {}", name),
            });
        }
        let before = state.instances.len();
        state.instances.retain(|m| m.name != name);
        if state.instances.len() == before {
            return Err(ControlPlaneError::NotFound {
                name: name.to_string(),
                message: format!("TensorBoard instance not found: {:?}", name),
            });
        }
        Ok(())
    }

    fn instance_url(&self, name: &str) -> Option<String> {
        Some(format!("fake://tensorboard/{}/", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_names_reuse_smallest_free_integer() {
        let fake = FakeControlPlane::new();
        let a = fake.start_new("/a").await.unwrap();
        let b = fake.start_new("/b").await.unwrap();
        assert_eq!((a.name.as_str(), b.name.as_str()), ("1", "2"));

        fake.shutdown("1").await.unwrap();
        let c = fake.start_new("/c").await.unwrap();
        assert_eq!(c.name, "1");
    }

    #[tokio::test]
    async fn test_same_logdir_returns_existing_instance() {
        let fake = FakeControlPlane::with_prefix("tb");
        let first = fake.start_new("/logs").await.unwrap();
        let second = fake.start_new("/logs").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "tb1");
        assert_eq!(fake.instances().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_unknown_is_not_found() {
        let fake = FakeControlPlane::new();
        let err = fake.shutdown("9").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fake.shutdown_calls(), vec!["9".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let fake = FakeControlPlane::new();
        fake.fail_next_lists(1);
        assert!(fake.list_running().await.is_err());
        assert!(fake.list_running().await.is_ok());

        fake.fail_next_creates(1);
        assert!(fake.start_new("/a").await.is_err());
        let model = fake.start_new("/a").await.unwrap();

        fake.fail_shutdowns_of(&model.name);
        assert!(matches!(
            fake.shutdown(&model.name).await,
            Err(ControlPlaneError::Status { status: 500, .. })
        ));
        assert_eq!(fake.instances().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_helpers() {
        let fake = FakeControlPlane::new();
        fake.insert(Model::new("x", "/x", None));
        fake.set_reload_time("x", Some(5.0));
        assert_eq!(fake.instances()[0].reload_time, Some(5.0));
        fake.reload_all(9.0);
        assert_eq!(fake.instances()[0].reload_time, Some(9.0));
        assert!(fake.kill("x"));
        assert!(!fake.kill("x"));
    }
}

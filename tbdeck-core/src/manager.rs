//! Running-instance manager
//!
//! Keeps a local roster of the instances the control plane runs, refreshed by
//! polling, and owns one live `Instance` handle per roster entry. Every roster
//! mutation emits the full roster on `running_changed`; the emission happens
//! under the same lock as the mutation so subscribers see changes in order.
//!
//! Shutdown is optimistic: the entry leaves the roster before the delete
//! request is sent and is not restored if the request fails. While a delete is
//! pending, and for polls issued before it settled, the name is ignored in poll
//! results so a stale poll cannot bring it back. A failed delete lifts that
//! suppression and the next poll restores whatever the server still runs.
//!
//! Starts get the mirror treatment: a name added by `start_new` stays in the
//! roster through polls issued before it was added.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::instance::{Instance, RetiredHandles};
use crate::model::{InstanceName, Model};
use crate::reconcile;
use crate::signal::Signal;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub enum ManagerError {
    /// The manager was disposed
    Disposed,
    /// `start_new` was called with an empty logdir
    EmptyLogdir,
    ControlPlane(ControlPlaneError),
    /// Some deletes of a shutdown-all failed; the rest were still attempted
    ShutdownAll {
        failures: Vec<(InstanceName, ControlPlaneError)>,
    },
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::Disposed => write!(f, "manager has been disposed"),
            ManagerError::EmptyLogdir => write!(f, "logdir must not be empty"),
            ManagerError::ControlPlane(e) => write!(f, "{}", e),
            ManagerError::ShutdownAll { failures } => {
                let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
                write!(
                    f,
                    "failed to shut down {} instance(s): {}",
                    failures.len(),
                    names.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for ManagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManagerError::ControlPlane(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ControlPlaneError> for ManagerError {
    fn from(e: ControlPlaneError) -> Self {
        ManagerError::ControlPlane(e)
    }
}

#[derive(Clone, Debug)]
pub struct ManagerOptions {
    pub poll_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Disposed,
}

/// Why a name is currently hidden from poll results
#[derive(Clone, Copy, Debug)]
enum Suppression {
    /// A delete is in flight
    Pending { ticket: u64 },
    /// The delete succeeded; polls numbered up to this one predate it
    Settled { last_stale_poll: u64 },
}

#[derive(Debug, Default)]
struct State {
    roster: Vec<Model>,
    live: BTreeMap<InstanceName, Instance>,
    suppressed: BTreeMap<InstanceName, Suppression>,
    /// Names added by `start_new`, with the last poll issued before they were
    /// added. Those polls may not see them yet.
    started: BTreeMap<InstanceName, u64>,
    polls_issued: u64,
    next_ticket: u64,
    disposed: bool,
}

impl State {
    fn suppress(&mut self, name: &str) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.suppressed
            .insert(name.to_string(), Suppression::Pending { ticket });
        ticket
    }

    fn is_suppressed(&self, name: &str, poll: u64) -> bool {
        match self.suppressed.get(name) {
            Some(Suppression::Pending { .. }) => true,
            Some(Suppression::Settled { last_stale_poll }) => poll <= *last_stale_poll,
            None => false,
        }
    }

    fn settle(&mut self, name: &str, ticket: u64, succeeded: bool) {
        let current = matches!(
            self.suppressed.get(name),
            Some(Suppression::Pending { ticket: t }) if *t == ticket
        );
        if !current {
            return;
        }
        if succeeded {
            let last_stale_poll = self.polls_issued;
            self.suppressed
                .insert(name.to_string(), Suppression::Settled { last_stale_poll });
        } else {
            self.suppressed.remove(name);
        }
    }
}

struct Inner {
    control_plane: Arc<dyn ControlPlane>,
    poll_interval: Duration,
    state: Mutex<State>,
    /// Serializes polls so they apply in the order they were issued
    refresh_gate: tokio::sync::Mutex<()>,
    running_changed: Signal<Vec<Model>>,
    open_requested: Signal<Model>,
    view_close_requested: Signal<Model>,
    readiness: watch::Sender<Readiness>,
    visible: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.poller.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

/// Non-owning reference held by instance handles
#[derive(Clone, Debug)]
pub(crate) struct WeakManager(Weak<Inner>);

impl WeakManager {
    pub(crate) fn upgrade(&self) -> Option<Manager> {
        self.0.upgrade().map(|inner| Manager { inner })
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        WeakManager(Weak::new())
    }
}

#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Manager")
            .field("control_plane", &self.inner.control_plane.name())
            .field("roster", &state.roster)
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl Manager {
    /// Create a manager without starting the poll timer
    pub fn new(control_plane: Arc<dyn ControlPlane>, options: ManagerOptions) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending);
        Self {
            inner: Arc::new(Inner {
                control_plane,
                poll_interval: options.poll_interval,
                state: Mutex::new(State::default()),
                refresh_gate: tokio::sync::Mutex::new(()),
                running_changed: Signal::new(),
                open_requested: Signal::new(),
                view_close_requested: Signal::new(),
                readiness,
                visible: AtomicBool::new(true),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Create a manager and start polling. The first poll runs immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(control_plane: Arc<dyn ControlPlane>, options: ManagerOptions) -> Self {
        let manager = Self::new(control_plane, options);
        manager.spawn_poller();
        manager
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_poller(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.poller.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn downgrade(&self) -> WeakManager {
        WeakManager(Arc::downgrade(&self.inner))
    }

    pub fn control_plane_name(&self) -> &'static str {
        self.inner.control_plane.name()
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Snapshot of the roster, in server order
    pub fn running(&self) -> Vec<Model> {
        self.lock_state().roster.clone()
    }

    /// Names of the live handles
    pub fn live_names(&self) -> Vec<InstanceName> {
        self.lock_state().live.keys().cloned().collect()
    }

    pub fn instance(&self, name: &str) -> Option<Instance> {
        self.lock_state().live.get(name).cloned()
    }

    pub fn instance_url(&self, name: &str) -> Option<String> {
        self.inner.control_plane.instance_url(name)
    }

    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    /// Whether a refresh has completed successfully
    pub fn is_ready(&self) -> bool {
        *self.inner.readiness.borrow() == Readiness::Ready
    }

    /// Resolves after the first successful refresh
    pub async fn ready(&self) -> Result<(), ManagerError> {
        let mut rx = self.inner.readiness.subscribe();
        let readiness = match rx.wait_for(|r| *r != Readiness::Pending).await {
            Ok(r) => *r,
            Err(_) => Readiness::Disposed,
        };
        match readiness {
            Readiness::Ready => Ok(()),
            _ => Err(ManagerError::Disposed),
        }
    }

    /// Report whether the hosting UI is visible. Hidden UIs skip poll ticks.
    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.store(visible, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }

    /// Full roster after every roster mutation
    pub fn subscribe_running_changed(&self) -> broadcast::Receiver<Vec<Model>> {
        self.inner.running_changed.subscribe()
    }

    /// Requests to open a view for an instance
    pub fn subscribe_open_requested(&self) -> broadcast::Receiver<Model> {
        self.inner.open_requested.subscribe()
    }

    /// Instances that left the roster; hosts should close their views
    pub fn subscribe_view_close_requested(&self) -> broadcast::Receiver<Model> {
        self.inner.view_close_requested.subscribe()
    }

    fn emit_change(&self, state: &State, departed: &[Model]) {
        self.inner.running_changed.emit(state.roster.clone());
        for model in departed {
            self.inner.view_close_requested.emit(model.clone());
        }
    }

    fn begin_poll(&self) -> Result<u64, ManagerError> {
        let mut state = self.lock_state();
        if state.disposed {
            return Err(ManagerError::Disposed);
        }
        state.polls_issued += 1;
        Ok(state.polls_issued)
    }

    fn mark_ready(&self) {
        self.inner.readiness.send_if_modified(|r| {
            if *r == Readiness::Pending {
                *r = Readiness::Ready;
                true
            } else {
                false
            }
        });
    }

    /// Ask the host to open a view for a running instance
    pub fn request_open(&self, name: &str) -> Result<Option<Model>, ManagerError> {
        let state = self.lock_state();
        if state.disposed {
            return Err(ManagerError::Disposed);
        }
        let model = state.roster.iter().find(|m| m.name == name).cloned();
        if let Some(model) = &model {
            self.inner.open_requested.emit(model.clone());
        }
        Ok(model)
    }

    /// Poll the control plane once and reconcile the roster with the result
    pub async fn refresh_running(&self) -> Result<(), ManagerError> {
        let _gate = self.inner.refresh_gate.lock().await;
        let poll = self.begin_poll()?;
        let models = self.inner.control_plane.list_running().await?;
        {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(ManagerError::Disposed);
            }
            self.apply_poll(&mut state, models, poll);
        }
        self.mark_ready();
        Ok(())
    }

    fn apply_poll(&self, state: &mut State, models: Vec<Model>, poll: u64) {
        let mut incoming: Vec<Model> = reconcile::dedupe_by_name(models)
            .into_iter()
            .filter(|m| !state.is_suppressed(&m.name, poll))
            .collect();
        for model in &state.roster {
            let predates_start = state
                .started
                .get(&model.name)
                .is_some_and(|last_stale_poll| poll <= *last_stale_poll);
            if predates_start && !incoming.iter().any(|m| m.name == model.name) {
                trace!(poll, name = %model.name, "keeping instance started after this poll was issued");
                incoming.push(model.clone());
            }
        }
        state.suppressed.retain(|_, s| match s {
            Suppression::Pending { .. } => true,
            Suppression::Settled { last_stale_poll } => *last_stale_poll > poll,
        });
        state.started.retain(|_, last_stale_poll| *last_stale_poll > poll);

        let delta = reconcile::diff(&state.roster, &incoming);
        if !delta.changed {
            trace!(poll, "poll matched roster");
            return;
        }

        let gone: Vec<InstanceName> = state
            .live
            .keys()
            .filter(|name| !incoming.iter().any(|m| &m.name == *name))
            .cloned()
            .collect();
        for name in gone {
            if let Some(handle) = state.live.remove(&name) {
                handle.terminate();
            }
        }
        for model in &incoming {
            if !state.live.contains_key(&model.name) {
                let handle = Instance::new(model.clone(), self.downgrade());
                state.live.insert(model.name.clone(), handle);
            }
        }

        debug!(
            poll,
            arrived = delta.arrived.len(),
            departed = delta.departed.len(),
            running = incoming.len(),
            "roster changed"
        );
        state.roster = incoming;
        self.emit_change(state, &delta.departed);
    }

    /// Launch a new instance for `logdir` and track it
    pub async fn start_new(&self, logdir: &str) -> Result<Instance, ManagerError> {
        if logdir.trim().is_empty() {
            return Err(ManagerError::EmptyLogdir);
        }
        if self.is_disposed() {
            return Err(ManagerError::Disposed);
        }

        let model = self.inner.control_plane.start_new(logdir).await?;

        let mut state = self.lock_state();
        if state.disposed {
            return Err(ManagerError::Disposed);
        }
        if let Some(existing) = state.live.get(&model.name) {
            debug!(name = %model.name, "start returned an instance that is already tracked");
            return Ok(existing.clone());
        }

        // A fresh instance may reuse the name of one we just deleted
        state.suppressed.remove(&model.name);

        let instance = Instance::new(model.clone(), self.downgrade());
        state.live.insert(model.name.clone(), instance.clone());
        if !state.roster.iter().any(|m| m.name == model.name) {
            debug!(name = %model.name, logdir = %model.logdir, "instance started");
            let last_stale_poll = state.polls_issued;
            state.started.insert(model.name.clone(), last_stale_poll);
            state.roster.push(model);
            self.emit_change(&state, &[]);
        }
        Ok(instance)
    }

    /// Shut down an instance by name.
    ///
    /// Unknown names succeed without a request. A 404 from the server counts
    /// as success. Any other failure is returned, but the roster entry stays
    /// removed.
    pub async fn shutdown(&self, name: &str) -> Result<(), ManagerError> {
        let pending = {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(ManagerError::Disposed);
            }
            let Some(index) = state.roster.iter().position(|m| m.name == name) else {
                trace!(name, "shutdown of an instance that is not running");
                return Ok(());
            };
            let model = state.roster.remove(index);
            state.started.remove(name);
            let handles = RetiredHandles::new(state.live.remove(name).into_iter().collect());
            let ticket = state.suppress(name);
            self.emit_change(&state, std::slice::from_ref(&model));
            PendingShutdown::new(self.clone(), name, ticket, handles)
        };

        let outcome = delete_outcome(name, self.inner.control_plane.shutdown(name).await);
        pending.finish(outcome.is_ok());
        outcome.map_err(ManagerError::from)
    }

    /// Shut down everything the server runs.
    ///
    /// The roster empties immediately. The server is then polled once and
    /// every instance it reports is deleted concurrently; this returns after
    /// all deletes have settled.
    pub async fn shutdown_all(&self) -> Result<(), ManagerError> {
        let mut swept = {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(ManagerError::Disposed);
            }
            let departed = std::mem::take(&mut state.roster);
            state.started.clear();
            let handles = std::mem::take(&mut state.live).into_values().collect();
            if !departed.is_empty() {
                debug!(count = departed.len(), "roster cleared for shutdown-all");
                self.emit_change(&state, &departed);
            }
            RetiredHandles::new(handles)
        };

        let pending: Vec<PendingShutdown> = {
            let _gate = self.inner.refresh_gate.lock().await;
            let poll = self.begin_poll()?;
            let fresh = reconcile::dedupe_by_name(self.inner.control_plane.list_running().await?);

            let tickets: Vec<(InstanceName, u64)> = {
                let mut state = self.lock_state();
                if state.disposed {
                    return Err(ManagerError::Disposed);
                }
                let tickets = fresh
                    .iter()
                    .map(|m| (m.name.clone(), state.suppress(&m.name)))
                    .collect();
                self.apply_poll(&mut state, fresh, poll);
                tickets
            };
            self.mark_ready();

            tickets
                .into_iter()
                .map(|(name, ticket)| {
                    let handles = swept.take_named(&name);
                    PendingShutdown::new(self.clone(), &name, ticket, handles)
                })
                .collect()
        };
        // Anything swept that the server no longer runs is gone already
        drop(swept);

        let control_plane = &self.inner.control_plane;
        let results = join_all(pending.into_iter().map(|p| async move {
            let outcome = delete_outcome(&p.name, control_plane.shutdown(&p.name).await);
            let name = p.name.clone();
            p.finish(outcome.is_ok());
            outcome.map_err(|e| (name, e))
        }))
        .await;

        let failures: Vec<(InstanceName, ControlPlaneError)> =
            results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            Ok(())
        } else {
            warn!(failed = failures.len(), "shutdown-all finished with failures");
            Err(ManagerError::ShutdownAll { failures })
        }
    }

    /// Start the poll timer if it is not running yet
    pub fn start_polling(&self) -> Result<(), ManagerError> {
        if self.is_disposed() {
            return Err(ManagerError::Disposed);
        }
        self.spawn_poller();
        Ok(())
    }

    fn spawn_poller(&self) {
        let mut slot = self.lock_poller();
        if slot.is_some() || self.is_disposed() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.poll_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let manager = Manager { inner };
                if manager.is_disposed() {
                    break;
                }
                if !manager.is_visible() {
                    trace!("ui hidden, skipping poll");
                    continue;
                }
                match manager.refresh_running().await {
                    Ok(()) => {}
                    Err(ManagerError::Disposed) => break,
                    Err(e) => warn!(error = %e, "poll failed"),
                }
            }
        }));
    }

    /// Tear the manager down. Idempotent.
    ///
    /// Cancels the timer, empties the roster (emitting the empty roster if it
    /// had entries), terminates every live handle and disconnects all
    /// subscribers.
    pub fn dispose(&self) {
        let retired = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.suppressed.clear();
            state.started.clear();
            let departed = std::mem::take(&mut state.roster);
            if !departed.is_empty() {
                self.emit_change(&state, &departed);
            }
            RetiredHandles::new(std::mem::take(&mut state.live).into_values().collect())
        };

        if let Some(task) = self.lock_poller().take() {
            task.abort();
        }
        drop(retired);

        self.inner.readiness.send_replace(Readiness::Disposed);
        self.inner.running_changed.clear();
        self.inner.open_requested.clear();
        self.inner.view_close_requested.clear();
        debug!("manager disposed");
    }
}

/// Map a delete response onto the manager's view of success
fn delete_outcome(
    name: &str,
    result: Result<(), ControlPlaneError>,
) -> Result<(), ControlPlaneError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            warn!(name, error = %e, "instance was already gone");
            Ok(())
        }
        Err(e) => {
            warn!(name, error = %e, "shutdown failed, keeping local removal");
            Err(e)
        }
    }
}

/// A delete in flight. Settles the name's suppression and terminates the
/// retired handles when dropped, whether or not the request completed.
struct PendingShutdown {
    manager: Manager,
    name: InstanceName,
    ticket: u64,
    succeeded: bool,
    _handles: RetiredHandles,
}

impl PendingShutdown {
    fn new(manager: Manager, name: &str, ticket: u64, handles: RetiredHandles) -> Self {
        Self {
            manager,
            name: name.to_string(),
            ticket,
            succeeded: false,
            _handles: handles,
        }
    }

    fn finish(mut self, succeeded: bool) {
        self.succeeded = succeeded;
    }
}

impl Drop for PendingShutdown {
    fn drop(&mut self) {
        self.manager
            .lock_state()
            .settle(&self.name, self.ticket, self.succeeded);
    }
}

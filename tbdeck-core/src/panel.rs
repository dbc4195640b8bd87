//! Panel state
//!
//! Host-independent state behind the running-instances list: rows mirror the
//! manager's roster, a selection moves over them, and user actions become
//! `PanelIntent`s that `dispatch` routes back to the manager.

use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::instance::Instance;
use crate::manager::{Manager, ManagerError};
use crate::model::{InstanceName, Model, format_reload_time};

/// Something the user asked the panel to do
#[derive(Clone, Debug, PartialEq)]
pub enum PanelIntent {
    Open(Model),
    Shutdown(InstanceName),
    ShutdownAll,
    Refresh,
    Start(String),
}

/// What a dispatched intent produced
#[derive(Clone, Debug)]
pub enum PanelOutcome {
    Opened(Option<Model>),
    Started(Instance),
    Done,
}

#[derive(Clone, Debug, Default)]
pub struct Panel {
    rows: Vec<Model>,
    selected: usize,
    confirm_shutdown_all: bool,
}

impl Panel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panel seeded from the manager's current roster
    pub fn from_manager(manager: &Manager) -> Self {
        let mut panel = Self::new();
        panel.apply(manager.running());
        panel
    }

    /// Replace the rows with a new roster, keeping the selection on the same
    /// instance when it is still present
    pub fn apply(&mut self, roster: Vec<Model>) {
        let previous = self.selected_model().map(|m| m.name.clone());
        self.rows = roster;
        self.selected = previous
            .and_then(|name| self.rows.iter().position(|m| m.name == name))
            .unwrap_or(self.selected)
            .min(self.rows.len().saturating_sub(1));
        if self.rows.is_empty() {
            self.confirm_shutdown_all = false;
        }
    }

    /// Apply every pending roster change. Returns whether the rows changed.
    ///
    /// A lagged receiver resyncs from the manager's current roster.
    pub fn drain(&mut self, rx: &mut broadcast::Receiver<Vec<Model>>, manager: &Manager) -> bool {
        let mut latest = None;
        loop {
            match rx.try_recv() {
                Ok(roster) => latest = Some(roster),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "panel lagged behind roster changes");
                    latest = Some(manager.running());
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        match latest {
            Some(roster) => {
                self.apply(roster);
                true
            }
            None => false,
        }
    }

    pub fn rows(&self) -> &[Model] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn selected_index(&self) -> Option<usize> {
        if self.rows.is_empty() {
            None
        } else {
            Some(self.selected)
        }
    }

    pub fn selected_model(&self) -> Option<&Model> {
        self.rows.get(self.selected)
    }

    pub fn select_next(&mut self) {
        if !self.rows.is_empty() {
            self.selected = (self.selected + 1) % self.rows.len();
        }
    }

    pub fn select_prev(&mut self) {
        if !self.rows.is_empty() {
            self.selected = (self.selected + self.rows.len() - 1) % self.rows.len();
        }
    }

    pub fn open_selected(&self) -> Option<PanelIntent> {
        self.selected_model().cloned().map(PanelIntent::Open)
    }

    pub fn shutdown_selected(&self) -> Option<PanelIntent> {
        self.selected_model()
            .map(|m| PanelIntent::Shutdown(m.name.clone()))
    }

    /// First press arms the confirmation, nothing is dispatched yet
    pub fn request_shutdown_all(&mut self) {
        self.confirm_shutdown_all = true;
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.confirm_shutdown_all
    }

    pub fn confirm(&mut self) -> Option<PanelIntent> {
        if std::mem::take(&mut self.confirm_shutdown_all) {
            Some(PanelIntent::ShutdownAll)
        } else {
            None
        }
    }

    pub fn cancel(&mut self) {
        self.confirm_shutdown_all = false;
    }
}

/// Tooltip text for a row
pub fn title(model: &Model) -> String {
    format!(
        "Logdir: {}\nLast Reload: {}",
        model.logdir,
        format_reload_time(model.reload_time)
    )
}

/// Route an intent to the manager
pub async fn dispatch(manager: &Manager, intent: PanelIntent) -> Result<PanelOutcome, ManagerError> {
    match intent {
        PanelIntent::Open(model) => manager.request_open(&model.name).map(PanelOutcome::Opened),
        PanelIntent::Shutdown(name) => {
            manager.shutdown(&name).await?;
            Ok(PanelOutcome::Done)
        }
        PanelIntent::ShutdownAll => {
            manager.shutdown_all().await?;
            Ok(PanelOutcome::Done)
        }
        PanelIntent::Refresh => {
            manager.refresh_running().await?;
            Ok(PanelOutcome::Done)
        }
        PanelIntent::Start(logdir) => manager.start_new(&logdir).await.map(PanelOutcome::Started),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeControlPlane;
    use crate::manager::ManagerOptions;
    use std::sync::Arc;

    fn m(name: &str) -> Model {
        Model::new(name, format!("/logs/{}", name), None)
    }

    #[test]
    fn test_selection_follows_instance_across_updates() {
        let mut panel = Panel::new();
        panel.apply(vec![m("1"), m("2"), m("3")]);
        panel.select_next();
        assert_eq!(panel.selected_model().unwrap().name, "2");

        panel.apply(vec![m("0"), m("2"), m("3")]);
        assert_eq!(panel.selected_model().unwrap().name, "2");

        panel.apply(vec![m("3")]);
        assert_eq!(panel.selected_index(), Some(0));

        panel.apply(Vec::new());
        assert_eq!(panel.selected_index(), None);
        assert!(panel.open_selected().is_none());
    }

    #[test]
    fn test_selection_wraps() {
        let mut panel = Panel::new();
        panel.apply(vec![m("1"), m("2")]);
        panel.select_prev();
        assert_eq!(panel.selected_model().unwrap().name, "2");
        panel.select_next();
        assert_eq!(panel.selected_model().unwrap().name, "1");
    }

    #[test]
    fn test_shutdown_all_needs_confirmation() {
        let mut panel = Panel::new();
        panel.apply(vec![m("1")]);
        assert!(panel.confirm().is_none());

        panel.request_shutdown_all();
        panel.cancel();
        assert!(panel.confirm().is_none());

        panel.request_shutdown_all();
        assert!(panel.awaiting_confirmation());
        assert_eq!(panel.confirm(), Some(PanelIntent::ShutdownAll));
        assert!(!panel.awaiting_confirmation());
    }

    #[test]
    fn test_intents_for_selection() {
        let mut panel = Panel::new();
        panel.apply(vec![m("1"), m("2")]);
        panel.select_next();
        assert_eq!(panel.open_selected(), Some(PanelIntent::Open(m("2"))));
        assert_eq!(panel.shutdown_selected(), Some(PanelIntent::Shutdown("2".into())));
    }

    #[test]
    fn test_title() {
        assert_eq!(
            title(&Model::new("1", "/runs", None)),
            "Logdir: /runs\nLast Reload: never"
        );
        assert_eq!(
            title(&Model::new("1", "/runs", Some(7322.0))),
            "Logdir: /runs\nLast Reload: 02:02:02"
        );
    }

    #[tokio::test]
    async fn test_dispatch_round_trip_through_manager() {
        let fake = Arc::new(FakeControlPlane::new());
        let manager = Manager::new(fake.clone(), ManagerOptions::default());
        let mut rx = manager.subscribe_running_changed();
        let mut panel = Panel::from_manager(&manager);

        let outcome = dispatch(&manager, PanelIntent::Start("/runs".into())).await.unwrap();
        assert!(matches!(outcome, PanelOutcome::Started(_)));
        assert!(panel.drain(&mut rx, &manager));
        assert_eq!(panel.rows().len(), 1);

        let intent = panel.open_selected().unwrap();
        let outcome = dispatch(&manager, intent).await.unwrap();
        assert!(matches!(outcome, PanelOutcome::Opened(Some(_))));

        let intent = panel.shutdown_selected().unwrap();
        dispatch(&manager, intent).await.unwrap();
        assert!(panel.drain(&mut rx, &manager));
        assert!(panel.is_empty());
        assert!(!panel.drain(&mut rx, &manager));

        fake.insert(m("9"));
        dispatch(&manager, PanelIntent::Refresh).await.unwrap();
        panel.drain(&mut rx, &manager);
        assert_eq!(panel.rows(), &[m("9")]);

        panel.request_shutdown_all();
        let intent = panel.confirm().unwrap();
        dispatch(&manager, intent).await.unwrap();
        panel.drain(&mut rx, &manager);
        assert!(panel.is_empty());
        assert!(fake.instances().is_empty());
    }
}

use std::io;
use std::time::Duration;

use crossterm::{
    event::{
        self, DisableFocusChange, EnableFocusChange, Event as CEvent, KeyCode, KeyEvent,
        KeyEventKind, KeyModifiers,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::{broadcast, mpsc};

use tbdeck_core::manager::{Manager, ManagerError};
use tbdeck_core::model::Model;
use tbdeck_core::panel::{Panel, PanelIntent, PanelOutcome, dispatch};

use crate::ui::{self, Tone};

// --- Terminal setup/teardown ---
fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), DisableFocusChange, LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Result of a dispatched intent, reported back to the UI loop
struct Completion {
    action: String,
    result: Result<PanelOutcome, ManagerError>,
}

/// What a key press asks the loop to do
#[derive(Debug, PartialEq)]
pub enum KeyAction {
    None,
    Quit,
    Dispatch(PanelIntent),
}

pub struct App {
    pub(crate) manager: Manager,
    pub(crate) panel: Panel,
    pub(crate) server: String,
    pub(crate) status: Option<(Tone, String)>,
    /// Logdir being typed for a new instance
    pub(crate) input: Option<String>,
    /// Last instance the user opened, with its URL
    pub(crate) opened: Option<(Model, Option<String>)>,
    pub(crate) focused: bool,
    pub(crate) in_flight: usize,
}

impl App {
    pub fn new(manager: Manager, server: impl Into<String>) -> Self {
        let panel = Panel::from_manager(&manager);
        Self {
            manager,
            panel,
            server: server.into(),
            status: None,
            input: None,
            opened: None,
            focused: true,
            in_flight: 0,
        }
    }

    fn set_status(&mut self, tone: Tone, message: impl Into<String>) {
        self.status = Some((tone, message.into()));
    }

    pub fn set_focus(&mut self, focused: bool) {
        self.focused = focused;
        self.manager.set_visible(focused);
    }

    /// Translate a key into an action. Prompts and confirmations take the
    /// keyboard while they are open.
    pub fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
        if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
            return KeyAction::Quit;
        }

        if let Some(input) = self.input.as_mut() {
            match code {
                KeyCode::Esc => self.input = None,
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Enter => {
                    let logdir = input.trim().to_string();
                    self.input = None;
                    if logdir.is_empty() {
                        self.set_status(Tone::Warn, "logdir must not be empty");
                    } else {
                        return KeyAction::Dispatch(PanelIntent::Start(logdir));
                    }
                }
                KeyCode::Char(c) => input.push(c),
                _ => {}
            }
            return KeyAction::None;
        }

        if self.panel.awaiting_confirmation() {
            return match code {
                KeyCode::Char('y') | KeyCode::Char('Y') => self
                    .panel
                    .confirm()
                    .map(KeyAction::Dispatch)
                    .unwrap_or(KeyAction::None),
                _ => {
                    self.panel.cancel();
                    self.set_status(Tone::Info, "shutdown-all cancelled");
                    KeyAction::None
                }
            };
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
            KeyCode::Down | KeyCode::Char('j') => {
                self.panel.select_next();
                KeyAction::None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.panel.select_prev();
                KeyAction::None
            }
            KeyCode::Enter | KeyCode::Char('o') => self
                .panel
                .open_selected()
                .map(KeyAction::Dispatch)
                .unwrap_or(KeyAction::None),
            KeyCode::Char('d') => self
                .panel
                .shutdown_selected()
                .map(KeyAction::Dispatch)
                .unwrap_or(KeyAction::None),
            KeyCode::Char('D') => {
                self.panel.request_shutdown_all();
                KeyAction::None
            }
            KeyCode::Char('s') | KeyCode::Char('n') => {
                self.input = Some(String::new());
                KeyAction::None
            }
            KeyCode::Char('r') => KeyAction::Dispatch(PanelIntent::Refresh),
            _ => KeyAction::None,
        }
    }

    fn record(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion.result {
            Ok(PanelOutcome::Started(instance)) => {
                let message = format!("started {} for {}", instance.model().label(), instance.model().logdir);
                self.set_status(Tone::Success, message);
            }
            Ok(PanelOutcome::Opened(None)) => {
                self.set_status(Tone::Warn, "instance is no longer running");
            }
            Ok(PanelOutcome::Opened(Some(_))) => {}
            Ok(PanelOutcome::Done) => self.set_status(Tone::Info, format!("{} done", completion.action)),
            Err(e) => self.set_status(Tone::Error, format!("{} failed: {}", completion.action, e)),
        }
    }

    fn on_open_requested(&mut self, model: Model) {
        let url = self.manager.instance_url(&model.name);
        self.opened = Some((model, url));
    }

    fn on_view_close_requested(&mut self, model: &Model) {
        if self.opened.as_ref().is_some_and(|(m, _)| m.name == model.name) {
            self.opened = None;
        }
    }
}

fn describe(intent: &PanelIntent) -> String {
    match intent {
        PanelIntent::Open(model) => format!("open {}", model.label()),
        PanelIntent::Shutdown(name) => format!("shutdown tensorboard/{}", name),
        PanelIntent::ShutdownAll => "shutdown all".into(),
        PanelIntent::Refresh => "refresh".into(),
        PanelIntent::Start(logdir) => format!("start {}", logdir),
    }
}

pub async fn run_tui(manager: Manager, server: String) -> io::Result<()> {
    let mut terminal = setup_terminal()?;
    let res = tui_loop(&mut terminal, manager.clone(), server).await;
    manager.dispose();
    restore_terminal(terminal)?;
    res
}

async fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    manager: Manager,
    server: String,
) -> io::Result<()> {
    let mut running_rx = manager.subscribe_running_changed();
    let mut open_rx = manager.subscribe_open_requested();
    let mut close_rx = manager.subscribe_view_close_requested();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let mut app = App::new(manager.clone(), server);

    loop {
        app.panel.drain(&mut running_rx, &manager);
        while let Ok(model) = open_rx.try_recv() {
            app.on_open_requested(model);
        }
        loop {
            match close_rx.try_recv() {
                Ok(model) => app.on_view_close_requested(&model),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        while let Ok(completion) = done_rx.try_recv() {
            app.record(completion);
        }

        terminal.draw(|f| ui::draw(f, &app))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }

        let action = match event::read()? {
            CEvent::Key(KeyEvent {
                code,
                modifiers,
                kind: KeyEventKind::Press,
                ..
            }) => app.handle_key(code, modifiers),
            CEvent::FocusGained => {
                app.set_focus(true);
                KeyAction::Dispatch(PanelIntent::Refresh)
            }
            CEvent::FocusLost => {
                app.set_focus(false);
                KeyAction::None
            }
            _ => KeyAction::None,
        };

        match action {
            KeyAction::None => {}
            KeyAction::Quit => return Ok(()),
            KeyAction::Dispatch(intent) => {
                let action = describe(&intent);
                tracing::debug!(%action, "dispatching");
                app.in_flight += 1;
                let manager = manager.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let result = dispatch(&manager, intent).await;
                    let _ = done_tx.send(Completion { action, result });
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tbdeck_core::fake::FakeControlPlane;
    use tbdeck_core::manager::ManagerOptions;

    async fn app_with(names: &[&str]) -> App {
        let fake = Arc::new(FakeControlPlane::new());
        for name in names {
            fake.insert(Model::new(*name, format!("/logs/{}", name), None));
        }
        let manager = Manager::new(fake, ManagerOptions::default());
        manager.refresh_running().await.unwrap();
        App::new(manager, "fake")
    }

    fn key(app: &mut App, code: KeyCode) -> KeyAction {
        app.handle_key(code, KeyModifiers::NONE)
    }

    #[tokio::test]
    async fn test_navigation_and_intents() {
        let mut app = app_with(&["1", "2"]).await;
        assert_eq!(key(&mut app, KeyCode::Down), KeyAction::None);
        assert_eq!(
            key(&mut app, KeyCode::Char('d')),
            KeyAction::Dispatch(PanelIntent::Shutdown("2".into()))
        );
        assert!(matches!(
            key(&mut app, KeyCode::Enter),
            KeyAction::Dispatch(PanelIntent::Open(_))
        ));
        assert_eq!(
            key(&mut app, KeyCode::Char('r')),
            KeyAction::Dispatch(PanelIntent::Refresh)
        );
        assert_eq!(key(&mut app, KeyCode::Char('q')), KeyAction::Quit);
    }

    #[tokio::test]
    async fn test_shutdown_all_prompts_first() {
        let mut app = app_with(&["1"]).await;
        assert_eq!(key(&mut app, KeyCode::Char('D')), KeyAction::None);
        assert_eq!(
            key(&mut app, KeyCode::Char('y')),
            KeyAction::Dispatch(PanelIntent::ShutdownAll)
        );

        key(&mut app, KeyCode::Char('D'));
        assert_eq!(key(&mut app, KeyCode::Char('n')), KeyAction::None);
        assert!(!app.panel.awaiting_confirmation());
    }

    #[tokio::test]
    async fn test_start_prompt_collects_logdir() {
        let mut app = app_with(&[]).await;
        key(&mut app, KeyCode::Char('s'));
        for c in "/runx".chars() {
            key(&mut app, KeyCode::Char(c));
        }
        key(&mut app, KeyCode::Backspace);
        // 'q' is text while the prompt is open
        assert_eq!(key(&mut app, KeyCode::Char('q')), KeyAction::None);
        assert_eq!(
            key(&mut app, KeyCode::Enter),
            KeyAction::Dispatch(PanelIntent::Start("/runq".into()))
        );
        assert!(app.input.is_none());

        key(&mut app, KeyCode::Char('s'));
        assert_eq!(key(&mut app, KeyCode::Enter), KeyAction::None);
        assert!(matches!(app.status, Some((Tone::Warn, _))));
    }

    #[tokio::test]
    async fn test_focus_drives_visibility() {
        let mut app = app_with(&[]).await;
        app.set_focus(false);
        assert!(!app.manager.is_visible());
        app.set_focus(true);
        assert!(app.manager.is_visible());
    }

    #[tokio::test]
    async fn test_open_and_close_track_detail() {
        let mut app = app_with(&["1"]).await;
        let model = Model::new("1", "/logs/1", None);
        app.on_open_requested(model.clone());
        assert_eq!(
            app.opened.as_ref().and_then(|(_, url)| url.clone()).as_deref(),
            Some("fake://tensorboard/1/")
        );
        app.on_view_close_requested(&model);
        assert!(app.opened.is_none());
    }
}

use std::time::SystemTime;

use tokio::sync::broadcast::error::RecvError;

use tbdeck_core::manager::{Manager, ManagerError};
use tbdeck_core::model::{Model, format_reload_time};

fn now() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .ok();
    format_reload_time(secs)
}

fn summarize(roster: &[Model]) -> String {
    if roster.is_empty() {
        return "(none)".into();
    }
    roster
        .iter()
        .map(|m| format!("{} [{}]", m.label(), format_reload_time(m.reload_time)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print every roster change and departed instance until Ctrl-C
pub async fn run_watch(manager: &Manager) -> Result<(), ManagerError> {
    let mut running = manager.subscribe_running_changed();
    let mut closed = manager.subscribe_view_close_requested();
    manager.start_polling()?;

    manager.ready().await?;
    println!("[{}] watching every {:?}", now(), manager.poll_interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            roster = running.recv() => match roster {
                Ok(roster) => println!("[{}] running: {}", now(), summarize(&roster)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "watch fell behind");
                    println!("[{}] running: {}", now(), summarize(&manager.running()));
                }
                Err(RecvError::Closed) => break,
            },
            model = closed.recv() => match model {
                Ok(model) => println!("[{}] gone: {} ({})", now(), model.label(), model.logdir),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

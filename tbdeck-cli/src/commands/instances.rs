use tbdeck_core::manager::{Manager, ManagerError};
use tbdeck_core::model::{Model, format_reload_time};

/// Render the roster as an aligned table
pub fn format_table(models: &[Model]) -> String {
    if models.is_empty() {
        return "No running instances.\n".into();
    }
    let name_width = models
        .iter()
        .map(|m| m.label().chars().count())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let mut out = format!("{:<name_width$}  {:<8}  {}\n", "NAME", "RELOADED", "LOGDIR");
    for m in models {
        out.push_str(&format!(
            "{:<name_width$}  {:<8}  {}\n",
            m.label(),
            format_reload_time(m.reload_time),
            m.logdir
        ));
    }
    out
}

pub async fn run_list(manager: &Manager) -> Result<(), ManagerError> {
    manager.refresh_running().await?;
    print!("{}", format_table(&manager.running()));
    Ok(())
}

pub async fn run_start(manager: &Manager, logdir: &str) -> Result<(), ManagerError> {
    manager.refresh_running().await?;
    let instance = manager.start_new(logdir).await?;
    let model = instance.model();
    println!("Started {} for {}", model.label(), model.logdir);
    if let Some(url) = manager.instance_url(&model.name) {
        println!("  {}", url);
    }
    Ok(())
}

pub async fn run_stop(manager: &Manager, names: &[String], all: bool) -> Result<(), ManagerError> {
    manager.refresh_running().await?;

    if all {
        let count = manager.running().len();
        manager.shutdown_all().await?;
        println!("Stopped all instances ({} known before the sweep).", count);
        return Ok(());
    }

    let mut first_error = None;
    for name in names {
        if !manager.running().iter().any(|m| &m.name == name) {
            eprintln!("tensorboard/{}: not running", name);
            continue;
        }
        match manager.shutdown(name).await {
            Ok(()) => println!("Stopped tensorboard/{}", name),
            Err(e) => {
                eprintln!("tensorboard/{}: {}", name, e);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub async fn run_url(manager: &Manager, name: &str) -> Result<(), ManagerError> {
    manager.refresh_running().await?;
    match manager.request_open(name)? {
        Some(model) => match manager.instance_url(&model.name) {
            Some(url) => println!("{}", url),
            None => eprintln!("{} has no URL on this backend", model.label()),
        },
        None => eprintln!("tensorboard/{}: not running", name),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table() {
        let table = format_table(&[
            Model::new("1", "/runs/a", Some(3600.0)),
            Model::new("12", "/runs/b", None),
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "NAME            RELOADED  LOGDIR");
        assert_eq!(lines[1], "tensorboard/1   01:00:00  /runs/a");
        assert_eq!(lines[2], "tensorboard/12  never     /runs/b");
    }

    #[test]
    fn test_format_empty_table() {
        assert_eq!(format_table(&[]), "No running instances.\n");
    }
}

mod client;
mod commands;
mod demo;
mod logging;
mod tui;
mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use tbdeck_core::config::TbdeckConfig;
use tbdeck_core::control_plane::ControlPlane;
use tbdeck_core::manager::Manager;

use client::HttpControlPlane;
use logging::LogTarget;

#[derive(Parser)]
#[command(name = "tbdeck")]
#[command(about = "Manage TensorBoard instances running on a notebook server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: TBDECK_CONFIG or tbdeck.yml found upward from cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server base URL, overrides server.base_url
    #[arg(long, global = true)]
    url: Option<String>,

    /// API token, overrides server.token
    #[arg(long, global = true)]
    token: Option<String>,

    /// Poll interval in milliseconds, overrides poll_interval_ms
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Run against an in-memory server instead of a real one
    #[arg(long, global = true)]
    demo: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive terminal UI (default)
    Tui,
    /// List running instances
    List,
    /// Start an instance for a log directory
    Start {
        logdir: String,
        /// Reload interval in seconds, overrides reload_interval
        #[arg(long)]
        reload_interval: Option<u64>,
    },
    /// Stop instances by name
    Stop {
        #[arg(required_unless_present = "all")]
        names: Vec<String>,
        /// Stop everything the server runs
        #[arg(long, conflicts_with = "names")]
        all: bool,
    },
    /// Print the URL of an instance
    Url { name: String },
    /// Print roster changes as they happen
    Watch,
    /// Check config and server connectivity
    Doctor,
}

fn load_config(cli: &Cli) -> Result<(Option<PathBuf>, TbdeckConfig), String> {
    let (path, config) = match &cli.config {
        Some(path) => {
            let config = TbdeckConfig::load(path).map_err(|e| e.to_string())?;
            (Some(path.clone()), config)
        }
        None => {
            let cwd = std::env::current_dir().unwrap_or_default();
            TbdeckConfig::discover(&cwd).map_err(|e| e.to_string())?
        }
    };
    Ok((path, apply_overrides(cli, config)?))
}

/// Command-line flags win over the file
fn apply_overrides(cli: &Cli, mut config: TbdeckConfig) -> Result<TbdeckConfig, String> {
    if let Some(url) = &cli.url {
        config.server.base_url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.server.token = Some(token.clone());
    }
    if let Some(ms) = cli.interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(Commands::Start {
        reload_interval: Some(secs),
        ..
    }) = &cli.command
    {
        config.reload_interval = Some(*secs);
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn build_control_plane(demo: bool, config: &TbdeckConfig) -> Result<Arc<dyn ControlPlane>, String> {
    if demo {
        let fake = demo::demo_control_plane();
        demo::spawn_activity(fake.clone(), Duration::from_secs(5));
        let control_plane: Arc<dyn ControlPlane> = fake;
        return Ok(control_plane);
    }
    let http = HttpControlPlane::new(&config.server, config.reload_interval).map_err(|e| e.to_string())?;
    Ok(Arc::new(http))
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();

    let interactive = matches!(cli.command, None | Some(Commands::Tui));
    let (config_path, config) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => fail(e),
    };

    let log_target = match (&config.log_file, interactive) {
        (Some(path), true) => LogTarget::File(path.clone()),
        (None, true) => LogTarget::Discard,
        (_, false) => LogTarget::Stderr,
    };
    logging::init(log_target, cli.verbose);
    tracing::debug!(config = ?config_path, base_url = %config.server.base_url, "config loaded");

    if let Some(Commands::Doctor) = cli.command {
        return match commands::run_doctor(config_path.as_deref(), &config).await {
            Ok(()) => Ok(()),
            Err(e) => fail(e),
        };
    }

    let control_plane = match build_control_plane(cli.demo, &config) {
        Ok(cp) => cp,
        Err(e) => fail(e),
    };
    let server = if cli.demo {
        "demo (in-memory)".to_string()
    } else {
        config.server.base_url.clone()
    };

    if interactive {
        let manager = Manager::start(control_plane, config.manager_options());
        return tui::run_tui(manager, server).await;
    }

    let manager = Manager::new(control_plane, config.manager_options());
    let result = match &cli.command {
        Some(Commands::List) => commands::run_list(&manager).await,
        Some(Commands::Start { logdir, .. }) => commands::run_start(&manager, logdir).await,
        Some(Commands::Stop { names, all }) => commands::run_stop(&manager, names, *all).await,
        Some(Commands::Url { name }) => commands::run_url(&manager, name).await,
        Some(Commands::Watch) => commands::run_watch(&manager).await,
        Some(Commands::Tui) | Some(Commands::Doctor) | None => Ok(()),
    };
    manager.dispose();

    match result {
        Ok(()) => Ok(()),
        Err(e) => fail(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["tbdeck", "stop", "1", "2", "--url", "http://h:1/"]);
        assert!(matches!(cli.command, Some(Commands::Stop { ref names, all: false }) if names.len() == 2));
        assert_eq!(cli.url.as_deref(), Some("http://h:1/"));

        let cli = Cli::parse_from(["tbdeck", "stop", "--all"]);
        assert!(matches!(cli.command, Some(Commands::Stop { all: true, .. })));

        assert!(Cli::try_parse_from(["tbdeck", "stop"]).is_err());
        assert!(Cli::try_parse_from(["tbdeck", "stop", "1", "--all"]).is_err());

        let cli = Cli::parse_from(["tbdeck"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "tbdeck",
            "--config",
            "/definitely/not/here/tbdeck.yml",
            "list",
        ]);
        assert!(load_config(&cli).is_err());

        let cli = Cli::parse_from([
            "tbdeck",
            "start",
            "/runs",
            "--reload-interval",
            "5",
            "--interval-ms",
            "250",
            "--url",
            "https://lab.example.com/",
            "--token",
            "t",
        ]);
        let config = apply_overrides(&cli, TbdeckConfig::default()).unwrap();
        assert_eq!(config.server.base_url, "https://lab.example.com/");
        assert_eq!(config.server.token.as_deref(), Some("t"));
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.reload_interval, Some(5));

        let cli = Cli::parse_from(["tbdeck", "list", "--interval-ms", "0"]);
        assert!(apply_overrides(&cli, TbdeckConfig::default()).is_err());
    }
}

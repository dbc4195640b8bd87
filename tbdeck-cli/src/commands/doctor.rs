use std::path::Path;
use std::time::Instant;

use tbdeck_core::config::TbdeckConfig;
use tbdeck_core::control_plane::{ControlPlane, ControlPlaneError};

use crate::client::HttpControlPlane;

#[derive(Debug)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub hint: Option<String>,
}

impl Check {
    fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            hint: None,
        }
    }

    fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Check the config and that the server answers the list endpoint
pub async fn run_doctor(config_path: Option<&Path>, config: &TbdeckConfig) -> Result<(), String> {
    println!("tbdeck doctor\n");

    let mut checks = vec![check_config(config_path), check_token(config)];
    checks.push(check_server(config).await);

    for check in &checks {
        print_check(check);
    }
    println!();

    let failed: Vec<_> = checks.iter().filter(|c| !c.passed).collect();
    if failed.is_empty() {
        println!("All checks passed!");
        Ok(())
    } else {
        Err(format!("{} check(s) failed", failed.len()))
    }
}

fn print_check(check: &Check) {
    let icon = if check.passed { "✓" } else { "✗" };
    let color = if check.passed { "\x1b[32m" } else { "\x1b[31m" };
    let reset = "\x1b[0m";

    println!(
        "  {}{}{} {}: {}",
        color, icon, reset, check.name, check.message
    );

    if let Some(hint) = &check.hint {
        println!("    └─ {}", hint);
    }
}

fn check_config(path: Option<&Path>) -> Check {
    match path {
        Some(path) => Check::ok("config", path.display().to_string()),
        None => Check::ok("config", "none found, using defaults"),
    }
}

fn check_token(config: &TbdeckConfig) -> Check {
    match config.server.token.as_deref() {
        Some(t) if !t.is_empty() => Check::ok("token", "configured"),
        _ => Check::ok("token", "not set").with_hint(
            "servers started with a token reject unauthenticated requests; set server.token or --token",
        ),
    }
}

async fn check_server(config: &TbdeckConfig) -> Check {
    let control_plane = match HttpControlPlane::new(&config.server, config.reload_interval) {
        Ok(cp) => cp,
        Err(e) => return Check::fail("server", e.to_string()),
    };

    let started = Instant::now();
    match control_plane.list_running().await {
        Ok(models) => Check::ok(
            "server",
            format!(
                "{} answered in {} ms, {} instance(s) running",
                config.server.base_url,
                started.elapsed().as_millis(),
                models.len()
            ),
        ),
        Err(ControlPlaneError::Status { status: 403, .. }) => {
            Check::fail("server", "403 Forbidden").with_hint("check server.token")
        }
        Err(ControlPlaneError::Status { status: 404, .. }) => {
            Check::fail("server", "api/tensorboard not found")
                .with_hint("is the tensorboard server extension installed and enabled?")
        }
        Err(e) => Check::fail("server", e.to_string())
            .with_hint(format!("is a notebook server running at {}?", config.server.base_url)),
    }
}

//! Control-plane trait
//!
//! The manager only needs three requests from the server. Implementations
//! decide the transport (HTTP in the CLI, in-memory in `fake`).

use std::fmt;

use async_trait::async_trait;

use crate::model::{InstanceName, Model};

/// Errors returned by a control plane
#[derive(Clone, Debug, PartialEq)]
pub enum ControlPlaneError {
    /// The instance does not exist (HTTP 404 on delete)
    NotFound { name: InstanceName, message: String },
    /// The server answered with an unexpected status
    Status { status: u16, message: String },
    /// The request never produced a response
    Transport { message: String },
    /// The response body could not be understood
    InvalidResponse { message: String },
}

impl fmt::Display for ControlPlaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlPlaneError::NotFound { name, message } => {
                write!(f, "instance not found: {} ({})", name, message)
            }
            ControlPlaneError::Status { status, message } => {
                write!(f, "server returned {}: {}", status, message)
            }
            ControlPlaneError::Transport { message } => write!(f, "transport error: {}", message),
            ControlPlaneError::InvalidResponse { message } => {
                write!(f, "invalid response: {}", message)
            }
        }
    }
}

impl std::error::Error for ControlPlaneError {}

impl ControlPlaneError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlPlaneError::NotFound { .. })
    }
}

/// The requests the manager issues against the server
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Human-readable name of this backend
    fn name(&self) -> &'static str;

    /// List every instance the server currently runs
    async fn list_running(&self) -> Result<Vec<Model>, ControlPlaneError>;

    /// Launch an instance serving `logdir`
    async fn start_new(&self, logdir: &str) -> Result<Model, ControlPlaneError>;

    /// Terminate an instance. Must report a missing instance as `NotFound`.
    async fn shutdown(&self, name: &str) -> Result<(), ControlPlaneError>;

    /// URL at which the instance's own UI is served, if the backend has one
    fn instance_url(&self, name: &str) -> Option<String> {
        let _ = name;
        None
    }
}

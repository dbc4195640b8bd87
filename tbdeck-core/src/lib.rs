pub mod config;
pub mod control_plane;
pub mod instance;
pub mod manager;
pub mod model;
pub mod reconcile;
pub mod signal;

// View adapter for list UIs
pub mod panel;

// In-memory server for demos and tests
pub mod fake;

//! Vigil server: HTTP surface and wiring for the monitoring adapter
//! layer.

pub mod actions;
pub mod app;
pub mod config;
pub mod middleware;
pub mod routes;

pub use app::{build_app, AppState};
pub use config::ServerConfig;

pub mod bridge;
pub mod config;
pub mod web;

use std::sync::Arc;

use crate::bridge::AuthBridge;
use crate::config::Config;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bridge: AuthBridge,
}

//! Background daemon and HTTP control API for a single maintained BLE link.
//!
//! This crate provides a service that:
//! - Keeps one connection cycle running via the tether-core supervisor
//! - Persists the connection target so restarts and reboots resume it
//! - Exposes a REST API for starting, stopping and observing the cycle
//! - Mirrors status events into the log and a queryable ring buffer
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Current state, latest status line and target
//! - `GET /api/events?limit=N` - Recent status events, newest first
//! - `POST /api/start` - Persist a target and begin a connection cycle
//! - `POST /api/stop` - Tear the cycle down and forget the target
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/tether/service.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8737"
//!
//! [storage]
//! path = "~/.local/share/tether/target.json"
//!
//! [link]
//! retry_delay = 5
//! max_attempts = 5        # 0 retries forever
//! on_discovery_failure = "wait"
//! ```

pub mod api;
pub mod config;
pub mod state;
pub mod store;

pub use config::{Config, ConfigError, LinkSettings, ServerConfig, StorageConfig};
pub use state::AppState;
pub use store::{PersistedTarget, TargetStore};

//! Application state shared across handlers.

use std::collections::VecDeque;
use std::sync::Arc;

use tether_core::SupervisorHandle;
use tether_types::{ConnectionTarget, StatusEvent};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::store::TargetStore;

/// How many status events are kept for `/api/events`.
pub const EVENT_BUFFER: usize = 256;

/// Shared application state.
pub struct AppState {
    /// Handle to the connection supervisor.
    pub supervisor: SupervisorHandle,
    /// Target persistence (Mutex serializes save/clear).
    pub store: Mutex<TargetStore>,
    /// Configuration (RwLock for runtime reads).
    pub config: RwLock<Config>,
    /// The target of the current cycle, if any.
    pub target: RwLock<Option<ConnectionTarget>>,
    /// Ring of recent status events, newest last.
    events: RwLock<VecDeque<StatusEvent>>,
}

impl AppState {
    /// Create application state and start the status collector task.
    ///
    /// The collector mirrors the supervisor's status stream into the event
    /// ring and the log, taking the place of a user-visible notification.
    pub fn new(supervisor: SupervisorHandle, store: TargetStore, config: Config) -> Arc<Self> {
        let mut status_rx = supervisor.subscribe_status();
        let state = Arc::new(Self {
            supervisor,
            store: Mutex::new(store),
            config: RwLock::new(config),
            target: RwLock::new(None),
            events: RwLock::new(VecDeque::with_capacity(EVENT_BUFFER)),
        });

        let collector_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                match status_rx.recv().await {
                    Ok(event) => {
                        info!(state = %event.state, "{}", event.message);
                        collector_state.push_event(event).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Status collector lagged, skipped {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        state
    }

    async fn push_event(&self, event: StatusEvent) {
        let mut events = self.events.write().await;
        if events.len() == EVENT_BUFFER {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// The most recent status events, newest first, at most `limit`.
    pub async fn recent_events(&self, limit: usize) -> Vec<StatusEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }
}

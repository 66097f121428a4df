//! System service integration: install, lifecycle, and liveness.
//!
//! An installed service autostarts at boot, which is what resumes the
//! persisted target after a restart. The manager also restarts the daemon
//! if it dies, so the maintained link comes back without anyone asking.
//!
//! Status is answered by probing the daemon's own health endpoint rather
//! than by poking the service manager: the probe is read-only, so asking
//! "is it running" can never disturb a link the daemon is maintaining.

use std::env;
use std::ffi::OsString;
use std::time::Duration;

use serde::Deserialize;
use service_manager::{
    RestartPolicy, ServiceInstallCtx, ServiceLabel, ServiceLevel, ServiceManager, ServiceStartCtx,
    ServiceStopCtx, ServiceUninstallCtx,
};
use thiserror::Error;

const SERVICE_LABEL: &str = "rs.tether.service";

/// How long the liveness probe waits for the daemon to answer.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors from service management.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No service manager available on this platform")]
    NoServiceManager,

    #[error("User-level services not supported on this platform")]
    UserLevelNotSupported,

    #[error("Could not find the tether-service executable")]
    ExecutableNotFound,

    #[error("Service manager error: {0}")]
    Manager(String),
}

/// Service management level.
#[derive(Debug, Clone, Copy, Default)]
pub enum Level {
    /// System-level service (requires root/admin).
    #[default]
    System,
    /// User-level service (no elevated privileges needed).
    User,
}

/// The platform's native service manager, scoped to the tether label.
pub struct Control {
    manager: Box<dyn ServiceManager>,
    label: ServiceLabel,
}

impl Control {
    /// Open the native service manager at the requested level.
    pub fn new(level: Level) -> Result<Self, ServiceError> {
        let mut manager =
            <dyn ServiceManager>::native().map_err(|_| ServiceError::NoServiceManager)?;
        let service_level = match level {
            Level::System => ServiceLevel::System,
            Level::User => ServiceLevel::User,
        };
        manager
            .set_level(service_level)
            .map_err(|_| ServiceError::UserLevelNotSupported)?;
        let label = SERVICE_LABEL
            .parse()
            .map_err(|e| ServiceError::Manager(format!("invalid service label: {e}")))?;
        Ok(Self { manager, label })
    }

    /// Register the daemon so it starts at boot and restarts on failure.
    pub fn install(&self) -> Result<(), ServiceError> {
        let program = env::current_exe().map_err(|_| ServiceError::ExecutableNotFound)?;
        self.manager
            .install(ServiceInstallCtx {
                label: self.label.clone(),
                program,
                args: vec![OsString::from("run")],
                contents: None,
                username: None,
                working_directory: None,
                environment: None,
                autostart: true,
                restart_policy: RestartPolicy::OnFailure {
                    delay_secs: Some(5),
                },
            })
            .map_err(|e| ServiceError::Manager(e.to_string()))
    }

    /// Remove the registration.
    pub fn uninstall(&self) -> Result<(), ServiceError> {
        self.manager
            .uninstall(ServiceUninstallCtx {
                label: self.label.clone(),
            })
            .map_err(|e| ServiceError::Manager(e.to_string()))
    }

    /// Start the registered service.
    pub fn start(&self) -> Result<(), ServiceError> {
        self.manager
            .start(ServiceStartCtx {
                label: self.label.clone(),
            })
            .map_err(|e| ServiceError::Manager(e.to_string()))
    }

    /// Stop the registered service.
    pub fn stop(&self) -> Result<(), ServiceError> {
        self.manager
            .stop(ServiceStopCtx {
                label: self.label.clone(),
            })
            .map_err(|e| ServiceError::Manager(e.to_string()))
    }
}

/// What the daemon's health endpoint answers with.
#[derive(Debug, Deserialize)]
struct HealthAnswer {
    status: String,
    version: String,
}

/// Liveness of the daemon behind `bind`.
#[derive(Debug, Clone)]
pub enum Liveness {
    /// The daemon answered its health endpoint.
    Running {
        /// Version the daemon reported.
        version: String,
    },
    /// Nothing answered within the probe timeout.
    Unreachable,
}

/// Probe the daemon's health endpoint at `bind`.
pub async fn probe(bind: &str) -> Liveness {
    let url = format!("http://{bind}/api/health");
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return Liveness::Unreachable,
    };
    match client.get(&url).send().await {
        Ok(response) => match response.json::<HealthAnswer>().await {
            Ok(answer) if answer.status == "ok" => Liveness::Running {
                version: answer.version,
            },
            _ => Liveness::Unreachable,
        },
        Err(_) => Liveness::Unreachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use tether_core::mock::MockLink;
    use tether_core::{ReconnectPolicy, link_channel, spawn};
    use tether_service::{AppState, Config, TargetStore, api};

    async fn serve_daemon() -> (String, tempfile::TempDir) {
        let (tx, rx) = link_channel();
        let (driver, _mock) = MockLink::new(tx);
        let supervisor = spawn(Box::new(driver), rx, ReconnectPolicy::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = TargetStore::new(dir.path().join("target.json"));
        let state = AppState::new(supervisor, store, Config::default());
        let app = Router::new().merge(api::router()).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr.to_string(), dir)
    }

    #[tokio::test]
    async fn probe_reports_running_daemon() {
        let (bind, _dir) = serve_daemon().await;
        match probe(&bind).await {
            Liveness::Running { version } => assert_eq!(version, env!("CARGO_PKG_VERSION")),
            Liveness::Unreachable => panic!("daemon should be reachable"),
        }
    }

    #[tokio::test]
    async fn probe_reports_unreachable_daemon() {
        // Grab a free port and release it so nothing is listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            probe(&addr.to_string()).await,
            Liveness::Unreachable
        ));
    }
}

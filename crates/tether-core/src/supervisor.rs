//! The connection supervisor.
//!
//! A single owner task holds the entire connection state machine: the
//! current [`ConnectionState`], the target, the retry counter and the only
//! live link handle. Everything else talks to it through channels, so no
//! state is ever shared and no transition can race another.
//!
//! Event handling is strictly ordered: commands first, then the backoff
//! timer, then link events. A `stop` that is queued when the backoff timer
//! fires wins, and the retry it would have started never happens.

use tether_types::{ConnectionState, ConnectionTarget, StatusEvent, hex_string};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::events::{StatusDispatcher, StatusReceiver};
use crate::link::{LinkDriver, LinkEvent, LinkEventReceiver, LinkSignal};
use crate::policy::{DiscoveryFailurePolicy, ReconnectPolicy, RetryDecision};

/// Commands accepted by the supervisor task.
#[derive(Debug)]
enum Command {
    /// Begin (or restart) a connection cycle for this target.
    Start(ConnectionTarget),
    /// Tear the cycle down and return to `Idle`.
    Stop,
    /// Stop and exit the task.
    Shutdown,
}

/// Handle to a running supervisor task.
///
/// Cheap to clone pieces are exposed individually; dropping the handle does
/// not stop the task, call [`SupervisorHandle::shutdown`] for that.
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    status_rx: watch::Receiver<StatusEvent>,
    dispatcher: StatusDispatcher,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Start a connection cycle for `target`.
    ///
    /// From `Idle` or `Failed` this begins a fresh cycle with the retry
    /// counter at zero. While a cycle is already running the command is a
    /// no-op that re-emits the current status; the live link is kept and
    /// no second handle is ever opened.
    pub async fn start(&self, target: ConnectionTarget) -> Result<()> {
        self.commands
            .send(Command::Start(target))
            .await
            .map_err(|_| Error::Cancelled)
    }

    /// Stop the current cycle and return to `Idle`.
    ///
    /// Takes precedence over a pending backoff timer: once observed, no
    /// further retry will fire.
    pub async fn stop(&self) -> Result<()> {
        self.commands
            .send(Command::Stop)
            .await
            .map_err(|_| Error::Cancelled)
    }

    /// Current state of the machine.
    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    /// Most recent status event, including its message.
    pub fn latest_status(&self) -> StatusEvent {
        self.status_rx.borrow().clone()
    }

    /// Watch channel that tracks the latest status.
    pub fn watch_status(&self) -> watch::Receiver<StatusEvent> {
        self.status_rx.clone()
    }

    /// Subscribe to the full status event stream.
    pub fn subscribe_status(&self) -> StatusReceiver {
        self.dispatcher.subscribe()
    }

    /// Stop the cycle and wait for the supervisor task to exit.
    pub async fn shutdown(self) -> Result<()> {
        // The task may already be gone; join below reports that.
        let _ = self.commands.send(Command::Shutdown).await;
        self.task
            .await
            .map_err(|e| Error::InvalidConfig(format!("supervisor task panicked: {e}")))
    }
}

/// Spawn a supervisor driving `driver`, reading completions from `link_rx`.
pub fn spawn(
    driver: Box<dyn LinkDriver>,
    link_rx: LinkEventReceiver,
    policy: ReconnectPolicy,
) -> Result<SupervisorHandle> {
    policy.validate()?;

    let dispatcher = StatusDispatcher::default();
    let (status_tx, status_rx) =
        watch::channel(StatusEvent::now(ConnectionState::Idle, "Service stopped"));
    let (commands_tx, commands_rx) = mpsc::channel(16);

    let supervisor = Supervisor {
        driver,
        link_rx,
        policy,
        dispatcher: dispatcher.clone(),
        status_tx,
        state: ConnectionState::Idle,
        target: None,
        generation: 0,
        attempt: 0,
        backoff_deadline: None,
    };
    let task = tokio::spawn(supervisor.run(commands_rx));

    Ok(SupervisorHandle {
        commands: commands_tx,
        status_rx,
        dispatcher,
        task,
    })
}

struct Supervisor {
    driver: Box<dyn LinkDriver>,
    link_rx: LinkEventReceiver,
    policy: ReconnectPolicy,
    dispatcher: StatusDispatcher,
    status_tx: watch::Sender<StatusEvent>,
    state: ConnectionState,
    target: Option<ConnectionTarget>,
    /// Bumped for every new link handle and on stop. Signals carrying an
    /// older generation are dropped unread.
    generation: u64,
    /// Consecutive failed attempts in the current cycle. Only an entry
    /// into `Active` resets it; a cycle that keeps failing before getting
    /// there keeps counting toward the policy's budget.
    attempt: u32,
    backoff_deadline: Option<tokio::time::Instant>,
}

impl Supervisor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Connection supervisor started");
        loop {
            let backoff = async {
                match self.backoff_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                // Commands outrank the backoff timer and link events.
                biased;

                command = commands.recv() => match command {
                    Some(Command::Start(target)) => self.handle_start(target).await,
                    Some(Command::Stop) => self.handle_stop().await,
                    Some(Command::Shutdown) | None => {
                        self.handle_stop().await;
                        break;
                    }
                },
                _ = backoff => self.handle_backoff_expired().await,
                signal = self.link_rx.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        warn!("Link event channel closed; supervisor exiting");
                        break;
                    }
                },
            }
        }
        info!("Connection supervisor stopped");
    }

    /// Record a transition and emit its status event.
    fn transition(&mut self, state: ConnectionState, message: impl Into<String>) {
        let message = message.into();
        debug!(from = %self.state, to = %state, %message, "transition");
        self.state = state;
        let event = StatusEvent::now(state, message);
        self.status_tx.send_replace(event.clone());
        self.dispatcher.emit(event);
    }

    /// Emit a status observation without changing state.
    fn report(&self, message: impl Into<String>) {
        let event = StatusEvent::now(self.state, message);
        self.status_tx.send_replace(event.clone());
        self.dispatcher.emit(event);
    }

    fn address(&self) -> &str {
        self.target.as_ref().map_or("<none>", |t| t.address.as_str())
    }

    async fn handle_start(&mut self, target: ConnectionTarget) {
        if self.state.is_running() {
            // A cycle is already underway; acknowledge without touching
            // the live link.
            info!(state = %self.state, "Start requested while running; keeping current cycle");
            let message = self.status_tx.borrow().message.clone();
            self.report(message);
            return;
        }
        info!(target = %target, "Start requested");
        self.invalidate_link().await;
        self.attempt = 0;
        self.backoff_deadline = None;
        self.target = Some(target);
        self.begin_connect().await;
    }

    async fn handle_stop(&mut self) {
        info!("Stop requested");
        self.invalidate_link().await;
        self.backoff_deadline = None;
        self.target = None;
        self.attempt = 0;
        if self.state != ConnectionState::Idle {
            self.transition(ConnectionState::Idle, "Service stopped");
        }
    }

    /// Release the link handle and bump the generation so that any event
    /// already queued by the old handle is ignored.
    async fn invalidate_link(&mut self) {
        self.generation += 1;
        self.driver.release().await;
    }

    async fn begin_connect(&mut self) {
        let Some(target) = self.target.clone() else {
            return;
        };
        self.generation += 1;
        self.transition(
            ConnectionState::Connecting,
            format!("Connecting to {}", target.address),
        );
        self.driver.connect(&target.address, self.generation).await;
    }

    async fn handle_backoff_expired(&mut self) {
        self.backoff_deadline = None;
        let ConnectionState::Backoff { attempt } = self.state else {
            return;
        };
        match self.policy.decide(attempt + 1) {
            RetryDecision::Retry(_) => self.begin_connect().await,
            RetryDecision::GiveUp => {
                let error = Error::MaxAttemptsExceeded { attempts: attempt };
                let address = self.address().to_string();
                warn!(%address, %error, "Reconnect policy gave up");
                self.invalidate_link().await;
                self.transition(ConnectionState::Failed, format!("Gave up on {address}: {error}"));
            }
        }
    }

    /// A recoverable failure: count it and wait out one backoff period.
    async fn handle_recoverable_failure(&mut self) {
        self.invalidate_link().await;
        self.attempt += 1;
        let attempt = self.attempt;
        let delay = self.policy.backoff_delay();
        self.backoff_deadline = Some(tokio::time::Instant::now() + delay);
        self.transition(
            ConnectionState::Backoff { attempt },
            format!(
                "Reconnecting to {} in {delay:?} (attempt {attempt})",
                self.address()
            ),
        );
    }

    async fn handle_fatal(&mut self, message: String) {
        self.invalidate_link().await;
        self.backoff_deadline = None;
        self.transition(ConnectionState::Failed, message);
    }

    async fn handle_signal(&mut self, signal: LinkSignal) {
        if signal.generation != self.generation {
            trace!(
                generation = signal.generation,
                current = self.generation,
                "Dropping stale link event"
            );
            return;
        }
        if !self.state.is_running() {
            trace!(state = %self.state, "Dropping link event outside a cycle");
            return;
        }

        match (self.state, signal.event) {
            (ConnectionState::Connecting, LinkEvent::Connected) => {
                self.transition(
                    ConnectionState::Discovering,
                    format!("Connected to {}", self.address()),
                );
                self.driver.discover_services(self.generation).await;
            }
            (ConnectionState::Connecting, LinkEvent::ConnectFailed { error }) => {
                warn!(address = %self.address(), %error, "Connect attempt failed");
                if error.is_recoverable() {
                    self.handle_recoverable_failure().await;
                } else {
                    self.handle_fatal("Bluetooth unavailable".to_string()).await;
                }
            }
            (ConnectionState::Discovering, LinkEvent::ServicesDiscovered) => {
                match self.target.as_ref().and_then(|t| t.subscription) {
                    Some(subscription) => {
                        self.transition(
                            ConnectionState::Subscribing,
                            format!(
                                "Enabling notifications on {}",
                                subscription.characteristic
                            ),
                        );
                        self.driver
                            .subscribe(
                                subscription.service,
                                subscription.characteristic,
                                self.generation,
                            )
                            .await;
                    }
                    None => {
                        self.attempt = 0;
                        self.transition(
                            ConnectionState::Active,
                            format!("Connected to {}", self.address()),
                        );
                    }
                }
            }
            (ConnectionState::Discovering, LinkEvent::DiscoveryFailed { error }) => {
                warn!(address = %self.address(), %error, "Service discovery failed");
                match self.policy.on_discovery_failure {
                    DiscoveryFailurePolicy::LogAndWait => {
                        self.report(error.to_string());
                    }
                    DiscoveryFailurePolicy::DropAndRetry => {
                        self.handle_recoverable_failure().await;
                    }
                }
            }
            (ConnectionState::Subscribing, LinkEvent::Subscribed) => {
                self.attempt = 0;
                self.transition(
                    ConnectionState::Active,
                    format!("Receiving data from {}", self.address()),
                );
            }
            (ConnectionState::Subscribing, LinkEvent::SubscribeFailed { error }) => {
                // The link is still worth keeping without notifications.
                warn!(address = %self.address(), %error, "Subscribe failed; staying connected");
                self.attempt = 0;
                self.transition(
                    ConnectionState::Active,
                    format!("Connected to {} (notifications unavailable)", self.address()),
                );
            }
            (
                ConnectionState::Discovering
                | ConnectionState::Subscribing
                | ConnectionState::Active,
                LinkEvent::Disconnected,
            ) => {
                let address = self.address().to_string();
                self.transition(
                    ConnectionState::Disconnected,
                    format!("Disconnected from {address}"),
                );
                self.handle_recoverable_failure().await;
            }
            (ConnectionState::Active, LinkEvent::Notification { value }) => {
                self.report(format!("Data from {}: {}", self.address(), hex_string(&value)));
            }
            (state, event) => {
                debug!(%state, ?event, "Ignoring link event in this state");
            }
        }
    }
}

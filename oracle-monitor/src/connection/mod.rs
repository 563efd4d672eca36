//! Transport selection for the oracle feed.
//!
//! The [`ConnectionManager`] keeps exactly one transport active: the push channel while it
//! is healthy, fixed-interval polling once reconnection has failed too many times. Feed
//! bundles from either transport leave through the same channel, and transport errors only
//! ever surface as [`ConnectionState`] transitions.

use crate::{
    config::ConnectionConfig,
    error::MonitorError,
    types::{FeedBundle, PushMessage},
};
use std::{future::Future, sync::Arc};
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
    time::{Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

mod state;
mod transport;

pub use state::{ConnectionMachine, ConnectionState};
pub use transport::{FeedTransport, PushSession, WsPollTransport};

/// Everything the consumer hears from the [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    State(ConnectionState),
    Feed(FeedBundle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionCommand {
    Refresh,
    Shutdown,
}

/// Control handle of a running [`ConnectionManager`].
#[derive(Debug)]
pub struct ConnectionHandle {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Fetch a snapshot immediately when polling; no-op on the push channel.
    pub fn refresh(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Refresh);
    }

    /// Stop the manager and wait for it to finish. The event channel closes afterwards.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
        if let Err(error) = self.task.await {
            warn!(%error, "connection manager task failed");
        }
    }
}

pub struct ConnectionManager<T> {
    transport: Arc<T>,
    config: ConnectionConfig,
}

impl<T> ConnectionManager<T>
where
    T: FeedTransport,
{
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
        }
    }

    /// Spawn the manager task.
    ///
    /// Returns the receiver of [`ConnectionEvent`]s and the handle controlling the task.
    pub fn start(self) -> (mpsc::Receiver<ConnectionEvent>, ConnectionHandle) {
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_buffer_size);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine: ConnectionMachine::new(self.config.max_reconnect_attempts),
            transport: self.transport,
            config: self.config,
            event_tx,
            command_rx,
        };
        let task = tokio::spawn(driver.run());

        (event_rx, ConnectionHandle { command_tx, task })
    }
}

enum Attempt {
    Connected(PushSession),
    Failed,
    Stop,
}

enum SessionEnd {
    Lost(MonitorError),
    Stop,
}

struct Driver<T> {
    transport: Arc<T>,
    config: ConnectionConfig,
    machine: ConnectionMachine,
    event_tx: mpsc::Sender<ConnectionEvent>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
}

impl<T> Driver<T>
where
    T: FeedTransport,
{
    async fn run(mut self) {
        info!(
            max_reconnect_attempts = self.config.max_reconnect_attempts,
            "starting connection manager"
        );
        if !self.emit(ConnectionEvent::State(self.machine.state())).await {
            return;
        }

        loop {
            let session = match self.machine.state() {
                ConnectionState::Connecting => match self.attempt_connect().await {
                    Attempt::Connected(session) => session,
                    Attempt::Failed => {
                        if self.transition(ConnectionMachine::on_failure).await {
                            continue;
                        }
                        break;
                    }
                    Attempt::Stop => break,
                },
                ConnectionState::Reconnecting { attempt } => {
                    let delay = tokio::time::sleep(self.config.retry_delay);
                    if interruptible(&mut self.command_rx, delay).await.is_none() {
                        break;
                    }
                    debug!(attempt, "reconnecting push channel");
                    match self.attempt_connect().await {
                        Attempt::Connected(session) => session,
                        Attempt::Failed => {
                            if self.transition(ConnectionMachine::on_failure).await {
                                continue;
                            }
                            break;
                        }
                        Attempt::Stop => break,
                    }
                }
                ConnectionState::PollingFallback => match self.poll_fallback().await {
                    Some(session) => session,
                    None => break,
                },
                ConnectionState::Connected => {
                    // Only reachable if a session ended without a transition
                    if self.transition(ConnectionMachine::on_failure).await {
                        continue;
                    }
                    break;
                }
            };

            if !self.transition(ConnectionMachine::on_connected).await {
                break;
            }

            match self.run_session(session).await {
                SessionEnd::Lost(error) => {
                    warn!(%error, "push channel lost");
                    if !self.transition(ConnectionMachine::on_failure).await {
                        break;
                    }
                }
                SessionEnd::Stop => break,
            }
        }

        info!("connection manager stopped");
    }

    /// Deliver an event; `false` once the consumer is gone.
    async fn emit(&self, event: ConnectionEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }

    async fn transition(&mut self, apply: fn(&mut ConnectionMachine) -> ConnectionState) -> bool {
        let from = self.machine.state();
        let to = apply(&mut self.machine);
        if from == to {
            return true;
        }
        info!(%from, %to, "connection state changed");
        self.emit(ConnectionEvent::State(to)).await
    }

    async fn attempt_connect(&mut self) -> Attempt {
        match interruptible(&mut self.command_rx, self.transport.connect()).await {
            Some(Ok(session)) => Attempt::Connected(session),
            Some(Err(error)) => {
                warn!(%error, "push channel handshake failed");
                Attempt::Failed
            }
            None => Attempt::Stop,
        }
    }

    async fn run_session(&mut self, mut session: PushSession) -> SessionEnd {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(ConnectionCommand::Refresh) => {
                        debug!("refresh ignored, push channel is live");
                    }
                    Some(ConnectionCommand::Shutdown) | None => return SessionEnd::Stop,
                },
                message = session.next() => match message {
                    Some(Ok(PushMessage::PriceUpdate(bundle))) => {
                        if !self.emit(ConnectionEvent::Feed(bundle)).await {
                            return SessionEnd::Stop;
                        }
                    }
                    Some(Ok(PushMessage::Welcome { message })) => {
                        debug!(?message, "push channel welcome");
                    }
                    Some(Ok(PushMessage::Status { connected })) => {
                        debug!(?connected, "push channel status");
                    }
                    Some(Err(error)) if error.is_disconnect() => return SessionEnd::Lost(error),
                    Some(Err(error)) => {
                        warn!(%error, "ignoring unreadable push message");
                    }
                    None => return SessionEnd::Lost(MonitorError::ChannelClosed),
                },
            }
        }
    }

    /// Poll until shutdown (`None`) or until a reconnection probe yields a session.
    async fn poll_fallback(&mut self) -> Option<PushSession> {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut probe = self.config.probe_interval.map(|period| {
            let mut probe = tokio::time::interval_at(Instant::now() + period, period);
            probe.set_missed_tick_behavior(MissedTickBehavior::Skip);
            probe
        });
        match &probe {
            Some(_) => info!(poll_interval = ?self.config.poll_interval, "polling with reconnection probe"),
            None => info!(poll_interval = ?self.config.poll_interval, "polling indefinitely, probe disabled"),
        }

        let (fetch_tx, mut fetch_rx) = mpsc::unbounded_channel();
        let mut probe_task: Option<JoinHandle<Result<PushSession, MonitorError>>> = None;

        loop {
            let probing = probe_task.is_some();
            tokio::select! {
                _ = poll.tick() => self.spawn_fetch(&fetch_tx),
                Some(result) = fetch_rx.recv() => match result {
                    Ok(bundle) => {
                        if !self.emit(ConnectionEvent::Feed(bundle)).await {
                            abort_probe(&mut probe_task);
                            return None;
                        }
                    }
                    Err(error) => warn!(%error, "fallback poll failed"),
                },
                _ = tick_probe(&mut probe), if !probing => {
                    debug!("probing push channel");
                    let transport = Arc::clone(&self.transport);
                    probe_task = Some(tokio::spawn(async move { transport.connect().await }));
                }
                joined = join_probe(&mut probe_task), if probing => {
                    probe_task = None;
                    match joined {
                        Ok(Ok(session)) => {
                            info!("push channel probe succeeded, leaving fallback");
                            return Some(session);
                        }
                        Ok(Err(error)) => debug!(%error, "push channel probe failed"),
                        Err(error) => warn!(%error, "push channel probe task failed"),
                    }
                }
                command = self.command_rx.recv() => match command {
                    Some(ConnectionCommand::Refresh) => self.spawn_fetch(&fetch_tx),
                    Some(ConnectionCommand::Shutdown) | None => {
                        abort_probe(&mut probe_task);
                        return None;
                    }
                },
            }
        }
    }

    fn spawn_fetch(&self, fetch_tx: &mpsc::UnboundedSender<Result<FeedBundle, MonitorError>>) {
        let transport = Arc::clone(&self.transport);
        let fetch_tx = fetch_tx.clone();
        tokio::spawn(async move {
            let _ = fetch_tx.send(transport.fetch_snapshot().await);
        });
    }
}

/// Await `future` while servicing commands. `None` means shutdown was requested.
async fn interruptible<F>(
    command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    future: F,
) -> Option<F::Output>
where
    F: Future,
{
    tokio::pin!(future);
    loop {
        tokio::select! {
            output = &mut future => return Some(output),
            command = command_rx.recv() => match command {
                Some(ConnectionCommand::Refresh) => debug!("refresh ignored while connecting"),
                Some(ConnectionCommand::Shutdown) | None => return None,
            },
        }
    }
}

async fn tick_probe(probe: &mut Option<Interval>) {
    match probe {
        Some(probe) => {
            probe.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn join_probe<O>(task: &mut Option<JoinHandle<O>>) -> Result<O, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

fn abort_probe<O>(task: &mut Option<JoinHandle<O>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}

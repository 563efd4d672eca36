//! The application-state object.
//!
//! A [`Dashboard`] owns every piece of mutable state (parameters, overrides, latest feed,
//! chart, theme) and is driven by a single task reacting to connection events, operator
//! commands and completions of its own background requests. The renderer only ever sees
//! immutable [`DashboardFrame`]s published on a `watch` channel.

use crate::{
    api::ApiClient,
    chart::ChartWindow,
    config::MonitorConfig,
    connection::{
        ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, FeedTransport,
        WsPollTransport,
    },
    error::MonitorError,
    overrides::OverrideManager,
    params::{ParameterSet, ParameterStore},
    persist::{FileStore, KeyValueStore, load_dark_mode, save_dark_mode},
    reducer::{DashboardLayout, FeedGate, ViewModel, reduce},
    sync::{SyncStatus, spawn_sync},
    types::{AggregationMethod, FeedBundle, SourceId, WeightCategory},
};
use std::{collections::HashSet, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Operator intent emitted by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    SetWeight {
        category: WeightCategory,
        source: SourceId,
        value: f64,
    },
    SetAggregationMethod(AggregationMethod),
    EditOverride {
        source: SourceId,
        text: String,
    },
    /// Commit the edit buffer of `source`
    CommitOverride {
        source: SourceId,
    },
    ClearOverride {
        source: SourceId,
    },
    CancelEdit {
        source: SourceId,
    },
    ToggleTheme,
    Refresh,
    Shutdown,
}

/// Everything the renderer needs to draw one screen.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardFrame {
    pub view: ViewModel,
    pub chart: ChartWindow,
    pub connection: ConnectionState,
    pub sync: SyncStatus,
    pub dark_mode: bool,
}

/// Completions of background requests, fed back into the dashboard loop.
#[derive(Debug)]
enum Internal {
    ManualSeed {
        source: SourceId,
        price: Option<f64>,
    },
    OverridePosted {
        source: SourceId,
    },
}

/// Handle held by the renderer.
#[derive(Debug)]
pub struct DashboardHandle {
    frames: watch::Receiver<DashboardFrame>,
    commands: mpsc::Sender<UiCommand>,
    task: JoinHandle<()>,
}

impl DashboardHandle {
    pub fn frames(&self) -> watch::Receiver<DashboardFrame> {
        self.frames.clone()
    }

    /// Latest published frame.
    pub fn frame(&self) -> DashboardFrame {
        self.frames.borrow().clone()
    }

    /// Queue a command without blocking; `false` if it could not be queued.
    pub fn send(&self, command: UiCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "dropping operator command");
                false
            }
        }
    }

    /// Stop the dashboard and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(UiCommand::Shutdown).await;
        if let Err(error) = self.task.await {
            warn!(%error, "dashboard task failed");
        }
    }
}

#[derive(Debug)]
pub struct Dashboard {
    config: MonitorConfig,
    layout: DashboardLayout,
    api: ApiClient,
    params: ParameterStore,
    overrides: OverrideManager,
    /// Overrides the operator touched this session; server seeds no longer apply to them
    touched: HashSet<SourceId>,
    gate: FeedGate,
    feed: Option<FeedBundle>,
    chart: ChartWindow,
    connection: ConnectionState,
    dark_mode: bool,
}

impl Dashboard {
    /// Build the dashboard, restoring persisted parameters, overrides and theme.
    pub fn new(
        config: MonitorConfig,
        api: ApiClient,
        storage: Box<dyn KeyValueStore + Send>,
    ) -> Self {
        let layout = DashboardLayout::from_config(&config);

        let mut params = ParameterStore::new(ParameterSet::defaults(&config.sources), storage);
        params.load();

        let mut overrides = OverrideManager::new(layout.override_slots.iter().cloned());
        for slot in &layout.override_slots {
            overrides.seed(slot, params.params().manual_price(slot));
        }

        let dark_mode = load_dark_mode(params.storage());
        let chart = ChartWindow::new(&config.chart);

        Self {
            config,
            layout,
            api,
            params,
            overrides,
            touched: HashSet::new(),
            gate: FeedGate::default(),
            feed: None,
            chart,
            connection: ConnectionState::Connecting,
            dark_mode,
        }
    }

    pub fn frame(&self, sync: SyncStatus) -> DashboardFrame {
        DashboardFrame {
            view: reduce(
                self.feed.as_ref(),
                self.params.params(),
                &self.overrides,
                &self.layout,
            ),
            chart: self.chart.clone(),
            connection: self.connection,
            sync,
            dark_mode: self.dark_mode,
        }
    }

    /// Start the connection manager, the sync worker and the dashboard loop.
    pub fn launch<T>(mut self, transport: T) -> DashboardHandle
    where
        T: FeedTransport,
    {
        let (sync_handle, sync_task) = spawn_sync(Arc::new(self.api.clone()), self.config.sync.clone());
        let sync_status = sync_handle.status();
        self.params.attach_sync(sync_handle);

        let (events, connection) =
            ConnectionManager::new(transport, self.config.connection.clone()).start();

        let (frame_tx, frames) = watch::channel(self.frame(*sync_status.borrow()));
        let (commands, command_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        self.seed_from_server(&internal_tx);

        let task = tokio::spawn(async move {
            let links = Links {
                connection,
                internal_tx,
                frame_tx,
                sync_status,
            };
            self.run(links, events, command_rx, internal_rx).await;
            sync_task.abort();
        });

        DashboardHandle {
            frames,
            commands,
            task,
        }
    }

    fn seed_from_server(&self, internal_tx: &mpsc::UnboundedSender<Internal>) {
        for (source, endpoint) in &self.config.manual_endpoints {
            let api = self.api.clone();
            let source = source.clone();
            let endpoint = endpoint.clone();
            let internal_tx = internal_tx.clone();
            tokio::spawn(async move {
                match api.get_manual(&endpoint).await {
                    Ok(price) => {
                        let _ = internal_tx.send(Internal::ManualSeed { source, price });
                    }
                    Err(error) => debug!(%source, %error, "could not read server manual price"),
                }
            });
        }
    }

    async fn run(
        mut self,
        links: Links,
        mut events: mpsc::Receiver<ConnectionEvent>,
        mut command_rx: mpsc::Receiver<UiCommand>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        let Links {
            connection,
            internal_tx,
            frame_tx,
            mut sync_status,
        } = links;
        info!(sources = ?self.layout.sources, "dashboard started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ConnectionEvent::State(state)) => {
                        self.connection = state;
                        if state == ConnectionState::Connected {
                            // A new session may follow a server restart, resetting its sequence
                            self.gate.reset();
                            self.params.resync_remote();
                        }
                    }
                    Some(ConnectionEvent::Feed(bundle)) => {
                        if !self.apply_feed(bundle) {
                            continue;
                        }
                    }
                    None => {
                        warn!("connection manager stopped unexpectedly");
                        break;
                    }
                },
                command = command_rx.recv() => match command {
                    Some(UiCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command, &connection, &internal_tx),
                },
                Some(internal) = internal_rx.recv() => self.handle_internal(internal, &connection),
                Ok(()) = sync_status.changed() => {}
            }

            let sync = *sync_status.borrow();
            frame_tx.send_replace(self.frame(sync));
        }

        // Dropping the receiver unblocks a manager waiting on a full channel
        drop(events);
        connection.shutdown().await;
        info!("dashboard stopped");
    }

    /// Apply a bundle that passes the ordering gate. Returns `false` for stale bundles.
    fn apply_feed(&mut self, bundle: FeedBundle) -> bool {
        if !self.gate.accept(&bundle) {
            debug!(seq = ?bundle.seq, timestamp = ?bundle.timestamp, "dropping stale bundle");
            return false;
        }
        if let Some(history) = &bundle.price_history {
            self.chart.update(history);
        }
        self.feed = Some(bundle);
        true
    }

    fn handle_command(
        &mut self,
        command: UiCommand,
        connection: &ConnectionHandle,
        internal_tx: &mpsc::UnboundedSender<Internal>,
    ) {
        match command {
            UiCommand::SetWeight {
                category,
                source,
                value,
            } => {
                if let Err(error) = self.params.set_weight(category, &source, value) {
                    warn!(%error, "weight change rejected");
                }
            }
            UiCommand::SetAggregationMethod(method) => {
                if let Err(error) = self.params.set_aggregation_method(method) {
                    warn!(%error, "failed to store aggregation method");
                }
            }
            UiCommand::EditOverride { source, text } => {
                self.overrides.update_edit_buffer(&source, text);
            }
            UiCommand::CommitOverride { source } => {
                let value = self.overrides.commit_buffer(&source);
                self.apply_override(source, value, connection, internal_tx);
            }
            UiCommand::ClearOverride { source } => {
                self.overrides.clear(&source);
                self.apply_override(source, None, connection, internal_tx);
            }
            UiCommand::CancelEdit { source } => self.overrides.cancel_edit(&source),
            UiCommand::ToggleTheme => {
                self.dark_mode = !self.dark_mode;
                if let Err(error) = save_dark_mode(self.params.storage_mut(), self.dark_mode) {
                    warn!(%error, "failed to persist theme");
                }
            }
            UiCommand::Refresh => connection.refresh(),
            UiCommand::Shutdown => {}
        }
    }

    /// Mirror a committed override into the parameters, post it to the source's manual
    /// endpoint when one is configured, then ask the oracle to recompute.
    fn apply_override(
        &mut self,
        source: SourceId,
        value: Option<f64>,
        connection: &ConnectionHandle,
        internal_tx: &mpsc::UnboundedSender<Internal>,
    ) {
        info!(%source, ?value, "manual override committed");
        self.touched.insert(source.clone());
        if let Err(error) = self.params.set_manual_price(&source, value) {
            warn!(%error, "failed to store manual override");
        }

        let endpoint = self.config.manual_endpoints.get(&source).cloned();
        let api = self.api.clone();
        let internal_tx = internal_tx.clone();
        tokio::spawn(async move {
            let posted = match endpoint {
                Some(endpoint) => api.set_manual(&endpoint, value).await,
                None => Ok(()),
            };
            if let Err(error) = posted {
                warn!(%source, %error, "failed to post manual override");
            } else if let Err(error) = api.request_update().await {
                warn!(%error, "failed to request oracle recomputation");
            }
            let _ = internal_tx.send(Internal::OverridePosted { source });
        });
    }

    fn handle_internal(&mut self, internal: Internal, connection: &ConnectionHandle) {
        match internal {
            Internal::ManualSeed { source, price } => {
                if price.is_some() && !self.touched.contains(&source) {
                    info!(%source, ?price, "seeding override from server");
                    self.overrides.seed(&source, price);
                }
            }
            Internal::OverridePosted { source } => {
                debug!(%source, "override posted, refreshing feed");
                connection.refresh();
            }
        }
    }
}

struct Links {
    connection: ConnectionHandle,
    internal_tx: mpsc::UnboundedSender<Internal>,
    frame_tx: watch::Sender<DashboardFrame>,
    sync_status: watch::Receiver<SyncStatus>,
}

/// Build the production dashboard from `config` and start it.
pub fn launch(config: MonitorConfig) -> Result<DashboardHandle, MonitorError> {
    let api = ApiClient::new(&config.api_base, config.request_timeout)?;
    let storage = FileStore::open(&config.storage_path);
    let transport = WsPollTransport::new(
        config.ws_url.clone(),
        api.clone(),
        config.connection.poll_source.clone(),
        config.connection.ping_interval,
        config.connection.read_timeout,
    );

    info!(api = %config.api_base, ws = %config.ws_url, "launching oracle monitor");
    Ok(Dashboard::new(config, api, Box::new(storage)).launch(transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        persist::{DARK_MODE_KEY, MemoryStore, PARAMS_KEY},
        types::{PriceHistory, PriceSnapshot},
    };
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn dashboard(storage: MemoryStore) -> Dashboard {
        let config = MonitorConfig::default();
        let api = ApiClient::new(&config.api_base, Duration::from_secs(1)).unwrap();
        Dashboard::new(config, api, Box::new(storage))
    }

    fn bundle(seq: u64, upbit: f64) -> FeedBundle {
        let timestamp = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, seq as u32).unwrap();
        FeedBundle {
            seq: Some(seq),
            timestamp: Some(timestamp),
            prices: [(SourceId::from("upbit"), PriceSnapshot::from_price(upbit))]
                .into_iter()
                .collect(),
            oracle_result: None,
            price_history: Some(PriceHistory {
                timestamps: vec![Some(timestamp)],
                series: [("upbit".to_string(), vec![Some(upbit)])].into_iter().collect(),
            }),
        }
    }

    #[test]
    fn test_new_restores_persisted_state() {
        let storage = MemoryStore::default()
            .with_entry(
                PARAMS_KEY,
                r#"{"aggregation_method":"median","manual_prices":{"usdt_krw":1385.5}}"#,
            )
            .with_entry(DARK_MODE_KEY, "true");

        let frame = dashboard(storage).frame(SyncStatus::Idle);

        assert!(frame.dark_mode);
        assert_eq!(frame.view.aggregation_method, AggregationMethod::Median);
        let rate = frame
            .view
            .overrides
            .iter()
            .find(|view| view.source == SourceId::from("usdt_krw"))
            .unwrap();
        assert_eq!(rate.committed, Some(1385.5));
        assert_eq!(frame.connection, ConnectionState::Connecting);
        assert!(frame.chart.is_empty());
    }

    #[test]
    fn test_stale_bundles_do_not_regress_the_view() {
        let mut dashboard = dashboard(MemoryStore::default());

        assert!(dashboard.apply_feed(bundle(2, 5_000_000.0)));
        assert!(!dashboard.apply_feed(bundle(1, 4_000_000.0)));

        let frame = dashboard.frame(SyncStatus::Idle);
        assert_eq!(
            frame.view.sources[&SourceId::from("upbit")].price.value(),
            Some(5_000_000.0)
        );
        assert_eq!(frame.chart.len(), 1);
    }
}

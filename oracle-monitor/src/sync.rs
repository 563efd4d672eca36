//! Background worker pushing the [`ParameterSet`] to the oracle service.
//!
//! Submissions are debounced and the most recent one always wins. Failed pushes are
//! retried with exponential backoff and jitter; a set that never made it stays dirty and is
//! re-sent when [`SyncHandle::resync`] is called after a reconnection.

use crate::{config::SyncConfig, error::MonitorError, params::ParameterSet};
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

/// Destination of parameter pushes.
#[async_trait]
pub trait ParamsSink: Send + Sync + 'static {
    async fn push_params(&self, params: &ParameterSet) -> Result<(), MonitorError>;
}

/// Observable state of the remote sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Pending,
    Synced,
    Failed { attempt: u32 },
}

#[derive(Debug)]
enum SyncCommand {
    Submit(ParameterSet),
    Resync,
}

/// Cheap handle used to feed the sync worker.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    command_tx: mpsc::UnboundedSender<SyncCommand>,
    status_rx: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// Queue `params` for pushing, superseding anything not yet sent.
    pub fn submit(&self, params: ParameterSet) {
        if self.command_tx.send(SyncCommand::Submit(params)).is_err() {
            warn!("remote sync worker stopped, dropping parameter update");
        }
    }

    /// Re-send the latest set immediately if it has not been acknowledged.
    pub fn resync(&self) {
        let _ = self.command_tx.send(SyncCommand::Resync);
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped, ±jitter.
pub fn backoff_delay(config: &SyncConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31) as i32;
    let base = config.backoff_base.as_millis() as f64 * 2.0_f64.powi(exponent);
    let clamped = base.min(config.backoff_cap.as_millis() as f64);

    let jitter_range = clamped * config.jitter.clamp(0.0, 1.0);
    let jitter = if jitter_range > 0.0 {
        rand::rng().random_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    Duration::from_millis((clamped + jitter).max(0.0) as u64)
}

/// Spawn the sync worker. The task ends once every [`SyncHandle`] is dropped.
pub fn spawn_sync<Sink>(sink: Arc<Sink>, config: SyncConfig) -> (SyncHandle, JoinHandle<()>)
where
    Sink: ParamsSink + ?Sized,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(SyncStatus::Idle);

    let task = tokio::spawn(run_sync_loop(sink, config, command_rx, status_tx));

    (
        SyncHandle {
            command_tx,
            status_rx,
        },
        task,
    )
}

async fn run_sync_loop<Sink>(
    sink: Arc<Sink>,
    config: SyncConfig,
    mut command_rx: mpsc::UnboundedReceiver<SyncCommand>,
    status_tx: watch::Sender<SyncStatus>,
) where
    Sink: ParamsSink + ?Sized,
{
    let mut latest: Option<ParameterSet> = None;
    let mut dirty = false;
    let mut attempt = 0u32;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(SyncCommand::Submit(params)) => {
                    latest = Some(params);
                    dirty = true;
                    attempt = 0;
                    deadline = Some(Instant::now() + config.debounce);
                    status_tx.send_replace(SyncStatus::Pending);
                }
                Some(SyncCommand::Resync) => {
                    if dirty && latest.is_some() {
                        debug!("resyncing unacknowledged parameters");
                        deadline = Some(Instant::now());
                        status_tx.send_replace(SyncStatus::Pending);
                    }
                }
                None => {
                    debug!("all sync handles dropped, stopping remote sync");
                    break;
                }
            },
            _ = wait_until(deadline) => {
                deadline = None;
                let Some(params) = latest.clone() else {
                    continue;
                };

                match sink.push_params(&params).await {
                    Ok(()) => {
                        // A newer submission may have arrived while pushing
                        if latest.as_ref() == Some(&params) {
                            dirty = false;
                            attempt = 0;
                            info!("parameters synced to oracle service");
                            status_tx.send_replace(SyncStatus::Synced);
                        }
                    }
                    Err(error) => {
                        attempt += 1;
                        let delay = backoff_delay(&config, attempt);
                        warn!(%error, attempt, ?delay, "parameter sync failed, retrying");
                        deadline = Some(Instant::now() + delay);
                        status_tx.send_replace(SyncStatus::Failed { attempt });
                    }
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggregationMethod, SourceId};
    use std::sync::Mutex;

    /// Sink failing its first `failures` pushes, recording every set it receives.
    #[derive(Default)]
    struct FlakySink {
        failures: Mutex<u32>,
        received: Mutex<Vec<ParameterSet>>,
    }

    impl FlakySink {
        fn failing(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                received: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl ParamsSink for FlakySink {
        async fn push_params(&self, params: &ParameterSet) -> Result<(), MonitorError> {
            self.received.lock().unwrap().push(params.clone());
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MonitorError::Status {
                    endpoint: "/api/params".to_string(),
                    status: 503,
                });
            }
            Ok(())
        }
    }

    fn params(method: AggregationMethod) -> ParameterSet {
        ParameterSet {
            aggregation_method: method,
            ..ParameterSet::defaults(&[SourceId::from("upbit")])
        }
    }

    fn no_jitter() -> SyncConfig {
        SyncConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_delay() {
        let config = no_jitter();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 7), Duration::from_secs(30));
        assert_eq!(backoff_delay(&config, 500), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let config = SyncConfig::default();
        for _ in 0..100 {
            let delay = backoff_delay(&config, 3);
            assert!(delay >= Duration::from_millis(1600), "{delay:?}");
            assert!(delay <= Duration::from_millis(2400), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sync_is_retried_until_success() {
        let sink = Arc::new(FlakySink::failing(3));
        let (handle, _task) = spawn_sync(sink.clone(), no_jitter());
        let mut status = handle.status();

        handle.submit(params(AggregationMethod::Median));
        status
            .wait_for(|status| *status == SyncStatus::Synced)
            .await
            .unwrap();

        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 4);
        assert!(received.iter().all(|set| set.aggregation_method == AggregationMethod::Median));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_submission_supersedes_retry() {
        let sink = Arc::new(FlakySink::failing(1));
        let (handle, _task) = spawn_sync(sink.clone(), no_jitter());
        let mut status = handle.status();

        handle.submit(params(AggregationMethod::Median));
        status
            .wait_for(|status| matches!(status, SyncStatus::Failed { .. }))
            .await
            .unwrap();

        handle.submit(params(AggregationMethod::Average));
        status
            .wait_for(|status| *status == SyncStatus::Synced)
            .await
            .unwrap();

        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].aggregation_method, AggregationMethod::Average);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submissions_are_debounced() {
        let sink = Arc::new(FlakySink::default());
        let (handle, _task) = spawn_sync(sink.clone(), no_jitter());
        let mut status = handle.status();

        handle.submit(params(AggregationMethod::Median));
        handle.submit(params(AggregationMethod::Average));
        handle.submit(params(AggregationMethod::Median));
        status
            .wait_for(|status| *status == SyncStatus::Synced)
            .await
            .unwrap();

        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_sends_dirty_set_immediately() {
        let sink = Arc::new(FlakySink::failing(1));
        let config = SyncConfig {
            backoff_base: Duration::from_secs(600),
            backoff_cap: Duration::from_secs(600),
            ..no_jitter()
        };
        let (handle, _task) = spawn_sync(sink.clone(), config);
        let mut status = handle.status();

        handle.submit(params(AggregationMethod::Median));
        status
            .wait_for(|status| matches!(status, SyncStatus::Failed { attempt: 1 }))
            .await
            .unwrap();

        let started = Instant::now();
        handle.resync();
        status
            .wait_for(|status| *status == SyncStatus::Synced)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(600));
        assert_eq!(sink.received.lock().unwrap().len(), 2);
    }
}

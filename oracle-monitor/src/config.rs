use crate::{error::MonitorError, types::SourceId};
use indexmap::IndexMap;
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Fastest allowed fallback polling interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Slowest allowed fallback polling interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Where fallback polling fetches its full-state snapshot from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollSource {
    /// `GET /api/data`, the complete bundle in one request.
    Full,
    /// `/api/prices` + `/api/aggregated` + `/api/chart/{asset}` composed into one bundle.
    Asset(String),
}

/// Transport tuning for the [`ConnectionManager`](crate::connection::ConnectionManager).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Fixed delay between reconnection attempts
    pub retry_delay: Duration,
    /// Failed reconnection attempts tolerated before switching to polling
    pub max_reconnect_attempts: u32,
    /// Fallback polling period, always within [`MIN_POLL_INTERVAL`, `MAX_POLL_INTERVAL`]
    pub poll_interval: Duration,
    /// Push reconnection probe period while polling; `None` makes fallback terminal
    pub probe_interval: Option<Duration>,
    /// Silence on the push channel after which the session is considered dead
    pub read_timeout: Duration,
    /// Keep-alive ping period
    pub ping_interval: Duration,
    /// Capacity of the connection event channel
    pub channel_buffer_size: usize,
    pub poll_source: PollSource,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 5,
            poll_interval: MIN_POLL_INTERVAL,
            probe_interval: Some(Duration::from_secs(30)),
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            channel_buffer_size: 1024,
            poll_source: PollSource::Full,
        }
    }
}

impl ConnectionConfig {
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts.max(1);
        self
    }

    /// Set the fallback polling period, clamped into the allowed range.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        self
    }

    pub fn with_probe_interval(mut self, interval: Option<Duration>) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size.max(1);
        self
    }

    pub fn with_poll_source(mut self, source: PollSource) -> Self {
        self.poll_source = source;
        self
    }
}

/// Remote parameter sync tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub debounce: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Fraction of each delay randomised in either direction, eg/ 0.2 = ±20%
    pub jitter: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartConfig {
    pub capacity: usize,
    pub padding_ratio: f64,
    pub padding_floor: f64,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            padding_ratio: 0.01,
            padding_floor: 1000.0,
        }
    }
}

/// Top-level configuration of the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Base URL of the oracle service's REST API
    pub api_base: String,
    /// Push channel URL
    pub ws_url: String,
    pub asset: Option<String>,
    /// Configured sources, in display order
    pub sources: Vec<SourceId>,
    /// Source the aggregate price is compared against
    pub reference_source: SourceId,
    /// Source carrying the FX rate (eg/ USDT/KRW)
    pub rate_source: SourceId,
    /// Manual override endpoint per overridable source
    pub manual_endpoints: IndexMap<SourceId, String>,
    pub request_timeout: Duration,
    pub storage_path: PathBuf,
    pub connection: ConnectionConfig,
    pub sync: SyncConfig,
    pub chart: ChartConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:5000".to_string(),
            ws_url: "ws://127.0.0.1:5000/ws".to_string(),
            asset: None,
            sources: ["upbit", "bithumb", "coinone"]
                .into_iter()
                .map(SourceId::from)
                .collect(),
            reference_source: SourceId::from("upbit"),
            rate_source: SourceId::from("usdt_krw"),
            manual_endpoints: IndexMap::from([
                (SourceId::from("upbit"), "/api/eth-krw/manual".to_string()),
                (SourceId::from("usdt_krw"), "/api/usdt-krw/manual".to_string()),
            ]),
            request_timeout: Duration::from_secs(5),
            storage_path: PathBuf::from(".oracle-monitor.json"),
            connection: ConnectionConfig::default(),
            sync: SyncConfig::default(),
            chart: ChartConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Create a configuration pointed at `api_base`, deriving the push URL from it.
    pub fn new(api_base: impl Into<String>) -> Result<Self, MonitorError> {
        let api_base = api_base.into();
        let ws_url = derive_ws_url(&api_base)?;
        Ok(Self {
            api_base,
            ws_url,
            ..Default::default()
        })
    }

    /// Build a configuration from `ORACLE_*` environment variables.
    pub fn from_env() -> Result<Self, MonitorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup, falling back to defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut config = match lookup("ORACLE_API_URL") {
            Some(api_base) => Self::new(api_base.trim())?,
            None => Self::default(),
        };

        if let Some(ws_url) = lookup("ORACLE_WS_URL") {
            config = config.with_ws_url(ws_url.trim())?;
        }
        if let Some(asset) = lookup("ORACLE_ASSET") {
            config = config.with_asset(asset.trim());
        }
        if let Some(sources) = lookup("ORACLE_SOURCES") {
            let sources: Vec<SourceId> = sources
                .split(',')
                .map(str::trim)
                .filter(|source| !source.is_empty())
                .map(SourceId::from)
                .collect();
            if sources.is_empty() {
                return Err(MonitorError::Config("ORACLE_SOURCES is empty".to_string()));
            }
            config = config.with_sources(sources);
        }
        if let Some(source) = lookup("ORACLE_REFERENCE_SOURCE") {
            config.reference_source = SourceId::from(source.as_str());
        }
        if let Some(source) = lookup("ORACLE_RATE_SOURCE") {
            config.rate_source = SourceId::from(source.as_str());
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "ORACLE_POLL_MS")? {
            config.connection = config
                .connection
                .with_poll_interval(Duration::from_millis(millis));
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "ORACLE_RETRY_DELAY_MS")? {
            config.connection = config
                .connection
                .with_retry_delay(Duration::from_millis(millis));
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, "ORACLE_MAX_RECONNECTS")? {
            config.connection = config.connection.with_max_reconnect_attempts(attempts);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "ORACLE_PROBE_SECS")? {
            let probe = (secs > 0).then(|| Duration::from_secs(secs));
            config.connection = config.connection.with_probe_interval(probe);
        }
        if let Some(path) = lookup("ORACLE_STATE_PATH") {
            config.storage_path = PathBuf::from(path.trim());
        }
        if let Some(points) = parse_var::<usize>(&lookup, "ORACLE_CHART_POINTS")? {
            config.chart.capacity = points.max(1);
        }

        Ok(config)
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Result<Self, MonitorError> {
        let ws_url = ws_url.into();
        Url::parse(&ws_url)
            .map_err(|error| MonitorError::Config(format!("invalid push URL {ws_url}: {error}")))?;
        self.ws_url = ws_url;
        Ok(self)
    }

    /// Scope the monitor to one asset; fallback polling then composes per-asset endpoints.
    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        let asset = asset.into().to_uppercase();
        self.connection.poll_source = PollSource::Asset(asset.clone());
        self.asset = Some(asset);
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceId>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_reference_source(mut self, source: impl Into<SourceId>) -> Self {
        self.reference_source = source.into();
        self
    }

    pub fn with_rate_source(mut self, source: impl Into<SourceId>) -> Self {
        self.rate_source = source.into();
        self
    }

    pub fn with_manual_endpoint(
        mut self,
        source: impl Into<SourceId>,
        endpoint: impl Into<String>,
    ) -> Self {
        self.manual_endpoints.insert(source.into(), endpoint.into());
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}

/// Derive the push URL from the REST base: `http(s)://host/..` becomes `ws(s)://host/ws`.
pub fn derive_ws_url(api_base: &str) -> Result<String, MonitorError> {
    let mut url = Url::parse(api_base)
        .map_err(|error| MonitorError::Config(format!("invalid API URL {api_base}: {error}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(MonitorError::Config(format!(
                "unsupported API URL scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| MonitorError::Config(format!("cannot derive push URL from {api_base}")))?;
    url.set_path("/ws");
    url.set_query(None);

    Ok(url.to_string())
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, MonitorError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| MonitorError::Config(format!("{key} is not a valid number: {value}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.reference_source, SourceId::from("upbit"));
        assert_eq!(config.connection.retry_delay, Duration::from_millis(1000));
        assert_eq!(config.connection.max_reconnect_attempts, 5);
        assert_eq!(config.connection.probe_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.chart.capacity, 100);
        assert_eq!(config.connection.poll_source, PollSource::Full);
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        struct TestCase {
            input: Duration,
            expected: Duration,
        }

        let tests = vec![
            TestCase {
                // TC0: below range
                input: Duration::from_millis(100),
                expected: Duration::from_millis(500),
            },
            TestCase {
                // TC1: within range
                input: Duration::from_millis(750),
                expected: Duration::from_millis(750),
            },
            TestCase {
                // TC2: above range
                input: Duration::from_secs(5),
                expected: Duration::from_millis(1000),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = ConnectionConfig::default().with_poll_interval(test.input);
            assert_eq!(actual.poll_interval, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_derive_ws_url() {
        assert_eq!(
            derive_ws_url("http://oracle.local:5000/api").unwrap(),
            "ws://oracle.local:5000/ws"
        );
        assert_eq!(
            derive_ws_url("https://oracle.example.com").unwrap(),
            "wss://oracle.example.com/ws"
        );
        assert!(matches!(
            derive_ws_url("ftp://oracle.example.com"),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = MonitorConfig::from_lookup(lookup_from(&[
            ("ORACLE_API_URL", "https://oracle.example.com"),
            ("ORACLE_ASSET", "eth"),
            ("ORACLE_SOURCES", "Upbit, bithumb ,,coinone,korbit"),
            ("ORACLE_POLL_MS", "2000"),
            ("ORACLE_PROBE_SECS", "0"),
            ("ORACLE_MAX_RECONNECTS", "3"),
            ("ORACLE_CHART_POINTS", "50"),
        ]))
        .unwrap();

        assert_eq!(config.ws_url, "wss://oracle.example.com/ws");
        assert_eq!(config.asset.as_deref(), Some("ETH"));
        assert_eq!(config.connection.poll_source, PollSource::Asset("ETH".to_string()));
        assert_eq!(config.sources.len(), 4);
        assert_eq!(config.sources[0], SourceId::from("upbit"));
        assert_eq!(config.connection.poll_interval, MAX_POLL_INTERVAL);
        assert_eq!(config.connection.probe_interval, None);
        assert_eq!(config.connection.max_reconnect_attempts, 3);
        assert_eq!(config.chart.capacity, 50);
    }

    #[test]
    fn test_from_lookup_rejects_invalid_numbers() {
        let result = MonitorConfig::from_lookup(lookup_from(&[("ORACLE_POLL_MS", "fast")]));
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }
}

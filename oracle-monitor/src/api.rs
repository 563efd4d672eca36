use crate::{
    error::MonitorError,
    params::ParameterSet,
    sync::ParamsSink,
    types::{AggregatedResult, ChartPoint, FeedBundle, PriceHistory, PriceSnapshot, SourceId, lenient_price},
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Full bundle used by fallback polling.
pub const DATA_ENDPOINT: &str = "/api/data";
pub const AGGREGATED_ENDPOINT: &str = "/api/aggregated";
pub const PRICES_ENDPOINT: &str = "/api/prices";
pub const PARAMS_ENDPOINT: &str = "/api/params";
pub const ORACLE_UPDATE_ENDPOINT: &str = "/api/oracle/update";

/// Typed client for the oracle service's REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, MonitorError> {
        let base = Url::parse(api_base)
            .map_err(|error| MonitorError::Config(format!("invalid API URL {api_base}: {error}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| MonitorError::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self { http, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, MonitorError> {
        self.base
            .join(path)
            .map_err(|error| MonitorError::Config(format!("invalid endpoint {path}: {error}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MonitorError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| http_error(path, error))?;

        let response = check_status(path, response)?;
        let body = response
            .bytes()
            .await
            .map_err(|error| http_error(path, error))?;

        Ok(serde_json::from_slice(&body)?)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), MonitorError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| http_error(path, error))?;

        check_status(path, response)?;
        debug!(endpoint = path, "POST acknowledged");
        Ok(())
    }

    /// `GET /api/data`: the full bundle.
    pub async fn fetch_data(&self) -> Result<FeedBundle, MonitorError> {
        self.get_json(DATA_ENDPOINT).await
    }

    /// `GET /api/aggregated`: aggregate price and effective weights of every asset.
    pub async fn fetch_aggregated(&self) -> Result<IndexMap<String, AggregatedResult>, MonitorError> {
        let raw: IndexMap<String, Value> = self.get_json(AGGREGATED_ENDPOINT).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(asset, value)| {
                let result = serde_json::from_value(value).ok()?;
                Some((asset.to_uppercase(), result))
            })
            .collect())
    }

    /// `GET /api/prices`: per-source snapshots of every asset.
    pub async fn fetch_prices(
        &self,
    ) -> Result<IndexMap<String, IndexMap<SourceId, PriceSnapshot>>, MonitorError> {
        let raw: IndexMap<String, Value> = self.get_json(PRICES_ENDPOINT).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(asset, value)| {
                let Value::Object(sources) = value else {
                    return None;
                };
                let snapshots = sources
                    .iter()
                    .map(|(source, snapshot)| {
                        (SourceId::from(source.as_str()), PriceSnapshot::from_value(snapshot))
                    })
                    .collect();
                Some((asset.to_uppercase(), snapshots))
            })
            .collect())
    }

    /// `GET /api/chart/{asset}`.
    pub async fn fetch_chart(&self, asset: &str) -> Result<Vec<ChartPoint>, MonitorError> {
        let raw: Value = self.get_json(&format!("/api/chart/{asset}")).await?;
        Ok(match raw {
            Value::Array(points) => points
                .into_iter()
                .filter_map(|point| serde_json::from_value(point).ok())
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Compose the per-asset endpoints into one bundle, stamped with the newest chart point.
    pub async fn fetch_asset_bundle(&self, asset: &str) -> Result<FeedBundle, MonitorError> {
        let asset = asset.to_uppercase();
        let (mut aggregated, mut prices, chart) = futures::try_join!(
            self.fetch_aggregated(),
            self.fetch_prices(),
            self.fetch_chart(&asset)
        )?;

        let timestamp = chart.iter().rev().find_map(|point| point.timestamp);

        Ok(FeedBundle {
            seq: None,
            timestamp,
            prices: prices.swap_remove(&asset).unwrap_or_default(),
            oracle_result: aggregated.swap_remove(&asset),
            price_history: Some(PriceHistory::from_chart_points(&chart)),
        })
    }

    /// `GET <endpoint>`: the server's current manual override, `None` when automatic.
    pub async fn get_manual(&self, endpoint: &str) -> Result<Option<f64>, MonitorError> {
        let body: Value = self.get_json(endpoint).await?;
        Ok(body.get("manual_price").and_then(lenient_price))
    }

    /// `POST <endpoint>` with `{price}`; `None` returns the source to automatic pricing.
    pub async fn set_manual(&self, endpoint: &str, price: Option<f64>) -> Result<(), MonitorError> {
        self.post_json(endpoint, &json!({ "price": price })).await
    }

    /// `POST /api/oracle/update`: ask the oracle to recompute now.
    pub async fn request_update(&self) -> Result<(), MonitorError> {
        self.post_json(ORACLE_UPDATE_ENDPOINT, &json!({})).await
    }
}

#[async_trait]
impl ParamsSink for ApiClient {
    async fn push_params(&self, params: &ParameterSet) -> Result<(), MonitorError> {
        self.post_json(PARAMS_ENDPOINT, params).await
    }
}

fn http_error(endpoint: &str, error: reqwest::Error) -> MonitorError {
    MonitorError::Http {
        endpoint: endpoint.to_string(),
        reason: error.to_string(),
    }
}

fn check_status(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response, MonitorError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(MonitorError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        })
    }
}

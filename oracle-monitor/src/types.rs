//! Core data types for the oracle feed
//!
//! These types match the JSON payloads of the oracle service's push channel and REST
//! endpoints. Decoding is deliberately lenient: a malformed numeric field becomes `None`
//! instead of failing the whole message, so a single bad value can never take the
//! dashboard down.

use chrono::{DateTime, NaiveDateTime, Utc};
use derive_more::{Display, From};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;
use smol_str::SmolStr;

/// Identifier of one upstream source (exchange or rate feed), eg/ "upbit", "usdt_krw".
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, Display, From,
)]
#[serde(transparent)]
pub struct SourceId(SmolStr);

impl SourceId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref().trim().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Operator-tunable weight categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum WeightCategory {
    #[display("exchange")]
    Exchange,
    #[display("spread")]
    Spread,
    #[display("volume")]
    Volume,
    #[display("depth")]
    Depth,
}

impl WeightCategory {
    pub const ALL: [WeightCategory; 4] = [
        WeightCategory::Exchange,
        WeightCategory::Spread,
        WeightCategory::Volume,
        WeightCategory::Depth,
    ];

    /// Key of this category inside the serialized `ParameterSet`.
    pub fn field_name(&self) -> &'static str {
        match self {
            WeightCategory::Exchange => "exchange_weights",
            WeightCategory::Spread => "spread_weights",
            WeightCategory::Volume => "volume_weights",
            WeightCategory::Depth => "depth_weights",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            WeightCategory::Exchange => WeightCategory::Spread,
            WeightCategory::Spread => WeightCategory::Volume,
            WeightCategory::Volume => WeightCategory::Depth,
            WeightCategory::Depth => WeightCategory::Exchange,
        }
    }
}

/// How the oracle combines source prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    #[display("average")]
    Average,
    #[display("median")]
    Median,
}

impl AggregationMethod {
    pub fn toggled(&self) -> Self {
        match self {
            AggregationMethod::Average => AggregationMethod::Median,
            AggregationMethod::Median => AggregationMethod::Average,
        }
    }
}

/// Calculation mode reported by the oracle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    #[display("normal")]
    Normal,
    #[display("inverse")]
    Inverse,
    #[display("no_data")]
    NoData,
    #[default]
    #[display("unknown")]
    Unknown,
}

impl CalculationMode {
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "normal" => CalculationMode::Normal,
            "inverse" => CalculationMode::Inverse,
            "no_data" => CalculationMode::NoData,
            _ => CalculationMode::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for CalculationMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value
            .as_str()
            .map(CalculationMode::from_wire)
            .unwrap_or_default())
    }
}

/// Latest observation of one source.
///
/// A bare number on the wire is read as a price-only snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub price: Option<f64>,
    pub spread: Option<f64>,
    pub volume: Option<f64>,
    pub depth: Option<f64>,
}

impl PriceSnapshot {
    pub fn from_price(price: f64) -> Self {
        Self {
            price: Some(price),
            ..Default::default()
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self {
                price: map.get("price").and_then(lenient_price),
                spread: map.get("spread").and_then(lenient_f64),
                volume: map.get("volume").and_then(lenient_f64),
                depth: map.get("depth").and_then(lenient_f64),
            },
            other => Self {
                price: lenient_price(other),
                ..Default::default()
            },
        }
    }
}

impl<'de> Deserialize<'de> for PriceSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// One `(label, price)` entry of the oracle's price breakdown, eg/ `("upbit (manual)", 5.1e6)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceDetail {
    pub label: String,
    pub price: Option<f64>,
}

impl PriceDetail {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(pair) => Some(Self {
                label: pair.first()?.as_str()?.to_string(),
                price: pair.get(1).and_then(lenient_f64),
            }),
            Value::Object(map) => Some(Self {
                label: map
                    .get("label")
                    .or_else(|| map.get("name"))?
                    .as_str()?
                    .to_string(),
                price: map.get("price").and_then(lenient_f64),
            }),
            _ => None,
        }
    }

    /// True if the oracle marked this entry as coming from a manual override of `source`.
    pub fn is_manual_for(&self, source: &SourceId) -> bool {
        let label = self.label.to_lowercase();
        label.starts_with(source.as_str()) && label.contains("(manual)")
    }
}

/// Result computed by the remote oracle. Opaque beyond field access.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AggregatedResult {
    #[serde(
        rename = "median_price",
        alias = "price",
        alias = "aggregate_price",
        default,
        deserialize_with = "de_lenient_f64"
    )]
    pub aggregate_price: Option<f64>,
    #[serde(rename = "calculation_method", default)]
    pub calculation_mode: CalculationMode,
    #[serde(default, deserialize_with = "de_lenient_bool")]
    pub is_volatile: bool,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub twap: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub usdt_krw_used: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub inverse_usdt_krw: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub usdt_krw_original: Option<f64>,
    #[serde(default, deserialize_with = "de_price_details")]
    pub price_details: Vec<PriceDetail>,
    #[serde(default, deserialize_with = "de_weights")]
    pub weights: IndexMap<SourceId, f64>,
}

impl AggregatedResult {
    /// True if the oracle reports that `source` fed the computation via a manual override.
    pub fn has_manual_detail_for(&self, source: &SourceId) -> bool {
        self.price_details
            .iter()
            .any(|detail| detail.is_manual_for(source))
    }

    /// Price the oracle used for a manual override of `source`, if it reports one.
    pub fn manual_detail_price(&self, source: &SourceId) -> Option<f64> {
        self.price_details
            .iter()
            .filter(|detail| detail.is_manual_for(source))
            .find_map(|detail| detail.price)
            .filter(|price| price.is_finite() && *price > 0.0)
    }
}

/// History payload supplied alongside each bundle: a timestamp axis plus any number of
/// named series of the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceHistory {
    pub timestamps: Vec<Option<DateTime<Utc>>>,
    pub series: IndexMap<String, Vec<Option<f64>>>,
}

impl PriceHistory {
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(map) = value else {
            return Self::default();
        };

        let mut history = Self::default();
        for (key, value) in map {
            let Value::Array(items) = value else {
                // Scalars such as `max_points` are metadata, not series
                continue;
            };
            if key == "timestamps" {
                history.timestamps = items.iter().map(lenient_time).collect();
            } else {
                history
                    .series
                    .insert(key.clone(), items.iter().map(lenient_price).collect());
            }
        }
        history
    }
}

impl<'de> Deserialize<'de> for PriceHistory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

impl Serialize for PriceHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.series.len() + 1))?;
        let timestamps: Vec<Option<String>> = self
            .timestamps
            .iter()
            .map(|ts| ts.map(|ts| ts.to_rfc3339()))
            .collect();
        map.serialize_entry("timestamps", &timestamps)?;
        for (name, values) in &self.series {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// One point of the `/api/chart/{asset}` time series.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChartPoint {
    #[serde(default, deserialize_with = "de_lenient_time")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "de_exchange_prices")]
    pub exchanges: IndexMap<SourceId, Option<f64>>,
}

/// Unit of delivery from both transports.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FeedBundle {
    #[serde(
        default,
        deserialize_with = "de_lenient_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub seq: Option<u64>,
    #[serde(default, deserialize_with = "de_lenient_time")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_prices")]
    pub prices: IndexMap<SourceId, PriceSnapshot>,
    #[serde(default, deserialize_with = "de_oracle_result")]
    pub oracle_result: Option<AggregatedResult>,
    #[serde(default)]
    pub price_history: Option<PriceHistory>,
}

impl FeedBundle {
    pub fn price_of(&self, source: &SourceId) -> Option<f64> {
        self.prices.get(source).and_then(|snapshot| snapshot.price)
    }
}

/// Text frame received over the push channel.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    PriceUpdate(FeedBundle),
    Welcome {
        #[serde(default)]
        message: Option<String>,
    },
    Status {
        #[serde(default)]
        connected: Option<bool>,
    },
}

/// Parse a feed timestamp: RFC 3339, or a naive ISO-8601 string (read as UTC).
pub fn parse_feed_time(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Number, or numeric string, that is finite.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Like [`lenient_f64`] but prices must also be strictly positive.
pub fn lenient_price(value: &Value) -> Option<f64> {
    lenient_f64(value).filter(|price| *price > 0.0)
}

fn lenient_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_feed_time(text),
        Value::Number(number) => {
            let raw = number.as_i64()?;
            // Heuristic: anything past year 2286 in seconds is milliseconds
            if raw.abs() >= 10_000_000_000 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

fn de_lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(lenient_f64(&Value::deserialize(deserializer)?))
}

fn de_lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

fn de_lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn de_lenient_time<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(lenient_time(&Value::deserialize(deserializer)?))
}

fn de_price_details<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<PriceDetail>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().filter_map(PriceDetail::from_value).collect(),
        _ => Vec::new(),
    })
}

fn de_weights<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<IndexMap<SourceId, f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| Some((SourceId::new(key), lenient_f64(value)?)))
            .collect(),
        _ => IndexMap::new(),
    })
}

fn de_exchange_prices<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<IndexMap<SourceId, Option<f64>>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| (SourceId::new(key), lenient_price(value)))
            .collect(),
        _ => IndexMap::new(),
    })
}

fn de_prices<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<IndexMap<SourceId, PriceSnapshot>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| (SourceId::new(key), PriceSnapshot::from_value(value)))
            .collect(),
        _ => IndexMap::new(),
    })
}

fn de_oracle_result<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<AggregatedResult>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn test_source_id_normalises() {
        assert_eq!(SourceId::new(" Upbit "), SourceId::from("upbit"));
        assert_eq!(SourceId::from("USDT_KRW").to_string(), "usdt_krw");
    }

    #[test]
    fn test_price_snapshot_lenient_decoding() {
        struct TestCase {
            input: Value,
            expected: PriceSnapshot,
        }

        let tests = vec![
            TestCase {
                // TC0: full snapshot
                input: json!({"price": 5_000_000.0, "spread": 0.12, "volume": 1234.5, "depth": 88.0}),
                expected: PriceSnapshot {
                    price: Some(5_000_000.0),
                    spread: Some(0.12),
                    volume: Some(1234.5),
                    depth: Some(88.0),
                },
            },
            TestCase {
                // TC1: bare number is a price-only snapshot
                input: json!(1385.5),
                expected: PriceSnapshot::from_price(1385.5),
            },
            TestCase {
                // TC2: numeric strings are accepted, garbage is dropped
                input: json!({"price": "4999000", "spread": "n/a", "volume": null}),
                expected: PriceSnapshot::from_price(4_999_000.0),
            },
            TestCase {
                // TC3: non-positive price is absent
                input: json!({"price": 0, "spread": 0.5}),
                expected: PriceSnapshot {
                    spread: Some(0.5),
                    ..Default::default()
                },
            },
            TestCase {
                // TC4: nested objects without a price are an empty snapshot
                input: json!({"binance": 3000.1, "okx": 3000.4}),
                expected: PriceSnapshot::default(),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual: PriceSnapshot = serde_json::from_value(test.input).unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_feed_bundle_from_server_payload() {
        let payload = json!({
            "seq": 42,
            "timestamp": "2024-05-01T09:30:00.250000",
            "prices": {
                "upbit": {"price": 5_000_000, "spread": 0.05, "volume": 1.2e9, "depth": 35.0},
                "bithumb": {"price": null},
                "usdt_krw": 1385,
                "timestamp": "2024-05-01T09:30:00"
            },
            "oracle_result": {
                "median_price": 5_010_000.0,
                "calculation_method": "inverse",
                "is_volatile": true,
                "twap": "1380.2",
                "usdt_krw_used": 1390.0,
                "inverse_usdt_krw": 1390.0,
                "usdt_krw_original": 1385.0,
                "price_details": [["upbit (manual)", 5_020_000.0], ["binance (inverse)", 5_000_500.0]]
            },
            "price_history": {
                "timestamps": ["2024-05-01T09:29:59", "2024-05-01T09:30:00"],
                "median_prices": [5_000_000.0, null],
                "max_points": 100
            }
        });

        let bundle: FeedBundle = serde_json::from_value(payload).unwrap();

        assert_eq!(bundle.seq, Some(42));
        let timestamp = bundle.timestamp.unwrap();
        assert_eq!((timestamp.year(), timestamp.hour(), timestamp.minute()), (2024, 9, 30));
        assert_eq!(bundle.price_of(&SourceId::from("upbit")), Some(5_000_000.0));
        assert_eq!(bundle.price_of(&SourceId::from("bithumb")), None);
        assert_eq!(bundle.price_of(&SourceId::from("usdt_krw")), Some(1385.0));

        let oracle = bundle.oracle_result.unwrap();
        assert_eq!(oracle.aggregate_price, Some(5_010_000.0));
        assert_eq!(oracle.calculation_mode, CalculationMode::Inverse);
        assert!(oracle.is_volatile);
        assert_eq!(oracle.twap, Some(1380.2));
        assert!(oracle.has_manual_detail_for(&SourceId::from("upbit")));
        assert!(!oracle.has_manual_detail_for(&SourceId::from("binance")));

        let history = bundle.price_history.unwrap();
        assert_eq!(history.timestamps.len(), 2);
        assert_eq!(history.series.len(), 1);
        assert_eq!(history.series["median_prices"], vec![Some(5_000_000.0), None]);
    }

    #[test]
    fn test_maps_keep_wire_order() {
        let bundle: FeedBundle = serde_json::from_value(json!({
            "prices": {"upbit": 3.0, "bithumb": 2.0, "coinone": 1.0},
            "oracle_result": {"weights": {"coinone": 0.2, "upbit": 0.5, "bithumb": 0.3}}
        }))
        .unwrap();

        let prices: Vec<&str> = bundle.prices.keys().map(SourceId::as_str).collect();
        assert_eq!(prices, vec!["upbit", "bithumb", "coinone"]);

        let oracle = bundle.oracle_result.unwrap();
        let weights: Vec<&str> = oracle.weights.keys().map(SourceId::as_str).collect();
        assert_eq!(weights, vec!["coinone", "upbit", "bithumb"]);
    }

    #[test]
    fn test_manual_detail_price() {
        let oracle: AggregatedResult = serde_json::from_value(json!({
            "price_details": [["bithumb", 4_990_000], ["upbit (manual)", 5_100_000], ["coinone (manual)", 0]]
        }))
        .unwrap();

        assert_eq!(oracle.manual_detail_price(&SourceId::from("upbit")), Some(5_100_000.0));
        assert_eq!(oracle.manual_detail_price(&SourceId::from("bithumb")), None);
        assert_eq!(oracle.manual_detail_price(&SourceId::from("coinone")), None);
    }

    #[test]
    fn test_malformed_oracle_result_is_absent() {
        let bundle: FeedBundle =
            serde_json::from_value(json!({"prices": null, "oracle_result": "broken"})).unwrap();
        assert!(bundle.prices.is_empty());
        assert!(bundle.oracle_result.is_none());
    }

    #[test]
    fn test_push_message_tags() {
        let update: PushMessage = serde_json::from_str(
            r#"{"type":"price_update","seq":7,"prices":{"upbit":5000000}}"#,
        )
        .unwrap();
        let PushMessage::PriceUpdate(bundle) = update else {
            panic!("expected price_update");
        };
        assert_eq!(bundle.seq, Some(7));

        let welcome: PushMessage = serde_json::from_str(r#"{"type":"welcome"}"#).unwrap();
        assert_eq!(welcome, PushMessage::Welcome { message: None });

        assert!(serde_json::from_str::<PushMessage>(r#"{"type":"unknown"}"#).is_err());
    }

    #[test]
    fn test_parse_feed_time_formats() {
        assert!(parse_feed_time("2024-05-01T09:30:00Z").is_some());
        assert!(parse_feed_time("2024-05-01T09:30:00+09:00").is_some());
        assert!(parse_feed_time("2024-05-01T09:30:00.123456").is_some());
        assert!(parse_feed_time("yesterday").is_none());
    }

    #[test]
    fn test_calculation_mode_from_wire() {
        assert_eq!(CalculationMode::from_wire("normal"), CalculationMode::Normal);
        assert_eq!(CalculationMode::from_wire("INVERSE"), CalculationMode::Inverse);
        assert_eq!(CalculationMode::from_wire("no_data"), CalculationMode::NoData);
        assert_eq!(CalculationMode::from_wire("twap"), CalculationMode::Unknown);
    }
}

//! Pure merge of feed, parameters and overrides into a renderable [`ViewModel`].
//!
//! Nothing here performs I/O or holds state except the [`FeedGate`], which only remembers
//! the ordering key of the last bundle it let through.

use crate::{
    config::MonitorConfig,
    overrides::OverrideManager,
    params::ParameterSet,
    types::{
        AggregatedResult, AggregationMethod, CalculationMode, FeedBundle, PriceDetail, SourceId,
        WeightCategory,
    },
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Comparisons within this many percent of the reference are neutral.
pub const NEUTRAL_BAND_PERCENT: f64 = 0.1;

/// Difference between the oracle's original rate and the feed rate that reveals a
/// server-side manual rate.
pub const RATE_OVERRIDE_EPSILON: f64 = 0.01;

/// Fixed per-source slots of the dashboard, built once from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardLayout {
    pub sources: Vec<SourceId>,
    pub reference_source: SourceId,
    pub rate_source: SourceId,
    /// Sources offering a manual override slot, in display order
    pub override_slots: Vec<SourceId>,
}

impl DashboardLayout {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            sources: config.sources.clone(),
            reference_source: config.reference_source.clone(),
            rate_source: config.rate_source.clone(),
            override_slots: config.manual_endpoints.keys().cloned().collect(),
        }
    }
}

/// What the dashboard shows as a source's price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceCell {
    Live(f64),
    Pinned(f64),
    Unavailable,
}

impl PriceCell {
    pub fn value(&self) -> Option<f64> {
        match self {
            PriceCell::Live(price) | PriceCell::Pinned(price) => Some(*price),
            PriceCell::Unavailable => None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self, PriceCell::Pinned(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceView {
    pub source: SourceId,
    pub price: PriceCell,
    pub spread: Option<f64>,
    pub volume: Option<f64>,
    pub depth: Option<f64>,
    /// Configured weight per category
    pub weights: IndexMap<WeightCategory, f64>,
    /// `weight / Σ weights` of the configured sources, per category
    pub shares: IndexMap<WeightCategory, f64>,
    /// Share of the oracle's effective weights, when the oracle reports them
    pub effective_share: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Neutral,
    Positive,
    Negative,
}

impl Tier {
    pub fn from_percent(percent: f64) -> Self {
        if percent.abs() < NEUTRAL_BAND_PERCENT {
            Tier::Neutral
        } else if percent > 0.0 {
            Tier::Positive
        } else {
            Tier::Negative
        }
    }
}

/// Aggregate price versus the reference source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub reference_price: f64,
    pub reference_pinned: bool,
    pub aggregate_price: f64,
    pub diff: f64,
    pub percent: f64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeLabel {
    Normal,
    Inverse,
    NoData,
    Unknown,
    ManuallyOverridden,
}

impl From<CalculationMode> for ModeLabel {
    fn from(mode: CalculationMode) -> Self {
        match mode {
            CalculationMode::Normal => ModeLabel::Normal,
            CalculationMode::Inverse => ModeLabel::Inverse,
            CalculationMode::NoData => ModeLabel::NoData,
            CalculationMode::Unknown => ModeLabel::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateView {
    pub used: Option<f64>,
    pub original: Option<f64>,
    pub inverse: Option<f64>,
    pub twap: Option<f64>,
    pub volatile: bool,
    pub inverse_mode: bool,
    pub overridden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverrideView {
    pub source: SourceId,
    pub committed: Option<f64>,
    pub edit_buffer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub timestamp: Option<DateTime<Utc>>,
    pub aggregate_price: Option<f64>,
    pub aggregation_method: AggregationMethod,
    pub calculation_mode: ModeLabel,
    pub reference_label: ModeLabel,
    pub sources: IndexMap<SourceId, SourceView>,
    pub comparison: Option<Comparison>,
    pub rate: RateView,
    pub overrides: Vec<OverrideView>,
    pub price_details: Vec<PriceDetail>,
}

/// Merge the latest feed with local parameters and overrides.
pub fn reduce(
    feed: Option<&FeedBundle>,
    params: &ParameterSet,
    overrides: &OverrideManager,
    layout: &DashboardLayout,
) -> ViewModel {
    let oracle = feed.and_then(|feed| feed.oracle_result.as_ref());
    let aggregate_price = oracle
        .and_then(|oracle| oracle.aggregate_price)
        .filter(|price| price.is_finite());

    let sources = layout
        .sources
        .iter()
        .map(|source| {
            let view = source_view(source, feed, oracle, params, overrides, layout);
            (source.clone(), view)
        })
        .collect();

    let reference = displayed_price(&layout.reference_source, feed, oracle, overrides);
    let comparison = compare(aggregate_price, reference);

    let calculation_mode = oracle
        .map(|oracle| ModeLabel::from(oracle.calculation_mode))
        .unwrap_or(ModeLabel::NoData);
    let reference_overridden = overrides.is_overridden(&layout.reference_source)
        || oracle.is_some_and(|oracle| oracle.has_manual_detail_for(&layout.reference_source));
    let reference_label = if reference_overridden {
        ModeLabel::ManuallyOverridden
    } else {
        calculation_mode
    };

    let overrides_view = layout
        .override_slots
        .iter()
        .map(|source| {
            let entry = overrides.entry(source);
            OverrideView {
                source: source.clone(),
                committed: entry.and_then(|entry| entry.committed),
                edit_buffer: entry.and_then(|entry| entry.edit_buffer.clone()),
            }
        })
        .collect();

    ViewModel {
        timestamp: feed.and_then(|feed| feed.timestamp),
        aggregate_price,
        aggregation_method: params.aggregation_method,
        calculation_mode,
        reference_label,
        sources,
        comparison,
        rate: rate_view(feed, oracle, overrides, layout),
        overrides: overrides_view,
        price_details: oracle
            .map(|oracle| oracle.price_details.clone())
            .unwrap_or_default(),
    }
}

/// A local pin wins, then a manual price the oracle reports for `source`, then the feed.
fn displayed_price(
    source: &SourceId,
    feed: Option<&FeedBundle>,
    oracle: Option<&AggregatedResult>,
    overrides: &OverrideManager,
) -> PriceCell {
    let pinned = overrides
        .committed(source)
        .or_else(|| oracle.and_then(|oracle| oracle.manual_detail_price(source)));
    if let Some(pinned) = pinned {
        return PriceCell::Pinned(pinned);
    }
    match feed.and_then(|feed| feed.price_of(source)) {
        Some(price) => PriceCell::Live(price),
        None => PriceCell::Unavailable,
    }
}

fn source_view(
    source: &SourceId,
    feed: Option<&FeedBundle>,
    oracle: Option<&AggregatedResult>,
    params: &ParameterSet,
    overrides: &OverrideManager,
    layout: &DashboardLayout,
) -> SourceView {
    let snapshot = feed
        .and_then(|feed| feed.prices.get(source))
        .copied()
        .unwrap_or_default();

    let weights = WeightCategory::ALL
        .into_iter()
        .map(|category| (category, params.weight(category, source)))
        .collect();
    let shares = WeightCategory::ALL
        .into_iter()
        .map(|category| (category, weight_share(params, category, source, &layout.sources)))
        .collect();

    let effective_share = oracle.and_then(|oracle| {
        let total: f64 = layout
            .sources
            .iter()
            .filter_map(|source| oracle.weights.get(source))
            .sum();
        let weight = oracle.weights.get(source)?;
        Some(if total > 0.0 { weight / total } else { 0.0 })
    });

    SourceView {
        source: source.clone(),
        price: displayed_price(source, feed, oracle, overrides),
        spread: snapshot.spread,
        volume: snapshot.volume,
        depth: snapshot.depth,
        weights,
        shares,
        effective_share,
    }
}

/// `weight / Σ weights` over `sources`; `0` when the category sums to zero.
pub fn weight_share(
    params: &ParameterSet,
    category: WeightCategory,
    source: &SourceId,
    sources: &[SourceId],
) -> f64 {
    let total: f64 = sources
        .iter()
        .map(|source| params.weight(category, source))
        .sum();
    if total > 0.0 {
        params.weight(category, source) / total
    } else {
        0.0
    }
}

fn compare(aggregate: Option<f64>, reference: PriceCell) -> Option<Comparison> {
    let aggregate_price = aggregate?;
    let reference_price = reference.value().filter(|price| *price != 0.0)?;

    let diff = aggregate_price - reference_price;
    let percent = diff / reference_price * 100.0;
    if !percent.is_finite() {
        return None;
    }

    Some(Comparison {
        reference_price,
        reference_pinned: reference.is_pinned(),
        aggregate_price,
        diff,
        percent,
        tier: Tier::from_percent(percent),
    })
}

fn rate_view(
    feed: Option<&FeedBundle>,
    oracle: Option<&AggregatedResult>,
    overrides: &OverrideManager,
    layout: &DashboardLayout,
) -> RateView {
    let pinned = overrides.committed(&layout.rate_source);
    let feed_rate = feed.and_then(|feed| feed.price_of(&layout.rate_source));
    let inverse_mode =
        oracle.is_some_and(|oracle| oracle.calculation_mode == CalculationMode::Inverse);
    let original = oracle.and_then(|oracle| oracle.usdt_krw_original);

    let server_override = match (original, feed_rate) {
        (Some(original), Some(feed_rate)) => (original - feed_rate).abs() > RATE_OVERRIDE_EPSILON,
        _ => false,
    };

    let overridden = pinned.is_some() || server_override;

    RateView {
        used: pinned
            .or_else(|| oracle.and_then(|oracle| oracle.usdt_krw_used))
            .or(feed_rate),
        original: original.filter(|_| inverse_mode || overridden),
        inverse: oracle
            .and_then(|oracle| oracle.inverse_usdt_krw)
            .filter(|_| inverse_mode),
        twap: oracle.and_then(|oracle| oracle.twap),
        volatile: oracle.is_some_and(|oracle| oracle.is_volatile),
        inverse_mode,
        overridden,
    }
}

/// Ordering gate in front of the reducer: drops bundles older than the last applied one.
///
/// Bundles are ordered by `seq` when both sides carry one, else by feed timestamp. A
/// bundle carrying neither key is always accepted. A `seq` that goes backwards with a
/// strictly newer timestamp means the server restarted its counter, and is accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedGate {
    last_seq: Option<u64>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl FeedGate {
    pub fn accept(&mut self, bundle: &FeedBundle) -> bool {
        let fresh = match (bundle.seq, self.last_seq) {
            (Some(seq), Some(last)) if seq < last => self.is_newer(bundle.timestamp),
            (Some(seq), Some(last)) => seq > last,
            _ => match (bundle.timestamp, self.last_timestamp) {
                (Some(timestamp), Some(last)) => timestamp > last,
                _ => true,
            },
        };

        if fresh {
            self.last_seq = bundle.seq.or(self.last_seq);
            self.last_timestamp = bundle.timestamp.or(self.last_timestamp);
        }
        fresh
    }

    fn is_newer(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        match (timestamp, self.last_timestamp) {
            (Some(timestamp), Some(last)) => timestamp > last,
            _ => false,
        }
    }

    /// Forget the last key, eg/ after a new push session where the server may have restarted.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

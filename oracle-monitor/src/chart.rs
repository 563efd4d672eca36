use crate::{
    config::ChartConfig,
    types::{ChartPoint, PriceHistory},
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use itertools::{Itertools, MinMaxResult};

/// Name of the aggregate series built from `/api/chart` points.
pub const AGGREGATE_SERIES: &str = "aggregate";

/// Padded y-axis bounds of a [`ChartWindow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

/// Bounded, gap-tolerant time-series buffer.
///
/// Every series has exactly as many samples as the timestamp axis; a missing sample is
/// `None` and renders as a break in the line.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartWindow {
    timestamps: Vec<Option<DateTime<Utc>>>,
    series: IndexMap<String, Vec<Option<f64>>>,
    range: Option<AxisRange>,
    capacity: usize,
    padding_ratio: f64,
    padding_floor: f64,
}

impl Default for ChartWindow {
    fn default() -> Self {
        Self::new(&ChartConfig::default())
    }
}

impl ChartWindow {
    pub fn new(config: &ChartConfig) -> Self {
        Self {
            timestamps: Vec::new(),
            series: IndexMap::new(),
            range: None,
            capacity: config.capacity.max(1),
            padding_ratio: config.padding_ratio,
            padding_floor: config.padding_floor,
        }
    }

    /// Replace the window contents with `history`, keeping the most recent `capacity` points.
    pub fn update(&mut self, history: &PriceHistory) {
        let len = if history.timestamps.is_empty() {
            history.series.values().map(Vec::len).max().unwrap_or(0)
        } else {
            history.timestamps.len()
        };
        let skip = len.saturating_sub(self.capacity);

        self.timestamps = (0..len)
            .skip(skip)
            .map(|index| history.timestamps.get(index).copied().flatten())
            .collect();

        self.series = history
            .series
            .iter()
            .map(|(name, values)| {
                let aligned = (0..len)
                    .skip(skip)
                    .map(|index| {
                        values
                            .get(index)
                            .copied()
                            .flatten()
                            .filter(|value| value.is_finite() && *value > 0.0)
                    })
                    .collect();
                (name.clone(), aligned)
            })
            .collect();

        self.range = self.compute_range();
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.series.clear();
        self.range = None;
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timestamps(&self) -> &[Option<DateTime<Utc>>] {
        &self.timestamps
    }

    pub fn series(&self) -> &IndexMap<String, Vec<Option<f64>>> {
        &self.series
    }

    /// Padded y-axis range, `None` when no series holds a value.
    pub fn range(&self) -> Option<AxisRange> {
        self.range
    }

    fn compute_range(&self) -> Option<AxisRange> {
        let values = self.series.values().flatten().flatten().copied();
        let (min, max) = match values.minmax_by(f64::total_cmp) {
            MinMaxResult::NoElements => return None,
            MinMaxResult::OneElement(value) => (value, value),
            MinMaxResult::MinMax(min, max) => (min, max),
        };

        let padding = ((max - min) * self.padding_ratio).max(self.padding_floor);
        Some(AxisRange {
            min: min - padding,
            max: max + padding,
        })
    }
}

impl PriceHistory {
    /// Build a history from `/api/chart` points: one aggregate series plus one per exchange.
    pub fn from_chart_points(points: &[ChartPoint]) -> Self {
        let exchanges: Vec<_> = points
            .iter()
            .flat_map(|point| point.exchanges.keys())
            .unique()
            .cloned()
            .collect();

        let mut series = IndexMap::with_capacity(exchanges.len() + 1);
        series.insert(
            AGGREGATE_SERIES.to_string(),
            points
                .iter()
                .map(|point| point.price.filter(|price| *price > 0.0))
                .collect(),
        );
        for exchange in exchanges {
            let values = points
                .iter()
                .map(|point| point.exchanges.get(&exchange).copied().flatten())
                .collect();
            series.insert(exchange.to_string(), values);
        }

        Self {
            timestamps: points.iter().map(|point| point.timestamp).collect(),
            series,
        }
    }
}

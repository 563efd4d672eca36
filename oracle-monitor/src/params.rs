use crate::{
    error::MonitorError,
    persist::{KeyValueStore, PARAMS_KEY},
    sync::SyncHandle,
    types::{AggregationMethod, SourceId, WeightCategory, lenient_f64, lenient_price},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Lowest allowed weight.
pub const MIN_WEIGHT: f64 = 0.0;

/// Highest allowed weight.
pub const MAX_WEIGHT: f64 = 2.0;

/// Weight assumed for any source without an explicit entry.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Operator-tunable oracle parameters, serialised exactly as the `/api/params` body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ParameterSet {
    #[serde(default)]
    pub exchange_weights: IndexMap<SourceId, f64>,
    #[serde(default)]
    pub spread_weights: IndexMap<SourceId, f64>,
    #[serde(default)]
    pub volume_weights: IndexMap<SourceId, f64>,
    #[serde(default)]
    pub depth_weights: IndexMap<SourceId, f64>,
    #[serde(default)]
    pub aggregation_method: AggregationMethod,
    /// `None` means the source is priced automatically.
    #[serde(default)]
    pub manual_prices: IndexMap<SourceId, Option<f64>>,
    /// Top-level keys this client does not understand, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParameterSet {
    /// Every source at [`DEFAULT_WEIGHT`] in every category, average aggregation.
    pub fn defaults(sources: &[SourceId]) -> Self {
        let weights: IndexMap<SourceId, f64> = sources
            .iter()
            .map(|source| (source.clone(), DEFAULT_WEIGHT))
            .collect();

        Self {
            exchange_weights: weights.clone(),
            spread_weights: weights.clone(),
            volume_weights: weights.clone(),
            depth_weights: weights,
            ..Default::default()
        }
    }

    pub fn weights(&self, category: WeightCategory) -> &IndexMap<SourceId, f64> {
        match category {
            WeightCategory::Exchange => &self.exchange_weights,
            WeightCategory::Spread => &self.spread_weights,
            WeightCategory::Volume => &self.volume_weights,
            WeightCategory::Depth => &self.depth_weights,
        }
    }

    fn weights_mut(&mut self, category: WeightCategory) -> &mut IndexMap<SourceId, f64> {
        match category {
            WeightCategory::Exchange => &mut self.exchange_weights,
            WeightCategory::Spread => &mut self.spread_weights,
            WeightCategory::Volume => &mut self.volume_weights,
            WeightCategory::Depth => &mut self.depth_weights,
        }
    }

    /// Weight of `source` in `category`; missing keys read as [`DEFAULT_WEIGHT`].
    pub fn weight(&self, category: WeightCategory, source: &SourceId) -> f64 {
        self.weights(category)
            .get(source)
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn manual_price(&self, source: &SourceId) -> Option<f64> {
        self.manual_prices.get(source).copied().flatten()
    }

    /// Merge a previously persisted blob onto `defaults`, key by key.
    ///
    /// Missing keys keep their default, unparsable values are skipped, out-of-range
    /// weights are clamped into `[0, 2]` and unknown top-level keys are preserved.
    pub fn overlay(defaults: ParameterSet, loaded: &Value) -> ParameterSet {
        let Value::Object(loaded) = loaded else {
            warn!("persisted parameters are not an object, keeping defaults");
            return defaults;
        };

        let mut params = defaults;
        for (key, value) in loaded {
            if let Some(category) = WeightCategory::ALL
                .into_iter()
                .find(|category| category.field_name() == key)
            {
                overlay_weights(params.weights_mut(category), category, value);
                continue;
            }

            match key.as_str() {
                "aggregation_method" => {
                    match serde_json::from_value::<AggregationMethod>(value.clone()) {
                        Ok(method) => params.aggregation_method = method,
                        Err(_) => warn!(%value, "ignoring unknown persisted aggregation method"),
                    }
                }
                "manual_prices" => {
                    let Value::Object(prices) = value else {
                        warn!("ignoring malformed persisted manual prices");
                        continue;
                    };
                    for (source, price) in prices {
                        let price = match price {
                            Value::Null => None,
                            other => match lenient_price(other) {
                                Some(price) => Some(price),
                                None => {
                                    warn!(%source, %other, "ignoring invalid persisted manual price");
                                    continue;
                                }
                            },
                        };
                        params.manual_prices.insert(SourceId::from(source.as_str()), price);
                    }
                }
                _ => {
                    params.extra.insert(key.clone(), value.clone());
                }
            }
        }

        params
    }
}

fn overlay_weights(weights: &mut IndexMap<SourceId, f64>, category: WeightCategory, value: &Value) {
    let Value::Object(loaded) = value else {
        warn!(%category, "ignoring malformed persisted weights");
        return;
    };

    for (source, weight) in loaded {
        let Some(weight) = lenient_f64(weight) else {
            warn!(%category, %source, %weight, "ignoring non-numeric persisted weight");
            continue;
        };
        let clamped = weight.clamp(MIN_WEIGHT, MAX_WEIGHT);
        if clamped != weight {
            warn!(%category, %source, weight, clamped, "clamping out-of-range persisted weight");
        }
        weights.insert(SourceId::from(source.as_str()), clamped);
    }
}

/// Owner of the live [`ParameterSet`]: every mutation is validated, persisted locally and
/// handed to the remote sync worker.
pub struct ParameterStore {
    params: ParameterSet,
    storage: Box<dyn KeyValueStore + Send>,
    sync: Option<SyncHandle>,
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("params", &self.params)
            .field("sync", &self.sync.is_some())
            .finish()
    }
}

impl ParameterStore {
    pub fn new(defaults: ParameterSet, storage: Box<dyn KeyValueStore + Send>) -> Self {
        Self {
            params: defaults,
            storage,
            sync: None,
        }
    }

    /// Route every later change to the remote sync worker.
    pub fn attach_sync(&mut self, sync: SyncHandle) {
        self.sync = Some(sync);
    }

    /// Overlay the persisted copy (if any) onto the current parameters. Never fails: a
    /// corrupt blob is logged and discarded.
    pub fn load(&mut self) {
        let Some(blob) = self.storage.get(PARAMS_KEY) else {
            debug!("no persisted parameters, using defaults");
            return;
        };

        match serde_json::from_str::<Value>(&blob) {
            Ok(loaded) => {
                self.params = ParameterSet::overlay(self.params.clone(), &loaded);
                info!("loaded persisted parameters");
            }
            Err(error) => {
                warn!(%error, "discarding corrupt persisted parameters");
            }
        }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn storage(&self) -> &dyn KeyValueStore {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> &mut (dyn KeyValueStore + Send) {
        self.storage.as_mut()
    }

    /// Set one weight. Non-finite or out-of-range values are rejected and leave the
    /// parameters untouched.
    pub fn set_weight(
        &mut self,
        category: WeightCategory,
        source: &SourceId,
        value: f64,
    ) -> Result<(), MonitorError> {
        if !value.is_finite() || !(MIN_WEIGHT..=MAX_WEIGHT).contains(&value) {
            return Err(MonitorError::WeightOutOfRange {
                category,
                source_id: source.clone(),
                value,
            });
        }

        self.params
            .weights_mut(category)
            .insert(source.clone(), value);
        self.commit_change()
    }

    pub fn set_aggregation_method(&mut self, method: AggregationMethod) -> Result<(), MonitorError> {
        self.params.aggregation_method = method;
        self.commit_change()
    }

    /// Record a manual price for `source`; `None` returns it to automatic pricing.
    pub fn set_manual_price(
        &mut self,
        source: &SourceId,
        price: Option<f64>,
    ) -> Result<(), MonitorError> {
        let price = price.filter(|price| price.is_finite());
        self.params.manual_prices.insert(source.clone(), price);
        self.commit_change()
    }

    /// Hand the full current set to the remote sync worker. Never blocks.
    pub fn sync_remote(&self) {
        match &self.sync {
            Some(sync) => sync.submit(self.params.clone()),
            None => debug!("remote sync disabled, parameters kept locally"),
        }
    }

    /// Re-send the latest set right away if the oracle has not acknowledged it yet.
    pub fn resync_remote(&self) {
        if let Some(sync) = &self.sync {
            sync.resync();
        }
    }

    fn persist(&mut self) -> Result<(), MonitorError> {
        let blob = serde_json::to_string(&self.params)?;
        self.storage.set(PARAMS_KEY, blob)
    }

    fn commit_change(&mut self) -> Result<(), MonitorError> {
        let persisted = self.persist();
        if let Err(error) = &persisted {
            warn!(%error, "failed to persist parameters");
        }
        self.sync_remote();
        persisted
    }
}

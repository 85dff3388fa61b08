//! Exported gauges, keyed by metric identity (name and full label set)
//!
//! Each identity is registered exactly once with the underlying [`prometheus::Registry`].
//! Later polls only set values on the existing gauges.

// Registry prefix clarifies types for parent module
#![allow(clippy::module_name_repetitions)]

use crate::iostat::{Labels, Measurement, PoolSnapshot};
use anyhow::Context as _;
use prometheus::{Encoder as _, Gauge, Opts, TextEncoder};
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Identity of an exported series, independent of label order
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SeriesKey(String);
impl SeriesKey {
    /// Serializes the name with all labels, visiting label keys in sorted order
    #[must_use]
    pub fn new(name: &str, labels: &Labels) -> Self {
        let mut labels: Vec<_> = labels.iter().collect();
        labels.sort_unstable();
        let labels = labels
            .into_iter()
            .map(|(key, value)| format!("{key}={value:?}"))
            .collect::<Vec<_>>()
            .join(",");
        Self(format!("{name}{{{labels}}}"))
    }
    /// Identity of the specified measurement
    #[must_use]
    pub fn of(measurement: &Measurement) -> Self {
        Self::new(&measurement.name, &measurement.labels)
    }
}
impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self(key) = self;
        write!(f, "{key}")
    }
}

/// Update requested for a series that was never registered
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("no gauge registered for series {0}")]
pub struct UnknownSeriesError(pub SeriesKey);

/// Failure to create or register a new gauge
#[derive(Debug, thiserror::Error)]
#[error("failed to register series {key}")]
pub struct RegisterError {
    key: SeriesKey,
    #[source]
    source: prometheus::Error,
}

/// Owner of all exported gauges
pub struct MetricRegistry {
    namespace: String,
    registry: prometheus::Registry,
    gauges: Mutex<HashMap<SeriesKey, Gauge>>,
}
impl MetricRegistry {
    /// Creates an empty registry, prefixing all metric names with `namespace` (if non-empty)
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            registry: prometheus::Registry::new(),
            gauges: Mutex::default(),
        }
    }
    fn lock_gauges(&self) -> MutexGuard<'_, HashMap<SeriesKey, Gauge>> {
        // map entries are inserted only after successful registration
        self.gauges.lock().unwrap_or_else(PoisonError::into_inner)
    }
    /// Creates gauges for any unknown series of the snapshot, and sets all values
    ///
    /// Registering an already-known series only sets its value.
    ///
    /// # Errors
    /// Returns an error if a new gauge is rejected by the underlying registry
    /// (e.g. invalid metric name)
    pub fn register(&self, snapshot: &PoolSnapshot) -> Result<(), RegisterError> {
        let mut gauges = self.lock_gauges();
        for measurement in snapshot.measurements() {
            let gauge = match gauges.entry(SeriesKey::of(measurement)) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let gauge = self
                        .create_gauge(measurement)
                        .map_err(|source| RegisterError {
                            key: entry.key().clone(),
                            source,
                        })?;
                    tracing::debug!(series = %entry.key(), "registered gauge");
                    entry.insert(gauge)
                }
            };
            gauge.set(measurement.value);
        }
        Ok(())
    }
    fn create_gauge(&self, measurement: &Measurement) -> prometheus::Result<Gauge> {
        let Measurement {
            name, help, labels, ..
        } = measurement;
        let opts = Opts::new(name, help)
            .namespace(self.namespace.clone())
            .const_labels(labels.clone());
        let gauge = Gauge::with_opts(opts)?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }
    /// Sets the values of the already-registered series of the snapshot
    ///
    /// No value is set unless every series of the snapshot is known.
    ///
    /// # Errors
    /// Returns an error if any series of the snapshot was never registered
    pub fn update(&self, snapshot: &PoolSnapshot) -> Result<(), UnknownSeriesError> {
        let gauges = self.lock_gauges();
        let resolved = snapshot
            .measurements()
            .map(|measurement| {
                let key = SeriesKey::of(measurement);
                match gauges.get(&key) {
                    Some(gauge) => Ok((gauge, measurement.value)),
                    None => Err(UnknownSeriesError(key)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (gauge, value) in resolved {
            gauge.set(value);
        }
        Ok(())
    }
    /// Current value of the specified series, if registered
    #[cfg(test)]
    fn value(&self, key: &SeriesKey) -> Option<f64> {
        self.lock_gauges().get(key).map(Gauge::get)
    }
    /// Number of registered series
    #[must_use]
    pub fn series_count(&self) -> usize {
        self.lock_gauges().len()
    }
    /// Content type of [`Self::render`]
    #[must_use]
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
    /// Renders all registered series in the Prometheus text format
    ///
    /// # Errors
    /// Returns an error if the encoding fails
    pub fn render(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .context("encoding metrics")?;
        String::from_utf8(buffer).context("metrics text")
    }
}

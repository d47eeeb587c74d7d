//! Gauge registry backing the `/metrics` endpoint
//!
//! Gauges are keyed by a stable metric key (`INBOX_total`, `Label_3_sender`,
//! `urgent`, ...) and live for the whole process. Registration is
//! idempotent: the first description and dimension set win, later calls with
//! the same key return the existing gauge.

use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{ExporterError, Result};

/// Dimension carried by per-sender gauges
pub const SENDER_DIMENSION: &str = "sender";

static INVALID_METRIC_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("static regex is valid"));

/// Handle to a registered gauge; clones share the same series
#[derive(Clone, Debug)]
pub enum GaugeHandle {
    Scalar(Gauge),
    Dimensioned(GaugeVec),
}

impl GaugeHandle {
    /// Set a scalar gauge
    pub fn set(&self, value: f64) -> Result<()> {
        match self {
            GaugeHandle::Scalar(gauge) => {
                gauge.set(value);
                Ok(())
            }
            GaugeHandle::Dimensioned(_) => Err(ExporterError::Unknown(
                "gauge has dimensions, use set_for".to_string(),
            )),
        }
    }

    /// Set the series for one dimension value, leaving the others untouched
    pub fn set_for(&self, dimension_value: &str, value: f64) -> Result<()> {
        match self {
            GaugeHandle::Dimensioned(vec) => {
                vec.get_metric_with_label_values(&[dimension_value])?
                    .set(value);
                Ok(())
            }
            GaugeHandle::Scalar(_) => Err(ExporterError::Unknown(
                "gauge has no dimensions, use set".to_string(),
            )),
        }
    }

    /// Current value of a scalar gauge
    pub fn value(&self) -> Option<f64> {
        match self {
            GaugeHandle::Scalar(gauge) => Some(gauge.get()),
            GaugeHandle::Dimensioned(_) => None,
        }
    }

    /// Current value for one dimension value, if that series exists
    pub fn value_for(&self, dimension_value: &str) -> Option<f64> {
        let GaugeHandle::Dimensioned(vec) = self else {
            return None;
        };

        vec.collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_value() == dimension_value)
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Drop every dimension series of this gauge
    pub fn reset(&self) {
        if let GaugeHandle::Dimensioned(vec) = self {
            vec.reset();
        }
    }
}

/// Process-lifetime mapping from metric key to gauge
pub struct MetricRegistry {
    namespace: String,
    registry: Registry,
    gauges: HashMap<String, GaugeHandle>,
}

impl MetricRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_registry(namespace, Registry::new())
    }

    /// Build on top of an existing registry (shared with the HTTP server)
    pub fn with_registry(namespace: impl Into<String>, registry: Registry) -> Self {
        Self {
            namespace: namespace.into(),
            registry,
            gauges: HashMap::new(),
        }
    }

    /// Prometheus registry that scrapes read from
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Exposed metric name for a key
    pub fn metric_name(&self, key: &str) -> String {
        format!(
            "{}_{}",
            self.namespace,
            INVALID_METRIC_CHARS.replace_all(key, "_")
        )
    }

    /// Get the gauge for `key`, registering it on first use
    pub fn get_or_create(
        &mut self,
        key: &str,
        description: &str,
        dimension_names: &[&str],
    ) -> Result<GaugeHandle> {
        if let Some(handle) = self.gauges.get(key) {
            return Ok(handle.clone());
        }

        let name = self.metric_name(key);
        // Prometheus rejects empty help strings
        let help = if description.trim().is_empty() {
            key
        } else {
            description
        };
        let opts = Opts::new(name.clone(), help);

        let handle = if dimension_names.is_empty() {
            let gauge = Gauge::with_opts(opts)?;
            self.registry.register(Box::new(gauge.clone()))?;
            GaugeHandle::Scalar(gauge)
        } else {
            let vec = GaugeVec::new(opts, dimension_names)?;
            self.registry.register(Box::new(vec.clone()))?;
            GaugeHandle::Dimensioned(vec)
        };

        debug!("Registered gauge {} ({})", name, help);
        self.gauges.insert(key.to_string(), handle.clone());
        Ok(handle)
    }

    /// Previously registered gauge for `key`
    pub fn get(&self, key: &str) -> Option<GaugeHandle> {
        self.gauges.get(key).cloned()
    }

    /// Number of distinct keys registered so far
    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }
}

/// Encode every metric family of `registry` as Prometheus text
pub fn render_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| ExporterError::Unknown(format!("Metrics output is not UTF-8: {}", e)))
}

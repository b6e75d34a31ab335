// Copyright 2025 Marketplace Operator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Folds the label records of one metric group into a usage event.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;

use chrono::SecondsFormat;
use twox_hash::XxHash64;

use super::types::{
    MarketplaceReportData, MeasuredUsage, MetricKey, ReportContext, ReportInterval, ReportLabels,
};

/// Terminal failures of [`MarketplaceReportDataBuilder::build`]. The caller
/// discards the batch; there is never a partial result.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// No label records were added
    #[error("no values set")]
    NoValuesSet,

    /// The batch mixes records of different identity hashes
    #[error("value hashes are different: expected {expected}, found {found}")]
    ValueHashesDifferent {
        /// Hash of the first record
        expected: String,
        /// First hash that did not match
        found: String,
    },

    /// A metric value is not numeric
    #[error("value {value:?} is not a float64")]
    NotFloat64 {
        /// The raw value
        value: String,
    },

    /// The report context (cluster id) was never set
    #[error("no report context set")]
    NoReportContext,
}

/// Collects label records sharing one identity hash and builds the usage
/// event for them.
#[derive(Clone, Debug)]
pub struct MarketplaceReportDataBuilder {
    values: Vec<ReportLabels>,
    context: Option<ReportContext>,
    interval: ReportInterval,
}

impl MarketplaceReportDataBuilder {
    /// Starts an empty builder for the given window
    #[must_use]
    pub fn new(interval: ReportInterval) -> Self {
        Self {
            values: Vec::new(),
            context: None,
            interval,
        }
    }

    /// Adds one label record
    pub fn add_metric_value(&mut self, value: ReportLabels) -> &mut Self {
        self.values.push(value);
        self
    }

    /// Sets the environment stamped into the event
    pub fn set_report_context(&mut self, context: ReportContext) -> &mut Self {
        self.context = Some(context);
        self
    }

    /// Builds the usage event.
    ///
    /// Attribute keys whose values disagree are excluded from the moment the
    /// disagreement is seen. Usage entries built before that keep the key.
    ///
    /// # Errors
    ///
    /// Any [`BuildError`]; all of them reject the whole batch.
    pub fn build(&self) -> Result<MarketplaceReportData, BuildError> {
        let first = self.values.first().ok_or(BuildError::NoValuesSet)?;
        let context = self.context.as_ref().ok_or(BuildError::NoReportContext)?;

        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        let mut excluded: BTreeSet<&str> = BTreeSet::new();
        let mut measured_usage = Vec::with_capacity(self.values.len());

        for record in &self.values {
            if record.hash != first.hash {
                return Err(BuildError::ValueHashesDifferent {
                    expected: first.hash.clone(),
                    found: record.hash.clone(),
                });
            }

            let value = record
                .value
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| BuildError::NotFloat64 {
                    value: record.value.clone(),
                })?;

            let mut attributes = BTreeMap::new();
            for (key, val) in &record.labels {
                if excluded.contains(key.as_str()) {
                    continue;
                }
                match seen.get(key.as_str()) {
                    Some(prev) if *prev != val.as_str() => {
                        excluded.insert(key);
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        seen.insert(key, val);
                    }
                }
                attributes.insert(key.clone(), val.clone());
            }

            measured_usage.push(MeasuredUsage {
                metric_id: record.key.metric.clone(),
                value,
                additional_attributes: attributes,
            });
        }

        let additional_attributes = seen
            .into_iter()
            .filter(|(key, _)| !excluded.contains(key))
            .map(|(key, val)| (key.to_string(), val.to_string()))
            .collect();

        Ok(MarketplaceReportData {
            event_id: event_id(context, &self.interval, &first.key),
            interval_start: self.interval.start,
            interval_end: self.interval.end,
            account_id: context.account_id.clone(),
            additional_attributes,
            measured_usage,
        })
    }
}

/// Stable event identifier: lowercase hex xxHash64 of the cluster id, the
/// RFC3339 window bounds and the metric identity fields, concatenated.
#[must_use]
pub fn event_id(context: &ReportContext, interval: &ReportInterval, key: &MetricKey) -> String {
    let start = interval.start.to_rfc3339_opts(SecondsFormat::Secs, true);
    let end = interval.end.to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut hasher = XxHash64::with_seed(0);
    for part in [
        context.cluster_id.as_str(),
        &start,
        &end,
        &key.group,
        &key.kind,
        &key.metric,
        &key.namespace,
        &key.name,
        &key.unit,
    ] {
        hasher.write(part.as_bytes());
    }

    format!("{:x}", hasher.finish())
}

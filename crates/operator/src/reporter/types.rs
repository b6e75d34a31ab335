//! Report input records and the usage events built from them

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use marketplace_crd::MeterReportSpec;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Dimensional identity of a metric
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricKey {
    /// API group of the metered workload
    pub group: String,
    /// Kind of the metered workload
    pub kind: String,
    /// Metric name
    pub metric: String,
    /// Namespace of the metered resource
    pub namespace: String,
    /// Name of the metered resource
    pub name: String,
    /// Unit of measure
    pub unit: String,
}

/// One per-metric label record as collected from the metrics backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportLabels {
    /// Grouping key shared by every record of one usage event
    pub hash: String,
    /// Raw sample value
    pub value: String,
    /// Metric identity
    #[serde(flatten)]
    pub key: MetricKey,
    /// Attribute labels of the sample
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Environment stamped into every usage event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportContext {
    /// Identifier of the reporting cluster
    pub cluster_id: String,
    /// Marketplace account, when known
    pub account_id: Option<String>,
}

/// Reporting window in UTC
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportInterval {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl ReportInterval {
    /// Creates a window, rejecting empty or inverted ones
    ///
    /// # Errors
    ///
    /// Fails when `start` is not before `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::Message(format!(
                "report interval start {start} is not before end {end}"
            )));
        }
        Ok(Self { start, end })
    }
}

impl TryFrom<&MeterReportSpec> for ReportInterval {
    type Error = Error;

    fn try_from(spec: &MeterReportSpec) -> Result<Self> {
        Self::new(spec.start_time.0, spec.end_time.0)
    }
}

/// Usage of one metric sample
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasuredUsage {
    /// Metric name
    pub metric_id: String,
    /// Sample value
    pub value: f64,
    /// Attributes that had not conflicted when this entry was built
    pub additional_attributes: BTreeMap<String, String>,
}

/// A usage event ready for upload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceReportData {
    /// Stable identifier, see [`super::event_id`]
    pub event_id: String,
    /// Window start
    #[serde(rename = "start", with = "chrono::serde::ts_milliseconds")]
    pub interval_start: DateTime<Utc>,
    /// Window end
    #[serde(rename = "end", with = "chrono::serde::ts_milliseconds")]
    pub interval_end: DateTime<Utc>,
    /// Marketplace account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Attributes consistent across the whole batch
    pub additional_attributes: BTreeMap<String, String>,
    /// One entry per label record
    pub measured_usage: Vec<MeasuredUsage>,
}

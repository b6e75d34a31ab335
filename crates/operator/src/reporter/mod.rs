// Copyright 2025 Marketplace Operator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Usage report building for `MeterReport` windows

mod builder;
mod types;

use std::collections::HashMap;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use marketplace_crd::v1_alpha1::ReportError;
use marketplace_crd::{MeterReport, MeterReportStatus};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

pub use builder::{BuildError, MarketplaceReportDataBuilder, event_id};
pub use types::{
    MarketplaceReportData, MeasuredUsage, MetricKey, ReportContext, ReportInterval, ReportLabels,
};

use crate::config::ReportArgs;
use crate::{Error, Result};

/// Events built for one report window, with the status to publish
#[derive(Clone, Debug)]
pub struct Report {
    /// One event per label group that built
    pub events: Vec<MarketplaceReportData>,
    /// Counts and failed groups
    pub status: MeterReportStatus,
}

#[derive(Serialize)]
struct ReportOutput<'a> {
    events: &'a [MarketplaceReportData],
}

/// Splits records into groups of equal hash, groups ordered by first
/// appearance and records keeping their relative order.
#[must_use]
pub fn group_by_hash(records: Vec<ReportLabels>) -> Vec<Vec<ReportLabels>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<ReportLabels>> = Vec::new();

    for record in records {
        let position = *positions.entry(record.hash.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[position].push(record);
    }

    groups
}

/// Builds one event per hash group. A group that fails is recorded in the
/// status errors and skipped; the other groups still build.
#[must_use]
pub fn build_report(
    interval: ReportInterval,
    context: &ReportContext,
    records: Vec<ReportLabels>,
) -> Report {
    let metric_records = records.len();
    let mut events = Vec::new();
    let mut errors = Vec::new();

    for group in group_by_hash(records) {
        let hash = group.first().map(|r| r.hash.clone()).unwrap_or_default();

        let mut builder = MarketplaceReportDataBuilder::new(interval);
        builder.set_report_context(context.clone());
        for record in group {
            builder.add_metric_value(record);
        }

        match builder.build() {
            Ok(event) => {
                debug!(%hash, event_id = %event.event_id, "built usage event");
                events.push(event);
            }
            Err(e) => {
                warn!(%hash, error = %e, "discarding label group");
                errors.push(ReportError {
                    hash,
                    message: e.to_string(),
                });
            }
        }
    }

    let status = MeterReportStatus {
        metric_records: i32::try_from(metric_records).unwrap_or(i32::MAX),
        events_built: i32::try_from(events.len()).unwrap_or(i32::MAX),
        errors,
        last_built: Some(Time(Utc::now())),
    };

    Report { events, status }
}

/// Runs the `report` command: reads the window and the label records, builds
/// the events, writes them out and, for in-cluster reports, patches the
/// status.
///
/// # Errors
///
/// Fails on unreadable input, an invalid window or Kubernetes API errors.
/// Label groups that do not build are not errors.
#[instrument(skip(args), fields(labels = %args.labels.display()))]
pub async fn run(args: ReportArgs) -> Result<()> {
    let (meter_report, client) = match &args.meter_report {
        Some(path) => {
            let manifest = tokio::fs::read(path).await?;
            (serde_yaml::from_slice::<MeterReport>(&manifest)?, None)
        }
        None => {
            let name = args
                .name
                .as_deref()
                .ok_or_else(|| "Either a meter report file or name is required".to_string())?;
            let client = Client::try_default().await?;
            let namespace = args
                .namespace
                .clone()
                .unwrap_or_else(|| client.default_namespace().to_string());
            let api: Api<MeterReport> = Api::namespaced(client.clone(), &namespace);
            (api.get(name).await?, Some(client))
        }
    };

    let interval = ReportInterval::try_from(&meter_report.spec)?;
    let records: Vec<ReportLabels> = serde_json::from_slice(&tokio::fs::read(&args.labels).await?)?;

    info!(
        meter_report = %meter_report.name_any(),
        records = records.len(),
        start = %interval.start,
        end = %interval.end,
        "building usage events"
    );

    let context = ReportContext {
        cluster_id: args.cluster_id.clone(),
        account_id: args.account_id.clone(),
    };
    let report = build_report(interval, &context, records);

    let output = serde_json::to_vec_pretty(&ReportOutput {
        events: &report.events,
    })?;
    match &args.output {
        Some(path) => tokio::fs::write(path, output).await?,
        None => {
            use tokio::io::AsyncWriteExt as _;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&output).await?;
            stdout.flush().await?;
        }
    }

    info!(
        events_built = report.status.events_built,
        groups_failed = report.status.errors.len(),
        "usage events written"
    );

    if let Some(client) = client {
        flush_status(client, &meter_report, report.status).await?;
    }

    Ok(())
}

/// Merge patches the status subresource of `report`
///
/// # Errors
///
/// Fails when the report has no name or namespace or the API call fails.
#[instrument(skip(client, report, status), fields(
    meter_report = report.metadata.name.as_deref(),
    meter_report_namespace = report.metadata.namespace.as_deref(),
))]
pub async fn flush_status(
    client: Client,
    report: &MeterReport,
    status: MeterReportStatus,
) -> Result<MeterReport> {
    let ns = &report
        .namespace()
        .ok_or_else(|| Error::from("Unable to get report namespace".to_string()))?;
    let api: Api<MeterReport> = Api::namespaced(client, ns);

    let name = report
        .metadata
        .name
        .as_ref()
        .ok_or_else(|| "Object has a missing name".to_string())?;

    debug!(
        metric_records = status.metric_records,
        events_built = status.events_built,
        "flushing status to API server"
    );

    let status_patch = Patch::Merge(json!({"status": serde_json::to_value(status)?}));

    let result = api
        .patch_status(name, &PatchParams::default(), &status_patch)
        .await?;

    Ok(result)
}

//! v1Alpha1 CRD resources

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec object for the `MeterReport` CRD
///
/// A meter report covers a closed window of metered usage. The reporter
/// aggregates every label record collected for that window into usage events.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(kind = "MeterReport", group = "marketplace.redhat.com", version = "v1alpha1")]
#[kube(status = "MeterReportStatus", shortname = "mr")]
#[kube(namespaced)]
pub struct MeterReportSpec {
    /// Start of the reporting window (inclusive)
    pub start_time: Time,
    /// End of the reporting window (exclusive)
    pub end_time: Time,
}

/// A label group that could not be turned into a usage event
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportError {
    /// Identity hash of the rejected group
    pub hash: String,
    /// Why the group was rejected
    pub message: String,
}

/// State object for the `MeterReport` CRD
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeterReportStatus {
    /// Number of label records read for the window
    #[schemars(range(min = 0))]
    pub metric_records: i32,
    /// Number of usage events built
    #[schemars(range(min = 0))]
    pub events_built: i32,
    /// Groups that failed to build
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ReportError>,
    /// When the report was last built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_built: Option<Time>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = MeterReport::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("meterreports.marketplace.redhat.com"));
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.short_names, Some(vec!["mr".to_string()]));

        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }

    #[test]
    fn manifest_reads_from_yaml() {
        let manifest = r"
apiVersion: marketplace.redhat.com/v1alpha1
kind: MeterReport
metadata:
  name: may
  namespace: billing
spec:
  startTime: 2024-05-01T00:00:00Z
  endTime: 2024-05-02T00:00:00Z
";
        let report: MeterReport = serde_yaml::from_str(manifest).unwrap();
        assert_eq!(report.spec.start_time.0.to_rfc3339(), "2024-05-01T00:00:00+00:00");
        assert!(report.status.is_none());
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::scheduler::JobOutcome;

/// Last firing of a cleanup job
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    /// When the job last fired
    pub last_fired: DateTime<Utc>,
    /// What that firing did
    pub outcome: JobOutcome,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// When the process started
    pub started_at: DateTime<Utc>,
    /// Leadership as observed by the last job firing
    pub leader: Option<bool>,
    /// Last firing per job tag
    pub jobs: BTreeMap<String, JobReport>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            leader: None,
            jobs: BTreeMap::new(),
        }
    }
}

impl Diagnostics {
    /// Records the outcome of a job firing
    pub fn record(&mut self, tag: &str, fired_at: DateTime<Utc>, outcome: JobOutcome) {
        self.leader = match &outcome {
            JobOutcome::NotLeader => Some(false),
            JobOutcome::LeadershipUnknown { .. } => None,
            _ => Some(true),
        };
        self.jobs.insert(
            tag.to_string(),
            JobReport {
                last_fired: fired_at,
                outcome,
            },
        );
    }
}

/// Holds the state of the whole application
#[derive(Clone, Default)]
pub struct State {
    /// Atomic lock for diagnostics
    pub diagnostics: Arc<RwLock<Diagnostics>>,
}

impl State {
    /// Getter for diagnostics with read lock
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_last_outcome_per_tag() {
        let state = State::default();
        let now = Utc::now();
        {
            let mut diag = state.diagnostics.write().await;
            diag.record("cleanAfter", now, JobOutcome::NotLeader);
            diag.record("purgeAfter", now, JobOutcome::Cleaned { files: 3 });
        }

        let diag = state.diagnostics().await;
        assert_eq!(diag.leader, Some(true));
        assert_eq!(diag.jobs.len(), 2);
        assert!(matches!(
            diag.jobs["purgeAfter"].outcome,
            JobOutcome::Cleaned { files: 3 }
        ));

        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["jobs"]["cleanAfter"]["outcome"]["result"], "notLeader");
    }
}

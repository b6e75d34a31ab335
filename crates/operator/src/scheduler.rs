// Copyright 2025 Marketplace Operator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Leader gated tombstone cleanup.
//!
//! A [`SchedulerConfig`] turns a cron expression and up to two relative
//! thresholds into recurring jobs. Every firing asks the
//! [`LeadershipOracle`] first; only the leader calls the store. Within one
//! scheduler at most one job body runs at a time, a job that comes due while
//! another runs waits for it.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Span, debug, error, field, info, instrument, warn};

use crate::lease::LeadershipOracle;
use crate::store::TombstoneStore;
use crate::{Error, Result, State, duration, telemetry};

/// Tag of the job that tombstones old files
pub const CLEAN_AFTER_TAG: &str = "cleanAfter";
/// Tag of the job that purges old tombstones
pub const PURGE_AFTER_TAG: &str = "purgeAfter";

/// One recurring cleanup job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupJob {
    /// `cleanAfter` or `purgeAfter`
    pub tag: &'static str,
    /// When the job fires
    pub cron_expression: String,
    /// Relative threshold, e.g. `-24h`; parsed on every firing
    pub after: String,
    /// Purge tombstones instead of tagging files
    pub purge: bool,
}

/// What a single job firing did
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum JobOutcome {
    /// Another replica leads, nothing was done
    NotLeader,
    /// Leadership could not be determined, nothing was done
    LeadershipUnknown {
        /// Why the query failed
        error: String,
    },
    /// The threshold did not parse, nothing was done
    InvalidDuration {
        /// Why the threshold was rejected
        error: String,
    },
    /// The store rejected the cleanup
    StoreFailed {
        /// Store error
        error: String,
    },
    /// The store cleaned files
    Cleaned {
        /// Number of affected files
        files: usize,
    },
}

/// Cleanup schedule plus the collaborators the jobs run against
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Cron expression shared by both jobs
    pub cron_expression: String,
    /// Threshold for tagging files, empty disables the job
    pub clean_after: String,
    /// Threshold for purging tombstones, empty disables the job
    pub purge_after: String,
    /// Cluster leadership
    pub leadership: Arc<dyn LeadershipOracle>,
    /// File store to clean
    pub store: Arc<dyn TombstoneStore>,
    /// Diagnostics sink
    pub state: State,
}

/// Running cleanup jobs. Dropping the handle leaves them running.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SchedulerHandle {
    /// Tags of the registered jobs
    #[must_use]
    pub fn tags(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(tag, _)| *tag).collect()
    }

    /// Stops every job. An in-flight store call is dropped at its next await.
    pub fn shutdown(self) {
        for (tag, task) in self.tasks {
            debug!(tag, "stopping cleanup job");
            task.abort();
        }
    }
}

impl SchedulerConfig {
    /// The jobs this configuration asks for, one per non-empty threshold
    #[must_use]
    pub fn jobs(&self) -> Vec<CleanupJob> {
        [
            (CLEAN_AFTER_TAG, &self.clean_after, false),
            (PURGE_AFTER_TAG, &self.purge_after, true),
        ]
        .into_iter()
        .filter(|(_, after, _)| !after.trim().is_empty())
        .map(|(tag, after, purge)| CleanupJob {
            tag,
            cron_expression: self.cron_expression.clone(),
            after: after.trim().to_string(),
            purge,
        })
        .collect()
    }

    /// Registers the cleanup jobs and starts running them.
    ///
    /// Returns `None` when nothing was scheduled: both thresholds empty
    /// (cleanup disabled) or no job had a valid cron expression (logged).
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_scheduler(&self) -> Option<SchedulerHandle> {
        let jobs = self.jobs();
        if jobs.is_empty() {
            debug!("no cleanup thresholds configured, scheduler disabled");
            return None;
        }

        let running = Arc::new(Mutex::new(()));
        let mut tasks = Vec::with_capacity(jobs.len());

        for job in jobs {
            let schedule = match parse_cron(&job.cron_expression) {
                Ok(schedule) => schedule,
                Err(e) => {
                    error!(
                        tag = job.tag,
                        cron = %job.cron_expression,
                        error = %e,
                        "invalid cron expression, job not scheduled"
                    );
                    continue;
                }
            };

            info!(
                tag = job.tag,
                cron = %job.cron_expression,
                after = %job.after,
                purge = job.purge,
                "scheduled cleanup job"
            );

            let tag = job.tag;
            let task = tokio::spawn(run_job_loop(
                job,
                schedule,
                self.leadership.clone(),
                self.store.clone(),
                self.state.clone(),
                running.clone(),
            ));
            tasks.push((tag, task));
        }

        if tasks.is_empty() {
            return None;
        }

        Some(SchedulerHandle { tasks })
    }
}

/// Parses a cron expression.
///
/// Five field expressions use the classic crontab dialect: they fire at second
/// zero and number the days of the week from 0 (Sunday) to 7 (Sunday again).
/// Six and seven field expressions and `@` shorthands are read as the `cron`
/// crate reads them.
///
/// # Errors
///
/// Returns the parser error for malformed expressions.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let schedule: Schedule = match fields.as_slice() {
        [minute, hour, day_of_month, month, day_of_week] => format!(
            "0 {minute} {hour} {day_of_month} {month} {}",
            crontab_day_of_week(day_of_week)?
        )
        .parse()?,
        _ => expression.parse()?,
    };
    Ok(schedule)
}

/// Rewrites a crontab day-of-week field (0 and 7 are Sunday) into the
/// numbering of the `cron` crate (1 is Sunday). Numeric ranges and steps are
/// expanded into a list so that ranges ending on 7 do not wrap. Names, `*` and
/// `?` pass through.
fn crontab_day_of_week(field: &str) -> Result<String> {
    let invalid = || Error::Message(format!("invalid day of week field: {field}"));

    let mut items = Vec::new();
    for item in field.split(',') {
        if item == "*" || item == "?" || item.chars().any(|c| c.is_ascii_alphabetic()) {
            items.push(item.to_string());
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<usize>().map_err(|_| invalid())?)),
            None => (item, None),
        };
        let (first, last) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((first, last)) => (
                first.parse::<u8>().map_err(|_| invalid())?,
                last.parse::<u8>().map_err(|_| invalid())?,
            ),
            None => {
                let day = range.parse::<u8>().map_err(|_| invalid())?;
                (day, if step.is_some() { 7 } else { day })
            }
        };
        if last > 7 || first > last || step == Some(0) {
            return Err(invalid());
        }

        let days: BTreeSet<u8> = (first..=last)
            .step_by(step.unwrap_or(1))
            .map(|day| day % 7 + 1)
            .collect();
        items.extend(days.iter().map(ToString::to_string));
    }

    Ok(items.join(","))
}

async fn run_job_loop(
    job: CleanupJob,
    schedule: Schedule,
    leadership: Arc<dyn LeadershipOracle>,
    store: Arc<dyn TombstoneStore>,
    state: State,
    running: Arc<Mutex<()>>,
) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(tag = job.tag, "cron expression has no upcoming firing, job stopped");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        sleep(wait).await;

        let _running = running.lock().await;
        let fired_at = Utc::now();
        let outcome = run_cleanup(&job, leadership.as_ref(), store.as_ref(), fired_at).await;
        state
            .diagnostics
            .write()
            .await
            .record(job.tag, fired_at, outcome);
    }
}

/// Runs one firing of `job` as of `now`: leadership check, cutoff
/// computation, store cleanup. Every failure is logged and reported in the
/// outcome, none is retried.
#[instrument(skip(job, leadership, store), fields(
    tag = job.tag,
    purge = job.purge,
    after = %job.after,
    trace_id = field::Empty,
))]
pub async fn run_cleanup(
    job: &CleanupJob,
    leadership: &dyn LeadershipOracle,
    store: &dyn TombstoneStore,
    now: DateTime<Utc>,
) -> JobOutcome {
    let trace_id = telemetry::get_trace_id();
    if trace_id != opentelemetry::trace::TraceId::INVALID {
        Span::current().record("trace_id", field::display(&trace_id));
    }

    match leadership.is_leader().await {
        Ok(true) => {}
        Ok(false) => {
            debug!("not the leader, skipping cleanup");
            return JobOutcome::NotLeader;
        }
        Err(e) => {
            warn!(error = %e, "leadership check failed, skipping cleanup");
            return JobOutcome::LeadershipUnknown {
                error: e.to_string(),
            };
        }
    }

    let threshold = match duration::parse(&job.after) {
        Ok(threshold) => threshold,
        Err(e) => {
            error!(error = %e, "invalid cleanup threshold, skipping cleanup");
            return JobOutcome::InvalidDuration {
                error: e.to_string(),
            };
        }
    };

    let Some(cutoff) = now.checked_add_signed(threshold) else {
        error!("cleanup threshold moves the cutoff out of range, skipping cleanup");
        return JobOutcome::InvalidDuration {
            error: format!("cutoff {now} + {threshold} out of range"),
        };
    };

    match store.clean_tombstones(cutoff, job.purge).await {
        Ok(files) => {
            let ids: Vec<String> = files.iter().map(ToString::to_string).collect();
            info!(
                cutoff = %cutoff,
                files = files.len(),
                ids = ?ids,
                "tombstone cleanup finished"
            );
            JobOutcome::Cleaned { files: files.len() }
        }
        Err(e) => {
            error!(cutoff = %cutoff, error = %e, "tombstone cleanup failed");
            JobOutcome::StoreFailed {
                error: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::AlwaysLeader;
    use crate::store::FileId;
    use async_trait::async_trait;
    use chrono::{Datelike, TimeDelta, Weekday};

    struct FixedLeadership(Option<bool>);

    #[async_trait]
    impl LeadershipOracle for FixedLeadership {
        async fn is_leader(&self) -> Result<bool> {
            self.0
                .ok_or_else(|| Error::LeadershipError("lease api unreachable".into()))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        calls: std::sync::Mutex<Vec<(DateTime<Utc>, bool)>>,
        fail: bool,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<(DateTime<Utc>, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TombstoneStore for RecordingStore {
        async fn clean_tombstones(
            &self,
            cutoff: DateTime<Utc>,
            purge: bool,
        ) -> Result<Vec<FileId>> {
            self.calls.lock().unwrap().push((cutoff, purge));
            if self.fail {
                return Err(Error::Message("database locked".into()));
            }
            Ok(vec![FileId {
                id: "1".into(),
                name: "usage.tar.gz".into(),
            }])
        }
    }

    fn config(clean_after: &str, purge_after: &str) -> SchedulerConfig {
        SchedulerConfig {
            cron_expression: "0 0 * * *".into(),
            clean_after: clean_after.into(),
            purge_after: purge_after.into(),
            leadership: Arc::new(AlwaysLeader),
            store: Arc::new(RecordingStore::default()),
            state: State::default(),
        }
    }

    fn job(after: &str, purge: bool) -> CleanupJob {
        CleanupJob {
            tag: if purge { PURGE_AFTER_TAG } else { CLEAN_AFTER_TAG },
            cron_expression: "* * * * * *".into(),
            after: after.into(),
            purge,
        }
    }

    #[test]
    fn one_job_per_threshold() {
        assert!(config("", "").jobs().is_empty());
        assert!(config("  ", "").jobs().is_empty());

        let clean_only = config("-24h", "").jobs();
        assert_eq!(clean_only.len(), 1);
        assert_eq!(clean_only[0].tag, CLEAN_AFTER_TAG);
        assert!(!clean_only[0].purge);

        let both = config("-24h", "-720h").jobs();
        assert_eq!(
            both.iter().map(|j| (j.tag, j.purge)).collect::<Vec<_>>(),
            vec![(CLEAN_AFTER_TAG, false), (PURGE_AFTER_TAG, true)]
        );
        assert_eq!(both[1].after, "-720h");
        assert_eq!(both[1].cron_expression, "0 0 * * *");
    }

    #[tokio::test]
    async fn disabled_configuration_schedules_nothing() {
        assert!(config("", "").start_scheduler().is_none());
    }

    #[tokio::test]
    async fn invalid_cron_schedules_nothing() {
        let mut cfg = config("-24h", "-48h");
        cfg.cron_expression = "every tuesday".into();
        assert!(cfg.start_scheduler().is_none());
    }

    #[tokio::test]
    async fn valid_configuration_registers_tagged_jobs() {
        let handle = config("-24h", "-48h").start_scheduler().unwrap();
        assert_eq!(handle.tags(), vec![CLEAN_AFTER_TAG, PURGE_AFTER_TAG]);
        handle.shutdown();
    }

    #[test]
    fn cron_accepts_five_and_six_fields() {
        assert!(parse_cron("0 0 * * *").is_ok());
        assert!(parse_cron("*/10 * * * * *").is_ok());
        assert!(parse_cron("@daily").is_ok());
        assert!(parse_cron("not a cron").is_err());

        let schedule = parse_cron("30 2 * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.format("%M:%S").to_string(), "30:00");
    }

    fn weekdays(expression: &str, firings: usize) -> Vec<Weekday> {
        parse_cron(expression)
            .unwrap()
            .upcoming(Utc)
            .take(firings)
            .map(|next| next.weekday())
            .collect()
    }

    #[test]
    fn five_field_day_of_week_counts_from_sunday_zero() {
        assert_eq!(weekdays("0 0 * * 1", 3), vec![Weekday::Mon; 3]);
        assert_eq!(weekdays("0 0 * * 0", 2), vec![Weekday::Sun; 2]);
        assert_eq!(weekdays("0 0 * * 7", 2), vec![Weekday::Sun; 2]);
        assert_eq!(weekdays("0 0 * * MON", 2), vec![Weekday::Mon; 2]);
    }

    #[test]
    fn five_field_day_of_week_ranges_lists_and_steps() {
        let workdays = weekdays("0 0 * * 1-5", 10);
        assert!(
            workdays
                .iter()
                .all(|day| !matches!(day, Weekday::Sat | Weekday::Sun)),
            "{workdays:?}"
        );
        assert_eq!(workdays.len(), 10);

        let weekend = weekdays("0 0 * * 6-7", 4);
        assert!(
            weekend
                .iter()
                .all(|day| matches!(day, Weekday::Sat | Weekday::Sun)),
            "{weekend:?}"
        );

        let listed = weekdays("0 0 * * 0,3", 4);
        assert!(
            listed
                .iter()
                .all(|day| matches!(day, Weekday::Sun | Weekday::Wed)),
            "{listed:?}"
        );

        let stepped = weekdays("0 0 * * */2", 8);
        assert!(
            stepped
                .iter()
                .all(|day| matches!(day, Weekday::Sun | Weekday::Tue | Weekday::Thu | Weekday::Sat)),
            "{stepped:?}"
        );
    }

    #[test]
    fn five_field_day_of_week_rejects_out_of_range_days() {
        assert!(parse_cron("0 0 * * 8").is_err());
        assert!(parse_cron("0 0 * * 5-2").is_err());
        assert!(parse_cron("0 0 * * 1/0").is_err());
    }

    #[test]
    fn six_field_day_of_week_is_left_alone() {
        // The cron crate counts Sunday as 1.
        assert_eq!(weekdays("0 0 0 * * 1", 2), vec![Weekday::Sun; 2]);
    }

    #[tokio::test]
    async fn leader_cleans_with_relative_cutoff() {
        let store = RecordingStore::default();
        let now = Utc::now();

        let outcome = run_cleanup(&job("-24h", false), &AlwaysLeader, &store, now).await;

        assert_eq!(outcome, JobOutcome::Cleaned { files: 1 });
        assert_eq!(store.calls(), vec![(now - TimeDelta::hours(24), false)]);
    }

    #[tokio::test]
    async fn purge_job_passes_purge_flag() {
        let store = RecordingStore::default();
        let now = Utc::now();

        run_cleanup(&job("-720h", true), &AlwaysLeader, &store, now).await;

        assert_eq!(store.calls(), vec![(now - TimeDelta::hours(720), true)]);
    }

    #[tokio::test]
    async fn follower_never_touches_the_store() {
        let store = RecordingStore::default();

        let outcome =
            run_cleanup(&job("-24h", false), &FixedLeadership(Some(false)), &store, Utc::now())
                .await;

        assert_eq!(outcome, JobOutcome::NotLeader);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn leadership_errors_skip_the_tick() {
        let store = RecordingStore::default();

        let outcome =
            run_cleanup(&job("-24h", false), &FixedLeadership(None), &store, Utc::now()).await;

        assert!(matches!(outcome, JobOutcome::LeadershipUnknown { .. }));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_threshold_skips_the_tick() {
        let store = RecordingStore::default();

        let outcome = run_cleanup(&job("a day ago", false), &AlwaysLeader, &store, Utc::now()).await;

        assert!(matches!(outcome, JobOutcome::InvalidDuration { .. }));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn store_errors_are_reported_not_raised() {
        let store = RecordingStore {
            fail: true,
            ..RecordingStore::default()
        };

        let outcome = run_cleanup(&job("-1h", true), &AlwaysLeader, &store, Utc::now()).await;

        assert_eq!(
            outcome,
            JobOutcome::StoreFailed {
                error: "database locked".into()
            }
        );
        assert_eq!(store.calls().len(), 1);
    }
}

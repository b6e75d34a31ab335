//! Command line and environment configuration

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

/// Marketplace operator components
#[derive(Parser, Debug)]
#[command(name = "marketplace", version, about)]
pub struct Cli {
    /// Logging options
    #[command(flatten)]
    pub telemetry: TelemetryArgs,

    /// Component to run
    #[command(subcommand)]
    pub command: Command,
}

/// Runnable components
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the airgap file service maintenance (tombstone cleanup)
    Airgap(AirgapArgs),
    /// Build usage events for a meter report
    Report(ReportArgs),
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging options
#[derive(Args, Debug)]
pub struct TelemetryArgs {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Log filter directives, e.g. `info,marketplace=debug`
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,
}

/// Airgap maintenance options
#[derive(Args, Debug)]
pub struct AirgapArgs {
    /// Cron expression driving the cleanup jobs (5, 6 or 7 fields)
    #[arg(long, env = "CLEANUP_CRON", default_value = "0 0 * * *")]
    pub cleanup_cron: String,

    /// Tombstone files older than this relative duration, e.g. `-720h`.
    /// Empty disables the job.
    #[arg(long, env = "CLEAN_AFTER", default_value = "")]
    pub clean_after: String,

    /// Purge files tombstoned longer ago than this relative duration.
    /// Empty disables the job.
    #[arg(long, env = "PURGE_AFTER", default_value = "")]
    pub purge_after: String,

    /// JSON index of the file store; in memory when unset
    #[arg(long, env = "FILE_STORE_PATH")]
    pub file_store_path: Option<PathBuf>,

    /// Gate cleanup on a Kubernetes lease
    #[arg(long, env = "LEADER_ELECTION", default_value_t = true, action = ArgAction::Set)]
    pub leader_election: bool,

    /// Name of the Kubernetes lease
    #[arg(long, env = "LEASE_NAME", default_value = "marketplace-airgap-lease")]
    pub lease_name: String,

    /// Address of the diagnostics server
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind_address: String,
}

/// Report building options
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// `MeterReport` manifest to read the reporting window from
    #[arg(long, required_unless_present = "name", conflicts_with = "name")]
    pub meter_report: Option<PathBuf>,

    /// Name of a `MeterReport` in the cluster; its status is updated
    #[arg(long)]
    pub name: Option<String>,

    /// Namespace of the `MeterReport`, defaults to the client namespace
    #[arg(long, requires = "name")]
    pub namespace: Option<String>,

    /// JSON array of label records
    #[arg(long)]
    pub labels: PathBuf,

    /// Identifier of this cluster
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: String,

    /// Marketplace account
    #[arg(long, env = "ACCOUNT_ID")]
    pub account_id: Option<String>,

    /// Where to write the events, stdout when unset
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn airgap(args: &[&str]) -> AirgapArgs {
        let argv = ["marketplace", "airgap"].iter().chain(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Airgap(args) => args,
            Command::Report(_) => unreachable!(),
        }
    }

    const AIRGAP_VARS: [&str; 6] = [
        "CLEANUP_CRON",
        "CLEAN_AFTER",
        "PURGE_AFTER",
        "FILE_STORE_PATH",
        "LEADER_ELECTION",
        "LEASE_NAME",
    ];

    #[test]
    fn airgap_defaults_disable_cleanup() {
        temp_env::with_vars_unset(AIRGAP_VARS, || {
            let args = airgap(&[]);
            assert_eq!(args.cleanup_cron, "0 0 * * *");
            assert!(args.clean_after.is_empty());
            assert!(args.purge_after.is_empty());
            assert!(args.file_store_path.is_none());
            assert!(args.leader_election);
            assert_eq!(args.lease_name, "marketplace-airgap-lease");
        });
    }

    #[test]
    fn airgap_reads_environment() {
        temp_env::with_vars(
            [
                ("CLEANUP_CRON", Some("*/5 * * * *")),
                ("CLEAN_AFTER", Some("-24h")),
                ("PURGE_AFTER", Some("-720h")),
                ("FILE_STORE_PATH", Some("/data/index.json")),
                ("LEADER_ELECTION", Some("false")),
                ("LEASE_NAME", None),
            ],
            || {
                let args = airgap(&[]);
                assert_eq!(args.cleanup_cron, "*/5 * * * *");
                assert_eq!(args.clean_after, "-24h");
                assert_eq!(args.purge_after, "-720h");
                assert_eq!(
                    args.file_store_path,
                    Some(PathBuf::from("/data/index.json"))
                );
                assert!(!args.leader_election);
            },
        );
    }

    #[test]
    fn flags_win_over_environment() {
        temp_env::with_var("CLEAN_AFTER", Some("-24h"), || {
            let args = airgap(&["--clean-after=-1h"]);
            assert_eq!(args.clean_after, "-1h");
        });
    }

    #[test]
    fn report_needs_a_source() {
        temp_env::with_var("CLUSTER_ID", Some("c1"), || {
            assert!(
                Cli::try_parse_from(["marketplace", "report", "--labels", "l.json"]).is_err()
            );
            assert!(
                Cli::try_parse_from([
                    "marketplace",
                    "report",
                    "--labels",
                    "l.json",
                    "--meter-report",
                    "r.yaml",
                    "--name",
                    "r"
                ])
                .is_err()
            );

            let cli = Cli::try_parse_from([
                "marketplace",
                "report",
                "--labels",
                "l.json",
                "--name",
                "r",
            ])
            .unwrap();
            let Command::Report(args) = cli.command else {
                unreachable!()
            };
            assert_eq!(args.cluster_id, "c1");
            assert_eq!(args.name.as_deref(), Some("r"));
        });
    }
}

// Copyright 2025 Marketplace Operator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Operator internals: the airgap tombstone cleanup scheduler and the
//! usage report builder.

/// Generic Error for the operator components
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Kubernetes internal error
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    /// `serde` errors
    #[error("Serialization Error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Errors reading yaml manifests
    #[error("Yaml Error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Filesystem errors
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid cron expressions
    #[error("Cron Error: {0}")]
    CronError(#[from] cron::error::Error),

    /// The leadership provider could not answer
    #[error("Leadership Error: {0}")]
    LeadershipError(String),

    /// Generic string error messages
    #[error("{0}")]
    Message(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

/// Generic result type to be used in the operator
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod config;
mod diagnostics;
pub mod duration;
pub mod lease;
pub mod reporter;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use crate::diagnostics::*;

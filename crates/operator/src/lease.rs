// Copyright 2026 Marketplace Operator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Leader election components, using the k8s lease pattern.
//! <https://kubernetes.io/docs/concepts/architecture/leases/>
//!
//! Singleton maintenance work asks a [`LeadershipOracle`] before running, so
//! only one replica of the airgap service touches the file store.

use std::{env, time::Duration};

use async_trait::async_trait;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info};

use crate::{Error, Result};

/// How long an acquired lease stays valid without renewal
pub const LEASE_TTL: Duration = Duration::from_secs(15);
/// How often the lease is renewed
pub const RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Answers whether this replica currently holds cluster leadership
#[async_trait]
pub trait LeadershipOracle: Send + Sync {
    /// Returns `true` if this replica is the leader
    async fn is_leader(&self) -> Result<bool>;
}

/// Oracle for single replica deployments, always the leader
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysLeader;

#[async_trait]
impl LeadershipOracle for AlwaysLeader {
    async fn is_leader(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Oracle backed by the lease election loop of [`run_leader_election`]
#[derive(Clone, Debug)]
pub struct LeaseOracle {
    leader_rx: watch::Receiver<bool>,
}

impl LeaseOracle {
    /// Wraps the receiving side of the election channel
    #[must_use]
    pub fn new(leader_rx: watch::Receiver<bool>) -> Self {
        Self { leader_rx }
    }

    /// Starts the election loop in the background and returns an oracle
    /// observing it.
    #[must_use]
    pub fn spawn(client: Client, lease_name: String) -> Self {
        let (leader_tx, leader_rx) = watch::channel(false);
        tokio::spawn(run_leader_election(client, lease_name, leader_tx));
        Self::new(leader_rx)
    }
}

#[async_trait]
impl LeadershipOracle for LeaseOracle {
    async fn is_leader(&self) -> Result<bool> {
        if self.leader_rx.has_changed().is_err() {
            return Err(Error::LeadershipError(
                "leader election loop has stopped".to_string(),
            ));
        }
        Ok(*self.leader_rx.borrow())
    }
}

/// Runs a leader election loop using HOSTNAME as the holder id on the default
/// namespace infered from the k8s client, will notify through a watch.
///
/// A failed renewal is published as lost leadership.
pub async fn run_leader_election(client: Client, lease_name: String, leader_tx: watch::Sender<bool>) {
    let holder_id = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let namespace = client.default_namespace().to_string();

    info!(%holder_id, %namespace, %lease_name, "starting leader election");

    let leadership = LeaseLock::new(
        client,
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name,
            lease_ttl: LEASE_TTL,
        },
    );

    loop {
        let acquired = match leadership.try_acquire_or_renew().await {
            Ok(ll) => ll.acquired_lease,
            Err(err) => {
                error!(error = err.to_string(), "failed to acquire lease lock");
                false
            }
        };

        let changed = leader_tx.send_if_modified(|current| {
            let changed = *current != acquired;
            *current = acquired;
            changed
        });
        if changed {
            info!(leader = acquired, "leadership changed");
        }

        if leader_tx.is_closed() {
            debug!("no leadership observers left, stopping election");
            return;
        }

        sleep(RENEW_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_leader_is_leader() {
        assert!(AlwaysLeader.is_leader().await.unwrap());
    }

    #[tokio::test]
    async fn lease_oracle_follows_the_channel() {
        let (tx, rx) = watch::channel(false);
        let oracle = LeaseOracle::new(rx);

        assert!(!oracle.is_leader().await.unwrap());
        tx.send(true).unwrap();
        assert!(oracle.is_leader().await.unwrap());
        tx.send(false).unwrap();
        assert!(!oracle.is_leader().await.unwrap());
    }

    #[tokio::test]
    async fn lease_oracle_errors_once_election_stops() {
        let (tx, rx) = watch::channel(true);
        let oracle = LeaseOracle::new(rx);
        drop(tx);

        assert!(matches!(
            oracle.is_leader().await,
            Err(Error::LeadershipError(_))
        ));
    }
}

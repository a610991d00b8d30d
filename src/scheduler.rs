//! Periodic sync scheduler.
//!
//! One recurring background task drives reconciliation: each tick
//! discovers peers, then syncs the ledger with every enabled agent. Tick
//! failures are logged and swallowed — a bad tick never halts the next
//! one, and retry happens on the next scheduled tick rather than inline.
//!
//! The task is owned and cancellable: `stop` flips a watch flag and joins
//! the task, letting any in-flight tick finish so a merge is never
//! interrupted halfway.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ledger::CommitLedger;
use crate::mesh::directory::AgentDirectory;

/// Handle to the running sync loop.
pub struct SyncScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn the sync loop. The first tick runs immediately.
    pub fn start(
        interval: Duration,
        directory: Arc<AgentDirectory>,
        ledger: Arc<CommitLedger>,
    ) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_tick(&directory, &ledger).await,
                    _ = rx.changed() => break,
                }
            }
            tracing::debug!("sync scheduler stopped");
        });
        Self { shutdown, handle }
    }

    /// Stop the loop and wait for any in-flight tick to complete.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

// One reconciliation pass. Every failure is logged here and dropped;
// propagation would kill the loop.
async fn run_tick(directory: &AgentDirectory, ledger: &CommitLedger) {
    match directory.discover_peers().await {
        Ok(found) if !found.is_empty() => {
            tracing::info!(count = found.len(), "discovery found new agents")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "discovery skipped"),
    }

    let agents = directory.list_enabled();
    if agents.is_empty() {
        tracing::debug!("no enabled agents to sync with");
        return;
    }

    let endpoints: Vec<String> = agents.iter().map(|a| a.endpoint.clone()).collect();
    match ledger.sync_with_peers(&endpoints).await {
        Ok(report) => {
            for endpoint in &report.synced {
                if let Some(agent) = agents.iter().find(|a| &a.endpoint == endpoint) {
                    directory.touch(&agent.id);
                }
            }
            if report.merged > 0 || !report.failed.is_empty() {
                tracing::info!(
                    merged = report.merged,
                    synced = report.synced.len(),
                    failed = report.failed.len(),
                    "sync tick complete"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "sync tick skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, MeshConfig};
    use crate::mesh::directory::Agent;
    use crate::mesh::transport::testing::MockTransport;

    fn peer_agent(id: &str, endpoint: &str) -> Agent {
        Agent {
            id: id.to_string(),
            name: id.to_string(),
            repository_url: format!("https://git.example.com/{}", id),
            endpoint: endpoint.to_string(),
            protocol: "http".to_string(),
            enabled: true,
            last_sync: None,
        }
    }

    fn components(
        transport: Arc<MockTransport>,
    ) -> (Arc<AgentDirectory>, Arc<CommitLedger>) {
        let directory = Arc::new(AgentDirectory::new(
            MeshConfig::default(),
            "node-self",
            transport.clone(),
        ));
        let ledger = Arc::new(CommitLedger::new(
            LedgerConfig {
                blockchain_integration: true,
                ..LedgerConfig::default()
            },
            "node-self",
            transport,
        ));
        (directory, ledger)
    }

    #[tokio::test]
    async fn test_ticks_sync_enabled_agents_and_stop_joins() {
        let transport = Arc::new(MockTransport::new());
        let (directory, ledger) = components(transport.clone());
        directory
            .register(peer_agent("peer-1", "https://peer-1.example.com"))
            .unwrap();

        let scheduler =
            SyncScheduler::start(Duration::from_millis(10), directory.clone(), ledger);
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;

        // At least one pull was delivered and the peer was marked synced.
        assert!(transport.sent_count() >= 1);
        assert!(directory.get("peer-1").unwrap().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_failing_peer_does_not_halt_later_ticks() {
        let transport = Arc::new(MockTransport::new());
        let (directory, ledger) = components(transport.clone());
        directory
            .register(peer_agent("bad", "https://bad.example.com"))
            .unwrap();
        transport.fail("https://bad.example.com");

        let scheduler =
            SyncScheduler::start(Duration::from_millis(10), directory.clone(), ledger);
        tokio::time::sleep(Duration::from_millis(40)).await;

        // The failing peer keeps failing; now a healthy peer appears and
        // the loop must still pick it up on a later tick.
        directory
            .register(peer_agent("good", "https://good.example.com"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.stop().await;

        assert!(directory.get("good").unwrap().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_stop_without_agents_is_clean() {
        let transport = Arc::new(MockTransport::new());
        let (directory, ledger) = components(transport.clone());

        let scheduler = SyncScheduler::start(Duration::from_millis(10), directory, ledger);
        tokio::time::sleep(Duration::from_millis(25)).await;
        scheduler.stop().await;

        assert_eq!(transport.sent_count(), 0);
    }
}

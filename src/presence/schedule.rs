use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::PresenceRecord;
use crate::config::HeartbeatConfig;

use super::client::PresenceClient;

/// Fixed interval with exponential backoff on consecutive failures and
/// uniform jitter on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub jitter: Duration,
    pub max_backoff: Duration,
}

impl PollPolicy {
    pub fn heartbeat(config: &HeartbeatConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.announce_interval_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    pub fn discovery(config: &HeartbeatConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.discovery_interval_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before the next tick, jitter excluded.
    pub fn base_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }
        let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
        self.interval
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.interval))
    }

    pub fn next_delay(&self, failures: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.base_delay(failures) + jitter
    }
}

/// Owns a background task and aborts it when dropped.
pub struct TaskGuard {
    name: &'static str,
    task: JoinHandle<()>,
}

impl TaskGuard {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        log::info!("Stopping {}", self.name);
        self.task.abort();
    }
}

/// Announces immediately, then re-announces on `policy` for as long as the
/// guard lives. The card is re-read on every tick.
pub fn spawn_heartbeat(
    client: PresenceClient,
    card: watch::Receiver<PresenceRecord>,
    policy: PollPolicy,
) -> TaskGuard {
    log::info!("Starting presence heartbeat every {:?}", policy.interval);
    let task = tokio::spawn(async move {
        let mut failures = 0u32;
        loop {
            let record = card.borrow().clone();
            match client.try_announce(&record).await {
                Ok(_) => failures = 0,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    log::warn!("Heartbeat announce failed ({failures} in a row): {err}");
                }
            }
            tokio::time::sleep(policy.next_delay(failures)).await;
        }
    });
    TaskGuard {
        name: "presence heartbeat",
        task,
    }
}

/// Fetches the live peer list immediately, then on `policy`, forwarding each
/// result to `results`. Ends when the guard is dropped or the receiver goes away.
pub fn spawn_discovery(
    client: PresenceClient,
    policy: PollPolicy,
    results: mpsc::UnboundedSender<Vec<PresenceRecord>>,
) -> TaskGuard {
    log::info!("Starting discovery polling every {:?}", policy.interval);
    let task = tokio::spawn(async move {
        let mut failures = 0u32;
        loop {
            match client.try_fetch_peers().await {
                Ok(peers) => {
                    failures = 0;
                    if results.send(peers).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    log::warn!("Discovery fetch failed ({failures} in a row): {err}");
                }
            }
            tokio::time::sleep(policy.next_delay(failures)).await;
        }
    });
    TaskGuard {
        name: "discovery polling",
        task,
    }
}

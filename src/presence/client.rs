use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::common::PresenceRecord;
use crate::config::{Concurrency, RegistryConfig};
use crate::error::RegistryError;
use crate::time::Clock;

use super::registry::RegistryStore;

#[derive(Debug, Clone)]
pub struct RegistryPolicy {
    pub staleness: Duration,
    pub concurrency: Concurrency,
    pub max_conflict_retries: u32,
}

impl From<&RegistryConfig> for RegistryPolicy {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            staleness: config.staleness(),
            concurrency: config.concurrency,
            max_conflict_retries: config.max_conflict_retries,
        }
    }
}

/// `true` while `record` is inside the staleness window at `now`.
pub fn is_live(record: &PresenceRecord, now_ms: i64, staleness: Duration) -> bool {
    now_ms.saturating_sub(record.last_seen) <= staleness.as_millis() as i64
}

/// Drops the caller's previous entries (same handle or same id) and stale
/// entries, then appends `fresh`.
pub fn merge_announcement(
    users: Vec<PresenceRecord>,
    fresh: PresenceRecord,
    now_ms: i64,
    staleness: Duration,
) -> Vec<PresenceRecord> {
    let mut merged: Vec<PresenceRecord> = users
        .into_iter()
        .filter(|user| user.handle != fresh.handle && user.id != fresh.id)
        .filter(|user| is_live(user, now_ms, staleness))
        .collect();
    merged.push(fresh);
    merged
}

/// Best-effort client of the shared presence directory.
#[derive(Clone)]
pub struct PresenceClient {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    policy: RegistryPolicy,
    create_attempted: Arc<AtomicBool>,
}

impl PresenceClient {
    pub fn new(store: Arc<dyn RegistryStore>, clock: Arc<dyn Clock>, policy: RegistryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            create_attempted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn policy(&self) -> &RegistryPolicy {
        &self.policy
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Publishes `card` with `lastSeen = now`. Returns the published record.
    pub async fn try_announce(
        &self,
        card: &PresenceRecord,
    ) -> Result<PresenceRecord, RegistryError> {
        let mut conflicts = 0;
        loop {
            let snapshot = match self.store.fetch().await {
                Ok(snapshot) => snapshot,
                Err(RegistryError::NotFound) => {
                    self.create_once().await?;
                    self.store.fetch().await?
                }
                Err(err) => return Err(err),
            };

            let now = self.clock.now_ms();
            let mut fresh = card.clone();
            fresh.last_seen = now;
            let merged = merge_announcement(snapshot.users, fresh.clone(), now, self.policy.staleness);

            let expected = match self.policy.concurrency {
                Concurrency::Versioned => snapshot.version.as_deref(),
                Concurrency::Overwrite => None,
            };
            match self.store.replace(merged, expected).await {
                Ok(()) => {
                    log::debug!("Announced presence of @{} at {now}", fresh.handle);
                    return Ok(fresh);
                }
                Err(RegistryError::Conflict) if conflicts < self.policy.max_conflict_retries => {
                    conflicts += 1;
                    log::debug!(
                        "Registry changed under announce of @{}, retry {conflicts}",
                        fresh.handle
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`try_announce`](Self::try_announce) but never fails: errors are
    /// logged and the next heartbeat tries again.
    pub async fn announce(&self, card: &PresenceRecord) -> bool {
        match self.try_announce(card).await {
            Ok(_) => true,
            Err(err) => {
                log::warn!("Presence not published this cycle: {err}");
                false
            }
        }
    }

    /// Removes the record published under `id`, so the handle is free right away.
    pub async fn withdraw(&self, id: &str) -> bool {
        let mut conflicts = 0;
        loop {
            let snapshot = match self.store.fetch().await {
                Ok(snapshot) => snapshot,
                Err(RegistryError::NotFound) => return true,
                Err(err) => {
                    log::warn!("Presence of {id} not withdrawn: {err}");
                    return false;
                }
            };
            if snapshot.users.iter().all(|user| user.id != id) {
                return true;
            }
            let remaining: Vec<PresenceRecord> =
                snapshot.users.into_iter().filter(|user| user.id != id).collect();
            let expected = match self.policy.concurrency {
                Concurrency::Versioned => snapshot.version.as_deref(),
                Concurrency::Overwrite => None,
            };
            match self.store.replace(remaining, expected).await {
                Ok(()) => {
                    log::debug!("Withdrew presence of {id}");
                    return true;
                }
                Err(RegistryError::Conflict) if conflicts < self.policy.max_conflict_retries => {
                    conflicts += 1;
                }
                Err(err) => {
                    log::warn!("Presence of {id} not withdrawn: {err}");
                    return false;
                }
            }
        }
    }

    /// Live records of the registry, in document order.
    pub async fn try_fetch_peers(&self) -> Result<Vec<PresenceRecord>, RegistryError> {
        let snapshot = self.store.fetch().await?;
        let now = self.clock.now_ms();
        Ok(snapshot
            .users
            .into_iter()
            .filter(|user| is_live(user, now, self.policy.staleness))
            .collect())
    }

    pub async fn fetch_peers(&self) -> Vec<PresenceRecord> {
        match self.try_fetch_peers().await {
            Ok(peers) => peers,
            Err(err) => {
                log::warn!("Failed to fetch peers: {err}");
                Vec::new()
            }
        }
    }

    /// A live record claiming `handle` under an id other than `self_id`.
    pub async fn find_claimant(&self, handle: &str, self_id: &str) -> Option<PresenceRecord> {
        match self.try_fetch_peers().await {
            Ok(peers) => peers
                .into_iter()
                .find(|peer| peer.handle == handle && peer.id != self_id),
            Err(RegistryError::NotFound) => None,
            Err(err) => {
                log::warn!("Skipping handle check for @{handle}, registry unavailable: {err}");
                None
            }
        }
    }

    async fn create_once(&self) -> Result<(), RegistryError> {
        if self.create_attempted.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::NotFound);
        }
        self.store.create().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, handle: &str, last_seen: i64) -> PresenceRecord {
        PresenceRecord {
            id: id.into(),
            name: handle.into(),
            handle: handle.into(),
            avatar: String::new(),
            bio: String::new(),
            last_seen,
            locators: Vec::new(),
        }
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let window = Duration::from_millis(120_000);
        let now = 1_000_000;
        assert!(is_live(&record("a", "a", now - 120_000), now, window));
        assert!(!is_live(&record("a", "a", now - 120_001), now, window));
    }

    #[test]
    fn merge_drops_own_and_stale_entries() {
        let now = 1_000_000;
        let window = Duration::from_millis(60_000);
        let users = vec![
            record("usr_a", "ana", now - 1_000),
            record("usr_old", "ana", now - 2_000),
            record("usr_b", "bruno", now - 1_000),
            record("usr_c", "carla", now - 61_000),
        ];
        let merged = merge_announcement(users, record("usr_a", "ana", now), now, window);

        let handles: Vec<&str> = merged.iter().map(|u| u.handle.as_str()).collect();
        assert_eq!(handles, vec!["bruno", "ana"]);
        assert_eq!(merged[1].last_seen, now);
    }
}

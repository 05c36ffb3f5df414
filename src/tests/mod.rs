pub mod libp2p_tests;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Barrier, mpsc};

use crate::assistant::Completion;
use crate::chat::{ChatNode, NodeDeps};
use crate::common::{NetworkEvent, PresenceRecord};
use crate::config::{AppConfig, Concurrency};
use crate::error::{AssistantError, RegistryError};
use crate::network::LocalHub;
use crate::presence::{MemoryRegistry, PresenceClient, RegistryPolicy, RegistryStore, Snapshot};
use crate::storage::ClientDatabase;
use crate::time::{Clock, SystemClock};

pub const WINDOW_MS: i64 = 120_000;

pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(start),
        })
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub enum StubCompletion {
    Text(&'static str),
    Empty,
    Failing,
}

#[async_trait]
impl Completion for StubCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, AssistantError> {
        match self {
            StubCompletion::Text(text) => Ok(text.to_string()),
            StubCompletion::Empty => Err(AssistantError::EmptyResponse),
            StubCompletion::Failing => Err(AssistantError::Status(503)),
        }
    }
}

/// Registry that is always down.
pub struct FailingRegistry;

#[async_trait]
impl RegistryStore for FailingRegistry {
    async fn fetch(&self) -> Result<Snapshot, RegistryError> {
        Err(RegistryError::Status(503))
    }

    async fn replace(
        &self,
        _users: Vec<PresenceRecord>,
        _expected: Option<&str>,
    ) -> Result<(), RegistryError> {
        Err(RegistryError::Status(503))
    }

    async fn create(&self) -> Result<(), RegistryError> {
        Err(RegistryError::Status(503))
    }
}

/// Holds the first two reads until both have happened, so two writers
/// work from the same snapshot.
pub struct GatedRegistry {
    pub inner: MemoryRegistry,
    gate: Barrier,
    fetches: AtomicUsize,
}

impl GatedRegistry {
    pub fn new(inner: MemoryRegistry) -> Self {
        Self {
            inner,
            gate: Barrier::new(2),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RegistryStore for GatedRegistry {
    async fn fetch(&self) -> Result<Snapshot, RegistryError> {
        let snapshot = self.inner.fetch().await?;
        if self.fetches.fetch_add(1, Ordering::SeqCst) < 2 {
            self.gate.wait().await;
        }
        Ok(snapshot)
    }

    async fn replace(
        &self,
        users: Vec<PresenceRecord>,
        expected: Option<&str>,
    ) -> Result<(), RegistryError> {
        self.inner.replace(users, expected).await
    }

    async fn create(&self) -> Result<(), RegistryError> {
        self.inner.create().await
    }
}

pub fn record(id: &str, handle: &str, last_seen: i64) -> PresenceRecord {
    PresenceRecord {
        id: id.to_string(),
        name: handle.to_string(),
        handle: handle.to_string(),
        avatar: String::new(),
        bio: String::new(),
        last_seen,
        locators: Vec::new(),
    }
}

pub fn policy(concurrency: Concurrency) -> RegistryPolicy {
    RegistryPolicy {
        staleness: Duration::from_millis(WINDOW_MS as u64),
        concurrency,
        max_conflict_retries: 3,
    }
}

pub fn presence_client(
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    concurrency: Concurrency,
) -> PresenceClient {
    PresenceClient::new(store, clock, policy(concurrency))
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.heartbeat.announce_interval_ms = 1_000;
    config.heartbeat.discovery_interval_ms = 50;
    config.heartbeat.jitter_ms = 0;
    config
}

pub struct TestNode {
    pub node: ChatNode,
    pub events: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl TestNode {
    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn build_node(hub: &LocalHub, registry: Arc<dyn RegistryStore>) -> TestNode {
    build_node_with(
        hub,
        registry,
        Arc::new(SystemClock),
        Arc::new(StubCompletion::Text("The rain keeps secrets.")),
        ClientDatabase::in_memory().expect("in-memory db"),
    )
}

pub fn build_node_with(
    hub: &LocalHub,
    registry: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    completion: Arc<dyn Completion>,
    db: ClientDatabase,
) -> TestNode {
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let node = ChatNode::new(NodeDeps {
        config: test_config(),
        db,
        registry,
        link: Box::new(hub.link(link_tx)),
        link_events: link_rx,
        completion,
        clock,
        events: event_tx,
    });
    TestNode {
        node,
        events: event_rx,
    }
}

/// Lets two nodes handle each other's traffic until both are idle.
pub fn exchange(a: &mut ChatNode, b: &mut ChatNode) {
    for _ in 0..16 {
        if a.process_pending() + b.process_pending() == 0 {
            return;
        }
    }
}

/// Polls `check` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn registry_has(registry: &MemoryRegistry, handle: &str) -> bool {
    registry.users().iter().any(|user| user.handle == handle)
}

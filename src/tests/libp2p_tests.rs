use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::network::Libp2pLink;

fn libp2p_node(registry: Arc<MemoryRegistry>, name: &str) -> TestNode {
    let mut config = test_config();
    config.transport.listen_addr = "/ip4/127.0.0.1/tcp/0".to_string();
    config.transport.key_path = std::env::temp_dir()
        .join(format!("concord-{name}-{}", uuid::Uuid::new_v4().simple()))
        .join("node_key.pk")
        .to_string_lossy()
        .into_owned();

    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let link = Libp2pLink::spawn(&config.transport, link_tx).expect("swarm");
    let node = ChatNode::new(NodeDeps {
        config,
        db: ClientDatabase::in_memory().expect("db"),
        registry,
        link: Box::new(link),
        link_events: link_rx,
        completion: Arc::new(StubCompletion::Empty),
        clock: Arc::new(SystemClock),
        events: event_tx,
    });
    TestNode {
        node,
        events: event_rx,
    }
}

/// Runs both event loops in small slices until `done` holds or `limit` passes.
async fn drive_until<F>(a: &mut ChatNode, b: &mut ChatNode, limit: Duration, mut done: F) -> bool
where
    F: FnMut(&ChatNode, &ChatNode) -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if done(&*a, &*b) {
            return true;
        }
        let _ = tokio::time::timeout(Duration::from_millis(10), a.drive_once()).await;
        let _ = tokio::time::timeout(Duration::from_millis(10), b.drive_once()).await;
    }
    done(&*a, &*b)
}

fn published_locators(registry: &MemoryRegistry, handle: &str) -> Vec<String> {
    registry
        .users()
        .into_iter()
        .find(|user| user.handle == handle)
        .map(|user| user.locators)
        .unwrap_or_default()
}

fn texts(node: &ChatNode, peer_id: &str) -> Vec<String> {
    node.conversation(peer_id).into_iter().map(|m| m.text).collect()
}

#[tokio::test]
async fn peers_reach_each_other_over_tcp() {
    let registry = Arc::new(MemoryRegistry::new());
    let mut ana = libp2p_node(registry.clone(), "ana");
    let mut bruno = libp2p_node(registry.clone(), "bruno");

    ana.node.login("Ana", "ana").await.expect("ana login");
    bruno.node.login("Bruno", "bruno").await.expect("bruno login");
    let ana_id = ana.node.profile().map(|p| p.id.clone()).expect("ana");
    let bruno_id = bruno.node.profile().map(|p| p.id.clone()).expect("bruno");

    // A single loopback listener is enough to publish a dialable locator.
    let published = drive_until(&mut ana.node, &mut bruno.node, Duration::from_secs(5), |_, _| {
        !published_locators(&registry, "ana").is_empty()
            && !published_locators(&registry, "bruno").is_empty()
    })
    .await;
    assert!(published, "both nodes should announce their listen address");
    let locator = published_locators(&registry, "ana").remove(0);
    assert!(locator.starts_with("/ip4/127.0.0.1/tcp/"), "{locator}");
    assert!(locator.contains("/p2p/"), "{locator}");

    bruno.node.discover_now(None).await;
    bruno.node.send(&ana_id, "oi").expect("sent");
    let delivered = drive_until(&mut ana.node, &mut bruno.node, Duration::from_secs(10), |a, _| {
        texts(a, &bruno_id) == ["oi"]
    })
    .await;
    assert!(delivered, "ana should receive the message");
    assert!(ana.node.contacts().iter().any(|c| c.id == bruno_id));

    // Ana never ran discovery; bruno is a contact learned from the message.
    ana.node.send(&bruno_id, "tudo bem?").expect("sent");
    let replied = drive_until(&mut ana.node, &mut bruno.node, Duration::from_secs(10), |_, b| {
        texts(b, &ana_id) == ["oi", "tudo bem?"]
    })
    .await;
    assert!(replied, "the reply should reach bruno");
}

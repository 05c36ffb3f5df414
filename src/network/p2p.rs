use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use libp2p::core::transport::ListenerId;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{self, Message};
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identify, identity};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::common::{Ack, PeerAddress};
use crate::config::TransportConfig;
use crate::error::TransportError;

use super::adapter::{ChannelId, Link, LinkEvent};
use super::behavior::{ChatBehavior, ChatBehaviorEvent, build_behavior};
use super::transport::build_transport;

enum SwarmCommand {
    Listen { endpoint: String },
    Dial { channel: ChannelId, locators: Vec<String> },
    Transmit { channel: ChannelId, payload: Value },
    Shutdown,
}

/// [`Link`] backed by a libp2p swarm running on its own task.
///
/// libp2p addresses peers by key rather than by name, so the endpoint name is
/// only used for logging and peers are dialed through the `locators` they
/// publish in their presence record.
pub struct Libp2pLink {
    commands: mpsc::UnboundedSender<SwarmCommand>,
    local_peer_id: PeerId,
}

impl Libp2pLink {
    pub fn spawn(
        config: &TransportConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Self, Box<dyn Error>> {
        let local_key = load_or_generate_key(&config.key_path)?;
        let local_peer_id = PeerId::from(local_key.public());
        log::info!("Local PeerID: {local_peer_id}");

        let listen_addr: Multiaddr = config
            .listen_addr
            .parse()
            .map_err(|e| format!("Invalid listen address `{}`: {e}", config.listen_addr))?;

        let transport = build_transport(&local_key)?;
        let behavior = build_behavior(&local_key)?;
        let swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor().with_idle_connection_timeout(Duration::from_secs(60)),
        );

        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = SwarmDriver {
            swarm,
            listen_addr,
            listener: None,
            events,
            commands: command_rx,
            channels: HashMap::new(),
            pending_dials: HashMap::new(),
        };
        tokio::spawn(driver.run());

        Ok(Self {
            commands,
            local_peer_id,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn submit(&self, command: SwarmCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::Adapter("swarm task stopped".to_string()))
    }
}

impl Link for Libp2pLink {
    fn listen(&mut self, endpoint: &str) -> Result<(), TransportError> {
        self.submit(SwarmCommand::Listen {
            endpoint: endpoint.to_string(),
        })
    }

    fn dial(&mut self, channel: ChannelId, address: &PeerAddress) -> Result<(), TransportError> {
        self.submit(SwarmCommand::Dial {
            channel,
            locators: address.locators.clone(),
        })
    }

    fn transmit(&mut self, channel: ChannelId, payload: Value) -> Result<(), TransportError> {
        self.submit(SwarmCommand::Transmit { channel, payload })
    }

    fn shutdown(&mut self) {
        if self.submit(SwarmCommand::Shutdown).is_err() {
            log::debug!("Swarm task already stopped");
        }
    }
}

struct SwarmDriver {
    swarm: Swarm<ChatBehavior>,
    listen_addr: Multiaddr,
    listener: Option<ListenerId>,
    events: mpsc::UnboundedSender<LinkEvent>,
    commands: mpsc::UnboundedReceiver<SwarmCommand>,
    channels: HashMap<ChannelId, PeerId>,
    pending_dials: HashMap<PeerId, Vec<ChannelId>>,
}

impl SwarmDriver {
    async fn run(mut self) {
        log::info!("Network event loop started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
            }
        }
        log::info!("Network event loop stopped");
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Link event dropped, adapter went away");
        }
    }

    fn handle_command(&mut self, command: SwarmCommand) {
        match command {
            SwarmCommand::Listen { endpoint } => {
                if self.listener.is_some() {
                    self.emit(LinkEvent::Listening {
                        locators: self.locators(),
                    });
                    return;
                }
                match self.swarm.listen_on(self.listen_addr.clone()) {
                    Ok(id) => {
                        self.listener = Some(id);
                        log::info!("Endpoint {endpoint} listening on {}", self.listen_addr);
                    }
                    Err(err) => self.emit(LinkEvent::ListenFailed(TransportError::Unsupported(
                        err.to_string(),
                    ))),
                }
            }
            SwarmCommand::Dial { channel, locators } => self.dial(channel, &locators),
            SwarmCommand::Transmit { channel, payload } => match self.channels.get(&channel) {
                Some(peer) => {
                    let request_id = self
                        .swarm
                        .behaviour_mut()
                        .messaging
                        .send_request(peer, payload);
                    log::debug!("Sent frame to {peer} as request {request_id:?}");
                }
                None => {
                    log::warn!("Transmit on unknown channel {channel}");
                    self.emit(LinkEvent::ChannelClosed(channel));
                }
            },
            SwarmCommand::Shutdown => self.shutdown(),
        }
    }

    fn dial(&mut self, channel: ChannelId, locators: &[String]) {
        let Some((peer, addr)) = locators.iter().find_map(|entry| parse_locator(entry)) else {
            self.emit(LinkEvent::ChannelFailed {
                channel,
                reason: "peer-unavailable: no dialable locator".to_string(),
            });
            return;
        };

        self.channels.insert(channel, peer);
        if self.swarm.is_connected(&peer) {
            self.emit(LinkEvent::ChannelOpened(channel));
            return;
        }

        self.swarm.add_peer_address(peer, addr.clone());
        match self.swarm.dial(peer) {
            Ok(()) => {
                log::debug!("Dialing {peer} at {addr}");
                self.pending_dials.entry(peer).or_default().push(channel);
            }
            Err(err) => {
                self.channels.remove(&channel);
                self.emit(LinkEvent::ChannelFailed {
                    channel,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<ChatBehaviorEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address}");
                self.emit(LinkEvent::Listening {
                    locators: self.locators(),
                });
            }
            SwarmEvent::ListenerError {
                listener_id, error, ..
            } => {
                log::warn!("Listener error: {error}");
                if self.listener.take_if(|id| *id == listener_id).is_some() {
                    self.emit(LinkEvent::ListenFailed(TransportError::Adapter(
                        error.to_string(),
                    )));
                }
            }
            SwarmEvent::ListenerClosed {
                listener_id,
                reason,
                ..
            } => {
                // Listeners removed by `shutdown` were already forgotten.
                if self.listener.take_if(|id| *id == listener_id).is_some() {
                    match reason {
                        Ok(()) => self.emit(LinkEvent::Closed),
                        Err(err) => self.emit(LinkEvent::ListenFailed(TransportError::Adapter(
                            err.to_string(),
                        ))),
                    }
                }
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                for channel in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    self.emit(LinkEvent::ChannelOpened(channel));
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                for channel in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    self.channels.remove(&channel);
                    self.emit(LinkEvent::ChannelFailed {
                        channel,
                        reason: format!("peer-unavailable: {error}"),
                    });
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established: 0,
                ..
            } => {
                let closed: Vec<ChannelId> = self
                    .channels
                    .iter()
                    .filter(|(_, peer)| **peer == peer_id)
                    .map(|(channel, _)| *channel)
                    .collect();
                for channel in closed {
                    self.channels.remove(&channel);
                    self.emit(LinkEvent::ChannelClosed(channel));
                }
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Messaging(event)) => {
                self.handle_messaging(event)
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                log::debug!("Identified {peer_id} running {}", info.agent_version);
            }
            _ => {}
        }
    }

    fn handle_messaging(&mut self, event: request_response::Event<Value, Ack>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                Message::Request {
                    request, channel, ..
                } => {
                    self.emit(LinkEvent::Frame(request));
                    if self
                        .swarm
                        .behaviour_mut()
                        .messaging
                        .send_response(channel, Ack { accepted: true })
                        .is_err()
                    {
                        log::debug!("Could not acknowledge frame from {peer}");
                    }
                }
                Message::Response { response, .. } => {
                    if !response.accepted {
                        log::warn!("{peer} refused a frame");
                    }
                }
            },
            request_response::Event::OutboundFailure { peer, error, .. } => {
                log::warn!("Frame to {peer} not delivered: {error}");
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                log::debug!("Inbound frame from {peer} failed: {error}");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    fn shutdown(&mut self) {
        if let Some(id) = self.listener.take() {
            self.swarm.remove_listener(id);
        }
        let peers: HashSet<PeerId> = self.channels.drain().map(|(_, peer)| peer).collect();
        for peer in peers {
            if self.swarm.disconnect_peer_id(peer).is_err() {
                log::debug!("{peer} was not connected");
            }
        }
        self.pending_dials.clear();
        log::info!("Endpoint closed");
    }

    fn locators(&self) -> Vec<String> {
        let local_peer_id = *self.swarm.local_peer_id();
        self.swarm
            .listeners()
            .map(|addr| addr.clone().with(Protocol::P2p(local_peer_id)).to_string())
            .collect()
    }
}

/// Splits `/ip4/.../tcp/.../p2p/<peer>` into the peer id and its address.
pub fn parse_locator(entry: &str) -> Option<(PeerId, Multiaddr)> {
    let mut addr: Multiaddr = match entry.parse() {
        Ok(addr) => addr,
        Err(err) => {
            log::warn!("Invalid multiaddr `{entry}`: {err}");
            return None;
        }
    };
    match addr.pop() {
        Some(Protocol::P2p(peer)) => Some((peer, addr)),
        _ => {
            log::warn!("Multiaddr `{entry}` missing /p2p/PeerId suffix");
            None
        }
    }
}

/// Loads the node's identity key, generating and persisting one on first run.
pub fn load_or_generate_key(key_path: &str) -> Result<identity::Keypair, Box<dyn Error>> {
    let path = Path::new(key_path);
    if path.exists() {
        let bytes = fs::read(path)?;
        let keypair = identity::Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| format!("Failed to decode node identity key: {e}"))?;
        log::info!("Loaded persisted node identity key from {key_path}");
        return Ok(keypair);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let keypair = identity::Keypair::generate_ed25519();
    let encoded = keypair
        .to_protobuf_encoding()
        .map_err(|e| format!("Failed to encode node identity key: {e}"))?;
    fs::write(path, encoded)?;
    log::info!("Generated new node identity key and saved to {key_path}");
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_splits_peer_suffix() {
        let peer = PeerId::random();
        let entry = format!("/ip4/127.0.0.1/tcp/4001/p2p/{peer}");
        let (parsed, addr) = parse_locator(&entry).expect("valid locator");
        assert_eq!(parsed, peer);
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/4001");
    }

    #[test]
    fn locator_without_peer_is_rejected() {
        assert!(parse_locator("/ip4/127.0.0.1/tcp/4001").is_none());
        assert!(parse_locator("not an address").is_none());
    }

    #[test]
    fn identity_key_is_persisted() {
        let dir = std::env::temp_dir().join(format!("concord-key-{}", uuid::Uuid::new_v4()));
        let path = dir.join("node_key.pk");
        let path = path.to_string_lossy().to_string();

        let first = load_or_generate_key(&path).expect("generate");
        let second = load_or_generate_key(&path).expect("reload");
        assert_eq!(
            PeerId::from(first.public()),
            PeerId::from(second.public())
        );
        let _ = fs::remove_dir_all(dir);
    }
}

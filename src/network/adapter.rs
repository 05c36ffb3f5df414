use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::common::{Frame, PeerAddress};
use crate::error::TransportError;

pub type ChannelId = u64;

/// Why the local endpoint could not be opened or was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    HandleTaken,
    Unsupported(String),
    Adapter(String),
}

impl TransportFailure {
    /// Text shown to the user.
    pub fn reason(&self) -> String {
        match self {
            TransportFailure::HandleTaken => {
                "This handle is already online elsewhere. Pick another one and log in again."
                    .to_string()
            }
            TransportFailure::Unsupported(detail) => {
                format!("Peer connections are not supported here: {detail}")
            }
            TransportFailure::Adapter(code) => format!("Connection error ({code})"),
        }
    }
}

impl From<TransportError> for TransportFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::HandleTaken(_) => TransportFailure::HandleTaken,
            TransportError::Unsupported(detail) => TransportFailure::Unsupported(detail),
            other => TransportFailure::Adapter(other.to_string()),
        }
    }
}

/// Lifecycle of the local listening endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Uninitialized,
    Opening,
    Open,
    Error(TransportFailure),
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Uninitialized => write!(f, "uninitialized"),
            TransportState::Opening => write!(f, "opening"),
            TransportState::Open => write!(f, "open"),
            TransportState::Error(failure) => write!(f, "error: {}", failure.reason()),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

/// Events a driver reports back, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The endpoint is reachable at `locators` (may repeat as addresses appear).
    Listening { locators: Vec<String> },
    ListenFailed(TransportError),
    ChannelOpened(ChannelId),
    ChannelFailed { channel: ChannelId, reason: String },
    ChannelClosed(ChannelId),
    /// Raw inbound payload, decoded by [`PeerLink`].
    Frame(Value),
    /// The endpoint went away without a `shutdown` call.
    Closed,
}

/// Connection library underneath the adapter. Calls only start work; the
/// outcome arrives later as [`LinkEvent`]s. `shutdown` is silent and the
/// driver must accept a new `listen` afterwards.
pub trait Link: Send {
    fn listen(&mut self, endpoint: &str) -> Result<(), TransportError>;
    fn dial(&mut self, channel: ChannelId, address: &PeerAddress) -> Result<(), TransportError>;
    fn transmit(&mut self, channel: ChannelId, payload: Value) -> Result<(), TransportError>;
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Open,
}

#[derive(Debug)]
struct Channel {
    id: ChannelId,
    peer_id: String,
    state: ChannelState,
    queued: Vec<Frame>,
}

/// What the owner of a [`PeerLink`] needs to react to after an event.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkNotice {
    StateChanged(TransportState),
    LocatorsChanged(Vec<String>),
    ChannelReady { peer_id: String },
    Inbound(Frame),
}

/// Result of [`PeerLink::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub channel: ChannelId,
    /// False when an existing channel was reused.
    pub created: bool,
}

/// Transport adapter: endpoint state machine plus the peer id -> channel table.
pub struct PeerLink {
    driver: Box<dyn Link>,
    state: TransportState,
    endpoint: Option<String>,
    locators: Vec<String>,
    channels: HashMap<String, Channel>,
    peers_by_channel: HashMap<ChannelId, String>,
    next_channel: ChannelId,
}

impl PeerLink {
    pub fn new(driver: Box<dyn Link>) -> Self {
        Self {
            driver,
            state: TransportState::Uninitialized,
            endpoint: None,
            locators: Vec::new(),
            channels: HashMap::new(),
            peers_by_channel: HashMap::new(),
            next_channel: 1,
        }
    }

    pub fn state(&self) -> &TransportState {
        &self.state
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Dialable addresses of the open endpoint, empty unless `Open`.
    pub fn locators(&self) -> &[String] {
        &self.locators
    }

    pub fn channel_state(&self, peer_id: &str) -> Option<ChannelState> {
        self.channels.get(peer_id).map(|channel| channel.state)
    }

    /// Starts listening under `endpoint`. Moves to `Opening`; the driver
    /// reports `Open` or `Error` later.
    pub fn open(&mut self, endpoint: &str) -> Option<LinkNotice> {
        if matches!(self.state, TransportState::Opening | TransportState::Open)
            && self.endpoint.as_deref() == Some(endpoint)
        {
            return None;
        }
        self.endpoint = Some(endpoint.to_string());
        match self.driver.listen(endpoint) {
            Ok(()) => {
                log::info!("Opening endpoint {endpoint}");
                Some(self.transition(TransportState::Opening))
            }
            Err(err) => {
                log::warn!("Failed to open endpoint {endpoint}: {err}");
                Some(self.transition(TransportState::Error(err.into())))
            }
        }
    }

    /// Returns the channel to `peer_id`, opening one when none exists.
    pub fn connect(
        &mut self,
        peer_id: &str,
        address: &PeerAddress,
    ) -> Result<Connection, TransportError> {
        if self.state != TransportState::Open {
            return Err(TransportError::NotOpen);
        }
        if let Some(channel) = self.channels.get(peer_id) {
            return Ok(Connection {
                channel: channel.id,
                created: false,
            });
        }

        let id = self.next_channel;
        self.next_channel += 1;
        self.driver.dial(id, address)?;
        log::debug!("Dialing {} for {peer_id} on channel {id}", address.endpoint);
        self.channels.insert(
            peer_id.to_string(),
            Channel {
                id,
                peer_id: peer_id.to_string(),
                state: ChannelState::Opening,
                queued: Vec::new(),
            },
        );
        self.peers_by_channel.insert(id, peer_id.to_string());
        Ok(Connection {
            channel: id,
            created: true,
        })
    }

    /// Delivers `frame` on the channel to `peer_id`, queueing it until the
    /// channel opens. There is no acknowledgement.
    pub fn send(
        &mut self,
        peer_id: &str,
        address: &PeerAddress,
        frame: Frame,
    ) -> Result<ChannelId, TransportError> {
        let connection = self.connect(peer_id, address)?;
        let channel = self
            .channels
            .get_mut(peer_id)
            .ok_or(TransportError::NotOpen)?;
        match channel.state {
            ChannelState::Open => self.driver.transmit(channel.id, frame.to_value())?,
            ChannelState::Opening => channel.queued.push(frame),
        }
        Ok(connection.channel)
    }

    /// Sends `frame` over an existing channel to `peer_id` without dialing.
    pub fn push(&mut self, peer_id: &str, frame: Frame) -> Result<(), TransportError> {
        let channel = self
            .channels
            .get_mut(peer_id)
            .ok_or(TransportError::NotOpen)?;
        match channel.state {
            ChannelState::Open => self.driver.transmit(channel.id, frame.to_value()),
            ChannelState::Opening => {
                channel.queued.push(frame);
                Ok(())
            }
        }
    }

    /// Sends `frame` only over channels that are already open.
    pub fn broadcast_open(&mut self, frame: &Frame) {
        for channel in self.channels.values() {
            if channel.state == ChannelState::Open {
                if let Err(err) = self.driver.transmit(channel.id, frame.to_value()) {
                    log::warn!("Failed to push frame to {}: {err}", channel.peer_id);
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: LinkEvent) -> Option<LinkNotice> {
        match event {
            LinkEvent::Listening { locators } => match self.state {
                TransportState::Opening => {
                    log::info!(
                        "Endpoint {} open at {:?}",
                        self.endpoint.as_deref().unwrap_or_default(),
                        locators
                    );
                    self.locators = locators;
                    Some(self.transition(TransportState::Open))
                }
                TransportState::Open => {
                    self.locators = locators.clone();
                    Some(LinkNotice::LocatorsChanged(locators))
                }
                _ => None,
            },
            LinkEvent::ListenFailed(err) => {
                log::warn!("Endpoint failed: {err}");
                self.drop_channels();
                Some(self.transition(TransportState::Error(err.into())))
            }
            LinkEvent::ChannelOpened(id) => self.on_channel_opened(id),
            LinkEvent::ChannelFailed { channel, reason } => {
                if let Some(peer_id) = self.peers_by_channel.remove(&channel) {
                    if let Some(dropped) = self.channels.remove(&peer_id) {
                        log::warn!(
                            "Channel to {peer_id} failed ({reason}); {} queued frame(s) dropped",
                            dropped.queued.len()
                        );
                    }
                }
                None
            }
            LinkEvent::ChannelClosed(id) => {
                if let Some(peer_id) = self.peers_by_channel.remove(&id) {
                    self.channels.remove(&peer_id);
                    log::debug!("Channel {id} to {peer_id} closed");
                }
                None
            }
            LinkEvent::Frame(payload) => match Frame::decode(payload) {
                Ok(frame) => Some(LinkNotice::Inbound(frame)),
                Err(err) => {
                    log::warn!("Dropping unrecognized inbound payload: {err}");
                    None
                }
            },
            LinkEvent::Closed => {
                self.drop_channels();
                if matches!(self.state, TransportState::Error(_) | TransportState::Closed) {
                    None
                } else {
                    Some(self.transition(TransportState::Closed))
                }
            }
        }
    }

    /// Puts the endpoint into `Error` for a failure detected outside the driver.
    pub fn fail(&mut self, failure: TransportFailure) -> LinkNotice {
        if matches!(self.state, TransportState::Opening | TransportState::Open) {
            self.driver.shutdown();
        }
        self.drop_channels();
        self.transition(TransportState::Error(failure))
    }

    pub fn close(&mut self) -> Option<LinkNotice> {
        if matches!(
            self.state,
            TransportState::Uninitialized | TransportState::Closed
        ) {
            return None;
        }
        self.driver.shutdown();
        self.drop_channels();
        Some(self.transition(TransportState::Closed))
    }

    fn on_channel_opened(&mut self, id: ChannelId) -> Option<LinkNotice> {
        let peer_id = self.peers_by_channel.get(&id)?.clone();
        let channel = self.channels.get_mut(&peer_id)?;
        channel.state = ChannelState::Open;
        for frame in channel.queued.drain(..) {
            if let Err(err) = self.driver.transmit(id, frame.to_value()) {
                log::warn!("Failed to flush frame to {peer_id}: {err}");
            }
        }
        log::debug!("Channel {id} to {peer_id} open");
        Some(LinkNotice::ChannelReady { peer_id })
    }

    fn drop_channels(&mut self) {
        self.channels.clear();
        self.peers_by_channel.clear();
    }

    fn transition(&mut self, next: TransportState) -> LinkNotice {
        if next != TransportState::Open {
            self.locators.clear();
        }
        self.state = next.clone();
        LinkNotice::StateChanged(next)
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::common::PeerAddress;
use crate::error::TransportError;

use super::adapter::{ChannelId, Link, LinkEvent};

#[derive(Default)]
struct HubState {
    endpoints: HashMap<String, mpsc::UnboundedSender<LinkEvent>>,
    dials: usize,
}

/// In-process rendezvous shared by every [`LocalLink`] created from it.
/// Endpoint names are exclusive while their owner is alive.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose events go to `events`.
    pub fn link(&self, events: mpsc::UnboundedSender<LinkEvent>) -> LocalLink {
        LocalLink {
            hub: self.clone(),
            events,
            endpoint: None,
            channels: HashMap::new(),
        }
    }

    pub fn is_listening(&self, endpoint: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .endpoints
            .get(endpoint)
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Number of outbound channels opened through the hub so far.
    pub fn dial_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).dials
    }
}

pub struct LocalLink {
    hub: LocalHub,
    events: mpsc::UnboundedSender<LinkEvent>,
    endpoint: Option<String>,
    channels: HashMap<ChannelId, String>,
}

impl LocalLink {
    fn release_endpoint(&mut self) {
        let Some(endpoint) = self.endpoint.take() else {
            return;
        };
        let mut state = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
        if state
            .endpoints
            .get(&endpoint)
            .is_some_and(|owner| owner.same_channel(&self.events))
        {
            state.endpoints.remove(&endpoint);
        }
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Local link owner went away");
        }
    }
}

impl Link for LocalLink {
    fn listen(&mut self, endpoint: &str) -> Result<(), TransportError> {
        let taken = {
            let mut state = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
            let taken = state
                .endpoints
                .get(endpoint)
                .is_some_and(|owner| !owner.is_closed() && !owner.same_channel(&self.events));
            if !taken {
                state
                    .endpoints
                    .insert(endpoint.to_string(), self.events.clone());
            }
            taken
        };

        if taken {
            self.emit(LinkEvent::ListenFailed(TransportError::HandleTaken(
                endpoint.to_string(),
            )));
        } else {
            self.endpoint = Some(endpoint.to_string());
            self.emit(LinkEvent::Listening {
                locators: Vec::new(),
            });
        }
        Ok(())
    }

    fn dial(&mut self, channel: ChannelId, address: &PeerAddress) -> Result<(), TransportError> {
        let reachable = {
            let mut state = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
            state.dials += 1;
            state
                .endpoints
                .get(&address.endpoint)
                .is_some_and(|owner| !owner.is_closed())
        };

        if reachable {
            self.channels.insert(channel, address.endpoint.clone());
            self.emit(LinkEvent::ChannelOpened(channel));
        } else {
            self.emit(LinkEvent::ChannelFailed {
                channel,
                reason: format!("peer-unavailable: {}", address.endpoint),
            });
        }
        Ok(())
    }

    fn transmit(&mut self, channel: ChannelId, payload: Value) -> Result<(), TransportError> {
        let target = self
            .channels
            .get(&channel)
            .cloned()
            .ok_or_else(|| TransportError::Adapter(format!("unknown channel {channel}")))?;
        let owner = {
            let state = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
            state.endpoints.get(&target).cloned()
        };
        let delivered = owner.is_some_and(|owner| owner.send(LinkEvent::Frame(payload)).is_ok());
        if delivered {
            return Ok(());
        }
        self.channels.remove(&channel);
        self.emit(LinkEvent::ChannelClosed(channel));
        Err(TransportError::Adapter(format!("{target} went away")))
    }

    fn shutdown(&mut self) {
        self.release_endpoint();
        self.channels.clear();
    }
}

impl Drop for LocalLink {
    fn drop(&mut self) {
        self.release_endpoint();
    }
}

use std::error::Error;
use std::time::Duration;

use libp2p::identify;
use libp2p::ping;
use libp2p::request_response::{self, ProtocolSupport};
use libp2p::swarm::NetworkBehaviour;
use libp2p::{StreamProtocol, identity};
use serde_json::Value;

use crate::common::Ack;

pub const CHAT_PROTOCOL: &str = "/concord/chat/1.0.0";
const IDENTIFY_PROTOCOL: &str = "/concord/id/1.0.0";

/// Direct messaging plus connection metadata and liveness.
#[derive(NetworkBehaviour)]
pub struct ChatBehavior {
    pub messaging: request_response::json::Behaviour<Value, Ack>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

pub fn build_behavior(local_key: &identity::Keypair) -> Result<ChatBehavior, Box<dyn Error>> {
    let messaging = request_response::json::Behaviour::new(
        [(StreamProtocol::new(CHAT_PROTOCOL), ProtocolSupport::Full)],
        request_response::Config::default().with_request_timeout(Duration::from_secs(15)),
    );

    let identify_config =
        identify::Config::new(IDENTIFY_PROTOCOL.to_string(), local_key.public());
    let identify = identify::Behaviour::new(identify_config);

    let ping = ping::Behaviour::new(ping::Config::default());

    Ok(ChatBehavior {
        messaging,
        identify,
        ping,
    })
}

pub mod adapter;
pub mod behavior;
pub mod local;
pub mod p2p;
pub mod transport;

pub use adapter::{
    ChannelId, ChannelState, Connection, Link, LinkEvent, LinkNotice, PeerLink, TransportFailure,
    TransportState,
};
pub use local::{LocalHub, LocalLink};
pub use p2p::Libp2pLink;

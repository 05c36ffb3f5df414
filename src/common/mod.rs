pub mod commands;
pub mod events;
pub mod types;
pub mod wire;

pub use commands::NetworkCommand;
pub use events::NetworkEvent;
pub use types::{
    ChatMessage, Contact, ContactStatus, ConversationKey, PeerAddress, PresenceRecord, Profile,
};
pub use wire::{Ack, Frame, WireMessage};

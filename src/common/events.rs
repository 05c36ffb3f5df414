use crate::network::TransportState;

use super::types::{ChatMessage, Contact, PresenceRecord, Profile};

/// Events the chat node reports to the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// Session flag flipped; carries the profile when logged in.
    SessionChanged(Option<Profile>),
    TransportChanged(TransportState),
    /// A message was appended to the local log (own echo or inbound).
    MessageAppended(ChatMessage),
    /// Inbound message from someone else; front-ends play a sound.
    Notification { from: String, preview: String },
    ContactsChanged(Vec<Contact>),
    PeersDiscovered(Vec<PresenceRecord>),
    ConversationOpened {
        peer_id: String,
        messages: Vec<ChatMessage>,
    },
    /// A command was rejected (invalid login, unknown peer, ...).
    CommandFailed(String),
}

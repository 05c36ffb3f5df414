/// Commands the front-end sends to the chat node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCommand {
    Login {
        name: String,
        handle: String,
    },
    Logout,
    UpdateProfile {
        name: Option<String>,
        bio: Option<String>,
        avatar: Option<String>,
    },
    SendMessage {
        to: String,
        text: String,
    },
    /// Open a direct channel ahead of the first message.
    Connect {
        peer_id: String,
    },
    /// Discovery view opened: fetch now, then poll while active.
    StartDiscovery {
        query: Option<String>,
    },
    StopDiscovery,
    AddContact {
        peer_id: String,
    },
    OpenConversation {
        peer_id: String,
    },
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_AVATAR_BASE: &str = "https://api.dicebear.com/7.x/shapes/svg?seed=";
pub const DEFAULT_BIO: &str = "Available on Concord.";

pub fn default_avatar(seed: &str) -> String {
    format!("{DEFAULT_AVATAR_BASE}{seed}")
}

/// Durable profile of the local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub handle: String,
    pub name: String,
    pub avatar: String,
    pub bio: String,
}

impl Profile {
    pub fn generate_id() -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("usr_{}", &suffix[..12])
    }

    /// Presence card advertised for this profile. `last_seen` is stamped on announce.
    pub fn presence_card(&self, locators: &[String]) -> PresenceRecord {
        PresenceRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            handle: self.handle.clone(),
            avatar: self.avatar.clone(),
            bio: self.bio.clone(),
            last_seen: 0,
            locators: locators.to_vec(),
        }
    }
}

/// Entry of the shared presence registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub id: String,
    pub name: String,
    pub handle: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub bio: String,
    /// Epoch milliseconds of the owner's last heartbeat.
    pub last_seen: i64,
    /// Dialable addresses of the owner (libp2p multiaddrs with a /p2p suffix).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locators: Vec<String>,
}

/// Chat message as stored locally and carried over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub target_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn compose(sender: &Profile, target_id: &str, text: &str) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            sender_id: sender.id.clone(),
            sender_name: sender.name.clone(),
            target_id: target_id.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(&self.sender_id, &self.target_id)
    }

    /// The other participant, seen from `local_id`.
    pub fn counterpart<'a>(&'a self, local_id: &str) -> &'a str {
        if self.sender_id == local_id {
            &self.target_id
        } else {
            &self.sender_id
        }
    }
}

/// Sorted pair of participant ids identifying a direct conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                low: a.to_string(),
                high: b.to_string(),
            }
        } else {
            Self {
                low: b.to_string(),
                high: a.to_string(),
            }
        }
    }

    pub fn involves(&self, id: &str) -> bool {
        self.low == id || self.high == id
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Online,
    Offline,
    Busy,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Online => "online",
            ContactStatus::Offline => "offline",
            ContactStatus::Busy => "busy",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "online" => ContactStatus::Online,
            "busy" => ContactStatus::Busy,
            _ => ContactStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub handle: String,
    pub name: String,
    pub avatar: String,
    pub bio: String,
    pub status: ContactStatus,
}

impl From<&PresenceRecord> for Contact {
    fn from(record: &PresenceRecord) -> Self {
        Self {
            id: record.id.clone(),
            handle: record.handle.clone(),
            name: record.name.clone(),
            avatar: record.avatar.clone(),
            bio: record.bio.clone(),
            status: ContactStatus::Online,
        }
    }
}

/// Where to reach a peer: its endpoint name plus any dialable locators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub endpoint: String,
    pub locators: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_ignores_direction() {
        assert_eq!(
            ConversationKey::new("usr_a", "usr_b"),
            ConversationKey::new("usr_b", "usr_a")
        );
        assert!(ConversationKey::new("usr_a", "usr_b").involves("usr_b"));
        assert!(!ConversationKey::new("usr_a", "usr_b").involves("usr_c"));
    }

    #[test]
    fn presence_record_uses_camel_case_and_skips_empty_locators() {
        let record = PresenceRecord {
            id: "usr_1".into(),
            name: "Ana".into(),
            handle: "ana".into(),
            avatar: String::new(),
            bio: String::new(),
            last_seen: 42,
            locators: Vec::new(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["lastSeen"], 42);
        assert!(json.get("locators").is_none());
    }

    #[test]
    fn counterpart_is_the_other_side() {
        let profile = Profile {
            id: "usr_a".into(),
            handle: "ana".into(),
            name: "Ana".into(),
            avatar: String::new(),
            bio: String::new(),
        };
        let msg = ChatMessage::compose(&profile, "usr_b", "oi");
        assert_eq!(msg.counterpart("usr_a"), "usr_b");
        assert_eq!(msg.counterpart("usr_b"), "usr_a");
    }
}

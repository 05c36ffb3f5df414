use std::collections::{BTreeMap, HashSet};

use crate::common::{ChatMessage, ConversationKey};

/// Messages indexed by conversation, each kept in timestamp order.
#[derive(Debug, Default)]
pub struct MessageLog {
    conversations: BTreeMap<ConversationKey, Vec<ChatMessage>>,
    seen: HashSet<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the index from a flat list, e.g. the persisted log.
    pub fn from_messages(messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        let mut log = Self::new();
        for message in messages {
            log.append(message);
        }
        log
    }

    /// Appends `message` unless its id is already present. Returns whether it was added.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        let entries = self.conversations.entry(message.conversation()).or_default();
        // After the last entry not newer than this one.
        let position = entries
            .iter()
            .rposition(|existing| existing.timestamp <= message.timestamp)
            .map_or(0, |index| index + 1);
        entries.insert(position, message);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn conversation(&self, a: &str, b: &str) -> &[ChatMessage] {
        self.conversations
            .get(&ConversationKey::new(a, b))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn message(id: &str, from: &str, to: &str, offset_secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            sender_id: from.into(),
            sender_name: from.into(),
            target_id: to.into(),
            text: id.into(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn conversations_are_keyed_by_participants() {
        let mut log = MessageLog::new();
        log.append(message("m1", "usr_a", "usr_b", 0));
        log.append(message("m2", "usr_b", "usr_a", 1));
        log.append(message("m3", "usr_a", "usr_c", 2));

        let ids: Vec<&str> = log
            .conversation("usr_b", "usr_a")
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(log.conversation("usr_c", "usr_a").len(), 1);
        assert!(log.conversation("usr_b", "usr_c").is_empty());
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let mut log = MessageLog::new();
        assert!(log.append(message("m1", "usr_a", "usr_b", 0)));
        assert!(!log.append(message("m1", "usr_a", "usr_b", 5)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn late_arrivals_are_ordered_by_timestamp() {
        let mut log = MessageLog::new();
        log.append(message("m2", "usr_a", "usr_b", 10));
        log.append(message("m1", "usr_b", "usr_a", 0));
        log.append(message("m3", "usr_a", "usr_b", 20));

        let ids: Vec<&str> = log
            .conversation("usr_a", "usr_b")
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }
}

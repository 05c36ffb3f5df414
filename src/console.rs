use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::common::{ChatMessage, Contact, NetworkCommand, NetworkEvent, PresenceRecord, Profile};

pub const HELP: &str = "\
/login <name> <handle>        open a session
/logout                       close the session and wipe local data
/profile name=.. bio=.. avatar=..
/discover [query]             list online peers and keep polling
/stop                         stop polling the registry
/add <handle|id>              add a discovered peer to contacts
/open <handle|id>             open a conversation
/connect <handle|id>          open a direct channel ahead of time
/contacts                     list contacts
/help                         this text
/quit                         exit
anything else is sent to the open conversation";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Empty,
    Login { name: String, handle: String },
    Logout,
    Profile {
        name: Option<String>,
        bio: Option<String>,
        avatar: Option<String>,
    },
    Discover(Option<String>),
    StopDiscovery,
    Add(String),
    Open(String),
    Connect(String),
    Contacts,
    Help,
    Quit,
    Say(String),
    Invalid(String),
}

pub fn parse_line(line: &str) -> ConsoleInput {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleInput::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ConsoleInput::Say(line.to_string());
    };

    let (verb, rest) = match command.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (command, ""),
    };
    let single = |usage: &str, build: fn(String) -> ConsoleInput| {
        if rest.is_empty() || rest.contains(char::is_whitespace) {
            ConsoleInput::Invalid(format!("usage: {usage}"))
        } else {
            build(rest.to_string())
        }
    };

    match verb {
        "login" => {
            // The handle is the last word; everything before it is the display name.
            match rest.rsplit_once(char::is_whitespace) {
                Some((name, handle)) if !name.trim().is_empty() => ConsoleInput::Login {
                    name: name.trim().to_string(),
                    handle: handle.to_string(),
                },
                _ => ConsoleInput::Invalid("usage: /login <name> <handle>".to_string()),
            }
        }
        "logout" => ConsoleInput::Logout,
        "profile" => parse_profile(rest),
        "discover" => ConsoleInput::Discover((!rest.is_empty()).then(|| rest.to_string())),
        "stop" => ConsoleInput::StopDiscovery,
        "add" => single("/add <handle|id>", ConsoleInput::Add),
        "open" => single("/open <handle|id>", ConsoleInput::Open),
        "connect" => single("/connect <handle|id>", ConsoleInput::Connect),
        "contacts" => ConsoleInput::Contacts,
        "help" => ConsoleInput::Help,
        "quit" | "exit" => ConsoleInput::Quit,
        other => ConsoleInput::Invalid(format!("unknown command /{other}, try /help")),
    }
}

/// `key=value` pairs; a value runs until the next `key=`.
fn parse_profile(rest: &str) -> ConsoleInput {
    let mut fields: Vec<(&str, String)> = Vec::new();
    for word in rest.split_whitespace() {
        match word.split_once('=') {
            Some((key, value)) if matches!(key, "name" | "bio" | "avatar") => {
                fields.push((key, value.to_string()));
            }
            _ => match fields.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(word);
                }
                None => {
                    return ConsoleInput::Invalid(
                        "usage: /profile name=.. bio=.. avatar=..".to_string(),
                    );
                }
            },
        }
    }
    if fields.is_empty() {
        return ConsoleInput::Invalid("usage: /profile name=.. bio=.. avatar=..".to_string());
    }

    let take = |key: &str| {
        fields
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    };
    ConsoleInput::Profile {
        name: take("name"),
        bio: take("bio"),
        avatar: take("avatar"),
    }
}

/// What the console knows from node events, used to resolve handles to ids.
#[derive(Debug, Default)]
pub struct ConsoleState {
    pub profile: Option<Profile>,
    pub contacts: Vec<Contact>,
    pub peers: Vec<PresenceRecord>,
    pub active: Option<String>,
}

impl ConsoleState {
    /// Maps `@handle`, `handle` or an id to a peer id.
    pub fn resolve(&self, target: &str) -> String {
        let handle = target.trim_start_matches('@').to_lowercase();
        self.contacts
            .iter()
            .find(|c| c.id == target || c.handle == handle)
            .map(|c| c.id.clone())
            .or_else(|| {
                self.peers
                    .iter()
                    .find(|p| p.id == target || p.handle == handle)
                    .map(|p| p.id.clone())
            })
            .unwrap_or_else(|| target.to_string())
    }

    fn label(&self, peer_id: &str) -> String {
        self.contacts
            .iter()
            .find(|c| c.id == peer_id)
            .map(|c| format!("@{}", c.handle))
            .unwrap_or_else(|| peer_id.to_string())
    }

    /// Turns a line into a node command, or prints local output.
    pub fn command_for(&mut self, input: ConsoleInput) -> Option<NetworkCommand> {
        match input {
            ConsoleInput::Login { name, handle } => Some(NetworkCommand::Login { name, handle }),
            ConsoleInput::Logout => {
                self.active = None;
                Some(NetworkCommand::Logout)
            }
            ConsoleInput::Profile { name, bio, avatar } => {
                Some(NetworkCommand::UpdateProfile { name, bio, avatar })
            }
            ConsoleInput::Discover(query) => Some(NetworkCommand::StartDiscovery { query }),
            ConsoleInput::StopDiscovery => Some(NetworkCommand::StopDiscovery),
            ConsoleInput::Add(target) => Some(NetworkCommand::AddContact {
                peer_id: self.resolve(&target),
            }),
            ConsoleInput::Open(target) => {
                let peer_id = self.resolve(&target);
                self.active = Some(peer_id.clone());
                Some(NetworkCommand::OpenConversation { peer_id })
            }
            ConsoleInput::Connect(target) => Some(NetworkCommand::Connect {
                peer_id: self.resolve(&target),
            }),
            ConsoleInput::Say(text) => match &self.active {
                Some(peer_id) => Some(NetworkCommand::SendMessage {
                    to: peer_id.clone(),
                    text,
                }),
                None => {
                    println!("! no open conversation, use /open <handle>");
                    None
                }
            },
            ConsoleInput::Contacts => {
                if self.contacts.is_empty() {
                    println!("(no contacts)");
                }
                for contact in &self.contacts {
                    println!(
                        "  @{:<16} {:<20} {}",
                        contact.handle,
                        contact.name,
                        contact.status.as_str()
                    );
                }
                None
            }
            ConsoleInput::Help => {
                println!("{HELP}");
                None
            }
            ConsoleInput::Invalid(reason) => {
                println!("! {reason}");
                None
            }
            ConsoleInput::Empty | ConsoleInput::Quit => None,
        }
    }

    pub fn apply_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::SessionChanged(Some(profile)) => {
                println!("* logged in as {} (@{})", profile.name, profile.handle);
                self.profile = Some(profile);
            }
            NetworkEvent::SessionChanged(None) => {
                println!("* logged out");
                self.profile = None;
                self.active = None;
            }
            NetworkEvent::TransportChanged(state) => println!("* transport {state}"),
            NetworkEvent::MessageAppended(message) => self.print_message(&message),
            NetworkEvent::Notification { from, .. } => {
                // Terminal bell; failures are irrelevant.
                print!("\x07");
                let _ = std::io::stdout().flush();
                log::debug!("Notification from {from}");
            }
            NetworkEvent::ContactsChanged(contacts) => self.contacts = contacts,
            NetworkEvent::PeersDiscovered(peers) => {
                if peers != self.peers {
                    println!("* {} peer(s) online", peers.len());
                    for peer in &peers {
                        println!("  @{:<16} {:<20} {}", peer.handle, peer.name, peer.bio);
                    }
                }
                self.peers = peers;
            }
            NetworkEvent::ConversationOpened { peer_id, messages } => {
                println!("--- {} ---", self.label(&peer_id));
                for message in &messages {
                    self.print_message(message);
                }
            }
            NetworkEvent::CommandFailed(reason) => println!("! {reason}"),
        }
    }

    fn print_message(&self, message: &ChatMessage) {
        let Some(profile) = &self.profile else {
            return;
        };
        let counterpart = message.counterpart(&profile.id);
        let shown = self.active.as_deref() == Some(counterpart);
        if shown {
            println!(
                "[{}] {}: {}",
                message.timestamp.format("%H:%M"),
                message.sender_name,
                message.text
            );
        } else if message.sender_id != profile.id {
            println!("* new message from {}", message.sender_name);
        }
    }
}

/// Reads commands from stdin and prints node events until `/quit` or EOF.
pub async fn run_console(
    commands: mpsc::Sender<NetworkCommand>,
    mut events: mpsc::UnboundedReceiver<NetworkEvent>,
) {
    let mut state = ConsoleState::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Concord console. /help lists commands.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("Failed to read stdin: {err}");
                        break;
                    }
                };
                let input = parse_line(&line);
                if input == ConsoleInput::Quit {
                    break;
                }
                if let Some(command) = state.command_for(input) {
                    if commands.send(command).await.is_err() {
                        log::warn!("Chat node stopped");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => state.apply_event(event),
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ContactStatus;

    #[test]
    fn login_takes_last_word_as_handle() {
        assert_eq!(
            parse_line("/login Ana Maria ana"),
            ConsoleInput::Login {
                name: "Ana Maria".into(),
                handle: "ana".into()
            }
        );
        assert!(matches!(parse_line("/login ana"), ConsoleInput::Invalid(_)));
    }

    #[test]
    fn profile_values_may_contain_spaces() {
        assert_eq!(
            parse_line("/profile bio=walks in the rain name=Ana"),
            ConsoleInput::Profile {
                name: Some("Ana".into()),
                bio: Some("walks in the rain".into()),
                avatar: None,
            }
        );
        assert!(matches!(parse_line("/profile hello"), ConsoleInput::Invalid(_)));
    }

    #[test]
    fn plain_text_and_commands() {
        assert_eq!(parse_line("  "), ConsoleInput::Empty);
        assert_eq!(parse_line("oi"), ConsoleInput::Say("oi".into()));
        assert_eq!(parse_line("/discover an"), ConsoleInput::Discover(Some("an".into())));
        assert_eq!(parse_line("/discover"), ConsoleInput::Discover(None));
        assert_eq!(parse_line("/open @bruno"), ConsoleInput::Open("@bruno".into()));
        assert!(matches!(parse_line("/open"), ConsoleInput::Invalid(_)));
        assert!(matches!(parse_line("/dance"), ConsoleInput::Invalid(_)));
    }

    #[test]
    fn handles_resolve_to_ids() {
        let state = ConsoleState {
            contacts: vec![Contact {
                id: "usr_b".into(),
                handle: "bruno".into(),
                name: "Bruno".into(),
                avatar: String::new(),
                bio: String::new(),
                status: ContactStatus::Online,
            }],
            ..ConsoleState::default()
        };
        assert_eq!(state.resolve("@Bruno"), "usr_b");
        assert_eq!(state.resolve("usr_b"), "usr_b");
        assert_eq!(state.resolve("usr_x"), "usr_x");
    }

    #[test]
    fn text_goes_to_the_open_conversation() {
        let mut state = ConsoleState::default();
        assert_eq!(state.command_for(ConsoleInput::Say("oi".into())), None);
        state.command_for(ConsoleInput::Open("usr_b".into()));
        assert_eq!(
            state.command_for(ConsoleInput::Say("oi".into())),
            Some(NetworkCommand::SendMessage {
                to: "usr_b".into(),
                text: "oi".into()
            })
        );
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::assistant::{AI_PEER_ID, Assistant, Completion, assistant_contact};
use crate::common::types::default_avatar;
use crate::common::{
    ChatMessage, Contact, ContactStatus, Frame, NetworkCommand, NetworkEvent, PeerAddress,
    PresenceRecord, Profile, WireMessage,
};
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::network::{
    Connection, Link, LinkEvent, LinkNotice, PeerLink, TransportFailure, TransportState,
};
use crate::presence::{
    PollPolicy, PresenceClient, RegistryPolicy, RegistryStore, TaskGuard, spawn_discovery,
    spawn_heartbeat,
};
use crate::session::{Session, endpoint_name, handle_from_endpoint};
use crate::storage::ClientDatabase;
use crate::time::Clock;

use super::contacts::ContactBook;
use super::history::MessageLog;

/// Everything a [`ChatNode`] is built from.
pub struct NodeDeps {
    pub config: AppConfig,
    pub db: ClientDatabase,
    pub registry: Arc<dyn RegistryStore>,
    pub link: Box<dyn Link>,
    pub link_events: mpsc::UnboundedReceiver<LinkEvent>,
    pub completion: Arc<dyn Completion>,
    pub clock: Arc<dyn Clock>,
    pub events: mpsc::UnboundedSender<NetworkEvent>,
}

/// One chat participant: session, presence, transport and the local message log.
pub struct ChatNode {
    config: AppConfig,
    db: ClientDatabase,
    session: Session,
    log: MessageLog,
    contacts: ContactBook,
    unread: HashMap<String, usize>,
    active_conversation: Option<String>,

    link: PeerLink,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    /// Frames waiting for a registry lookup of their recipient's locators.
    unresolved: HashMap<String, Vec<Frame>>,
    lookup_pending: bool,

    presence: PresenceClient,
    heartbeat: Option<TaskGuard>,
    discovery: Option<TaskGuard>,
    discovery_query: Option<String>,
    card: Option<watch::Sender<PresenceRecord>>,
    directory: HashMap<String, PresenceRecord>,
    discovered_tx: mpsc::UnboundedSender<Vec<PresenceRecord>>,
    discovered_rx: mpsc::UnboundedReceiver<Vec<PresenceRecord>>,
    resolved_tx: mpsc::UnboundedSender<Vec<PresenceRecord>>,
    resolved_rx: mpsc::UnboundedReceiver<Vec<PresenceRecord>>,

    assistant: Assistant,
    replies_tx: mpsc::UnboundedSender<ChatMessage>,
    replies_rx: mpsc::UnboundedReceiver<ChatMessage>,

    events: mpsc::UnboundedSender<NetworkEvent>,
}

impl ChatNode {
    pub fn new(deps: NodeDeps) -> Self {
        let NodeDeps {
            config,
            db,
            registry,
            link,
            link_events,
            completion,
            clock,
            events,
        } = deps;

        let session = Session::restore(&db);
        let presence = PresenceClient::new(registry, clock, RegistryPolicy::from(&config.registry));
        let (discovered_tx, discovered_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();

        let mut node = Self {
            config,
            db,
            session,
            log: MessageLog::new(),
            contacts: ContactBook::new(),
            unread: HashMap::new(),
            active_conversation: None,
            link: PeerLink::new(link),
            link_events,
            unresolved: HashMap::new(),
            lookup_pending: false,
            presence,
            heartbeat: None,
            discovery: None,
            discovery_query: None,
            card: None,
            directory: HashMap::new(),
            discovered_tx,
            discovered_rx,
            resolved_tx,
            resolved_rx,
            assistant: Assistant::new(completion),
            replies_tx,
            replies_rx,
            events,
        };
        if node.session.is_authenticated() {
            node.load_cache();
        }
        node
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.session.profile()
    }

    pub fn transport_state(&self) -> &TransportState {
        self.link.state()
    }

    pub fn contacts(&self) -> &[Contact] {
        self.contacts.list()
    }

    pub fn unread(&self, peer_id: &str) -> usize {
        self.unread.get(peer_id).copied().unwrap_or(0)
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|guard| !guard.is_finished())
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.is_some()
    }

    /// Messages exchanged with `peer_id`, oldest first.
    pub fn conversation(&self, peer_id: &str) -> Vec<ChatMessage> {
        match self.session.profile() {
            Some(profile) => self.log.conversation(&profile.id, peer_id).to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn login(&mut self, display_name: &str, handle: &str) -> Result<Profile, ChatError> {
        let profile = self.session.login(&self.db, display_name, handle)?;
        self.load_cache();
        self.refresh_card();
        if self.config.assistant.enabled && !self.contacts.contains(AI_PEER_ID) {
            self.store_contact(assistant_contact());
        }
        self.emit(NetworkEvent::SessionChanged(Some(profile.clone())));
        self.emit(NetworkEvent::ContactsChanged(self.contacts.list().to_vec()));

        self.go_online().await?;
        Ok(profile)
    }

    /// Leaves the registry, closes the endpoint and wipes the local cache.
    pub async fn logout(&mut self) {
        let own_id = self.session.profile().map(|p| p.id.clone());
        self.go_offline();
        if let Some(id) = own_id {
            self.presence.withdraw(&id).await;
        }
        self.session.logout(&mut self.db);
        self.log.clear();
        self.contacts.clear();
        self.unread.clear();
        self.directory.clear();
        self.active_conversation = None;
        self.emit(NetworkEvent::SessionChanged(None));
        self.emit(NetworkEvent::ContactsChanged(Vec::new()));
    }

    /// Checks the registry for another live holder of our handle, then opens
    /// the endpoint. The heartbeat starts once the transport reports `Open`.
    pub async fn go_online(&mut self) -> Result<(), ChatError> {
        let profile = self
            .session
            .profile()
            .cloned()
            .ok_or(ChatError::NotLoggedIn)?;

        if let Some(claimant) = self.presence.find_claimant(&profile.handle, &profile.id).await {
            log::warn!(
                "Handle @{} is held by {} (seen at {})",
                profile.handle,
                claimant.id,
                claimant.last_seen
            );
            let notice = self.link.fail(TransportFailure::HandleTaken);
            self.apply_notice(notice);
            return Err(ChatError::HandleTaken(profile.handle));
        }

        let endpoint = endpoint_name(&self.config.transport.endpoint_prefix, &profile.handle);
        if self.link.endpoint().is_some_and(|current| current != endpoint) {
            if let Some(notice) = self.link.close() {
                self.apply_notice(notice);
            }
        }
        if let Some(notice) = self.link.open(&endpoint) {
            self.apply_notice(notice);
        }
        self.process_pending();
        Ok(())
    }

    /// Opens (or reuses) the direct channel to `peer_id` ahead of a send.
    pub fn connect(&mut self, peer_id: &str) -> Result<Connection, ChatError> {
        self.session.profile().ok_or(ChatError::NotLoggedIn)?;
        let address = self.peer_address(peer_id)?;
        Ok(self.link.connect(peer_id, &address)?)
    }

    /// Appends the message to the local log right away, then hands it to the
    /// transport. Delivery problems are logged and never reach the caller.
    pub fn send(&mut self, peer_id: &str, text: &str) -> Result<ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let profile = self
            .session
            .profile()
            .cloned()
            .ok_or(ChatError::NotLoggedIn)?;

        let message = ChatMessage::compose(&profile, peer_id, text);
        self.record_message(message.clone());

        if peer_id == AI_PEER_ID {
            self.ask_assistant(text, &profile.id);
            return Ok(message);
        }

        let frame = Frame::new(
            endpoint_name(&self.config.transport.endpoint_prefix, &profile.handle),
            WireMessage::Message(message.clone()),
        );
        match self.peer_address(peer_id) {
            Ok(_) if self.needs_lookup(peer_id) => {
                log::debug!("Looking up {peer_id} in the registry before dialing");
                self.unresolved
                    .entry(peer_id.to_string())
                    .or_default()
                    .push(frame);
                self.lookup_peers();
            }
            Ok(address) => self.deliver(peer_id, &address, frame),
            Err(err) => log::warn!("Message {} not delivered: {err}", message.id),
        }
        Ok(message)
    }

    pub fn update_profile(
        &mut self,
        name: Option<&str>,
        bio: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Profile, ChatError> {
        let profile = self.session.update_profile(&self.db, name, bio, avatar)?;
        self.emit(NetworkEvent::SessionChanged(Some(profile.clone())));
        self.refresh_card();

        let card = profile.presence_card(self.link.locators());
        let frame = Frame::new(
            endpoint_name(&self.config.transport.endpoint_prefix, &profile.handle),
            WireMessage::Profile(card),
        );
        self.link.broadcast_open(&frame);
        Ok(profile)
    }

    /// One registry read, filtered by `query` against handle and name.
    pub async fn discover_now(&mut self, query: Option<&str>) -> Vec<PresenceRecord> {
        self.discovery_query = query
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        let peers = self.presence.fetch_peers().await;
        self.apply_discovery(peers)
    }

    /// Fetches immediately and keeps polling until [`stop_discovery`](Self::stop_discovery).
    pub fn start_discovery(&mut self, query: Option<&str>) -> Result<(), ChatError> {
        self.session.profile().ok_or(ChatError::NotLoggedIn)?;
        self.discovery_query = query
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        if self.discovery.is_none() {
            self.discovery = Some(spawn_discovery(
                self.presence.clone(),
                PollPolicy::discovery(&self.config.heartbeat),
                self.discovered_tx.clone(),
            ));
        }
        Ok(())
    }

    pub fn stop_discovery(&mut self) {
        self.discovery = None;
    }

    /// Adds a discovered peer to the contact list.
    pub fn add_contact(&mut self, peer_id: &str) -> Result<Contact, ChatError> {
        self.session.profile().ok_or(ChatError::NotLoggedIn)?;
        let record = self
            .directory
            .get(peer_id)
            .ok_or_else(|| ChatError::UnknownPeer(peer_id.to_string()))?;
        let contact = Contact::from(record);
        self.store_contact(contact.clone());
        self.emit(NetworkEvent::ContactsChanged(self.contacts.list().to_vec()));
        Ok(contact)
    }

    /// Makes `peer_id` the active conversation and clears its unread counter.
    pub fn open_conversation(&mut self, peer_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        self.session.profile().ok_or(ChatError::NotLoggedIn)?;
        self.active_conversation = Some(peer_id.to_string());
        self.unread.remove(peer_id);
        let messages = self.conversation(peer_id);
        self.emit(NetworkEvent::ConversationOpened {
            peer_id: peer_id.to_string(),
            messages: messages.clone(),
        });
        Ok(messages)
    }

    /// Handles everything already queued by the transport, the assistant and
    /// the discovery poller. Returns how many events were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.link_events.try_recv() {
            self.handle_link_event(event);
            handled += 1;
        }
        while let Ok(reply) = self.replies_rx.try_recv() {
            self.on_assistant_reply(reply);
            handled += 1;
        }
        while let Ok(peers) = self.discovered_rx.try_recv() {
            self.apply_discovery(peers);
            handled += 1;
        }
        while let Ok(peers) = self.resolved_rx.try_recv() {
            self.apply_lookup(peers);
            handled += 1;
        }
        handled
    }

    /// Waits for the next internal event and handles it.
    pub async fn drive_once(&mut self) {
        tokio::select! {
            Some(event) = self.link_events.recv() => self.handle_link_event(event),
            Some(reply) = self.replies_rx.recv() => self.on_assistant_reply(reply),
            Some(peers) = self.discovered_rx.recv() => {
                self.apply_discovery(peers);
            }
            Some(peers) = self.resolved_rx.recv() => self.apply_lookup(peers),
        }
    }

    pub async fn handle_command(&mut self, command: NetworkCommand) {
        let result = match command {
            NetworkCommand::Login { name, handle } => self.login(&name, &handle).await.map(drop),
            NetworkCommand::Logout => {
                self.logout().await;
                Ok(())
            }
            NetworkCommand::UpdateProfile { name, bio, avatar } => self
                .update_profile(name.as_deref(), bio.as_deref(), avatar.as_deref())
                .map(drop),
            NetworkCommand::SendMessage { to, text } => self.send(&to, &text).map(drop),
            NetworkCommand::Connect { peer_id } => self.connect(&peer_id).map(drop),
            NetworkCommand::StartDiscovery { query } => self.start_discovery(query.as_deref()),
            NetworkCommand::StopDiscovery => {
                self.stop_discovery();
                Ok(())
            }
            NetworkCommand::AddContact { peer_id } => self.add_contact(&peer_id).map(drop),
            NetworkCommand::OpenConversation { peer_id } => {
                self.open_conversation(&peer_id).map(drop)
            }
        };
        if let Err(err) = result {
            log::warn!("Command failed: {err}");
            self.emit(NetworkEvent::CommandFailed(err.to_string()));
        }
    }

    /// Node event loop: restores a persisted session, then serves commands
    /// until the front-end hangs up.
    pub async fn run(mut self, mut commands: mpsc::Receiver<NetworkCommand>) {
        if let Some(profile) = self.session.profile().cloned() {
            log::info!("Restoring session of @{}", profile.handle);
            self.emit(NetworkEvent::SessionChanged(Some(profile)));
            self.emit(NetworkEvent::ContactsChanged(self.contacts.list().to_vec()));
            if let Err(err) = self.go_online().await {
                log::warn!("Could not go online: {err}");
            }
        }

        log::info!("Chat node event loop started");
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                Some(event) = self.link_events.recv() => self.handle_link_event(event),
                Some(reply) = self.replies_rx.recv() => self.on_assistant_reply(reply),
                Some(peers) = self.discovered_rx.recv() => {
                    self.apply_discovery(peers);
                }
                Some(peers) = self.resolved_rx.recv() => self.apply_lookup(peers),
            }
        }
        self.go_offline();
        log::info!("Chat node event loop stopped");
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        if let Some(notice) = self.link.handle_event(event) {
            self.apply_notice(notice);
        }
    }

    fn apply_notice(&mut self, notice: LinkNotice) {
        match notice {
            LinkNotice::StateChanged(state) => {
                self.emit(NetworkEvent::TransportChanged(state.clone()));
                match state {
                    TransportState::Open => self.start_heartbeat(),
                    TransportState::Error(TransportFailure::HandleTaken) => self.on_collision(),
                    TransportState::Error(_) | TransportState::Closed => self.heartbeat = None,
                    TransportState::Uninitialized | TransportState::Opening => {}
                }
            }
            LinkNotice::LocatorsChanged(_) => self.refresh_card(),
            LinkNotice::ChannelReady { peer_id } => self.push_profile(&peer_id),
            LinkNotice::Inbound(frame) => self.handle_frame(frame),
        }
    }

    fn start_heartbeat(&mut self) {
        let Some(profile) = self.session.profile() else {
            return;
        };
        let (card, watcher) = watch::channel(profile.presence_card(self.link.locators()));
        self.card = Some(card);
        self.heartbeat = Some(spawn_heartbeat(
            self.presence.clone(),
            watcher,
            PollPolicy::heartbeat(&self.config.heartbeat),
        ));
    }

    fn refresh_card(&self) {
        if let (Some(card), Some(profile)) = (&self.card, self.session.profile()) {
            card.send_replace(profile.presence_card(self.link.locators()));
        }
    }

    fn on_collision(&mut self) {
        self.heartbeat = None;
        self.card = None;
        self.discovery = None;
        if self.config.transport.logout_on_collision && self.session.is_authenticated() {
            log::warn!("Handle collision; pick another handle and log in again");
            self.session.suspend(&self.db);
            self.emit(NetworkEvent::SessionChanged(None));
        }
    }

    fn go_offline(&mut self) {
        self.heartbeat = None;
        self.discovery = None;
        self.card = None;
        if let Some(notice) = self.link.close() {
            self.apply_notice(notice);
        }
        self.unresolved.clear();
    }

    fn push_profile(&mut self, peer_id: &str) {
        let Some(profile) = self.session.profile() else {
            return;
        };
        let frame = Frame::new(
            endpoint_name(&self.config.transport.endpoint_prefix, &profile.handle),
            WireMessage::Profile(profile.presence_card(self.link.locators())),
        );
        if let Err(err) = self.link.push(peer_id, frame) {
            log::debug!("Profile not pushed to {peer_id}: {err}");
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        let Some(self_id) = self.session.profile().map(|p| p.id.clone()) else {
            log::debug!("Dropping frame from {} while logged out", frame.from);
            return;
        };
        match frame.message {
            WireMessage::Message(message) => {
                if message.target_id != self_id && message.sender_id != self_id {
                    log::warn!(
                        "Dropping message {} from {} addressed to {}",
                        message.id,
                        frame.from,
                        message.target_id
                    );
                    return;
                }
                if message.sender_id == self_id {
                    // Own message relayed from another session of this identity.
                    self.record_message(message);
                    return;
                }
                let sender_id = message.sender_id.clone();
                let sender_name = message.sender_name.clone();
                let preview = message.text.clone();
                if !self.record_message(message) {
                    return;
                }
                self.notify_inbound(&sender_id, &sender_name, preview);
                if !self.contacts.contains(&sender_id) {
                    let handle =
                        handle_from_endpoint(&self.config.transport.endpoint_prefix, &frame.from);
                    let contact = match self.directory.get(&sender_id) {
                        Some(record) => Contact::from(record),
                        None => Contact {
                            id: sender_id.clone(),
                            avatar: default_avatar(&handle),
                            handle,
                            name: sender_name,
                            bio: String::new(),
                            status: ContactStatus::Online,
                        },
                    };
                    log::info!("New contact @{} from inbound message", contact.handle);
                    self.store_contact(contact);
                    self.emit(NetworkEvent::ContactsChanged(self.contacts.list().to_vec()));
                }
            }
            WireMessage::Profile(record) => {
                if record.id == self_id {
                    return;
                }
                let known = self.contacts.contains(&record.id);
                self.directory.insert(record.id.clone(), record.clone());
                if known && self.store_contact(Contact::from(&record)) {
                    self.emit(NetworkEvent::ContactsChanged(self.contacts.list().to_vec()));
                }
            }
        }
    }

    fn ask_assistant(&self, prompt: &str, self_id: &str) {
        let assistant = self.assistant.clone();
        let replies = self.replies_tx.clone();
        let prompt = prompt.to_string();
        let self_id = self_id.to_string();
        tokio::spawn(async move {
            let reply = assistant.reply(&prompt, &self_id).await;
            if replies.send(reply).is_err() {
                log::debug!("Assistant reply dropped, node stopped");
            }
        });
    }

    fn on_assistant_reply(&mut self, reply: ChatMessage) {
        if self.session.profile().map(|p| p.id.as_str()) != Some(reply.target_id.as_str()) {
            log::debug!("Dropping assistant reply for a closed session");
            return;
        }
        let preview = reply.text.clone();
        let sender_name = reply.sender_name.clone();
        if self.record_message(reply) {
            self.notify_inbound(AI_PEER_ID, &sender_name, preview);
        }
    }

    fn notify_inbound(&mut self, sender_id: &str, sender_name: &str, preview: String) {
        if self.active_conversation.as_deref() != Some(sender_id) {
            *self.unread.entry(sender_id.to_string()).or_default() += 1;
        }
        self.emit(NetworkEvent::Notification {
            from: sender_name.to_string(),
            preview,
        });
    }

    /// Refreshes the directory and contact statuses from a registry read and
    /// returns the peers matching the current query.
    fn apply_discovery(&mut self, peers: Vec<PresenceRecord>) -> Vec<PresenceRecord> {
        let self_id = self.session.profile().map(|p| p.id.clone());
        self.refresh_directory(&peers);

        let visible: Vec<PresenceRecord> = peers
            .into_iter()
            .filter(|peer| Some(&peer.id) != self_id.as_ref())
            .filter(|peer| match &self.discovery_query {
                Some(query) => {
                    peer.handle.contains(query.as_str())
                        || peer.name.to_lowercase().contains(query.as_str())
                }
                None => true,
            })
            .collect();
        self.emit(NetworkEvent::PeersDiscovered(visible.clone()));
        visible
    }

    /// Registry answer to [`lookup_peers`](Self::lookup_peers): refreshes the
    /// directory and hands parked frames to the transport.
    fn apply_lookup(&mut self, peers: Vec<PresenceRecord>) {
        self.lookup_pending = false;
        self.refresh_directory(&peers);
        for (peer_id, frames) in std::mem::take(&mut self.unresolved) {
            let address = match self.peer_address(&peer_id) {
                Ok(address) => address,
                Err(err) => {
                    log::warn!("{} message(s) not delivered: {err}", frames.len());
                    continue;
                }
            };
            if address.locators.is_empty() {
                log::debug!("{peer_id} is not in the registry, trying its endpoint name");
            }
            for frame in frames {
                self.deliver(&peer_id, &address, frame);
            }
        }
    }

    /// Rebuilds the directory from a registry read and syncs contact statuses.
    fn refresh_directory(&mut self, peers: &[PresenceRecord]) {
        let self_id = self.session.profile().map(|p| p.id.clone());
        self.directory = peers
            .iter()
            .filter(|peer| Some(&peer.id) != self_id.as_ref())
            .map(|peer| (peer.id.clone(), peer.clone()))
            .collect();

        let ids: Vec<String> = self.contacts.list().iter().map(|c| c.id.clone()).collect();
        let mut changed = false;
        for id in ids {
            if id == AI_PEER_ID {
                continue;
            }
            let status = if self.directory.contains_key(&id) {
                ContactStatus::Online
            } else {
                ContactStatus::Offline
            };
            if self.contacts.set_status(&id, status) {
                changed = true;
                if let Some(contact) = self.contacts.get(&id) {
                    if let Err(err) = self.db.upsert_contact(contact) {
                        log::warn!("Failed to persist contact status: {err}");
                    }
                }
            }
        }
        if changed {
            self.emit(NetworkEvent::ContactsChanged(self.contacts.list().to_vec()));
        }
    }

    /// True when nothing but a contact card is known about `peer_id`.
    fn needs_lookup(&self, peer_id: &str) -> bool {
        self.link.channel_state(peer_id).is_none() && !self.directory.contains_key(peer_id)
    }

    /// One-shot registry read feeding [`apply_lookup`](Self::apply_lookup).
    fn lookup_peers(&mut self) {
        if self.lookup_pending {
            return;
        }
        self.lookup_pending = true;
        let presence = self.presence.clone();
        let resolved = self.resolved_tx.clone();
        tokio::spawn(async move {
            let peers = presence.fetch_peers().await;
            if resolved.send(peers).is_err() {
                log::debug!("Registry lookup dropped, node stopped");
            }
        });
    }

    fn deliver(&mut self, peer_id: &str, address: &PeerAddress, frame: Frame) {
        if let Err(err) = self.link.send(peer_id, address, frame) {
            log::warn!("Message to {peer_id} not delivered: {err}");
        }
    }

    fn peer_address(&self, peer_id: &str) -> Result<PeerAddress, ChatError> {
        let prefix = &self.config.transport.endpoint_prefix;
        if let Some(record) = self.directory.get(peer_id) {
            return Ok(PeerAddress {
                endpoint: endpoint_name(prefix, &record.handle),
                locators: record.locators.clone(),
            });
        }
        self.contacts
            .get(peer_id)
            .map(|contact| PeerAddress {
                endpoint: endpoint_name(prefix, &contact.handle),
                locators: Vec::new(),
            })
            .ok_or_else(|| ChatError::UnknownPeer(peer_id.to_string()))
    }

    fn record_message(&mut self, message: ChatMessage) -> bool {
        if !self.log.append(message.clone()) {
            log::debug!("Ignoring duplicate message {}", message.id);
            return false;
        }
        if let Err(err) = self.db.insert_message(&message) {
            log::warn!("Failed to persist message {}: {err}", message.id);
        }
        self.emit(NetworkEvent::MessageAppended(message));
        true
    }

    fn store_contact(&mut self, contact: Contact) -> bool {
        if let Err(err) = self.db.upsert_contact(&contact) {
            log::warn!("Failed to persist contact {}: {err}", contact.id);
        }
        self.contacts.upsert(contact)
    }

    fn load_cache(&mut self) {
        match self.db.contacts() {
            Ok(contacts) => self.contacts = ContactBook::from_contacts(contacts),
            Err(err) => log::warn!("Failed to load contacts: {err}"),
        }
        match self.db.messages() {
            Ok(messages) => self.log = MessageLog::from_messages(messages),
            Err(err) => log::warn!("Failed to load message log: {err}"),
        }
    }

    fn emit(&self, event: NetworkEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Front-end went away, event dropped");
        }
    }
}

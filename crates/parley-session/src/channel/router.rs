//! Channel Router
//!
//! Owns every live channel, keyed by target handle, handle kind and channel
//! kind, and routes inbound traffic to them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use super::{
    Channel, ChannelEnv, ChannelId, ChannelInfo, ChannelKey, ChannelKind, ChannelRequest,
    ChannelState, FileTransferChannel, RequestMap, RequestTarget, RequestableChannelClass,
    RoomChannel, TextChannel, TransferEvent, TransferId, TransferOffer,
};
use crate::caps::{FEATURE_JINGLE_FILE_TRANSFER, FEATURE_SI_FILE_TRANSFER};
use crate::engine::OutboundCommand;
use crate::error::SessionError;
use crate::events::{DiscoInfo, InboundPresence, SessionNotification};
use crate::handles::{normalize_contact, normalize_room, split_address};
use crate::message::{ChatState, InboundMessage, MessageKind, MessagePart, SendFlags};
use crate::types::{Handle, HandleKind};

const FILE_TRANSFER_FEATURES: &[&str] = &[FEATURE_SI_FILE_TRANSFER, FEATURE_JINGLE_FILE_TRANSFER];

/// Registry of live channels.
pub struct ChannelRouter {
    channels: DashMap<ChannelKey, Arc<Channel>>,
    by_id: DashMap<ChannelId, Arc<Channel>>,
    transfers: DashMap<TransferId, ChannelId>,
    /// Classes last announced per contact
    advertised: DashMap<Handle, Vec<RequestableChannelClass>>,
    next_id: AtomicU64,
    file_transfer_enabled: bool,
}

impl ChannelRouter {
    pub fn new(file_transfer_enabled: bool) -> Self {
        Self {
            channels: DashMap::new(),
            by_id: DashMap::new(),
            transfers: DashMap::new(),
            advertised: DashMap::new(),
            next_id: AtomicU64::new(1),
            file_transfer_enabled,
        }
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.by_id.get(&id).map(|c| c.value().clone())
    }

    pub fn find(&self, key: &ChannelKey) -> Option<Arc<Channel>> {
        self.channels.get(key).map(|c| c.value().clone())
    }

    /// Descriptions of all live channels, ordered by id.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = self.by_id.iter().map(|c| c.info().clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Get or create the channel for `key`. `build` runs only when the
    /// channel does not exist yet; its failure leaves no channel behind.
    fn get_or_create(
        &self,
        env: &ChannelEnv<'_>,
        key: ChannelKey,
        target_id: &str,
        initiator: Handle,
        requested: bool,
        build: impl FnOnce(&ChannelInfo) -> Result<ChannelState, SessionError>,
    ) -> Result<(Arc<Channel>, bool), SessionError> {
        let channel = match self.channels.entry(key) {
            Entry::Occupied(entry) => return Ok((entry.get().clone(), true)),
            Entry::Vacant(entry) => {
                let initiator_id = if initiator == env.self_handle {
                    env.account.jid.clone()
                } else {
                    env.contacts.identity(initiator).unwrap_or_default()
                };
                let info = ChannelInfo {
                    id: ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed)),
                    kind: key.kind,
                    handle_kind: key.handle_kind,
                    target_handle: key.handle,
                    target_id: target_id.to_string(),
                    initiator_handle: initiator,
                    initiator_id,
                    requested,
                };
                let state = build(&info)?;
                let channel = Arc::new(Channel::new(info, state));
                entry.insert(channel.clone());
                channel
            }
        };

        self.by_id.insert(channel.id(), channel.clone());
        if let ChannelState::FileTransfer(ft) = &*channel.state() {
            self.transfers.insert(ft.transfer_id().clone(), channel.id());
        }
        info!(channel = %channel.id(), kind = ?key.kind, target = %target_id, "Channel created");
        env.notify(SessionNotification::ChannelCreated(channel.info().clone()));
        Ok((channel, false))
    }

    /// Idempotent get-or-create of a text or room channel.
    ///
    /// Returns the channel and whether it already existed. Room channels
    /// join the room when created.
    #[instrument(skip(self, env))]
    pub fn ensure_channel(
        &self,
        env: &ChannelEnv<'_>,
        handle: Handle,
        kind: ChannelKind,
        requested: bool,
    ) -> Result<(Arc<Channel>, bool), SessionError> {
        let key = ChannelKey::new(handle, kind);
        let (target_id, initiator) = match kind {
            ChannelKind::Text => {
                let id = env
                    .contacts
                    .identity(handle)
                    .ok_or_else(|| SessionError::invalid_handle(format!("Unknown contact {handle}")))?;
                (id, if requested { env.self_handle } else { handle })
            }
            ChannelKind::RoomText => {
                let id = env
                    .rooms
                    .identity(handle)
                    .ok_or_else(|| SessionError::invalid_handle(format!("Unknown room {handle}")))?;
                (id, env.self_handle)
            }
            ChannelKind::FileTransfer => {
                return Err(SessionError::invalid_argument(
                    "File transfer channels need transfer metadata",
                ))
            }
        };

        self.get_or_create(env, key, &target_id, initiator, requested, |_| match kind {
            ChannelKind::RoomText => {
                let room = RoomChannel::new(target_id.clone(), env.account.nick.clone());
                env.engine.send(room.join_command())?;
                Ok(ChannelState::Room(room))
            }
            _ => Ok(ChannelState::Text(TextChannel::new())),
        })
    }

    /// Deliver an inbound message to its channel.
    ///
    /// Chat and normal messages create a contact text channel when they
    /// carry a body or a marker. Group chat messages only reach rooms we
    /// have a channel for.
    #[instrument(skip(self, env, message), fields(from = %message.from))]
    pub fn route_inbound_message(&self, env: &ChannelEnv<'_>, message: &InboundMessage) {
        let (bare, _) = match split_address(&message.from) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "Dropping message with bad sender");
                return;
            }
        };

        let channel = match message.kind {
            MessageKind::Error => {
                debug!("Dropping error message");
                return;
            }
            MessageKind::GroupChat => {
                let room = env
                    .rooms
                    .lookup(&bare)
                    .and_then(|handle| self.find(&ChannelKey::new(handle, ChannelKind::RoomText)));
                match room {
                    Some(channel) => channel,
                    None => {
                        warn!(room = %bare, "Dropping message for a room we are not in");
                        return;
                    }
                }
            }
            MessageKind::Chat | MessageKind::Normal | MessageKind::Headline => {
                let handle = env.contacts.resolve(&bare);
                let key = ChannelKey::new(handle, ChannelKind::Text);
                let creates = message.body.as_deref().is_some_and(|b| !b.is_empty())
                    || message.marker.is_some();
                match self.find(&key) {
                    Some(channel) => channel,
                    None if creates => match self.ensure_channel(env, handle, ChannelKind::Text, false) {
                        Ok((channel, _)) => channel,
                        Err(e) => {
                            warn!(error = %e, "Could not create text channel");
                            return;
                        }
                    },
                    None => {
                        debug!("Dropping content-less message without a channel");
                        return;
                    }
                }
            }
        };

        let info = channel.info().clone();
        let mut state = channel.state();
        if let Some(messages) = state.as_messages() {
            messages.receive(env, &info, message);
        }
    }

    /// Attach an inbound offer to the sender's file transfer channel.
    ///
    /// A channel still carrying an active transfer rejects the new offer; a
    /// finished one is closed and replaced.
    #[instrument(skip(self, env, offer), fields(from = %offer.from, transfer = %offer.transfer_id))]
    pub fn route_inbound_transfer_offer(&self, env: &ChannelEnv<'_>, offer: TransferOffer) {
        let (bare, _) = match split_address(&offer.from) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "Rejecting offer with bad sender");
                self.reject(env, &offer.transfer_id);
                return;
            }
        };
        if !self.file_transfer_enabled {
            debug!("File transfer disabled");
            self.reject(env, &offer.transfer_id);
            return;
        }

        let handle = env.contacts.resolve(&bare);
        let key = ChannelKey::new(handle, ChannelKind::FileTransfer);
        if let Some(existing) = self.find(&key) {
            let active = matches!(&*existing.state(), ChannelState::FileTransfer(ft) if ft.is_active());
            if active {
                warn!(channel = %existing.id(), "Transfer already in progress, rejecting offer");
                self.reject(env, &offer.transfer_id);
                return;
            }
            self.remove(env, existing.id());
        }

        let created = self.get_or_create(env, key, &bare, handle, false, |_| {
            Ok(ChannelState::FileTransfer(FileTransferChannel::incoming(offer)))
        });
        if let Err(e) = created {
            warn!(error = %e, "Could not create transfer channel");
        }
    }

    fn reject(&self, env: &ChannelEnv<'_>, transfer_id: &TransferId) {
        let command = OutboundCommand::RejectTransfer {
            transfer_id: transfer_id.clone(),
        };
        if let Err(e) = env.engine.send(command) {
            warn!(error = %e, "Failed to reject transfer");
        }
    }

    /// Create a channel from a host request map.
    pub fn create_channel(
        &self,
        env: &ChannelEnv<'_>,
        map: &RequestMap,
    ) -> Result<Arc<Channel>, SessionError> {
        let (channel, existed) = self.request_channel(env, map, false)?;
        if existed {
            return Err(SessionError::not_available(format!(
                "{} already exists",
                channel.id()
            )));
        }
        Ok(channel)
    }

    /// Return the existing channel matching a host request, or create it.
    pub fn ensure_requested(
        &self,
        env: &ChannelEnv<'_>,
        map: &RequestMap,
    ) -> Result<(Arc<Channel>, bool), SessionError> {
        self.request_channel(env, map, true)
    }

    #[instrument(skip(self, env, map))]
    fn request_channel(
        &self,
        env: &ChannelEnv<'_>,
        map: &RequestMap,
        reuse: bool,
    ) -> Result<(Arc<Channel>, bool), SessionError> {
        let request = ChannelRequest::parse(map)?;
        let handle = self.resolve_target(env, &request)?;

        match request.kind {
            ChannelKind::Text | ChannelKind::RoomText => {
                let (channel, existed) = self.ensure_channel(env, handle, request.kind, true)?;
                if existed && !reuse {
                    return Err(SessionError::not_available(format!(
                        "{} already exists",
                        channel.id()
                    )));
                }
                Ok((channel, existed))
            }
            ChannelKind::FileTransfer => self.create_outgoing_transfer(env, handle, request),
        }
    }

    fn resolve_target(&self, env: &ChannelEnv<'_>, request: &ChannelRequest) -> Result<Handle, SessionError> {
        let registry = match request.kind.handle_kind() {
            HandleKind::Room => env.rooms,
            _ => env.contacts,
        };
        match &request.target {
            RequestTarget::Handle(handle) if registry.contains_handle(*handle) => Ok(*handle),
            RequestTarget::Handle(handle) => {
                Err(SessionError::invalid_handle(format!("Unknown handle {handle}")))
            }
            RequestTarget::Id(id) => {
                let normalized = match registry.kind() {
                    HandleKind::Room => normalize_room(id)?,
                    _ => normalize_contact(id)?,
                };
                Ok(registry.resolve(&normalized))
            }
        }
    }

    fn create_outgoing_transfer(
        &self,
        env: &ChannelEnv<'_>,
        handle: Handle,
        request: ChannelRequest,
    ) -> Result<(Arc<Channel>, bool), SessionError> {
        if !self.file_transfer_enabled {
            return Err(SessionError::not_available("File transfer is disabled"));
        }
        let metadata = request
            .metadata
            .ok_or_else(|| SessionError::invalid_argument("File transfer metadata is missing"))?;
        let identity = env
            .contacts
            .identity(handle)
            .ok_or_else(|| SessionError::invalid_handle(format!("Unknown contact {handle}")))?;

        if env.selector.supports_any(&identity, FILE_TRANSFER_FEATURES) == Some(false) {
            return Err(SessionError::not_available(format!(
                "{identity} does not support file transfer"
            )));
        }
        let to = env.selector.transfer_address(&identity)?;

        let key = ChannelKey::new(handle, ChannelKind::FileTransfer);
        if let Some(existing) = self.find(&key) {
            let active = matches!(&*existing.state(), ChannelState::FileTransfer(ft) if ft.is_active());
            if active {
                return Err(SessionError::not_available(format!(
                    "A transfer with {identity} is already in progress"
                )));
            }
            self.remove(env, existing.id());
        }

        self.get_or_create(env, key, &identity, env.self_handle, true, |_| {
            let transfer = FileTransferChannel::outgoing(TransferId::generate(), to, metadata);
            env.engine.send(transfer.offer_command())?;
            Ok(ChannelState::FileTransfer(transfer))
        })
    }

    /// Forward engine progress to the owning transfer channel.
    pub fn handle_transfer_event(&self, env: &ChannelEnv<'_>, transfer_id: &TransferId, event: TransferEvent) {
        let Some(channel) = self
            .transfers
            .get(transfer_id)
            .and_then(|id| self.channel(*id.value()))
        else {
            debug!(transfer = %transfer_id, ?event, "Event for unknown transfer");
            return;
        };
        let info = channel.info().clone();
        let mut state = channel.state();
        if let ChannelState::FileTransfer(ft) = &mut *state {
            ft.on_event(env, &info, event);
        }
    }

    /// Feed an occupant presence to its room channel.
    ///
    /// Returns `false` when the address belongs to no room channel. The
    /// channel closes when our own occupant leaves.
    pub fn update_room_presence(&self, env: &ChannelEnv<'_>, presence: &InboundPresence) -> bool {
        let Ok((bare, Some(_))) = split_address(&presence.from) else {
            return false;
        };
        let Some(channel) = env
            .rooms
            .lookup(&bare)
            .and_then(|handle| self.find(&ChannelKey::new(handle, ChannelKind::RoomText)))
        else {
            return false;
        };

        let info = channel.info().clone();
        let close = match &mut *channel.state() {
            ChannelState::Room(room) => room.update_membership(env, &info, presence),
            _ => false,
        };
        if close {
            self.remove(env, info.id);
        }
        true
    }

    /// Update a room title from its disco#info identity.
    pub fn apply_room_info(&self, env: &ChannelEnv<'_>, disco: &DiscoInfo) {
        let Some(channel) = env
            .rooms
            .lookup(&disco.from)
            .and_then(|handle| self.find(&ChannelKey::new(handle, ChannelKind::RoomText)))
        else {
            return;
        };
        let Some(title) = disco
            .identities
            .iter()
            .find(|i| i.category == "conference")
            .and_then(|i| i.name.clone())
        else {
            return;
        };
        let info = channel.info().clone();
        let mut state = channel.state();
        if let ChannelState::Room(room) = &mut *state {
            room.set_title(env, &info, title);
        }
    }

    /// Close a channel at the host's request. Rooms are left and active
    /// transfers are aborted.
    #[instrument(skip(self, env))]
    pub fn close_channel(&self, env: &ChannelEnv<'_>, id: ChannelId) -> Result<(), SessionError> {
        let channel = self
            .channel(id)
            .ok_or_else(|| SessionError::does_not_exist(format!("No such channel {id}")))?;
        let info = channel.info().clone();
        match &mut *channel.state() {
            ChannelState::Room(room) => {
                if let Err(e) = env.engine.send(room.leave_command()) {
                    warn!(channel = %id, error = %e, "Failed to leave room");
                }
            }
            ChannelState::FileTransfer(ft) => {
                if let Err(e) = ft.cancel(env, &info) {
                    warn!(channel = %id, error = %e, "Failed to abort transfer");
                }
            }
            ChannelState::Text(_) => {}
        }
        self.remove(env, id);
        Ok(())
    }

    /// Close every channel without talking to the server.
    pub fn close_all(&self, env: &ChannelEnv<'_>) {
        for info in self.channels() {
            self.remove(env, info.id);
        }
        self.advertised.clear();
    }

    fn remove(&self, env: &ChannelEnv<'_>, id: ChannelId) {
        let Some((_, channel)) = self.by_id.remove(&id) else {
            return;
        };
        self.channels.remove(&channel.info().key());
        self.transfers.retain(|_, channel_id| *channel_id != id);
        info!(channel = %id, "Channel closed");
        env.notify(SessionNotification::ChannelClosed(id));
    }

    fn with_channel<T>(
        &self,
        env: &ChannelEnv<'_>,
        id: ChannelId,
        f: impl FnOnce(&ChannelEnv<'_>, &ChannelInfo, &mut ChannelState) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let channel = self
            .channel(id)
            .ok_or_else(|| SessionError::does_not_exist(format!("No such channel {id}")))?;
        let info = channel.info().clone();
        let mut state = channel.state();
        f(env, &info, &mut state)
    }

    pub fn send_message(
        &self,
        env: &ChannelEnv<'_>,
        id: ChannelId,
        parts: &[MessagePart],
        flags: SendFlags,
    ) -> Result<String, SessionError> {
        self.with_channel(env, id, |env, info, state| match state.as_messages() {
            Some(channel) => channel.send(env, info, parts, flags),
            None => Err(SessionError::not_available("Channel does not carry messages")),
        })
    }

    pub fn acknowledge(&self, env: &ChannelEnv<'_>, id: ChannelId, ids: &[u32]) -> Result<(), SessionError> {
        self.with_channel(env, id, |env, info, state| match state.as_messages() {
            Some(channel) => channel.acknowledge(env, info, ids),
            None => Err(SessionError::not_available("Channel does not carry messages")),
        })
    }

    pub fn set_chat_state(
        &self,
        env: &ChannelEnv<'_>,
        id: ChannelId,
        chat_state: ChatState,
    ) -> Result<(), SessionError> {
        self.with_channel(env, id, |env, info, state| match state.as_messages() {
            Some(channel) => channel.set_chat_state(env, info, chat_state),
            None => Err(SessionError::not_available("Channel does not carry messages")),
        })
    }

    pub fn invite(
        &self,
        env: &ChannelEnv<'_>,
        id: ChannelId,
        handles: &[Handle],
        reason: Option<&str>,
    ) -> Result<(), SessionError> {
        self.with_channel(env, id, |env, _, state| match state {
            ChannelState::Room(room) => room.add_members(env, handles, reason),
            _ => Err(SessionError::not_available("Only rooms take invitations")),
        })
    }

    pub fn accept_transfer(&self, env: &ChannelEnv<'_>, id: ChannelId) -> Result<(), SessionError> {
        self.with_channel(env, id, |env, info, state| match state {
            ChannelState::FileTransfer(ft) => ft.accept(env, info),
            _ => Err(SessionError::not_available("Not a file transfer channel")),
        })
    }

    pub fn cancel_transfer(&self, env: &ChannelEnv<'_>, id: ChannelId) -> Result<(), SessionError> {
        self.with_channel(env, id, |env, info, state| match state {
            ChannelState::FileTransfer(ft) => ft.cancel(env, info),
            _ => Err(SessionError::not_available("Not a file transfer channel")),
        })
    }

    /// Classes any contact may be asked for.
    pub fn requestable_channel_classes(&self) -> Vec<RequestableChannelClass> {
        let mut classes = vec![
            RequestableChannelClass::text(HandleKind::Contact),
            RequestableChannelClass::text(HandleKind::Room),
        ];
        if self.file_transfer_enabled {
            classes.push(RequestableChannelClass::file_transfer());
        }
        classes
    }

    /// Classes advertised for one contact, based on its known capabilities.
    pub fn classes_for(&self, env: &ChannelEnv<'_>, identity: &str) -> Vec<RequestableChannelClass> {
        let mut classes = vec![RequestableChannelClass::text(HandleKind::Contact)];
        if self.file_transfer_enabled
            && env.selector.supports_any(identity, FILE_TRANSFER_FEATURES) == Some(true)
        {
            classes.push(RequestableChannelClass::file_transfer());
        }
        classes
    }

    /// Recompute a contact's classes and announce them if they changed.
    pub fn refresh_capabilities(&self, env: &ChannelEnv<'_>, identity: &str) {
        let handle = env.contacts.resolve(identity);
        let classes = self.classes_for(env, identity);
        let changed = match self.advertised.get(&handle) {
            Some(previous) => *previous != classes,
            None => classes.len() > 1,
        };
        if changed {
            debug!(%handle, count = classes.len(), "Capabilities changed");
            self.advertised.insert(handle, classes.clone());
            env.notify(SessionNotification::CapabilitiesChanged { handle, classes });
        }
    }
}

impl std::fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRouter")
            .field("channels", &self.by_id.len())
            .field("file_transfer_enabled", &self.file_transfer_enabled)
            .finish()
    }
}

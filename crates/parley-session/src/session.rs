//! The session: connection state machine and host-facing operations.
//!
//! A [`Session`] composes the handle registries, presence aggregation,
//! capability cache, roster synchronizer and channel router. Inbound engine
//! events are applied with [`Session::handle_event`], usually from the
//! dispatch loop; host calls may come from any task.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::avatar::{AvatarData, AvatarSpec, AvatarTokens};
use crate::caps::{CapabilityCache, ResourceSelector};
use crate::channel::{
    Channel, ChannelEnv, ChannelId, ChannelInfo, ChannelRouter, RequestMap,
    RequestableChannelClass,
};
use crate::config::{ConfigError, SessionConfig};
use crate::engine::{OutboundCommand, ProtocolEngine};
use crate::error::SessionError;
use crate::events::{
    Availability, InboundEvent, InboundPresence, NotificationSink, PhotoUpdate,
    SessionNotification, StreamErrorKind,
};
use crate::handles::{normalize_contact, split_address, Handles};
use crate::message::{ChatState, MessagePart, ReceivedMessage, SendFlags};
use crate::presence::{
    status_specs, AggregatedPresence, OwnPresence, PresenceAggregator, ResourcePresence, Show,
    StatusRanking,
};
use crate::roster::RosterGroupSynchronizer;
use crate::types::{
    Account, AuthState, ConnectionStatus, ContactListState, Handle, HandleKind, SessionStatus,
    StatusReason, SubscriptionState,
};

/// Everything hosts can ask about one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactAttributes {
    pub handle: Handle,
    pub contact_id: String,
    pub subscribe: SubscriptionState,
    pub publish: SubscriptionState,
    pub presence: AggregatedPresence,
    pub alias: String,
    pub groups: Vec<String>,
    pub capabilities: Vec<RequestableChannelClass>,
    /// Known only while connected
    pub avatar_token: Option<String>,
}

/// One logged-in account.
pub struct Session {
    account: Account,
    status: Arc<SessionStatus>,
    contact_list: Mutex<ContactListState>,
    disconnect_requested: AtomicBool,
    handles: Handles,
    self_handle: Handle,
    presence: Arc<PresenceAggregator>,
    caps: Arc<CapabilityCache>,
    selector: ResourceSelector,
    roster: RosterGroupSynchronizer,
    router: ChannelRouter,
    avatars: AvatarTokens,
    avatar_spec: AvatarSpec,
    own_presence: Mutex<OwnPresence>,
    engine: Arc<dyn ProtocolEngine>,
    sink: Arc<dyn NotificationSink>,
}

impl Session {
    pub fn new(
        account: Account,
        ranking: StatusRanking,
        file_transfer: bool,
        engine: Arc<dyn ProtocolEngine>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let handles = Handles::new();
        let self_handle = handles.contacts().resolve(&account.jid);
        let status = Arc::new(SessionStatus::new());
        let presence = Arc::new(PresenceAggregator::new(
            ranking,
            handles.contacts().clone(),
            sink.clone(),
        ));
        let caps = Arc::new(CapabilityCache::new());
        let selector = ResourceSelector::new(presence.clone(), caps.clone());
        let roster = RosterGroupSynchronizer::new(
            status.clone(),
            handles.contacts().clone(),
            engine.clone(),
            sink.clone(),
        );

        Self {
            own_presence: Mutex::new(OwnPresence::online(account.priority)),
            account,
            status,
            contact_list: Mutex::new(ContactListState::NotYetRequested),
            disconnect_requested: AtomicBool::new(false),
            handles,
            self_handle,
            presence,
            caps,
            selector,
            roster,
            router: ChannelRouter::new(file_transfer),
            avatars: AvatarTokens::new(),
            avatar_spec: AvatarSpec::default(),
            engine,
            sink,
        }
    }

    pub fn from_config(
        config: &SessionConfig,
        engine: Arc<dyn ProtocolEngine>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.account()?,
            config.ranking(),
            config.channels.file_transfer,
            engine,
            sink,
        ))
    }

    fn env(&self) -> ChannelEnv<'_> {
        ChannelEnv {
            engine: &*self.engine,
            sink: &*self.sink,
            contacts: self.handles.contacts(),
            rooms: self.handles.rooms(),
            selector: &self.selector,
            account: &self.account,
            self_handle: self.self_handle,
        }
    }

    fn notify(&self, notification: SessionNotification) {
        self.sink.notify(notification);
    }

    // State

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn self_handle(&self) -> Handle {
        self.self_handle
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.connection()
    }

    pub fn auth_state(&self) -> AuthState {
        self.status.auth()
    }

    pub fn contact_list_state(&self) -> ContactListState {
        *self.contact_list.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_contact_list_state(&self, state: ContactListState) {
        let changed = {
            let mut current = self.contact_list.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.notify(SessionNotification::ContactListStateChanged(state));
        }
    }

    pub fn handles(&self) -> &Handles {
        &self.handles
    }

    pub fn presence(&self) -> &PresenceAggregator {
        &self.presence
    }

    pub fn capabilities(&self) -> &CapabilityCache {
        &self.caps
    }

    pub fn selector(&self) -> &ResourceSelector {
        &self.selector
    }

    pub fn roster(&self) -> &RosterGroupSynchronizer {
        &self.roster
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    pub fn avatar_spec(&self) -> &AvatarSpec {
        &self.avatar_spec
    }

    // Connection state machine

    /// Start connecting. Authentication waits for [`Session::provide_password`].
    #[instrument(skip(self), fields(jid = %self.account.jid))]
    pub fn connect(&self) -> Result<(), SessionError> {
        if self.status.connection() != ConnectionStatus::Disconnected {
            return Err(SessionError::not_available("Already connecting or connected"));
        }
        self.disconnect_requested.store(false, Ordering::Release);
        self.status.set_connection(ConnectionStatus::Connecting);
        self.status.set_auth(AuthState::InProgress);
        info!("Connecting");
        self.notify(SessionNotification::StatusChanged {
            status: ConnectionStatus::Connecting,
            reason: StatusReason::Requested,
        });
        Ok(())
    }

    /// Hand the password to the engine and open the stream.
    #[instrument(skip(self, password))]
    pub fn provide_password(&self, password: &str) -> Result<(), SessionError> {
        if self.status.connection() != ConnectionStatus::Connecting
            || self.status.auth() != AuthState::InProgress
        {
            return Err(SessionError::not_available("No authentication in progress"));
        }

        let presence = self.own_presence().clone();
        let command = OutboundCommand::ConnectToServer {
            jid: self.account.jid.clone(),
            resource: self.account.resource.clone(),
            password: password.to_string(),
            presence,
        };
        if let Err(e) = self.engine.send(command) {
            warn!(error = %e, "Engine refused to connect");
            self.go_offline(StatusReason::NetworkError);
            return Err(e.into());
        }
        Ok(())
    }

    /// Disconnect at the host's request.
    #[instrument(skip(self))]
    pub fn disconnect(&self) -> Result<(), SessionError> {
        if self.status.connection() == ConnectionStatus::Disconnected {
            return Ok(());
        }
        self.disconnect_requested.store(true, Ordering::Release);
        if let Err(e) = self.engine.send(OutboundCommand::Disconnect) {
            warn!(error = %e, "Failed to ask the engine to disconnect");
        }
        self.go_offline(StatusReason::Requested);
        Ok(())
    }

    fn on_stream_connected(&self) {
        if self.status.connection() != ConnectionStatus::Connecting {
            warn!(status = ?self.status.connection(), "Stream connected while not connecting");
            return;
        }
        self.status.set_auth(AuthState::Succeeded);
        self.status.set_connection(ConnectionStatus::Connected);
        info!(jid = %self.account.full_jid(), "Connected");
        self.notify(SessionNotification::StatusChanged {
            status: ConnectionStatus::Connected,
            reason: StatusReason::Requested,
        });

        let own = self.own_presence().clone();
        self.notify(SessionNotification::PresenceChanged {
            handle: self.self_handle,
            presence: own.aggregated(),
        });

        self.set_contact_list_state(ContactListState::Waiting);
        for command in [
            OutboundCommand::RequestRoster,
            OutboundCommand::SendPresence(own),
            OutboundCommand::RequestVCard {
                jid: self.account.jid.clone(),
            },
        ] {
            if let Err(e) = self.engine.send(command) {
                warn!(error = %e, "Failed to send post-connect command");
            }
        }
    }

    fn on_stream_lost(&self, reason: StatusReason) {
        if reason == StatusReason::AuthenticationFailed {
            self.status.set_auth(AuthState::Failed);
        }
        let reason = if self.disconnect_requested.load(Ordering::Acquire) {
            StatusReason::Requested
        } else {
            reason
        };
        self.go_offline(reason);
    }

    /// Tear down per-connection state and report the disconnect once.
    fn go_offline(&self, reason: StatusReason) {
        let previous = self.status.set_connection(ConnectionStatus::Disconnected);
        if previous == ConnectionStatus::Disconnected {
            return;
        }
        if self.status.auth() == AuthState::InProgress {
            self.status.set_auth(AuthState::NotStarted);
        }

        self.router.close_all(&self.env());
        self.presence.clear();
        self.caps.clear_addresses();
        self.selector.clear();
        self.roster.reset();
        self.avatars.reset();
        self.own_presence().photo = PhotoUpdate::NotAdvertised;
        *self.contact_list.lock().unwrap_or_else(PoisonError::into_inner) =
            ContactListState::NotYetRequested;

        info!(?reason, "Disconnected");
        self.notify(SessionNotification::StatusChanged {
            status: ConnectionStatus::Disconnected,
            reason,
        });
    }

    // Inbound events

    /// Apply one event from the protocol engine.
    pub fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::StreamConnected => self.on_stream_connected(),
            InboundEvent::StreamDisconnected => self.on_stream_lost(StatusReason::NoneSpecified),
            InboundEvent::StreamError(kind) => {
                if let StreamErrorKind::Other(condition) = &kind {
                    warn!(%condition, "Stream error");
                }
                self.on_stream_lost(kind.reason());
            }
            event if !self.status.is_connected() => {
                debug!(?event, "Dropping event while not connected");
            }
            InboundEvent::Message(message) => {
                self.router.route_inbound_message(&self.env(), &message);
            }
            InboundEvent::Presence(presence) => self.on_presence(presence),
            InboundEvent::SubscriptionRequest { from, message } => match normalize_contact(&from) {
                Ok(identity) => {
                    let handle = self.handles.contacts().resolve(&identity);
                    self.notify(SessionNotification::PublishRequested { handle, message });
                }
                Err(e) => warn!(%from, error = %e, "Dropping subscription request"),
            },
            InboundEvent::RosterReceived(items) => {
                self.roster.load(items);
                self.set_contact_list_state(ContactListState::Success);
            }
            InboundEvent::RosterPush(item) => self.roster.apply_push(item),
            InboundEvent::RosterUpdateResult { request_id, result } => {
                self.roster.resolve(request_id, result);
            }
            InboundEvent::DiscoInfo(disco) => {
                let env = self.env();
                let mut refreshed = BTreeSet::new();
                for address in self.caps.apply_disco_info(&disco) {
                    if let Ok((bare, _)) = split_address(&address) {
                        refreshed.insert(bare);
                    }
                }
                for identity in refreshed {
                    self.router.refresh_capabilities(&env, &identity);
                }
                self.router.apply_room_info(&env, &disco);
            }
            InboundEvent::DiscoInfoFailed { from, node, error } => {
                debug!(%from, ?node, %error, "Disco query failed");
                self.query_capabilities(self.caps.query_failed(&from, node.as_deref()));
            }
            InboundEvent::VCard { jid, photo } => self.on_vcard(jid, photo),
            InboundEvent::TransferOffer(offer) => {
                self.router.route_inbound_transfer_offer(&self.env(), offer);
            }
            InboundEvent::Transfer { transfer_id, event } => {
                self.router
                    .handle_transfer_event(&self.env(), &transfer_id, event);
            }
        }
    }

    fn on_presence(&self, presence: InboundPresence) {
        let env = self.env();

        if self.router.update_room_presence(&env, &presence) {
            match presence.availability {
                Availability::Available => self
                    .presence
                    .update(&presence.from, "", resource_presence(&presence)),
                Availability::Unavailable | Availability::Error => {
                    self.presence.remove(&presence.from, "")
                }
            }
            return;
        }

        let (bare, resource) = match split_address(&presence.from) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(from = %presence.from, error = %e, "Dropping presence with bad sender");
                return;
            }
        };
        if bare == self.account.jid {
            debug!(from = %presence.from, "Ignoring presence of our own account");
            return;
        }
        let resource = resource.unwrap_or_default();

        match presence.availability {
            Availability::Available => {
                self.presence
                    .update(&bare, &resource, resource_presence(&presence));

                if let Some(advert) = &presence.caps {
                    if self.caps.apply_advert(&presence.from, advert) {
                        self.query_capabilities(vec![(presence.from.clone(), advert.node_ver())]);
                    }
                }
                self.router.refresh_capabilities(&env, &bare);

                let token = match &presence.photo {
                    PhotoUpdate::NotAdvertised => None,
                    PhotoUpdate::NoPhoto => Some(String::new()),
                    PhotoUpdate::Hash(hash) => Some(hash.to_lowercase()),
                };
                if let Some(token) = token {
                    if self.avatars.update(&bare, &token) {
                        let handle = self.handles.contacts().resolve(&bare);
                        self.notify(SessionNotification::AvatarUpdated { handle, token });
                    }
                }
            }
            Availability::Unavailable => {
                self.presence.remove(&bare, &resource);
                self.query_capabilities(self.caps.forget(&presence.from));
                self.router.refresh_capabilities(&env, &bare);
            }
            Availability::Error => {
                self.presence
                    .update(&bare, &resource, ResourcePresence::error());
            }
        }
    }

    fn query_capabilities(&self, queries: Vec<(String, String)>) {
        for (to, node) in queries {
            let query = OutboundCommand::RequestDiscoInfo {
                to,
                node: Some(node),
            };
            if let Err(e) = self.engine.send(query) {
                warn!(error = %e, "Failed to query capabilities");
            }
        }
    }

    fn on_vcard(&self, jid: String, photo: Option<AvatarData>) {
        let Ok(identity) = normalize_contact(&jid) else {
            warn!(%jid, "Dropping vCard with bad address");
            return;
        };
        if identity == self.account.jid {
            self.avatars.mark_own_vcard_fetched();
            let photo = match &photo {
                Some(avatar) => PhotoUpdate::Hash(avatar.token()),
                None => PhotoUpdate::NoPhoto,
            };
            if let Err(e) = self.announce_own_photo(photo) {
                warn!(error = %e, "Failed to announce own avatar");
            }
        }

        let handle = self.handles.contacts().resolve(&identity);
        let token = photo.as_ref().map(AvatarData::token).unwrap_or_default();
        let changed = self.avatars.update(&identity, &token);
        if let Some(avatar) = photo {
            self.notify(SessionNotification::AvatarRetrieved {
                handle,
                token: token.clone(),
                avatar,
            });
        }
        if changed {
            self.notify(SessionNotification::AvatarUpdated { handle, token });
        }
    }

    // Handles

    pub fn request_handles(
        &self,
        kind: HandleKind,
        identifiers: &[String],
    ) -> Result<Vec<Handle>, SessionError> {
        self.handles.request(kind, identifiers)
    }

    pub fn inspect_handles(&self, kind: HandleKind, handles: &[Handle]) -> Result<Vec<String>, SessionError> {
        self.status.ensure_connected()?;
        self.handles.inspect(kind, handles)
    }

    fn contact_ids(&self, handles: &[Handle]) -> Result<Vec<String>, SessionError> {
        self.handles.contacts().identities(handles)
    }

    // Contact attributes

    pub fn contact_attributes(&self, handles: &[Handle]) -> Result<Vec<ContactAttributes>, SessionError> {
        self.status.ensure_connected()?;
        let identities = self.contact_ids(handles)?;
        let env = self.env();

        Ok(handles
            .iter()
            .zip(identities)
            .map(|(&handle, identity)| {
                let avatar_token = self.avatars.token(&identity);
                if handle == self.self_handle {
                    return ContactAttributes {
                        handle,
                        contact_id: identity.clone(),
                        subscribe: SubscriptionState::Yes,
                        publish: SubscriptionState::Yes,
                        presence: self.own_presence().aggregated(),
                        alias: identity,
                        groups: Vec::new(),
                        capabilities: self.router.requestable_channel_classes(),
                        avatar_token,
                    };
                }

                let item = self.roster.item(&identity);
                let (subscribe, publish) = item
                    .as_ref()
                    .map(|i| (i.subscribe_state(), i.publish_state()))
                    .unwrap_or((SubscriptionState::No, SubscriptionState::No));
                ContactAttributes {
                    handle,
                    subscribe,
                    publish,
                    presence: self.presence.aggregate(&identity),
                    alias: item
                        .as_ref()
                        .and_then(|i| i.name.clone())
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| identity.clone()),
                    groups: item
                        .map(|i| i.groups.into_iter().collect())
                        .unwrap_or_default(),
                    capabilities: self.router.classes_for(&env, &identity),
                    avatar_token,
                    contact_id: identity,
                }
            })
            .collect())
    }

    /// Attributes of every roster contact.
    pub fn contact_list_attributes(&self) -> Result<Vec<ContactAttributes>, SessionError> {
        if self.contact_list_state() != ContactListState::Success {
            return Err(SessionError::not_available("The contact list has not been retrieved"));
        }
        let handles: Vec<Handle> = self
            .roster
            .items()
            .iter()
            .map(|item| self.handles.contacts().resolve(&item.jid))
            .collect();
        self.contact_attributes(&handles)
    }

    // Aliases

    pub fn get_aliases(&self, handles: &[Handle]) -> Result<Vec<(Handle, String)>, SessionError> {
        Ok(self
            .contact_attributes(handles)?
            .into_iter()
            .map(|attrs| (attrs.handle, attrs.alias))
            .collect())
    }

    pub fn set_aliases(&self, aliases: &[(Handle, String)]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let handles: Vec<Handle> = aliases.iter().map(|(h, _)| *h).collect();
        let identities = self.contact_ids(&handles)?;
        for ((handle, alias), identity) in aliases.iter().zip(identities) {
            if *handle == self.self_handle {
                debug!("Ignoring alias for self");
                continue;
            }
            self.roster.set_alias(&identity, alias)?;
        }
        Ok(())
    }

    // Subscriptions

    fn send_all(&self, commands: impl IntoIterator<Item = OutboundCommand>) -> Result<(), SessionError> {
        for command in commands {
            self.engine.send(command)?;
        }
        Ok(())
    }

    /// Add contacts to the roster and ask to see their presence.
    pub fn request_subscription(&self, handles: &[Handle], message: Option<&str>) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let identities = self.contact_ids(handles)?;
        for identity in identities {
            self.roster.ensure_contact(&identity)?;
            self.engine.send(OutboundCommand::Subscribe {
                to: identity,
                message: message.map(str::to_string),
            })?;
        }
        Ok(())
    }

    pub fn authorize_publication(&self, handles: &[Handle]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let identities = self.contact_ids(handles)?;
        self.send_all(identities.into_iter().map(|to| OutboundCommand::Subscribed { to }))
    }

    pub fn remove_contacts(&self, handles: &[Handle]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        for identity in self.contact_ids(handles)? {
            self.roster.remove_contact(&identity)?;
        }
        Ok(())
    }

    pub fn unsubscribe(&self, handles: &[Handle]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let identities = self.contact_ids(handles)?;
        self.send_all(identities.into_iter().map(|to| OutboundCommand::Unsubscribe { to }))
    }

    pub fn unpublish(&self, handles: &[Handle]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let identities = self.contact_ids(handles)?;
        self.send_all(identities.into_iter().map(|to| OutboundCommand::Unsubscribed { to }))
    }

    // Groups

    pub fn groups(&self) -> Vec<String> {
        self.roster.groups()
    }

    pub fn group_members(&self, group: &str) -> Vec<Handle> {
        self.roster
            .members(group)
            .iter()
            .map(|identity| self.handles.contacts().resolve(identity))
            .collect()
    }

    pub fn set_contact_groups(&self, handle: Handle, groups: &[String]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let identity = self
            .contact_ids(&[handle])?
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::invalid_handle(format!("Unknown contact {handle}")))?;
        self.roster
            .set_groups_for_contact(&identity, groups.iter().cloned())
    }

    pub fn set_group_members(&self, group: &str, handles: &[Handle]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        self.roster.set_group_members(group, &self.contact_ids(handles)?)
    }

    pub fn add_to_group(&self, group: &str, handles: &[Handle]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        self.roster.add_to_group(group, &self.contact_ids(handles)?)
    }

    pub fn remove_from_group(&self, group: &str, handles: &[Handle]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        self.roster.remove_from_group(group, &self.contact_ids(handles)?)
    }

    pub fn remove_group(&self, group: &str) -> Result<(), SessionError> {
        self.roster.remove_group(group)
    }

    pub fn rename_group(&self, old_name: &str, new_name: &str) -> Result<(), SessionError> {
        self.roster.rename_group(old_name, new_name)
    }

    // Own presence

    fn own_presence(&self) -> std::sync::MutexGuard<'_, OwnPresence> {
        self.own_presence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set our status from a status keyword.
    ///
    /// # Panics
    ///
    /// Panics when `keyword` is not in [`status_specs`].
    pub fn set_presence(&self, keyword: &str, message: &str) -> Result<(), SessionError> {
        if let Some(spec) = status_specs().get(keyword) {
            if !spec.may_set_on_self {
                return Err(SessionError::invalid_argument(format!(
                    "Status '{keyword}' cannot be set on self"
                )));
            }
        }
        let updated = {
            let mut own = self.own_presence();
            own.set_keyword(keyword, message);
            own.clone()
        };
        self.publish_own_presence(updated)
    }

    /// Set our status; `None` goes offline.
    pub fn set_status(&self, show: Option<Show>, message: Option<&str>) -> Result<(), SessionError> {
        let updated = {
            let mut own = self.own_presence();
            match show {
                Some(show) => {
                    own.available = true;
                    own.show = show;
                    own.status = message.filter(|m| !m.is_empty()).map(str::to_string);
                }
                None => {
                    own.available = false;
                    own.status = None;
                }
            }
            own.clone()
        };
        self.publish_own_presence(updated)
    }

    fn publish_own_presence(&self, own: OwnPresence) -> Result<(), SessionError> {
        self.notify(SessionNotification::PresenceChanged {
            handle: self.self_handle,
            presence: own.aggregated(),
        });
        if self.status.is_connected() {
            self.engine.send(OutboundCommand::SendPresence(own))?;
        }
        Ok(())
    }

    // Avatars

    /// Ask for the vCards of contacts; results arrive as `AvatarRetrieved`.
    pub fn request_avatars(&self, handles: &[Handle]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let identities = self.contact_ids(handles)?;
        self.send_all(identities.into_iter().map(|jid| OutboundCommand::RequestVCard { jid }))
    }

    /// Tokens known for `handles`; unknown ones are left out.
    pub fn known_avatar_tokens(&self, handles: &[Handle]) -> Result<BTreeMap<Handle, String>, SessionError> {
        self.status.ensure_connected()?;
        let identities = self.contact_ids(handles)?;
        Ok(handles
            .iter()
            .zip(identities)
            .filter_map(|(handle, identity)| self.avatars.token(&identity).map(|t| (*handle, t)))
            .collect())
    }

    /// Publish a new avatar in our vCard and return its token.
    pub fn set_avatar(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String, SessionError> {
        self.ensure_own_vcard()?;
        if bytes.len() > self.avatar_spec.max_bytes as usize {
            return Err(SessionError::invalid_argument(format!(
                "Avatar is larger than {} bytes",
                self.avatar_spec.max_bytes
            )));
        }
        if !self.avatar_spec.mime_types.iter().any(|m| m == mime_type) {
            return Err(SessionError::invalid_argument(format!(
                "Unsupported avatar type {mime_type}"
            )));
        }
        let avatar = AvatarData::new(bytes, mime_type);
        let token = avatar.token();
        self.engine.send(OutboundCommand::SetOwnAvatar(Some(avatar)))?;
        self.update_own_token(&token);
        self.announce_own_photo(PhotoUpdate::Hash(token.clone()))?;
        Ok(token)
    }

    pub fn clear_avatar(&self) -> Result<(), SessionError> {
        self.ensure_own_vcard()?;
        self.engine.send(OutboundCommand::SetOwnAvatar(None))?;
        self.update_own_token("");
        self.announce_own_photo(PhotoUpdate::NoPhoto)
    }

    /// Re-send our presence when the advertised photo hash changes.
    fn announce_own_photo(&self, photo: PhotoUpdate) -> Result<(), SessionError> {
        let updated = {
            let mut own = self.own_presence();
            if own.photo == photo {
                return Ok(());
            }
            own.photo = photo;
            own.clone()
        };
        if updated.available && self.status.is_connected() {
            self.engine.send(OutboundCommand::SendPresence(updated))?;
        }
        Ok(())
    }

    fn ensure_own_vcard(&self) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        if !self.avatars.own_vcard_fetched() {
            return Err(SessionError::not_available("Own vCard has not been retrieved yet"));
        }
        Ok(())
    }

    fn update_own_token(&self, token: &str) {
        if self.avatars.update(&self.account.jid, token) {
            self.notify(SessionNotification::AvatarUpdated {
                handle: self.self_handle,
                token: token.to_string(),
            });
        }
    }

    // Channels

    pub fn requestable_channel_classes(&self) -> Vec<RequestableChannelClass> {
        self.router.requestable_channel_classes()
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.router.channels()
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.router.channel(id)
    }

    pub fn create_channel(&self, request: &RequestMap) -> Result<ChannelInfo, SessionError> {
        self.status.ensure_connected()?;
        let channel = self.router.create_channel(&self.env(), request)?;
        Ok(channel.info().clone())
    }

    /// Returns the channel and whether it already existed.
    pub fn ensure_channel(&self, request: &RequestMap) -> Result<(ChannelInfo, bool), SessionError> {
        self.status.ensure_connected()?;
        let (channel, existed) = self.router.ensure_requested(&self.env(), request)?;
        Ok((channel.info().clone(), existed))
    }

    pub fn close_channel(&self, id: ChannelId) -> Result<(), SessionError> {
        self.router.close_channel(&self.env(), id)
    }

    pub fn pending_messages(&self, id: ChannelId) -> Result<Vec<ReceivedMessage>, SessionError> {
        self.router
            .channel(id)
            .map(|channel| channel.pending_messages())
            .ok_or_else(|| SessionError::does_not_exist(format!("No such channel {id}")))
    }

    pub fn send_message(
        &self,
        id: ChannelId,
        parts: &[MessagePart],
        flags: SendFlags,
    ) -> Result<String, SessionError> {
        self.status.ensure_connected()?;
        self.router.send_message(&self.env(), id, parts, flags)
    }

    pub fn acknowledge_messages(&self, id: ChannelId, ids: &[u32]) -> Result<(), SessionError> {
        self.router.acknowledge(&self.env(), id, ids)
    }

    pub fn set_chat_state(&self, id: ChannelId, state: ChatState) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        self.router.set_chat_state(&self.env(), id, state)
    }

    pub fn invite_to_room(
        &self,
        id: ChannelId,
        handles: &[Handle],
        reason: Option<&str>,
    ) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        self.router.invite(&self.env(), id, handles, reason)
    }

    pub fn accept_transfer(&self, id: ChannelId) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        self.router.accept_transfer(&self.env(), id)
    }

    pub fn cancel_transfer(&self, id: ChannelId) -> Result<(), SessionError> {
        self.router.cancel_transfer(&self.env(), id)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account.full_jid())
            .field("status", &self.status.connection())
            .field("router", &self.router)
            .finish()
    }
}

fn resource_presence(presence: &InboundPresence) -> ResourcePresence {
    ResourcePresence {
        show: presence.show.unwrap_or(Show::Available),
        status: presence.status.clone(),
        priority: presence.priority,
        error: false,
    }
}

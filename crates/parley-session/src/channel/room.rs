use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use super::text::{new_token, plain_text, PendingQueue};
use super::{ChannelEnv, ChannelInfo, MessageChannel};
use crate::engine::OutboundCommand;
use crate::error::SessionError;
use crate::events::{Availability, InboundPresence, SessionNotification};
use crate::message::{
    ChatState, InboundMessage, MessageKind, MessagePart, OutboundMessage, ReceivedMessage,
    SendFlags,
};
use crate::types::Handle;

/// A joined multi-user room.
///
/// Participants are identified by their full room address (`room@host/nick`)
/// and hold contact handles for it. Our own occupant is a member as well.
#[derive(Debug)]
pub struct RoomChannel {
    room: String,
    nick: String,
    members: BTreeMap<String, Handle>,
    /// Ids of messages we sent, so the room's echo can be dropped
    sent_ids: HashSet<String>,
    title: Option<String>,
    subject: Option<String>,
    joined: bool,
    pending: PendingQueue,
}

impl RoomChannel {
    pub fn new(room: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            nick: nick.into(),
            members: BTreeMap::new(),
            sent_ids: HashSet::new(),
            title: None,
            subject: None,
            joined: false,
            pending: PendingQueue::default(),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn own_occupant(&self) -> String {
        format!("{}/{}", self.room, self.nick)
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn member_handles(&self) -> Vec<Handle> {
        self.members.values().copied().collect()
    }

    pub(crate) fn join_command(&self) -> OutboundCommand {
        OutboundCommand::JoinRoom {
            room: self.room.clone(),
            nick: self.nick.clone(),
        }
    }

    pub(crate) fn leave_command(&self) -> OutboundCommand {
        OutboundCommand::LeaveRoom {
            room: self.room.clone(),
            nick: self.nick.clone(),
        }
    }

    /// Apply an occupant presence. Returns `true` when our own occupant left
    /// and the channel should close.
    pub(crate) fn update_membership(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        presence: &InboundPresence,
    ) -> bool {
        let is_self = presence.from == self.own_occupant()
            || presence.muc.map(|m| m.self_presence).unwrap_or(false);

        match presence.availability {
            Availability::Available => {
                if is_self {
                    self.joined = true;
                }
                if self.members.contains_key(&presence.from) {
                    return false;
                }
                let handle = env.contacts.resolve(&presence.from);
                self.members.insert(presence.from.clone(), handle);
                debug!(channel = %info.id, occupant = %presence.from, "Occupant joined");
                env.notify(SessionNotification::MembersChanged {
                    channel: info.id,
                    added: vec![handle],
                    removed: Vec::new(),
                });
                false
            }
            Availability::Unavailable | Availability::Error => {
                if is_self {
                    debug!(channel = %info.id, "Own occupant left the room");
                    return true;
                }
                if let Some(handle) = self.members.remove(&presence.from) {
                    env.notify(SessionNotification::MembersChanged {
                        channel: info.id,
                        added: Vec::new(),
                        removed: vec![handle],
                    });
                }
                false
            }
        }
    }

    pub(crate) fn set_title(&mut self, env: &ChannelEnv<'_>, info: &ChannelInfo, title: String) {
        if self.title.as_deref() == Some(title.as_str()) {
            return;
        }
        self.title = Some(title);
        self.notify_properties(env, info);
    }

    fn notify_properties(&self, env: &ChannelEnv<'_>, info: &ChannelInfo) {
        env.notify(SessionNotification::RoomPropertiesChanged {
            channel: info.id,
            title: self.title.clone(),
            subject: self.subject.clone(),
        });
    }

    /// Invite contacts with direct invitations (XEP-0249).
    pub fn add_members(
        &mut self,
        env: &ChannelEnv<'_>,
        handles: &[Handle],
        reason: Option<&str>,
    ) -> Result<(), SessionError> {
        let invitees = env.contacts.identities(handles)?;
        for invitee in invitees {
            env.engine.send(OutboundCommand::InviteToRoom {
                room: self.room.clone(),
                invitee,
                reason: reason.map(str::to_string),
            })?;
        }
        Ok(())
    }
}

impl MessageChannel for RoomChannel {
    fn receive(&mut self, env: &ChannelEnv<'_>, info: &ChannelInfo, message: &InboundMessage) {
        if let Some(id) = &message.id {
            if self.sent_ids.remove(id) {
                debug!(channel = %info.id, %id, "Dropping echo of own message");
                return;
            }
        }

        if let Some(subject) = &message.subject {
            if self.subject.as_deref() != Some(subject.as_str()) {
                self.subject = Some(subject.clone());
                self.notify_properties(env, info);
            }
        }

        let Some(body) = message.body.as_deref().filter(|b| !b.is_empty()) else {
            return;
        };

        let Some(sender) = self.members.get(&message.from).copied() else {
            warn!(channel = %info.id, from = %message.from, "Dropping message from unknown occupant");
            return;
        };

        let received = self.pending.push_message(sender, &message.from, message, body);
        env.notify(SessionNotification::MessageReceived {
            channel: info.id,
            message: received,
        });
    }

    fn send(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        parts: &[MessagePart],
        _flags: SendFlags,
    ) -> Result<String, SessionError> {
        let body = plain_text(parts)?;
        let token = new_token();
        let message = OutboundMessage {
            id: token.clone(),
            to: self.room.clone(),
            kind: MessageKind::GroupChat,
            body: Some(body.to_string()),
            ..Default::default()
        };
        env.engine.send(OutboundCommand::SendMessage(message))?;
        self.sent_ids.insert(token.clone());
        env.notify(SessionNotification::MessageSent {
            channel: info.id,
            token: token.clone(),
            parts: parts.to_vec(),
        });
        Ok(token)
    }

    fn acknowledge(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        ids: &[u32],
    ) -> Result<(), SessionError> {
        // Rooms never answer with markers.
        self.pending.acknowledge_and_notify(env, info, ids)?;
        Ok(())
    }

    fn set_chat_state(
        &mut self,
        _env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        state: ChatState,
    ) -> Result<(), SessionError> {
        debug!(channel = %info.id, state = state.as_str(), "Chat states are not sent to rooms");
        Ok(())
    }

    fn pending_messages(&self) -> Vec<ReceivedMessage> {
        self.pending.messages()
    }
}

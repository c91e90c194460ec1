//! Per-peer channel objects and the router that owns them.
//!
//! A channel is keyed by (target handle, handle kind, channel kind) and at
//! most one live channel exists per key. Text and room channels share the
//! [`MessageChannel`] capability; room channels additionally track
//! membership; file transfer channels run the transfer state machine.

mod file_transfer;
mod request;
mod room;
mod router;
mod text;

pub use file_transfer::{
    FileTransferChannel, TransferDirection, TransferError, TransferEvent, TransferId,
    TransferMetadata, TransferOffer, TransferState, TransferStateReason,
};
pub use request::{
    ChannelRequest, RequestMap, RequestTarget, RequestValue, RequestableChannelClass, PROP_CHANNEL_TYPE,
    PROP_FT_CONTENT_HASH, PROP_FT_CONTENT_HASH_TYPE, PROP_FT_CONTENT_TYPE, PROP_FT_DATE,
    PROP_FT_DESCRIPTION, PROP_FT_FILENAME, PROP_FT_SIZE, PROP_TARGET_HANDLE,
    PROP_TARGET_HANDLE_TYPE, PROP_TARGET_ID, TYPE_FILE_TRANSFER, TYPE_TEXT,
};
pub use room::RoomChannel;
pub use router::ChannelRouter;
pub use text::TextChannel;

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::caps::ResourceSelector;
use crate::engine::ProtocolEngine;
use crate::error::SessionError;
use crate::events::{NotificationSink, SessionNotification};
use crate::handles::HandleRegistry;
use crate::message::{ChatState, InboundMessage, MessagePart, ReceivedMessage, SendFlags};
use crate::types::{Account, Handle, HandleKind};

/// Session-unique channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelKind {
    /// One-to-one text with a contact
    Text,
    /// Multi-user room
    RoomText,
    FileTransfer,
}

impl ChannelKind {
    /// The channel type string hosts see.
    pub fn channel_type(&self) -> &'static str {
        match self {
            ChannelKind::Text | ChannelKind::RoomText => TYPE_TEXT,
            ChannelKind::FileTransfer => TYPE_FILE_TRANSFER,
        }
    }

    pub fn handle_kind(&self) -> HandleKind {
        match self {
            ChannelKind::RoomText => HandleKind::Room,
            ChannelKind::Text | ChannelKind::FileTransfer => HandleKind::Contact,
        }
    }
}

/// Uniqueness key of a live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub handle: Handle,
    pub handle_kind: HandleKind,
    pub kind: ChannelKind,
}

impl ChannelKey {
    pub fn new(handle: Handle, kind: ChannelKind) -> Self {
        Self {
            handle,
            handle_kind: kind.handle_kind(),
            kind,
        }
    }
}

/// Immutable description of a channel, as announced to hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub handle_kind: HandleKind,
    pub target_handle: Handle,
    pub target_id: String,
    pub initiator_handle: Handle,
    pub initiator_id: String,
    /// Created by a host request rather than by inbound traffic
    pub requested: bool,
}

impl ChannelInfo {
    pub fn key(&self) -> ChannelKey {
        ChannelKey {
            handle: self.target_handle,
            handle_kind: self.handle_kind,
            kind: self.kind,
        }
    }
}

/// What a channel needs from the session while handling an operation.
pub struct ChannelEnv<'a> {
    pub engine: &'a dyn ProtocolEngine,
    pub sink: &'a dyn NotificationSink,
    pub contacts: &'a HandleRegistry,
    pub rooms: &'a HandleRegistry,
    pub selector: &'a ResourceSelector,
    pub account: &'a Account,
    pub self_handle: Handle,
}

impl ChannelEnv<'_> {
    pub(crate) fn notify(&self, notification: SessionNotification) {
        self.sink.notify(notification);
    }
}

/// Behaviour shared by text-carrying channels.
pub trait MessageChannel {
    /// Handle a message routed to this channel.
    fn receive(&mut self, env: &ChannelEnv<'_>, info: &ChannelInfo, message: &InboundMessage);

    /// Send the first `text/plain` part; returns the message token.
    fn send(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        parts: &[MessagePart],
        flags: SendFlags,
    ) -> Result<String, SessionError>;

    fn acknowledge(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        ids: &[u32],
    ) -> Result<(), SessionError>;

    fn set_chat_state(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        state: ChatState,
    ) -> Result<(), SessionError>;

    fn pending_messages(&self) -> Vec<ReceivedMessage>;
}

/// Kind-specific state of a channel.
pub enum ChannelState {
    Text(TextChannel),
    Room(RoomChannel),
    FileTransfer(FileTransferChannel),
}

impl ChannelState {
    pub fn as_messages(&mut self) -> Option<&mut dyn MessageChannel> {
        match self {
            ChannelState::Text(text) => Some(text),
            ChannelState::Room(room) => Some(room),
            ChannelState::FileTransfer(_) => None,
        }
    }
}

/// A live channel owned by the [`ChannelRouter`].
pub struct Channel {
    info: ChannelInfo,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub(crate) fn new(info: ChannelInfo, state: ChannelState) -> Self {
        Self {
            info,
            state: Mutex::new(state),
        }
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn id(&self) -> ChannelId {
        self.info.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.info.kind
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending_messages(&self) -> Vec<ReceivedMessage> {
        match &*self.state() {
            ChannelState::Text(text) => text.pending_messages(),
            ChannelState::Room(room) => room.pending_messages(),
            ChannelState::FileTransfer(_) => Vec::new(),
        }
    }

    /// Current room members, empty for other kinds.
    pub fn members(&self) -> Vec<Handle> {
        match &*self.state() {
            ChannelState::Room(room) => room.member_handles(),
            _ => Vec::new(),
        }
    }

    /// Transfer state, `None` for non-transfer channels.
    pub fn transfer_state(&self) -> Option<(TransferState, TransferStateReason, u64)> {
        match &*self.state() {
            ChannelState::FileTransfer(ft) => {
                Some((ft.state(), ft.reason(), ft.transferred_bytes()))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("info", &self.info).finish()
    }
}

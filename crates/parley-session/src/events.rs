//! Inbound events from the protocol engine and outbound notifications to
//! the host.

use tokio::sync::broadcast;
use tracing::trace;

use crate::avatar::AvatarData;
use crate::caps::{CapsAdvert, DiscoIdentity};
use crate::channel::{
    ChannelId, ChannelInfo, RequestableChannelClass, TransferEvent, TransferId, TransferOffer,
    TransferState, TransferStateReason,
};
use crate::engine::RequestId;
use crate::error::RemoteError;
use crate::message::{ChatState, InboundMessage, MessagePart, ReceivedMessage};
use crate::presence::{AggregatedPresence, Show};
use crate::roster::RosterItem;
use crate::types::{ConnectionStatus, ContactListState, Handle, StatusReason, SubscriptionState};

/// Why the stream failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Socket level failure
    Socket,
    /// The keep-alive ping went unanswered
    KeepAlive,
    /// Stream error `not-authorized`: the credentials were rejected
    NotAuthorized,
    /// Any other stream error condition
    Other(String),
}

impl StreamErrorKind {
    pub fn reason(&self) -> StatusReason {
        match self {
            StreamErrorKind::Socket | StreamErrorKind::KeepAlive => StatusReason::NetworkError,
            StreamErrorKind::NotAuthorized => StatusReason::AuthenticationFailed,
            StreamErrorKind::Other(_) => StatusReason::NoneSpecified,
        }
    }
}

/// Presence stanza type as far as the core cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
    #[default]
    Available,
    Unavailable,
    Error,
}

/// Avatar hash advertised in presence (`vcard-temp:x:update`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PhotoUpdate {
    /// No `<x/>` element: the sender does not advertise avatars
    #[default]
    NotAdvertised,
    /// Empty `<photo/>`: the contact has no avatar
    NoPhoto,
    /// SHA-1 of the current avatar
    Hash(String),
}

/// MUC user information carried in room presence (XEP-0045 `muc#user`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MucPresence {
    /// Status code 110: this presence refers to our own occupant
    pub self_presence: bool,
}

/// A presence stanza as delivered by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundPresence {
    /// Full address of the sender
    pub from: String,
    pub availability: Availability,
    pub show: Option<Show>,
    pub status: Option<String>,
    pub priority: Option<i8>,
    pub caps: Option<CapsAdvert>,
    pub photo: PhotoUpdate,
    pub muc: Option<MucPresence>,
}

impl InboundPresence {
    pub fn available(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Default::default()
        }
    }

    pub fn unavailable(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            availability: Availability::Unavailable,
            ..Default::default()
        }
    }

    pub fn with_show(mut self, show: Show) -> Self {
        self.show = Some(show);
        self
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Result of a disco#info query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoInfo {
    pub from: String,
    pub node: Option<String>,
    pub identities: Vec<DiscoIdentity>,
    pub features: Vec<String>,
}

/// Everything the protocol engine reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Stream negotiated and authenticated
    StreamConnected,
    /// Stream closed cleanly
    StreamDisconnected,
    StreamError(StreamErrorKind),
    Message(InboundMessage),
    Presence(InboundPresence),
    /// A contact asks to see our presence
    SubscriptionRequest { from: String, message: Option<String> },
    /// Full roster, answering the initial roster get
    RosterReceived(Vec<RosterItem>),
    /// Server-initiated roster change
    RosterPush(RosterItem),
    /// Answer to a roster set we issued
    RosterUpdateResult {
        request_id: RequestId,
        result: Result<(), RemoteError>,
    },
    DiscoInfo(DiscoInfo),
    /// A disco#info query we sent was answered with an error
    DiscoInfoFailed {
        from: String,
        node: Option<String>,
        error: RemoteError,
    },
    /// A vCard arrived; `photo` is `None` when it carries no avatar
    VCard { jid: String, photo: Option<AvatarData> },
    TransferOffer(TransferOffer),
    Transfer {
        transfer_id: TransferId,
        event: TransferEvent,
    },
}

/// Subscription states of one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactSubscription {
    pub handle: Handle,
    pub subscribe: SubscriptionState,
    pub publish: SubscriptionState,
}

/// Everything the session reports to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    StatusChanged {
        status: ConnectionStatus,
        reason: StatusReason,
    },
    PresenceChanged {
        handle: Handle,
        presence: AggregatedPresence,
    },
    ContactListStateChanged(ContactListState),
    ContactsChanged {
        changes: Vec<ContactSubscription>,
        removals: Vec<Handle>,
    },
    PublishRequested {
        handle: Handle,
        message: Option<String>,
    },
    AliasesChanged(Vec<(Handle, String)>),
    GroupsCreated(Vec<String>),
    GroupsRemoved(Vec<String>),
    GroupRenamed {
        old_name: String,
        new_name: String,
    },
    GroupMembersChanged {
        group: String,
        added: Vec<Handle>,
        removed: Vec<Handle>,
    },
    RosterUpdateFailed {
        handle: Handle,
        error: RemoteError,
    },
    AvatarUpdated {
        handle: Handle,
        token: String,
    },
    AvatarRetrieved {
        handle: Handle,
        token: String,
        avatar: AvatarData,
    },
    CapabilitiesChanged {
        handle: Handle,
        classes: Vec<RequestableChannelClass>,
    },
    ChannelCreated(ChannelInfo),
    ChannelClosed(ChannelId),
    MessageReceived {
        channel: ChannelId,
        message: ReceivedMessage,
    },
    MessageSent {
        channel: ChannelId,
        token: String,
        parts: Vec<MessagePart>,
    },
    PendingMessagesRemoved {
        channel: ChannelId,
        ids: Vec<u32>,
    },
    ChatStateChanged {
        channel: ChannelId,
        contact: Handle,
        state: ChatState,
    },
    MembersChanged {
        channel: ChannelId,
        added: Vec<Handle>,
        removed: Vec<Handle>,
    },
    RoomPropertiesChanged {
        channel: ChannelId,
        title: Option<String>,
        subject: Option<String>,
    },
    TransferStateChanged {
        channel: ChannelId,
        state: TransferState,
        reason: TransferStateReason,
    },
    TransferredBytesChanged {
        channel: ChannelId,
        bytes: u64,
    },
}

/// Receives notifications for the host.
///
/// Implementations must not call back into the session synchronously.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, notification: SessionNotification);
}

/// Fans notifications out on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<SessionNotification>,
}

impl BroadcastSink {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: SessionNotification) {
        if self.sender.send(notification).is_err() {
            trace!("No subscribers for session notification");
        }
    }
}

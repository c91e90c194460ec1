//! Commands the session issues to the protocol engine.
//!
//! The engine owns the XMPP stream. The session never touches the wire; it
//! hands the engine [`OutboundCommand`]s and receives
//! [`InboundEvent`](crate::events::InboundEvent)s back through the dispatch
//! loop.

use std::fmt;

use tokio::sync::mpsc;
use tracing::warn;

use crate::avatar::AvatarData;
use crate::channel::{TransferId, TransferMetadata};
use crate::error::EngineError;
use crate::message::OutboundMessage;
use crate::presence::OwnPresence;
use crate::roster::RosterItem;

/// Correlates a roster set with its [`RosterUpdateResult`](crate::events::InboundEvent::RosterUpdateResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "roster-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    /// Open the stream and authenticate
    ConnectToServer {
        jid: String,
        resource: String,
        password: String,
        presence: OwnPresence,
    },
    Disconnect,
    /// Ask for the full roster
    RequestRoster,
    SendMessage(OutboundMessage),
    SendPresence(OwnPresence),
    /// Roster set adding or updating one item
    RosterUpdate {
        request_id: RequestId,
        item: RosterItem,
    },
    /// Roster set with `subscription='remove'`
    RosterRemove {
        request_id: RequestId,
        jid: String,
    },
    Subscribe {
        to: String,
        message: Option<String>,
    },
    Subscribed {
        to: String,
    },
    Unsubscribe {
        to: String,
    },
    Unsubscribed {
        to: String,
    },
    RequestDiscoInfo {
        to: String,
        node: Option<String>,
    },
    RequestVCard {
        jid: String,
    },
    /// Publish our vCard photo; `None` removes it
    SetOwnAvatar(Option<AvatarData>),
    JoinRoom {
        room: String,
        nick: String,
    },
    LeaveRoom {
        room: String,
        nick: String,
    },
    /// Direct MUC invitation (XEP-0249)
    InviteToRoom {
        room: String,
        invitee: String,
        reason: Option<String>,
    },
    OfferFile {
        transfer_id: TransferId,
        to: String,
        metadata: TransferMetadata,
    },
    AcceptTransfer {
        transfer_id: TransferId,
    },
    RejectTransfer {
        transfer_id: TransferId,
    },
    AbortTransfer {
        transfer_id: TransferId,
    },
}

/// The protocol engine as seen by the session.
pub trait ProtocolEngine: Send + Sync + 'static {
    fn send(&self, command: OutboundCommand) -> Result<(), EngineError>;
}

/// Engine front that queues commands on a bounded tokio channel for the task
/// driving the XMPP stream.
#[derive(Debug, Clone)]
pub struct MpscEngine {
    sender: mpsc::Sender<OutboundCommand>,
}

impl MpscEngine {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundCommand>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl ProtocolEngine for MpscEngine {
    fn send(&self, command: OutboundCommand) -> Result<(), EngineError> {
        self.sender.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!("Engine command queue full");
                EngineError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => EngineError::Closed,
        })
    }
}

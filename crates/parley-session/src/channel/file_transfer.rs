use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelEnv, ChannelInfo};
use crate::engine::OutboundCommand;
use crate::error::SessionError;
use crate::events::SessionNotification;

/// Engine-side identifier of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for an outgoing offer.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferMetadata {
    pub filename: String,
    pub size: u64,
    pub content_type: String,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    /// MD5 of the content, as XEP-0096 carries it
    pub content_hash: Option<String>,
}

impl TransferMetadata {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
            content_type: "application/octet-stream".to_string(),
            description: None,
            date: None,
            content_hash: None,
        }
    }
}

/// An inbound file offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOffer {
    pub transfer_id: TransferId,
    /// Full address of the offering resource
    pub from: String,
    pub metadata: TransferMetadata,
}

/// Why the engine gave up on a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    Aborted,
    FileAccess,
    FileCorrupt,
    Protocol,
}

/// Progress reported by the engine for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// Bytes started flowing
    Transferring,
    Progress(u64),
    Finished,
    Failed(TransferError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferState {
    None = 0,
    Pending = 1,
    Accepted = 2,
    Open = 3,
    Completed = 4,
    Cancelled = 5,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferStateReason {
    None = 0,
    Requested = 1,
    LocalStopped = 2,
    RemoteStopped = 3,
    LocalError = 4,
    RemoteError = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

/// State machine of one file transfer channel.
///
/// `Pending -> Accepted -> Open -> Completed`, and any non-terminal state
/// may move to `Cancelled`.
#[derive(Debug)]
pub struct FileTransferChannel {
    transfer_id: TransferId,
    direction: TransferDirection,
    metadata: TransferMetadata,
    /// Full address of the other side
    peer_address: String,
    state: TransferState,
    reason: TransferStateReason,
    transferred: u64,
    local_abort: bool,
}

impl FileTransferChannel {
    pub fn incoming(offer: TransferOffer) -> Self {
        Self {
            transfer_id: offer.transfer_id,
            direction: TransferDirection::Incoming,
            metadata: offer.metadata,
            peer_address: offer.from,
            state: TransferState::Pending,
            reason: TransferStateReason::None,
            transferred: 0,
            local_abort: false,
        }
    }

    pub fn outgoing(transfer_id: TransferId, to: String, metadata: TransferMetadata) -> Self {
        Self {
            transfer_id,
            direction: TransferDirection::Outgoing,
            metadata,
            peer_address: to,
            state: TransferState::Pending,
            reason: TransferStateReason::Requested,
            transferred: 0,
            local_abort: false,
        }
    }

    pub fn transfer_id(&self) -> &TransferId {
        &self.transfer_id
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn reason(&self) -> TransferStateReason {
        self.reason
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Command that starts an outgoing transfer.
    pub(crate) fn offer_command(&self) -> OutboundCommand {
        OutboundCommand::OfferFile {
            transfer_id: self.transfer_id.clone(),
            to: self.peer_address.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Accept an incoming offer.
    pub fn accept(&mut self, env: &ChannelEnv<'_>, info: &ChannelInfo) -> Result<(), SessionError> {
        if self.direction != TransferDirection::Incoming || self.state != TransferState::Pending {
            return Err(SessionError::not_available(format!(
                "Transfer cannot be accepted in state {:?}",
                self.state
            )));
        }
        env.engine.send(OutboundCommand::AcceptTransfer {
            transfer_id: self.transfer_id.clone(),
        })?;
        self.set_state(env, info, TransferState::Accepted, TransferStateReason::Requested);
        Ok(())
    }

    /// Stop the transfer from our side.
    pub fn cancel(&mut self, env: &ChannelEnv<'_>, info: &ChannelInfo) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        let transfer_id = self.transfer_id.clone();
        let command = if self.direction == TransferDirection::Incoming
            && self.state == TransferState::Pending
        {
            OutboundCommand::RejectTransfer { transfer_id }
        } else {
            OutboundCommand::AbortTransfer { transfer_id }
        };
        self.local_abort = true;
        env.engine.send(command)?;
        self.set_state(env, info, TransferState::Cancelled, TransferStateReason::LocalStopped);
        Ok(())
    }

    /// Apply progress reported by the engine.
    pub fn on_event(&mut self, env: &ChannelEnv<'_>, info: &ChannelInfo, event: TransferEvent) {
        if self.state.is_terminal() {
            debug!(channel = %info.id, ?event, "Ignoring event for finished transfer");
            return;
        }

        match event {
            TransferEvent::Transferring => {
                if self.direction == TransferDirection::Outgoing
                    && self.state == TransferState::Pending
                {
                    self.set_state(env, info, TransferState::Accepted, TransferStateReason::None);
                }
                if self.state == TransferState::Accepted {
                    self.set_state(env, info, TransferState::Open, TransferStateReason::None);
                }
            }
            TransferEvent::Progress(bytes) => {
                self.transferred = bytes;
                env.notify(SessionNotification::TransferredBytesChanged {
                    channel: info.id,
                    bytes,
                });
            }
            TransferEvent::Finished => {
                self.set_state(env, info, TransferState::Completed, TransferStateReason::None);
            }
            TransferEvent::Failed(TransferError::Aborted) => {
                if !self.local_abort {
                    self.set_state(
                        env,
                        info,
                        TransferState::Cancelled,
                        TransferStateReason::RemoteStopped,
                    );
                }
            }
            TransferEvent::Failed(TransferError::FileAccess) => {
                self.set_state(env, info, TransferState::Cancelled, TransferStateReason::LocalError);
            }
            // Corruption and protocol failures cannot be attributed to either side.
            TransferEvent::Failed(TransferError::FileCorrupt | TransferError::Protocol) => {
                self.set_state(env, info, TransferState::Cancelled, TransferStateReason::RemoteError);
            }
        }
    }

    fn set_state(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        state: TransferState,
        reason: TransferStateReason,
    ) {
        debug!(channel = %info.id, ?state, ?reason, "Transfer state changed");
        self.state = state;
        self.reason = reason;
        self.notify_state(env, info);
    }

    fn notify_state(&self, env: &ChannelEnv<'_>, info: &ChannelInfo) {
        env.notify(SessionNotification::TransferStateChanged {
            channel: info.id,
            state: self.state,
            reason: self.reason,
        });
    }
}

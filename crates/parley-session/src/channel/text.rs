use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChannelEnv, ChannelInfo, MessageChannel};
use crate::engine::OutboundCommand;
use crate::error::SessionError;
use crate::events::SessionNotification;
use crate::handles::split_address;
use crate::message::{
    ChannelTextMessageType, ChatMarker, ChatState, InboundMessage, MarkerKind, MessageHeader,
    MessageKind, MessagePart, OutboundMessage, ReceivedMessage, SendFlags,
};
use crate::types::Handle;

pub(crate) fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Where a `displayed` marker goes once the host acknowledges a message.
#[derive(Debug, Clone)]
pub(crate) struct MarkerReply {
    pub to: String,
    pub id: String,
}

#[derive(Debug)]
struct PendingEntry {
    message: ReceivedMessage,
    reply: Option<MarkerReply>,
}

/// Messages delivered to the host and not yet acknowledged.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    next_id: u32,
    entries: Vec<PendingEntry>,
}

impl PendingQueue {
    fn push(
        &mut self,
        header: MessageHeader,
        parts: Vec<MessagePart>,
        reply: Option<MarkerReply>,
    ) -> ReceivedMessage {
        self.next_id = self.next_id.wrapping_add(1);
        let message = ReceivedMessage {
            header: MessageHeader {
                pending_id: self.next_id,
                ..header
            },
            parts,
        };
        self.entries.push(PendingEntry {
            message: message.clone(),
            reply,
        });
        message
    }

    /// Queue an incoming message and return what the host sees.
    pub(crate) fn push_message(
        &mut self,
        sender: Handle,
        sender_id: &str,
        message: &InboundMessage,
        body: &str,
    ) -> ReceivedMessage {
        let header = MessageHeader {
            pending_id: 0,
            token: message.id.clone().unwrap_or_else(new_token),
            message_type: ChannelTextMessageType::Normal,
            sent: message.stamp,
            received: Utc::now(),
            sender,
            sender_id: sender_id.to_string(),
            delivery_token: None,
            delivery_status: None,
        };
        let reply = match (&message.id, message.receipt_requested) {
            (Some(id), true) => Some(MarkerReply {
                to: message.from.clone(),
                id: id.clone(),
            }),
            _ => None,
        };
        self.push(header, vec![MessagePart::text(body)], reply)
    }

    /// Queue a delivery report for one of our own messages.
    fn push_report(&mut self, sender: Handle, sender_id: &str, marker: &ChatMarker) -> ReceivedMessage {
        let header = MessageHeader {
            pending_id: 0,
            token: new_token(),
            message_type: ChannelTextMessageType::DeliveryReport,
            sent: None,
            received: Utc::now(),
            sender,
            sender_id: sender_id.to_string(),
            delivery_token: Some(marker.id.clone()),
            delivery_status: Some(marker.kind.into()),
        };
        self.push(header, Vec::new(), None)
    }

    /// Remove acknowledged messages. Either every id is pending or nothing
    /// is removed.
    fn acknowledge(&mut self, ids: &[u32]) -> Result<Vec<MarkerReply>, SessionError> {
        if let Some(unknown) = ids
            .iter()
            .find(|id| !self.entries.iter().any(|e| e.message.header.pending_id == **id))
        {
            return Err(SessionError::invalid_argument(format!(
                "Message {} is not pending",
                unknown
            )));
        }

        let mut replies = Vec::new();
        self.entries.retain_mut(|entry| {
            if ids.contains(&entry.message.header.pending_id) {
                replies.extend(entry.reply.take());
                false
            } else {
                true
            }
        });
        Ok(replies)
    }

    pub(crate) fn acknowledge_and_notify(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        ids: &[u32],
    ) -> Result<Vec<MarkerReply>, SessionError> {
        let replies = self.acknowledge(ids)?;
        env.notify(SessionNotification::PendingMessagesRemoved {
            channel: info.id,
            ids: ids.to_vec(),
        });
        Ok(replies)
    }

    pub(crate) fn messages(&self) -> Vec<ReceivedMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }
}

/// Extract the body of the first `text/plain` part.
pub(crate) fn plain_text(parts: &[MessagePart]) -> Result<&str, SessionError> {
    parts
        .iter()
        .find(|p| p.content_type == "text/plain")
        .map(|p| p.content.as_str())
        .ok_or_else(|| SessionError::invalid_argument("Message has no text/plain part"))
}

/// One-to-one text conversation with a contact.
#[derive(Debug, Default)]
pub struct TextChannel {
    pending: PendingQueue,
}

impl TextChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn send_marker(env: &ChannelEnv<'_>, to: String, kind: MarkerKind, id: String) {
        let message = OutboundMessage {
            id: new_token(),
            to,
            kind: MessageKind::Chat,
            marker: Some(ChatMarker { kind, id }),
            ..Default::default()
        };
        if let Err(e) = env.engine.send(OutboundCommand::SendMessage(message)) {
            warn!(error = %e, "Failed to send chat marker");
        }
    }
}

impl MessageChannel for TextChannel {
    fn receive(&mut self, env: &ChannelEnv<'_>, info: &ChannelInfo, message: &InboundMessage) {
        let (bare, resource) = match split_address(&message.from) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(from = %message.from, error = %e, "Dropping message with bad sender");
                return;
            }
        };
        if let Some(resource) = &resource {
            env.selector.note_last_resource(&bare, resource);
        }
        let sender = info.target_handle;

        if let Some(state) = message.chat_state {
            env.notify(SessionNotification::ChatStateChanged {
                channel: info.id,
                contact: sender,
                state,
            });
        }

        if let Some(marker) = &message.marker {
            debug!(channel = %info.id, marker = marker.kind.as_str(), id = %marker.id, "Delivery report");
            let report = self.pending.push_report(sender, &bare, marker);
            env.notify(SessionNotification::MessageReceived {
                channel: info.id,
                message: report,
            });
        }

        let Some(body) = message.body.as_deref().filter(|b| !b.is_empty()) else {
            return;
        };

        if message.receipt_requested {
            if let Some(id) = &message.id {
                Self::send_marker(env, message.from.clone(), MarkerKind::Received, id.clone());
            }
        }

        let received = self.pending.push_message(sender, &bare, message, body);
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
        flags: SendFlags,
    ) -> Result<String, SessionError> {
        let body = plain_text(parts)?;
        let token = new_token();
        let message = OutboundMessage {
            id: token.clone(),
            to: env.selector.message_address(&info.target_id),
            kind: MessageKind::Chat,
            body: Some(body.to_string()),
            chat_state: Some(ChatState::Active),
            marker: None,
            request_receipt: flags.wants_reports(),
        };
        env.engine.send(OutboundCommand::SendMessage(message))?;
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
        for reply in self.pending.acknowledge_and_notify(env, info, ids)? {
            Self::send_marker(env, reply.to, MarkerKind::Displayed, reply.id);
        }
        Ok(())
    }

    fn set_chat_state(
        &mut self,
        env: &ChannelEnv<'_>,
        info: &ChannelInfo,
        state: ChatState,
    ) -> Result<(), SessionError> {
        let message = OutboundMessage {
            id: new_token(),
            to: env.selector.message_address(&info.target_id),
            kind: MessageKind::Chat,
            chat_state: Some(state),
            ..Default::default()
        };
        env.engine.send(OutboundCommand::SendMessage(message))?;
        Ok(())
    }

    fn pending_messages(&self) -> Vec<ReceivedMessage> {
        self.pending.messages()
    }
}

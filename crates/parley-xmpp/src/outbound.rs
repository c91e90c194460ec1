//! [`OutboundCommand`] to stanza conversion.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use minidom::Element;
use tracing::{debug, instrument};
use xmpp_parsers::chatstates::ChatState as XmppChatState;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::jid;
use xmpp_parsers::message::{Body, Message, MessageType as XmppMessageType};
use xmpp_parsers::muc::Muc;
use xmpp_parsers::presence::{Presence, Show as XmppShow, Type as PresenceType};
use xmpp_parsers::roster;

use parley_session::avatar::AvatarData;
use parley_session::events::PhotoUpdate;
use parley_session::message::{ChatState, MarkerKind, MessageKind, OutboundMessage};
use parley_session::presence::{OwnPresence, Show};
use parley_session::roster::RosterItem;
use parley_session::{OutboundCommand, RequestId};

use crate::error::AdapterError;
use crate::ns;

/// Id of the initial roster get.
pub const ROSTER_FETCH_ID: &str = "roster-fetch";
pub(crate) const VCARD_GET_PREFIX: &str = "vcard-";
pub(crate) const VCARD_SET_PREFIX: &str = "vcard-set-";
pub(crate) const DISCO_PREFIX: &str = "disco-";

/// Turns session commands into stanzas for the account's stream.
#[derive(Debug)]
pub struct StanzaWriter {
    account: String,
    next_id: AtomicU64,
}

impl StanzaWriter {
    /// `account_jid` is the bare address of the connected account.
    pub fn new(account_jid: impl Into<String>) -> Self {
        Self {
            account: account_jid.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Encode one command.
    ///
    /// Returns `Ok(None)` for commands the stream owner carries out itself:
    /// connecting, disconnecting and file transfer negotiation.
    #[instrument(skip_all)]
    pub fn encode(&self, command: &OutboundCommand) -> Result<Option<Element>, AdapterError> {
        let element = match command {
            OutboundCommand::ConnectToServer { .. }
            | OutboundCommand::Disconnect
            | OutboundCommand::OfferFile { .. }
            | OutboundCommand::AcceptTransfer { .. }
            | OutboundCommand::RejectTransfer { .. }
            | OutboundCommand::AbortTransfer { .. } => {
                debug!("Command is carried out by the stream owner");
                return Ok(None);
            }
            OutboundCommand::RequestRoster => build_roster_get(),
            OutboundCommand::SendMessage(message) => build_message(message)?,
            OutboundCommand::SendPresence(presence) => build_own_presence(presence),
            OutboundCommand::RosterUpdate { request_id, item } => {
                build_roster_set(*request_id, item)?
            }
            OutboundCommand::RosterRemove { request_id, jid } => {
                build_roster_remove(*request_id, jid)?
            }
            OutboundCommand::Subscribe { to, message } => {
                build_subscription(PresenceType::Subscribe, to, message.as_deref())?
            }
            OutboundCommand::Subscribed { to } => {
                build_subscription(PresenceType::Subscribed, to, None)?
            }
            OutboundCommand::Unsubscribe { to } => {
                build_subscription(PresenceType::Unsubscribe, to, None)?
            }
            OutboundCommand::Unsubscribed { to } => {
                build_subscription(PresenceType::Unsubscribed, to, None)?
            }
            OutboundCommand::RequestDiscoInfo { to, node } => {
                self.build_disco_get(to, node.as_deref())
            }
            OutboundCommand::RequestVCard { jid } => self.build_vcard_get(jid),
            OutboundCommand::SetOwnAvatar(avatar) => self.build_vcard_set(avatar.as_ref()),
            OutboundCommand::JoinRoom { room, nick } => build_muc_join(room, nick)?,
            OutboundCommand::LeaveRoom { room, nick } => build_muc_leave(room, nick)?,
            OutboundCommand::InviteToRoom {
                room,
                invitee,
                reason,
            } => build_invitation(room, invitee, reason.as_deref())?,
        };
        Ok(Some(element))
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn build_disco_get(&self, to: &str, node: Option<&str>) -> Element {
        let mut query = Element::builder("query", ns::DISCO_INFO);
        if let Some(node) = node {
            query = query.attr("node", node);
        }
        Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "get")
            .attr("id", self.next_id(DISCO_PREFIX))
            .attr("to", to)
            .append(query.build())
            .build()
    }

    fn build_vcard_get(&self, jid: &str) -> Element {
        let mut iq = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "get")
            .attr("id", self.next_id(VCARD_GET_PREFIX));
        // Our own vCard is fetched without a `to`.
        if jid != self.account {
            iq = iq.attr("to", jid);
        }
        iq.append(Element::builder("vCard", ns::VCARD).build())
            .build()
    }

    fn build_vcard_set(&self, avatar: Option<&AvatarData>) -> Element {
        let mut vcard = Element::builder("vCard", ns::VCARD);
        if let Some(avatar) = avatar {
            let photo = Element::builder("PHOTO", ns::VCARD)
                .append(
                    Element::builder("TYPE", ns::VCARD)
                        .append(avatar.mime_type.as_str())
                        .build(),
                )
                .append(
                    Element::builder("BINVAL", ns::VCARD)
                        .append(BASE64.encode(&avatar.bytes))
                        .build(),
                )
                .build();
            vcard = vcard.append(photo);
        }
        Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "set")
            .attr("id", self.next_id(VCARD_SET_PREFIX))
            .append(vcard.build())
            .build()
    }
}

fn parse_jid(address: &str) -> Result<jid::Jid, AdapterError> {
    address
        .parse()
        .map_err(|_| AdapterError::InvalidJid(address.to_string()))
}

fn parse_bare_jid(address: &str) -> Result<jid::BareJid, AdapterError> {
    address
        .parse()
        .map_err(|_| AdapterError::InvalidJid(address.to_string()))
}

fn build_message(message: &OutboundMessage) -> Result<Element, AdapterError> {
    let xmpp_type = match message.kind {
        MessageKind::Chat => XmppMessageType::Chat,
        MessageKind::Normal => XmppMessageType::Normal,
        MessageKind::Headline => XmppMessageType::Headline,
        MessageKind::GroupChat => XmppMessageType::Groupchat,
        MessageKind::Error => XmppMessageType::Error,
    };

    let mut msg = Message::new_with_type(xmpp_type, Some(parse_jid(&message.to)?));
    if !message.id.is_empty() {
        msg.id = Some(message.id.clone());
    }
    if let Some(body) = &message.body {
        msg.bodies.insert(String::new(), Body(body.clone()));
    }

    if let Some(state) = message.chat_state {
        let xmpp_state = match state {
            ChatState::Active => XmppChatState::Active,
            ChatState::Composing => XmppChatState::Composing,
            ChatState::Paused => XmppChatState::Paused,
            ChatState::Inactive => XmppChatState::Inactive,
            ChatState::Gone => XmppChatState::Gone,
        };
        let state_element: Element = xmpp_state.into();
        msg.payloads.push(state_element);
    }

    if let Some(marker) = &message.marker {
        let element = match marker.kind {
            MarkerKind::Received => Element::builder("received", ns::RECEIPTS),
            kind => Element::builder(kind.as_str(), ns::CHAT_MARKERS),
        };
        msg.payloads
            .push(element.attr("id", marker.id.as_str()).build());
    }

    if message.request_receipt {
        msg.payloads
            .push(Element::builder("request", ns::RECEIPTS).build());
        msg.payloads
            .push(Element::builder("markable", ns::CHAT_MARKERS).build());
    }

    Ok(msg.into())
}

fn build_own_presence(own: &OwnPresence) -> Element {
    if !own.available {
        let mut presence = Presence::new(PresenceType::Unavailable);
        if let Some(status) = &own.status {
            presence.set_status("", status.as_str());
        }
        return presence.into();
    }

    let mut presence = Presence::new(PresenceType::None);
    presence.show = match own.show {
        // Invisibility is not supported; hidden goes out as plain available.
        Show::Available | Show::Hidden => None,
        Show::Away => Some(XmppShow::Away),
        Show::ExtendedAway => Some(XmppShow::Xa),
        Show::Busy => Some(XmppShow::Dnd),
        Show::Chat => Some(XmppShow::Chat),
    };
    if let Some(status) = &own.status {
        presence.set_status("", status.as_str());
    }
    presence.priority = own.priority;

    let photo = match &own.photo {
        PhotoUpdate::NotAdvertised => None,
        PhotoUpdate::NoPhoto => Some(Element::builder("photo", ns::VCARD_UPDATE)),
        PhotoUpdate::Hash(hash) => {
            Some(Element::builder("photo", ns::VCARD_UPDATE).append(hash.as_str()))
        }
    };
    if let Some(photo) = photo {
        presence
            .payloads
            .push(Element::builder("x", ns::VCARD_UPDATE).append(photo).build());
    }
    presence.into()
}

fn build_roster_get() -> Element {
    let query = roster::Roster {
        ver: None,
        items: vec![],
    };
    Iq::from_get(ROSTER_FETCH_ID.to_string(), query).into()
}

fn build_roster_set(request_id: RequestId, item: &RosterItem) -> Result<Element, AdapterError> {
    let item = roster::Item {
        jid: parse_bare_jid(&item.jid)?,
        name: item.name.clone(),
        subscription: roster::Subscription::None,
        ask: roster::Ask::None,
        groups: item.groups.iter().map(|g| roster::Group(g.clone())).collect(),
    };

    let query = roster::Roster {
        ver: None,
        items: vec![item],
    };
    Ok(Iq::from_set(request_id.to_string(), query).into())
}

fn build_roster_remove(request_id: RequestId, jid_str: &str) -> Result<Element, AdapterError> {
    let item = roster::Item {
        jid: parse_bare_jid(jid_str)?,
        name: None,
        subscription: roster::Subscription::Remove,
        ask: roster::Ask::None,
        groups: vec![],
    };

    let query = roster::Roster {
        ver: None,
        items: vec![item],
    };
    Ok(Iq::from_set(request_id.to_string(), query).into())
}

fn build_subscription(
    type_: PresenceType,
    to: &str,
    message: Option<&str>,
) -> Result<Element, AdapterError> {
    let mut presence = Presence::new(type_);
    presence.to = Some(parse_jid(to)?);
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        presence.set_status("", message);
    }
    Ok(presence.into())
}

fn build_muc_join(room: &str, nick: &str) -> Result<Element, AdapterError> {
    let mut presence = Presence::new(PresenceType::None);
    presence.to = Some(parse_jid(&format!("{room}/{nick}"))?);

    let muc_element: Element = Muc::new().into();
    presence.payloads.push(muc_element);

    Ok(presence.into())
}

fn build_muc_leave(room: &str, nick: &str) -> Result<Element, AdapterError> {
    let mut presence = Presence::new(PresenceType::Unavailable);
    presence.to = Some(parse_jid(&format!("{room}/{nick}"))?);
    Ok(presence.into())
}

fn build_invitation(room: &str, invitee: &str, reason: Option<&str>) -> Result<Element, AdapterError> {
    let room_jid = parse_bare_jid(room)?;
    let mut msg = Message::new(Some(parse_jid(invitee)?));

    let mut invite = Element::builder("x", ns::CONFERENCE).attr("jid", room_jid.to_string());
    if let Some(reason) = reason {
        invite = invite.attr("reason", reason);
    }
    msg.payloads.push(invite.build());

    Ok(msg.into())
}

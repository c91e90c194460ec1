//! Stanza to [`InboundEvent`] conversion.
//!
//! Parsing is lenient: unknown children are skipped and stanzas the session
//! has no use for read as `Ok(None)`. Only stanzas that cannot be attributed
//! to a sender (or carry malformed roster data) are errors.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use minidom::Element;
use tracing::{debug, instrument, warn};

use parley_session::avatar::AvatarData;
use parley_session::caps::{CapsAdvert, DiscoIdentity};
use parley_session::events::{Availability, DiscoInfo, InboundPresence, MucPresence, PhotoUpdate};
use parley_session::message::{ChatMarker, ChatState, InboundMessage, MarkerKind, MessageKind};
use parley_session::presence::Show;
use parley_session::roster::{AskType, RosterItem, Subscription};
use parley_session::{InboundEvent, RemoteError, RequestId, StanzaErrorCondition};

use crate::error::AdapterError;
use crate::ns;
use crate::outbound::{DISCO_PREFIX, ROSTER_FETCH_ID, VCARD_GET_PREFIX, VCARD_SET_PREFIX};

/// Reads stanzas received on the account's stream.
#[derive(Debug, Clone)]
pub struct StanzaReader {
    account: String,
}

impl StanzaReader {
    /// `account_jid` is the bare address of the connected account.
    pub fn new(account_jid: impl Into<String>) -> Self {
        Self {
            account: account_jid.into(),
        }
    }

    #[instrument(skip_all, fields(name = element.name()))]
    pub fn read(&self, element: &Element) -> Result<Option<InboundEvent>, AdapterError> {
        if element.ns() != ns::JABBER_CLIENT {
            return Err(unexpected(element));
        }

        match element.name() {
            "message" => read_message(element).map(|m| Some(InboundEvent::Message(m))),
            "presence" => read_presence(element),
            "iq" => self.read_iq(element),
            _ => Err(unexpected(element)),
        }
    }

    fn read_iq(&self, element: &Element) -> Result<Option<InboundEvent>, AdapterError> {
        let id = element.attr("id").unwrap_or_default();
        let from = element.attr("from");

        match element.attr("type") {
            Some("result") => self.read_iq_result(element, id, from),
            Some("error") => Ok(self.read_iq_error(element, id, from)),
            Some("set") => self.read_roster_push(element, from),
            Some(_) => {
                debug!(id, "Leaving iq request to the stream owner");
                Ok(None)
            }
            None => Err(AdapterError::missing("iq", "type")),
        }
    }

    fn read_iq_result(
        &self,
        element: &Element,
        id: &str,
        from: Option<&str>,
    ) -> Result<Option<InboundEvent>, AdapterError> {
        if id == ROSTER_FETCH_ID {
            let items = match element.get_child("query", ns::ROSTER) {
                Some(query) => read_roster_items(query)?,
                None => Vec::new(),
            };
            return Ok(Some(InboundEvent::RosterReceived(items)));
        }

        if let Some(request_id) = roster_request_id(id) {
            return Ok(Some(InboundEvent::RosterUpdateResult {
                request_id,
                result: Ok(()),
            }));
        }

        if let Some(query) = element.get_child("query", ns::DISCO_INFO) {
            let from = from.unwrap_or(&self.account);
            return Ok(Some(InboundEvent::DiscoInfo(read_disco_info(from, query))));
        }

        if id.starts_with(VCARD_SET_PREFIX) {
            debug!(id, "Own vCard published");
            return Ok(None);
        }

        if let Some(vcard) = element.get_child("vCard", ns::VCARD) {
            return Ok(Some(InboundEvent::VCard {
                jid: self.vcard_owner(from),
                photo: read_photo(vcard),
            }));
        }

        // Servers answer a get for an empty vCard with an empty result.
        if id.starts_with(VCARD_GET_PREFIX) {
            return Ok(Some(InboundEvent::VCard {
                jid: self.vcard_owner(from),
                photo: None,
            }));
        }

        debug!(id, "Ignoring iq result");
        Ok(None)
    }

    fn read_iq_error(&self, element: &Element, id: &str, from: Option<&str>) -> Option<InboundEvent> {
        let error = read_error(element);

        if id == ROSTER_FETCH_ID {
            warn!(%error, "Roster fetch failed, continuing with an empty roster");
            return Some(InboundEvent::RosterReceived(Vec::new()));
        }

        if let Some(request_id) = roster_request_id(id) {
            return Some(InboundEvent::RosterUpdateResult {
                request_id,
                result: Err(error),
            });
        }

        if id.starts_with(VCARD_SET_PREFIX) {
            warn!(%error, "Publishing own vCard failed");
            return None;
        }

        if id.starts_with(DISCO_PREFIX) {
            let node = element
                .get_child("query", ns::DISCO_INFO)
                .and_then(|query| query.attr("node"))
                .map(str::to_string);
            return Some(InboundEvent::DiscoInfoFailed {
                from: from.unwrap_or(&self.account).to_string(),
                node,
                error,
            });
        }

        if id.starts_with(VCARD_GET_PREFIX) {
            debug!(%error, "vCard unavailable");
            return Some(InboundEvent::VCard {
                jid: self.vcard_owner(from),
                photo: None,
            });
        }

        debug!(id, %error, "Ignoring iq error");
        None
    }

    fn read_roster_push(
        &self,
        element: &Element,
        from: Option<&str>,
    ) -> Result<Option<InboundEvent>, AdapterError> {
        let Some(query) = element.get_child("query", ns::ROSTER) else {
            debug!("Leaving iq set to the stream owner");
            return Ok(None);
        };

        if let Some(from) = from {
            if bare(from) != self.account {
                warn!(from, "Dropping roster push from a foreign address");
                return Ok(None);
            }
        }

        Ok(read_roster_items(query)?
            .into_iter()
            .next()
            .map(InboundEvent::RosterPush))
    }

    fn vcard_owner(&self, from: Option<&str>) -> String {
        from.map(bare).unwrap_or_else(|| self.account.clone())
    }
}

fn unexpected(element: &Element) -> AdapterError {
    AdapterError::UnexpectedElement {
        name: element.name().to_string(),
        ns: element.ns(),
    }
}

fn bare(address: &str) -> String {
    match address.parse::<jid::Jid>() {
        Ok(jid) => jid.to_bare().to_string(),
        Err(_) => address.split('/').next().unwrap_or(address).to_string(),
    }
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element.get_child(name, ns::JABBER_CLIENT).map(Element::text)
}

fn roster_request_id(id: &str) -> Option<RequestId> {
    id.strip_prefix("roster-")
        .and_then(|n| n.parse().ok())
        .map(RequestId)
}

fn read_message(element: &Element) -> Result<InboundMessage, AdapterError> {
    let from = element
        .attr("from")
        .ok_or_else(|| AdapterError::missing("message", "from"))?;

    let mut message = InboundMessage {
        from: from.to_string(),
        id: element.attr("id").map(str::to_string),
        kind: MessageKind::parse(element.attr("type").unwrap_or("normal")),
        body: child_text(element, "body"),
        subject: child_text(element, "subject"),
        ..Default::default()
    };

    for child in element.children() {
        let child_ns = child.ns();
        match child_ns.as_str() {
            ns::CHAT_STATES => message.chat_state = ChatState::parse(child.name()),
            ns::DELAY => message.stamp = child.attr("stamp").and_then(parse_stamp),
            ns::RECEIPTS => match child.name() {
                "request" => message.receipt_requested = true,
                "received" => {
                    if message.marker.is_none() {
                        message.marker = child.attr("id").map(|id| ChatMarker {
                            kind: MarkerKind::Received,
                            id: id.to_string(),
                        });
                    }
                }
                _ => {}
            },
            ns::CHAT_MARKERS => {
                if child.name() == "markable" {
                    message.receipt_requested = true;
                } else if let (Some(kind), Some(id)) =
                    (MarkerKind::parse(child.name()), child.attr("id"))
                {
                    message.marker = Some(ChatMarker {
                        kind,
                        id: id.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(message)
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(stamp) {
        Ok(stamp) => Some(stamp.with_timezone(&Utc)),
        Err(e) => {
            debug!(stamp, error = %e, "Ignoring malformed delay stamp");
            None
        }
    }
}

fn read_presence(element: &Element) -> Result<Option<InboundEvent>, AdapterError> {
    let from = element
        .attr("from")
        .ok_or_else(|| AdapterError::missing("presence", "from"))?;

    let availability = match element.attr("type") {
        None => Availability::Available,
        Some("unavailable") => Availability::Unavailable,
        Some("error") => Availability::Error,
        Some("subscribe") => {
            return Ok(Some(InboundEvent::SubscriptionRequest {
                from: bare(from),
                message: child_text(element, "status"),
            }));
        }
        Some(other) => {
            // Subscription answers show up as roster pushes.
            debug!(from, type_ = other, "Ignoring presence");
            return Ok(None);
        }
    };

    let show = child_text(element, "show").and_then(|show| match show.trim() {
        "away" => Some(Show::Away),
        "chat" => Some(Show::Chat),
        "dnd" => Some(Show::Busy),
        "xa" => Some(Show::ExtendedAway),
        _ => None,
    });

    let priority = child_text(element, "priority").and_then(|p| match p.trim().parse::<i8>() {
        Ok(priority) => Some(priority),
        Err(_) => {
            debug!(from, priority = %p, "Ignoring malformed priority");
            None
        }
    });

    let caps = element.get_child("c", ns::CAPS).and_then(|c| {
        Some(CapsAdvert {
            hash: c.attr("hash")?.to_string(),
            node: c.attr("node")?.to_string(),
            ver: c.attr("ver")?.to_string(),
        })
    });

    let photo = match element.get_child("x", ns::VCARD_UPDATE) {
        None => PhotoUpdate::NotAdvertised,
        Some(update) => match update.get_child("photo", ns::VCARD_UPDATE) {
            None => PhotoUpdate::NotAdvertised,
            Some(photo) => {
                let hash = photo.text();
                let hash = hash.trim();
                if hash.is_empty() {
                    PhotoUpdate::NoPhoto
                } else {
                    PhotoUpdate::Hash(hash.to_string())
                }
            }
        },
    };

    let muc = element.get_child("x", ns::MUC_USER).map(|x| MucPresence {
        self_presence: x
            .children()
            .any(|c| c.is("status", ns::MUC_USER) && c.attr("code") == Some("110")),
    });

    Ok(Some(InboundEvent::Presence(InboundPresence {
        from: from.to_string(),
        availability,
        show,
        status: child_text(element, "status"),
        priority,
        caps,
        photo,
        muc,
    })))
}

fn read_roster_items(query: &Element) -> Result<Vec<RosterItem>, AdapterError> {
    query
        .children()
        .filter(|c| c.is("item", ns::ROSTER))
        .map(|item| -> Result<RosterItem, AdapterError> {
            let jid = item
                .attr("jid")
                .ok_or_else(|| AdapterError::missing("item", "jid"))?;
            let subscription = match item.attr("subscription") {
                Some(value) => value
                    .parse::<Subscription>()
                    .map_err(|_| AdapterError::invalid("subscription", value))?,
                None => Subscription::None,
            };
            let ask = match item.attr("ask") {
                Some(value) => Some(
                    value
                        .parse::<AskType>()
                        .map_err(|_| AdapterError::invalid("ask", value))?,
                ),
                None => None,
            };

            let mut roster_item = RosterItem::new(bare(jid))
                .set_subscription(subscription)
                .set_ask(ask);
            roster_item.name = item.attr("name").map(str::to_string);
            for group in item.children().filter(|c| c.is("group", ns::ROSTER)) {
                let name = group.text();
                if !name.is_empty() {
                    roster_item = roster_item.add_group(name);
                }
            }
            Ok(roster_item)
        })
        .collect()
}

fn read_disco_info(from: &str, query: &Element) -> DiscoInfo {
    let mut info = DiscoInfo {
        from: from.to_string(),
        node: query.attr("node").map(str::to_string),
        ..Default::default()
    };

    for child in query.children() {
        if child.is("identity", ns::DISCO_INFO) {
            let (Some(category), Some(type_)) = (child.attr("category"), child.attr("type")) else {
                continue;
            };
            let mut identity = DiscoIdentity::new(category, type_, child.attr("name"));
            identity.lang = child.attr("xml:lang").map(str::to_string);
            info.identities.push(identity);
        } else if child.is("feature", ns::DISCO_INFO) {
            if let Some(var) = child.attr("var") {
                info.features.push(var.to_string());
            }
        }
    }

    info
}

fn read_photo(vcard: &Element) -> Option<AvatarData> {
    let photo = vcard.get_child("PHOTO", ns::VCARD)?;
    let encoded: String = photo
        .get_child("BINVAL", ns::VCARD)?
        .text()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if encoded.is_empty() {
        return None;
    }

    let bytes = match BASE64.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Ignoring vCard photo with invalid base64");
            return None;
        }
    };

    let mime_type = photo
        .get_child("TYPE", ns::VCARD)
        .map(|t| t.text().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| sniff_mime_type(&bytes).to_string());

    Some(AvatarData::new(bytes, mime_type))
}

fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xff, 0xd8, ..] => "image/jpeg",
        [b'G', b'I', b'F', ..] => "image/gif",
        _ => "application/octet-stream",
    }
}

fn read_error(element: &Element) -> RemoteError {
    let Some(error) = element.get_child("error", ns::JABBER_CLIENT) else {
        return RemoteError::new(StanzaErrorCondition::UndefinedCondition);
    };

    let condition = error
        .children()
        .filter(|c| c.ns() == ns::STANZAS && c.name() != "text")
        .find_map(|c| c.name().parse::<StanzaErrorCondition>().ok())
        .unwrap_or(StanzaErrorCondition::UndefinedCondition);

    let remote = RemoteError::new(condition);
    match error.get_child("text", ns::STANZAS) {
        Some(text) => remote.with_text(text.text()),
        None => remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader() -> StanzaReader {
        StanzaReader::new("me@example.com")
    }

    fn read(xml: &str) -> Option<InboundEvent> {
        let element: Element = xml.parse().unwrap();
        reader().read(&element).unwrap()
    }

    const CHAT_XML: &str = "<message xmlns='jabber:client' from='alice@example.com/phone' \
        to='me@example.com/parley' type='chat' id='m1'>\
        <body>Hello!</body>\
        <active xmlns='http://jabber.org/protocol/chatstates'/>\
        <request xmlns='urn:xmpp:receipts'/>\
    </message>";

    const DELAYED_XML: &str = "<message xmlns='jabber:client' from='alice@example.com/phone' \
        type='chat'>\
        <body>while you were away</body>\
        <delay xmlns='urn:xmpp:delay' from='example.com' stamp='2024-03-01T12:30:00Z'/>\
    </message>";

    const DISPLAYED_XML: &str = "<message xmlns='jabber:client' from='alice@example.com/phone'>\
        <displayed xmlns='urn:xmpp:chat-markers:0' id='m7'/>\
    </message>";

    const RECEIPT_XML: &str = "<message xmlns='jabber:client' from='alice@example.com/phone'>\
        <received xmlns='urn:xmpp:receipts' id='m8'/>\
    </message>";

    const AWAY_XML: &str = "<presence xmlns='jabber:client' from='alice@example.com/phone'>\
        <show>away</show>\
        <status>Be right back</status>\
        <priority>-3</priority>\
        <c xmlns='http://jabber.org/protocol/caps' hash='sha-1' \
            node='https://parley.example/caps' ver='QgayPKawpkPSDYmwT/WM94uAlu0='/>\
        <x xmlns='vcard-temp:x:update'><photo>01b87fcd030b72895ff8e88db57ec525450f000d</photo></x>\
    </presence>";

    const ROSTER_XML: &str = "<iq xmlns='jabber:client' type='result' id='roster-fetch'>\
        <query xmlns='jabber:iq:roster' ver='v1'>\
            <item jid='alice@example.com' name='Alice' subscription='both'>\
                <group>Friends</group>\
            </item>\
            <item jid='bob@example.com' subscription='none' ask='subscribe'>\
                <group>Friends</group>\
                <group>Work</group>\
            </item>\
        </query>\
    </iq>";

    #[test]
    fn reads_chat_message() {
        let Some(InboundEvent::Message(message)) = read(CHAT_XML) else {
            panic!("expected message");
        };
        assert_eq!(message.from, "alice@example.com/phone");
        assert_eq!(message.id.as_deref(), Some("m1"));
        assert_eq!(message.kind, MessageKind::Chat);
        assert_eq!(message.body.as_deref(), Some("Hello!"));
        assert_eq!(message.chat_state, Some(ChatState::Active));
        assert!(message.receipt_requested);
        assert!(message.marker.is_none());
    }

    #[test]
    fn reads_delay_stamp() {
        let Some(InboundEvent::Message(message)) = read(DELAYED_XML) else {
            panic!("expected message");
        };
        let stamp = message.stamp.unwrap();
        assert_eq!(stamp.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    }

    #[test]
    fn reads_markers_and_receipts() {
        let Some(InboundEvent::Message(message)) = read(DISPLAYED_XML) else {
            panic!("expected message");
        };
        assert_eq!(message.kind, MessageKind::Normal);
        assert_eq!(
            message.marker,
            Some(ChatMarker {
                kind: MarkerKind::Displayed,
                id: "m7".to_string()
            })
        );

        let Some(InboundEvent::Message(message)) = read(RECEIPT_XML) else {
            panic!("expected message");
        };
        assert_eq!(
            message.marker,
            Some(ChatMarker {
                kind: MarkerKind::Received,
                id: "m8".to_string()
            })
        );
    }

    #[test]
    fn rejects_message_without_sender() {
        let element: Element = "<message xmlns='jabber:client'><body>hi</body></message>"
            .parse()
            .unwrap();
        assert!(matches!(
            reader().read(&element),
            Err(AdapterError::MissingAttribute {
                element: "message",
                attribute: "from"
            })
        ));
    }

    #[test]
    fn rejects_foreign_namespace() {
        let element: Element = "<a xmlns='urn:xmpp:sm:3' h='1'/>".parse().unwrap();
        assert!(matches!(
            reader().read(&element),
            Err(AdapterError::UnexpectedElement { .. })
        ));
    }

    #[test]
    fn reads_presence() {
        let Some(InboundEvent::Presence(presence)) = read(AWAY_XML) else {
            panic!("expected presence");
        };
        assert_eq!(presence.availability, Availability::Available);
        assert_eq!(presence.show, Some(Show::Away));
        assert_eq!(presence.status.as_deref(), Some("Be right back"));
        assert_eq!(presence.priority, Some(-3));
        let caps = presence.caps.unwrap();
        assert_eq!(caps.hash, "sha-1");
        assert_eq!(caps.ver, "QgayPKawpkPSDYmwT/WM94uAlu0=");
        assert_eq!(
            presence.photo,
            PhotoUpdate::Hash("01b87fcd030b72895ff8e88db57ec525450f000d".to_string())
        );
        assert!(presence.muc.is_none());
    }

    #[test]
    fn reads_unavailable_and_error_presence() {
        let Some(InboundEvent::Presence(presence)) = read(
            "<presence xmlns='jabber:client' from='alice@example.com/phone' type='unavailable'>\
                <x xmlns='vcard-temp:x:update'><photo/></x>\
            </presence>",
        ) else {
            panic!("expected presence");
        };
        assert_eq!(presence.availability, Availability::Unavailable);
        assert_eq!(presence.photo, PhotoUpdate::NoPhoto);

        let Some(InboundEvent::Presence(presence)) = read(
            "<presence xmlns='jabber:client' from='alice@example.com' type='error'/>",
        ) else {
            panic!("expected presence");
        };
        assert_eq!(presence.availability, Availability::Error);
        assert_eq!(presence.photo, PhotoUpdate::NotAdvertised);
    }

    #[test]
    fn caps_without_hash_are_dropped() {
        let Some(InboundEvent::Presence(presence)) = read(
            "<presence xmlns='jabber:client' from='alice@example.com/old'>\
                <c xmlns='http://jabber.org/protocol/caps' node='legacy' ver='1.0'/>\
            </presence>",
        ) else {
            panic!("expected presence");
        };
        assert!(presence.caps.is_none());
    }

    #[test]
    fn reads_own_room_presence() {
        let Some(InboundEvent::Presence(presence)) = read(
            "<presence xmlns='jabber:client' from='room@conference.example.com/me'>\
                <x xmlns='http://jabber.org/protocol/muc#user'>\
                    <item affiliation='member' role='participant'/>\
                    <status code='110'/>\
                </x>\
            </presence>",
        ) else {
            panic!("expected presence");
        };
        assert_eq!(
            presence.muc,
            Some(MucPresence {
                self_presence: true
            })
        );
    }

    #[test]
    fn reads_subscription_request() {
        assert_eq!(
            read(
                "<presence xmlns='jabber:client' from='carol@example.com' type='subscribe'>\
                    <status>It's Carol</status>\
                </presence>"
            ),
            Some(InboundEvent::SubscriptionRequest {
                from: "carol@example.com".to_string(),
                message: Some("It's Carol".to_string()),
            })
        );
        assert_eq!(
            read("<presence xmlns='jabber:client' from='carol@example.com' type='subscribed'/>"),
            None
        );
    }

    #[test]
    fn reads_roster() {
        let Some(InboundEvent::RosterReceived(items)) = read(ROSTER_XML) else {
            panic!("expected roster");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].jid, "alice@example.com");
        assert_eq!(items[0].name.as_deref(), Some("Alice"));
        assert_eq!(items[0].subscription, Subscription::Both);
        assert!(items[0].groups.contains("Friends"));
        assert_eq!(items[1].ask, Some(AskType::Subscribe));
        assert_eq!(items[1].groups.len(), 2);
    }

    #[test]
    fn rejects_bad_subscription() {
        let element: Element = "<iq xmlns='jabber:client' type='result' id='roster-fetch'>\
            <query xmlns='jabber:iq:roster'><item jid='a@example.com' subscription='maybe'/></query>\
        </iq>"
            .parse()
            .unwrap();
        assert!(matches!(
            reader().read(&element),
            Err(AdapterError::InvalidValue {
                what: "subscription",
                ..
            })
        ));
    }

    #[test]
    fn reads_roster_push_from_own_account_only() {
        let push = "<iq xmlns='jabber:client' type='set' id='push1' from='me@example.com'>\
            <query xmlns='jabber:iq:roster'>\
                <item jid='dave@example.com' subscription='remove'/>\
            </query>\
        </iq>";
        assert_eq!(
            read(push),
            Some(InboundEvent::RosterPush(
                RosterItem::new("dave@example.com").set_subscription(Subscription::Remove)
            ))
        );

        let spoofed = push.replace("from='me@example.com'", "from='mallory@evil.example'");
        assert_eq!(read(&spoofed), None);
    }

    #[test]
    fn reads_roster_update_results() {
        assert_eq!(
            read("<iq xmlns='jabber:client' type='result' id='roster-4'/>"),
            Some(InboundEvent::RosterUpdateResult {
                request_id: RequestId(4),
                result: Ok(()),
            })
        );

        assert_eq!(
            read(
                "<iq xmlns='jabber:client' type='error' id='roster-5'>\
                    <error type='modify'>\
                        <not-acceptable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
                        <text xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'>group name too long</text>\
                    </error>\
                </iq>"
            ),
            Some(InboundEvent::RosterUpdateResult {
                request_id: RequestId(5),
                result: Err(RemoteError::new(StanzaErrorCondition::NotAcceptable)
                    .with_text("group name too long")),
            })
        );
    }

    #[test]
    fn reads_disco_info() {
        let Some(InboundEvent::DiscoInfo(info)) = read(
            "<iq xmlns='jabber:client' type='result' id='disco-1' from='alice@example.com/phone'>\
                <query xmlns='http://jabber.org/protocol/disco#info' node='https://parley.example/caps#abc'>\
                    <identity category='client' type='phone' name='Parley'/>\
                    <feature var='http://jabber.org/protocol/disco#info'/>\
                    <feature var='urn:xmpp:receipts'/>\
                </query>\
            </iq>",
        ) else {
            panic!("expected disco info");
        };
        assert_eq!(info.from, "alice@example.com/phone");
        assert_eq!(info.node.as_deref(), Some("https://parley.example/caps#abc"));
        assert_eq!(
            info.identities,
            vec![DiscoIdentity::new("client", "phone", Some("Parley"))]
        );
        assert_eq!(info.features.len(), 2);
    }

    #[test]
    fn disco_error_is_reported() {
        assert_eq!(
            read(
                "<iq xmlns='jabber:client' type='error' id='disco-3' from='alice@example.com/laptop'>\
                    <query xmlns='http://jabber.org/protocol/disco#info' node='https://parley.example/caps#abc'/>\
                    <error type='cancel'>\
                        <service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
                    </error>\
                </iq>"
            ),
            Some(InboundEvent::DiscoInfoFailed {
                from: "alice@example.com/laptop".to_string(),
                node: Some("https://parley.example/caps#abc".to_string()),
                error: RemoteError::new(StanzaErrorCondition::ServiceUnavailable),
            })
        );
    }

    #[test]
    fn reads_vcard_photo() {
        let Some(InboundEvent::VCard { jid, photo }) = read(
            "<iq xmlns='jabber:client' type='result' id='vcard-2' from='alice@example.com'>\
                <vCard xmlns='vcard-temp'>\
                    <FN>Alice</FN>\
                    <PHOTO><TYPE>image/png</TYPE><BINVAL>iVBO\nRw==</BINVAL></PHOTO>\
                </vCard>\
            </iq>",
        ) else {
            panic!("expected vCard");
        };
        assert_eq!(jid, "alice@example.com");
        assert_eq!(
            photo,
            Some(AvatarData::new(vec![0x89, b'P', b'N', b'G'], "image/png"))
        );
    }

    #[test]
    fn vcard_without_photo_and_own_vcard() {
        assert_eq!(
            read(
                "<iq xmlns='jabber:client' type='result' id='vcard-3'>\
                    <vCard xmlns='vcard-temp'><FN>Me</FN></vCard>\
                </iq>"
            ),
            Some(InboundEvent::VCard {
                jid: "me@example.com".to_string(),
                photo: None,
            })
        );

        assert_eq!(
            read(
                "<iq xmlns='jabber:client' type='error' id='vcard-4' from='bob@example.com'>\
                    <error type='cancel'>\
                        <item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
                    </error>\
                </iq>"
            ),
            Some(InboundEvent::VCard {
                jid: "bob@example.com".to_string(),
                photo: None,
            })
        );

        assert_eq!(
            read("<iq xmlns='jabber:client' type='result' id='vcard-set-5'/>"),
            None
        );
    }

    #[test]
    fn photo_type_is_sniffed_when_missing() {
        let vcard: Element = "<vCard xmlns='vcard-temp'>\
            <PHOTO><BINVAL>/9j/4A==</BINVAL></PHOTO>\
        </vCard>"
            .parse()
            .unwrap();
        let photo = read_photo(&vcard).unwrap();
        assert_eq!(photo.mime_type, "image/jpeg");
    }

    #[test]
    fn iq_requests_are_left_alone() {
        assert_eq!(
            read(
                "<iq xmlns='jabber:client' type='get' id='ping1' from='example.com'>\
                    <ping xmlns='urn:xmpp:ping'/>\
                </iq>"
            ),
            None
        );
    }
}

//! Namespaces the adapter reads and writes.

pub use parley_session::caps::{
    FEATURE_CHAT_MARKERS as CHAT_MARKERS, FEATURE_CHAT_STATES as CHAT_STATES,
    FEATURE_RECEIPTS as RECEIPTS, NS_CAPS as CAPS,
};

pub const JABBER_CLIENT: &str = "jabber:client";
pub const ROSTER: &str = "jabber:iq:roster";
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
pub const VCARD: &str = "vcard-temp";
pub const VCARD_UPDATE: &str = "vcard-temp:x:update";
pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
pub const CONFERENCE: &str = "jabber:x:conference";
pub const DELAY: &str = "urn:xmpp:delay";
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

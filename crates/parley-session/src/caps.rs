//! Entity capabilities (XEP-0115) and resource selection.
//!
//! Contacts advertise a `node#ver` hash in presence. The first time a hash is
//! seen the session asks the advertising resource for its disco#info; the
//! answer is verified against the hash and cached, so later presences with
//! the same hash resolve without a round trip.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::events::DiscoInfo;
use crate::presence::PresenceAggregator;

/// XEP-0115 Entity Capabilities namespace.
pub const NS_CAPS: &str = "http://jabber.org/protocol/caps";

/// Stream-initiated file transfer profile (XEP-0096).
pub const FEATURE_SI_FILE_TRANSFER: &str = "http://jabber.org/protocol/si/profile/file-transfer";

/// Jingle file transfer (XEP-0234).
pub const FEATURE_JINGLE_FILE_TRANSFER: &str = "urn:xmpp:jingle:apps:file-transfer:5";

pub const FEATURE_CHAT_STATES: &str = "http://jabber.org/protocol/chatstates";
pub const FEATURE_RECEIPTS: &str = "urn:xmpp:receipts";
pub const FEATURE_CHAT_MARKERS: &str = "urn:xmpp:chat-markers:0";

/// The `<c/>` element of a presence stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsAdvert {
    /// Hash algorithm; only `sha-1` is verified
    pub hash: String,
    pub node: String,
    pub ver: String,
}

impl CapsAdvert {
    pub fn new(node: &str, ver: &str) -> Self {
        Self {
            hash: "sha-1".to_string(),
            node: node.to_string(),
            ver: ver.to_string(),
        }
    }

    /// The node queried with disco#info to resolve this hash.
    pub fn node_ver(&self) -> String {
        format!("{}#{}", self.node, self.ver)
    }
}

/// Identity element of a disco#info result.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoIdentity {
    pub category: String,
    pub type_: String,
    pub lang: Option<String>,
    pub name: Option<String>,
}

impl DiscoIdentity {
    pub fn new(category: &str, type_: &str, name: Option<&str>) -> Self {
        Self {
            category: category.to_string(),
            type_: type_.to_string(),
            lang: None,
            name: name.map(|s| s.to_string()),
        }
    }
}

/// Compute the XEP-0115 verification string hash for a disco#info result.
pub fn compute_caps_hash(identities: &[DiscoIdentity], features: &[String]) -> String {
    let mut s = String::new();

    let mut sorted_identities: Vec<_> = identities.iter().collect();
    sorted_identities.sort_by(|a, b| {
        (&a.category, &a.type_, &a.lang, &a.name).cmp(&(&b.category, &b.type_, &b.lang, &b.name))
    });
    for id in sorted_identities {
        s.push_str(&id.category);
        s.push('/');
        s.push_str(&id.type_);
        s.push('/');
        s.push_str(id.lang.as_deref().unwrap_or_default());
        s.push('/');
        s.push_str(id.name.as_deref().unwrap_or_default());
        s.push('<');
    }

    let mut sorted_features: Vec<_> = features.iter().collect();
    sorted_features.sort();
    sorted_features.dedup();
    for feature in sorted_features {
        s.push_str(feature);
        s.push('<');
    }

    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Capabilities per full address, plus the verified `ver` -> features cache.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    by_address: DashMap<String, BTreeSet<String>>,
    by_ver: DashMap<String, BTreeSet<String>>,
    /// node#ver -> addresses waiting for its disco#info; the first one is
    /// the address the query went to
    pending: DashMap<String, Vec<String>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_capabilities(&self, address: &str, features: impl IntoIterator<Item = String>) {
        let features: BTreeSet<String> = features.into_iter().collect();
        debug!(address, features = features.len(), "Recorded capabilities");
        self.by_address.insert(address.to_string(), features);
    }

    /// Drop what is known about an address that went offline.
    ///
    /// Returns the queries to re-send for hashes this address was being
    /// asked about, as `(address, node#ver)` pairs.
    pub fn forget(&self, address: &str) -> Vec<(String, String)> {
        self.by_address.remove(address);
        self.withdraw(address, None, true)
    }

    /// A disco#info query to `address` failed. Returns the queries to send
    /// to the next waiting addresses instead.
    pub fn query_failed(&self, address: &str, node: Option<&str>) -> Vec<(String, String)> {
        self.withdraw(address, node, false)
    }

    fn withdraw(&self, address: &str, node: Option<&str>, everywhere: bool) -> Vec<(String, String)> {
        let mut requery = Vec::new();
        self.pending.retain(|node_ver, waiting| {
            if node.is_some_and(|node| node != node_ver) {
                return true;
            }
            let queried = waiting.first().is_some_and(|a| a == address);
            if queried || everywhere {
                waiting.retain(|a| a != address);
            }
            if queried {
                if let Some(next) = waiting.first() {
                    debug!(node = %node_ver, from = address, to = %next, "Re-sending capabilities query");
                    requery.push((next.clone(), node_ver.clone()));
                }
            }
            !waiting.is_empty()
        });
        requery
    }

    pub fn features_at(&self, address: &str) -> Option<BTreeSet<String>> {
        self.by_address.get(address).map(|f| f.value().clone())
    }

    /// Apply a presence advert.
    ///
    /// Returns `true` when a disco#info query must be sent to `address`,
    /// which happens for the first address advertising an unknown hash.
    pub fn apply_advert(&self, address: &str, advert: &CapsAdvert) -> bool {
        if let Some(features) = self.by_ver.get(&advert.ver) {
            self.by_address
                .insert(address.to_string(), features.value().clone());
            return false;
        }

        let mut waiting = self.pending.entry(advert.node_ver()).or_default();
        let first = waiting.is_empty();
        if !waiting.iter().any(|a| a == address) {
            waiting.push(address.to_string());
        }
        first
    }

    /// Store a disco#info result. Returns every address whose capabilities
    /// changed as a result.
    pub fn apply_disco_info(&self, info: &DiscoInfo) -> Vec<String> {
        let mut updated = vec![info.from.clone()];
        self.record_capabilities(&info.from, info.features.iter().cloned());

        let Some(node) = info.node.as_deref() else {
            return updated;
        };
        let Some((_, waiting)) = self.pending.remove(node) else {
            return updated;
        };
        let Some((_, ver)) = node.split_once('#') else {
            return updated;
        };

        if compute_caps_hash(&info.identities, &info.features) != ver {
            warn!(node, from = %info.from, "Capabilities hash mismatch, not caching");
            return updated;
        }

        let features: BTreeSet<String> = info.features.iter().cloned().collect();
        self.by_ver.insert(ver.to_string(), features.clone());
        for address in waiting.into_iter().filter(|a| *a != info.from) {
            self.by_address.insert(address.clone(), features.clone());
            updated.push(address);
        }
        updated
    }

    pub fn knows_ver(&self, ver: &str) -> bool {
        self.by_ver.contains_key(ver)
    }

    /// Forget per-address state; the verified hash cache survives
    /// reconnects.
    pub fn clear_addresses(&self) {
        self.by_address.clear();
        self.pending.clear();
    }
}

/// Picks which resource of a contact to talk to.
pub struct ResourceSelector {
    presence: Arc<PresenceAggregator>,
    caps: Arc<CapabilityCache>,
    last_resources: DashMap<String, String>,
}

impl ResourceSelector {
    pub fn new(presence: Arc<PresenceAggregator>, caps: Arc<CapabilityCache>) -> Self {
        Self {
            presence,
            caps,
            last_resources: DashMap::new(),
        }
    }

    /// Present resource with the highest priority; a missing priority sorts
    /// lowest and ties keep the earliest resource.
    pub fn best_resource(&self, identity: &str) -> Option<String> {
        let mut best: Option<(i16, String)> = None;
        for (resource, presence) in self.presence.resources(identity) {
            if presence.error {
                continue;
            }
            let priority = presence.priority.map(i16::from).unwrap_or(i16::MIN);
            match &best {
                Some((current, _)) if priority <= *current => {}
                _ => best = Some((priority, resource)),
            }
        }
        best.map(|(_, resource)| resource)
    }

    /// Remember the resource a contact last wrote from.
    pub fn note_last_resource(&self, identity: &str, resource: &str) {
        self.last_resources
            .insert(identity.to_string(), resource.to_string());
    }

    /// Last resource if still present, otherwise the best one.
    pub fn preferred_resource(&self, identity: &str) -> Option<String> {
        if let Some(last) = self.last_resources.get(identity) {
            if self.presence.is_present(identity, last.value()) {
                return Some(last.value().clone());
            }
        }
        self.best_resource(identity)
    }

    /// Address for chat messages; falls back to the bare address.
    pub fn message_address(&self, identity: &str) -> String {
        match self.preferred_resource(identity) {
            Some(resource) => format!("{identity}/{resource}"),
            None => identity.to_string(),
        }
    }

    /// Address for file transfers, which need a concrete resource.
    pub fn transfer_address(&self, identity: &str) -> Result<String, SessionError> {
        self.preferred_resource(identity)
            .map(|resource| format!("{identity}/{resource}"))
            .ok_or_else(|| {
                SessionError::not_available(format!("{identity} has no online resource"))
            })
    }

    /// Features of the best resource, `None` if they are not known.
    pub fn capabilities_for(&self, identity: &str) -> Option<BTreeSet<String>> {
        let resource = self.best_resource(identity)?;
        self.caps.features_at(&format!("{identity}/{resource}"))
    }

    /// Whether the best resource supports any of `features`; `None` when its
    /// capabilities are unknown.
    pub fn supports_any(&self, identity: &str, features: &[&str]) -> Option<bool> {
        self.capabilities_for(identity)
            .map(|known| features.iter().any(|f| known.contains(*f)))
    }

    pub fn clear(&self) {
        self.last_resources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NotificationSink, SessionNotification};
    use crate::handles::HandleRegistry;
    use crate::presence::{ResourcePresence, Show, StatusRanking};
    use crate::types::HandleKind;

    struct Discard;

    impl NotificationSink for Discard {
        fn notify(&self, _notification: SessionNotification) {}
    }

    fn selector() -> (ResourceSelector, Arc<PresenceAggregator>, Arc<CapabilityCache>) {
        let contacts = Arc::new(HandleRegistry::new(HandleKind::Contact));
        let presence = Arc::new(PresenceAggregator::new(
            StatusRanking::default(),
            contacts,
            Arc::new(Discard),
        ));
        let caps = Arc::new(CapabilityCache::new());
        (
            ResourceSelector::new(presence.clone(), caps.clone()),
            presence,
            caps,
        )
    }

    fn exodus_info(from: &str, node: Option<&str>) -> DiscoInfo {
        DiscoInfo {
            from: from.to_string(),
            node: node.map(str::to_string),
            identities: vec![DiscoIdentity::new("client", "pc", Some("Exodus 0.9.1"))],
            features: vec![
                "http://jabber.org/protocol/caps".to_string(),
                "http://jabber.org/protocol/disco#info".to_string(),
                "http://jabber.org/protocol/disco#items".to_string(),
                "http://jabber.org/protocol/muc".to_string(),
            ],
        }
    }

    #[test]
    fn test_caps_hash_matches_xep_example() {
        let info = exodus_info("a@example.com/r", None);
        assert_eq!(
            compute_caps_hash(&info.identities, &info.features),
            "QgayPKawpkPSDYmwT/WM94uAlu0="
        );
    }

    #[test]
    fn test_best_resource_by_priority() {
        let (selector, presence, _) = selector();
        presence.update("a@example.com", "low", ResourcePresence::new(Show::Available).with_priority(1));
        presence.update("a@example.com", "none", ResourcePresence::new(Show::Available));
        presence.update("a@example.com", "high", ResourcePresence::new(Show::Away).with_priority(10));

        assert_eq!(selector.best_resource("a@example.com").as_deref(), Some("high"));
        assert!(selector.best_resource("b@example.com").is_none());
    }

    #[test]
    fn test_last_resource_wins_while_present() {
        let (selector, presence, _) = selector();
        presence.update("a@example.com", "phone", ResourcePresence::new(Show::Available).with_priority(0));
        presence.update("a@example.com", "desk", ResourcePresence::new(Show::Available).with_priority(5));

        selector.note_last_resource("a@example.com", "phone");
        assert_eq!(selector.message_address("a@example.com"), "a@example.com/phone");

        presence.remove("a@example.com", "phone");
        assert_eq!(selector.message_address("a@example.com"), "a@example.com/desk");
    }

    #[test]
    fn test_message_falls_back_to_bare_transfer_does_not() {
        let (selector, _, _) = selector();
        assert_eq!(selector.message_address("a@example.com"), "a@example.com");
        assert!(matches!(
            selector.transfer_address("a@example.com"),
            Err(SessionError::NotAvailable(_))
        ));
    }

    #[test]
    fn test_unknown_ver_requests_disco_once() {
        let caps = CapabilityCache::new();
        let advert = CapsAdvert::new("http://exodus.jabberstudio.org/caps", "QgayPKawpkPSDYmwT/WM94uAlu0=");
        assert!(caps.apply_advert("a@example.com/r1", &advert));
        assert!(!caps.apply_advert("b@example.com/r1", &advert));

        let updated = caps.apply_disco_info(&exodus_info("a@example.com/r1", Some(&advert.node_ver())));
        assert_eq!(updated, vec!["a@example.com/r1".to_string(), "b@example.com/r1".to_string()]);
        assert!(caps.knows_ver(&advert.ver));
        assert!(caps
            .features_at("b@example.com/r1")
            .unwrap()
            .contains("http://jabber.org/protocol/muc"));

        assert!(!caps.apply_advert("c@example.com/r1", &advert));
        assert!(caps.features_at("c@example.com/r1").is_some());
    }

    #[test]
    fn test_offline_queried_resource_hands_query_on() {
        let caps = CapabilityCache::new();
        let advert = CapsAdvert::new("http://exodus.jabberstudio.org/caps", "abc=");
        assert!(caps.apply_advert("alice@example.com/laptop", &advert));
        assert!(!caps.apply_advert("bob@example.com/desk", &advert));

        assert_eq!(
            caps.forget("alice@example.com/laptop"),
            vec![("bob@example.com/desk".to_string(), advert.node_ver())]
        );
        // the waiter is now the queried address
        assert!(caps.forget("carol@example.com/r1").is_empty());
        assert!(!caps.apply_advert("carol@example.com/r1", &advert));
    }

    #[test]
    fn test_lone_pending_query_is_dropped_when_offline() {
        let caps = CapabilityCache::new();
        let advert = CapsAdvert::new("http://exodus.jabberstudio.org/caps", "abc=");
        assert!(caps.apply_advert("alice@example.com/laptop", &advert));
        assert!(caps.forget("alice@example.com/laptop").is_empty());

        assert!(caps.apply_advert("bob@example.com/desk", &advert));
    }

    #[test]
    fn test_failed_query_moves_to_next_waiter() {
        let caps = CapabilityCache::new();
        let advert = CapsAdvert::new("http://exodus.jabberstudio.org/caps", "abc=");
        assert!(caps.apply_advert("alice@example.com/laptop", &advert));
        assert!(!caps.apply_advert("bob@example.com/desk", &advert));

        // a failure from a waiter that was never asked changes nothing
        assert!(caps
            .query_failed("bob@example.com/desk", Some(&advert.node_ver()))
            .is_empty());
        assert_eq!(
            caps.query_failed("alice@example.com/laptop", None),
            vec![("bob@example.com/desk".to_string(), advert.node_ver())]
        );
        assert!(caps
            .query_failed("bob@example.com/desk", Some(&advert.node_ver()))
            .is_empty());
        assert!(caps.apply_advert("alice@example.com/laptop", &advert));
    }

    #[test]
    fn test_mismatched_hash_not_cached() {
        let caps = CapabilityCache::new();
        let advert = CapsAdvert::new("http://example.com/caps", "bogus=");
        assert!(caps.apply_advert("a@example.com/r1", &advert));

        let updated = caps.apply_disco_info(&exodus_info("a@example.com/r1", Some(&advert.node_ver())));
        assert_eq!(updated, vec!["a@example.com/r1".to_string()]);
        assert!(!caps.knows_ver("bogus="));
    }

    #[test]
    fn test_supports_any_uses_best_resource() {
        let (selector, presence, caps) = selector();
        assert_eq!(selector.supports_any("a@example.com", &[FEATURE_SI_FILE_TRANSFER]), None);

        presence.update("a@example.com", "r1", ResourcePresence::new(Show::Available).with_priority(1));
        caps.record_capabilities("a@example.com/r1", vec![FEATURE_CHAT_STATES.to_string()]);
        assert_eq!(
            selector.supports_any("a@example.com", &[FEATURE_SI_FILE_TRANSFER]),
            Some(false)
        );

        caps.record_capabilities("a@example.com/r1", vec![FEATURE_SI_FILE_TRANSFER.to_string()]);
        assert_eq!(
            selector.supports_any("a@example.com", &[FEATURE_SI_FILE_TRANSFER]),
            Some(true)
        );
    }
}

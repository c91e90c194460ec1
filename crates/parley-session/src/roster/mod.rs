//! Roster model (RFC 6121) and group synchronization.
//!
//! The roster is owned by the server. The session keeps a mirror of the
//! items it has been told about and derives the set of groups from it; see
//! [`RosterGroupSynchronizer`] for how local group edits are reconciled.

mod groups;

pub use groups::RosterGroupSynchronizer;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::SubscriptionState;

/// A contact in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterItem {
    /// Bare address of the contact.
    pub jid: String,
    /// Optional human-readable name for the contact.
    pub name: Option<String>,
    pub subscription: Subscription,
    /// Pending outbound subscription request.
    pub ask: Option<AskType>,
    pub groups: BTreeSet<String>,
}

impl RosterItem {
    pub fn new(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            name: None,
            subscription: Subscription::None,
            ask: None,
            groups: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn set_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = subscription;
        self
    }

    pub fn set_ask(mut self, ask: Option<AskType>) -> Self {
        self.ask = ask;
        self
    }

    pub fn add_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Whether we receive the contact's presence.
    pub fn subscribe_state(&self) -> SubscriptionState {
        match self.subscription {
            Subscription::To | Subscription::Both => SubscriptionState::Yes,
            Subscription::None | Subscription::From if self.ask.is_some() => SubscriptionState::Ask,
            Subscription::None | Subscription::From => SubscriptionState::No,
            Subscription::Remove => SubscriptionState::Unknown,
        }
    }

    /// Whether the contact receives our presence.
    pub fn publish_state(&self) -> SubscriptionState {
        match self.subscription {
            Subscription::From | Subscription::Both => SubscriptionState::Yes,
            Subscription::None | Subscription::To => SubscriptionState::No,
            Subscription::Remove => SubscriptionState::Unknown,
        }
    }
}

/// Subscription state for a roster item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subscription {
    #[default]
    None,
    To,
    From,
    Both,
    /// Only valid in roster sets and pushes: the item is gone.
    Remove,
}

impl Subscription {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subscription::None => "none",
            Subscription::To => "to",
            Subscription::From => "from",
            Subscription::Both => "both",
            Subscription::Remove => "remove",
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Subscription::Remove)
    }
}

impl FromStr for Subscription {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Subscription::None),
            "to" => Ok(Subscription::To),
            "from" => Ok(Subscription::From),
            "both" => Ok(Subscription::Both),
            "remove" => Ok(Subscription::Remove),
            _ => Err(SessionError::invalid_argument(format!(
                "Invalid subscription state: {s}"
            ))),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pending subscription marker; RFC 6121 only defines `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AskType {
    Subscribe,
}

impl AskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AskType::Subscribe => "subscribe",
        }
    }
}

impl FromStr for AskType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(AskType::Subscribe),
            _ => Err(SessionError::invalid_argument(format!("Invalid ask type: {s}"))),
        }
    }
}

impl fmt::Display for AskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_item_builder() {
        let item = RosterItem::new("alice@example.com")
            .with_name("Alice")
            .set_subscription(Subscription::Both)
            .add_group("Friends")
            .add_group("Work")
            .add_group("Friends");

        assert_eq!(item.name.as_deref(), Some("Alice"));
        assert_eq!(item.groups.len(), 2);
    }

    #[test]
    fn test_subscription_from_str() {
        assert_eq!("both".parse::<Subscription>().unwrap(), Subscription::Both);
        assert!("remove".parse::<Subscription>().unwrap().is_remove());
        assert!("invalid".parse::<Subscription>().is_err());
    }

    #[test]
    fn test_subscribe_publish_states() {
        let item = RosterItem::new("a@example.com");
        assert_eq!(item.subscribe_state(), SubscriptionState::No);
        assert_eq!(item.publish_state(), SubscriptionState::No);

        let item = item.set_ask(Some(AskType::Subscribe));
        assert_eq!(item.subscribe_state(), SubscriptionState::Ask);

        let item = item.set_ask(None).set_subscription(Subscription::From);
        assert_eq!(item.subscribe_state(), SubscriptionState::No);
        assert_eq!(item.publish_state(), SubscriptionState::Yes);

        let item = item.set_subscription(Subscription::Both);
        assert_eq!(item.subscribe_state(), SubscriptionState::Yes);
        assert_eq!(item.publish_state(), SubscriptionState::Yes);
    }
}

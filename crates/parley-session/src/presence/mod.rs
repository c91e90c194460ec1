//! Presence vocabulary and per-identity aggregation.
//!
//! An identity may be online from several resources at once, each with its
//! own show value. Hosts see one [`AggregatedPresence`] per handle, derived
//! from the resources with [`PresenceAggregator`].

mod aggregator;

pub use aggregator::PresenceAggregator;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::PhotoUpdate;

/// Availability sub-state of an available resource (RFC 6121 `<show/>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Show {
    /// Online with no `<show/>` child
    Available,
    Away,
    /// Extended away (`xa`)
    #[serde(rename = "xa")]
    ExtendedAway,
    /// Do not disturb (`dnd`)
    #[serde(rename = "dnd")]
    Busy,
    Chat,
    Hidden,
}

impl Show {
    pub const ALL: [Show; 6] = [
        Show::Available,
        Show::Away,
        Show::ExtendedAway,
        Show::Busy,
        Show::Chat,
        Show::Hidden,
    ];

    /// Status keyword hosts use for this value.
    pub fn keyword(&self) -> &'static str {
        match self {
            Show::Available => "available",
            Show::Away => "away",
            Show::ExtendedAway => "xa",
            Show::Busy => "dnd",
            Show::Chat => "chat",
            Show::Hidden => "hidden",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|show| show.keyword() == keyword)
    }

    /// Value of the `<show/>` element, `None` for plain availability.
    pub fn wire_value(&self) -> Option<&'static str> {
        match self {
            Show::Available | Show::Hidden => None,
            Show::Away => Some("away"),
            Show::ExtendedAway => Some("xa"),
            Show::Busy => Some("dnd"),
            Show::Chat => Some("chat"),
        }
    }

    pub fn presence_type(&self) -> PresenceType {
        match self {
            Show::Available | Show::Chat => PresenceType::Available,
            Show::Away => PresenceType::Away,
            Show::ExtendedAway => PresenceType::ExtendedAway,
            Show::Busy => PresenceType::Busy,
            Show::Hidden => PresenceType::Hidden,
        }
    }
}

impl fmt::Display for Show {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Presence type as reported to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PresenceType {
    Unset = 0,
    Offline = 1,
    Available = 2,
    Away = 3,
    ExtendedAway = 4,
    Hidden = 5,
    Busy = 6,
    Unknown = 7,
    Error = 8,
}

/// Presence of one resource of an identity, replaced wholesale per update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePresence {
    pub show: Show,
    pub status: Option<String>,
    pub priority: Option<i8>,
    /// The last presence from this resource was an error
    pub error: bool,
}

impl ResourcePresence {
    pub fn new(show: Show) -> Self {
        Self {
            show,
            status: None,
            priority: None,
            error: false,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn error() -> Self {
        Self {
            error: true,
            ..Self::new(Show::Available)
        }
    }
}

/// The single presence value hosts see for a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedPresence {
    pub presence_type: PresenceType,
    pub status: String,
    pub message: String,
}

impl AggregatedPresence {
    pub fn offline() -> Self {
        Self {
            presence_type: PresenceType::Offline,
            status: "offline".to_string(),
            message: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            presence_type: PresenceType::Unknown,
            status: "unknown".to_string(),
            message: String::new(),
        }
    }

    pub fn from_resource(presence: &ResourcePresence) -> Self {
        Self {
            presence_type: presence.show.presence_type(),
            status: presence.show.keyword().to_string(),
            message: presence.status.clone().unwrap_or_default(),
        }
    }

    pub fn is_online(&self) -> bool {
        !matches!(
            self.presence_type,
            PresenceType::Offline | PresenceType::Unknown | PresenceType::Error | PresenceType::Unset
        )
    }
}

/// One row of the status table advertised to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSpec {
    pub presence_type: PresenceType,
    pub may_set_on_self: bool,
    pub can_have_message: bool,
}

/// The statuses this connection understands, keyed by keyword.
pub fn status_specs() -> BTreeMap<&'static str, StatusSpec> {
    let settable = |presence_type| StatusSpec {
        presence_type,
        may_set_on_self: true,
        can_have_message: true,
    };

    let mut specs = BTreeMap::new();
    specs.insert(
        "offline",
        StatusSpec {
            presence_type: PresenceType::Offline,
            may_set_on_self: true,
            can_have_message: false,
        },
    );
    specs.insert(
        "unknown",
        StatusSpec {
            presence_type: PresenceType::Unknown,
            may_set_on_self: false,
            can_have_message: false,
        },
    );
    for show in Show::ALL {
        specs.insert(show.keyword(), settable(show.presence_type()));
    }
    specs
}

/// Rank of each show value when picking the representative resource.
///
/// The lowest rank wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRanking {
    ranks: BTreeMap<Show, u8>,
}

impl StatusRanking {
    pub fn rank(&self, show: Show) -> u8 {
        self.ranks.get(&show).copied().unwrap_or(u8::MAX)
    }

    /// Override individual ranks, keeping the defaults for the rest.
    pub fn with_overrides(mut self, overrides: &BTreeMap<Show, u8>) -> Self {
        self.ranks
            .extend(overrides.iter().map(|(show, rank)| (*show, *rank)));
        self
    }
}

impl Default for StatusRanking {
    fn default() -> Self {
        let ranks = Show::ALL
            .into_iter()
            .enumerate()
            .map(|(rank, show)| (show, rank as u8))
            .collect();
        Self { ranks }
    }
}

/// Our own presence, published to the server while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnPresence {
    /// `false` when we set ourselves offline
    pub available: bool,
    pub show: Show,
    pub status: Option<String>,
    pub priority: i8,
    /// Avatar hash announced with `vcard-temp:x:update`; stays
    /// `NotAdvertised` until our own vCard has been fetched
    pub photo: PhotoUpdate,
}

impl OwnPresence {
    pub fn online(priority: i8) -> Self {
        Self {
            available: true,
            show: Show::Available,
            status: None,
            priority,
            photo: PhotoUpdate::NotAdvertised,
        }
    }

    /// Apply a host-supplied status keyword.
    ///
    /// # Panics
    ///
    /// Panics when `keyword` is not a status the connection advertises.
    /// Hosts are expected to validate against [`status_specs`] first.
    pub fn set_keyword(&mut self, keyword: &str, message: &str) {
        let status = (!message.is_empty()).then(|| message.to_string());
        if keyword == "offline" {
            self.available = false;
            self.status = None;
            return;
        }
        match Show::from_keyword(keyword) {
            Some(show) => {
                self.available = true;
                self.show = show;
                self.status = status;
            }
            None => panic!("unsupported status keyword '{keyword}'"),
        }
    }

    pub fn aggregated(&self) -> AggregatedPresence {
        if !self.available {
            return AggregatedPresence::offline();
        }
        AggregatedPresence {
            presence_type: self.show.presence_type(),
            status: self.show.keyword().to_string(),
            message: self.status.clone().unwrap_or_default(),
        }
    }
}

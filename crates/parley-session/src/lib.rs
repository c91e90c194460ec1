//! # parley-session
//!
//! Session identity and routing core of the Parley XMPP connection manager.
//!
//! The crate sits between a protocol engine (which speaks XMPP on the wire)
//! and a host exposing Telepathy-style connections, handles and channels.
//! It performs no network I/O of its own.
//!
//! ## Components
//!
//! - **Handles**: stable opaque handles for contact, room and occupant
//!   addresses ([`HandleRegistry`])
//! - **Presence**: per-resource presence merged into one value per contact
//!   ([`PresenceAggregator`])
//! - **Roster groups**: host group edits kept consistent with the server
//!   roster ([`RosterGroupSynchronizer`])
//! - **Channels**: text, room and file transfer channels, at most one per
//!   peer and kind ([`ChannelRouter`])
//! - **Capabilities**: XEP-0115 caps cache and resource selection
//!   ([`CapabilityCache`], [`ResourceSelector`])
//! - **Session**: the connection state machine and host operations
//!   ([`Session`]), fed by the [`dispatch`] loop

pub mod avatar;
pub mod caps;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod handles;
pub mod message;
pub mod presence;
pub mod roster;
pub mod session;

mod error;
mod types;

pub use caps::{CapabilityCache, ResourceSelector};
pub use channel::{ChannelId, ChannelInfo, ChannelKind, ChannelRouter};
pub use config::{load_config_from, load_config_from_str, ConfigError, SessionConfig};
pub use engine::{MpscEngine, OutboundCommand, ProtocolEngine, RequestId};
pub use error::{EngineError, RemoteError, SessionError, StanzaErrorCondition};
pub use events::{BroadcastSink, InboundEvent, NotificationSink, SessionNotification};
pub use handles::{HandleRegistry, Handles};
pub use presence::PresenceAggregator;
pub use roster::RosterGroupSynchronizer;
pub use session::{ContactAttributes, Session};
pub use types::*;

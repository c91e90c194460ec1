//! # parley-xmpp
//!
//! Stanza adapter between an XMPP stream and the parley-session core.
//!
//! - [`StanzaReader`] turns received stanzas into
//!   [`InboundEvent`](parley_session::InboundEvent)s
//! - [`StanzaWriter`] turns session commands into stanzas
//! - [`StanzaEngine`] plugs the writer into a session as its
//!   [`ProtocolEngine`](parley_session::ProtocolEngine)
//! - [`telemetry`] installs the tracing subscriber

pub mod engine;
pub mod inbound;
pub mod outbound;
pub mod telemetry;

mod error;
mod ns;

pub use engine::{EngineRequest, StanzaEngine};
pub use error::AdapterError;
pub use inbound::StanzaReader;
pub use outbound::{StanzaWriter, ROSTER_FETCH_ID};

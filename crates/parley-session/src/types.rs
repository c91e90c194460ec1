//! Core value types shared across the session.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::error::SessionError;

/// Opaque identifier for a protocol identity within one namespace.
///
/// Handles start at 1; 0 never names anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    /// Wrap a raw handle value received from a host. Returns `None` for 0.
    pub fn new(raw: u32) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    pub(crate) fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    /// The raw value handed to hosts.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle namespaces, numbered as hosts expect them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HandleKind {
    None = 0,
    Contact = 1,
    Room = 2,
}

impl HandleKind {
    /// Parse the numeric handle type used in host requests.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Contact),
            2 => Some(Self::Room),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Connection status as reported to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connected = 0,
    Connecting = 1,
    Disconnected = 2,
}

/// Why the connection status last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusReason {
    NoneSpecified = 0,
    Requested = 1,
    NetworkError = 2,
    AuthenticationFailed = 3,
}

/// Progress of password authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthState {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
}

/// Download state of the remote roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContactListState {
    NotYetRequested,
    Waiting,
    Failure,
    Success,
}

/// Subscribe/publish state of a contact, derived from the roster subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionState {
    Unknown = 0,
    No = 1,
    RemovedRemotely = 2,
    Ask = 3,
    Yes = 4,
}

/// The account this session logs in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Bare address
    pub jid: String,
    pub resource: String,
    /// Nickname used in rooms
    pub nick: String,
    pub priority: i8,
}

impl Account {
    pub fn full_jid(&self) -> String {
        format!("{}/{}", self.jid, self.resource)
    }
}

/// Connection and authentication state shared by every session component.
///
/// Components consult it before mutating anything so that a call racing a
/// disconnect fails with [`SessionError::Disconnected`].
#[derive(Debug)]
pub struct SessionStatus {
    connection: AtomicU8,
    auth: AtomicU8,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            connection: AtomicU8::new(ConnectionStatus::Disconnected as u8),
            auth: AtomicU8::new(AuthState::NotStarted as u8),
        }
    }

    pub fn connection(&self) -> ConnectionStatus {
        match self.connection.load(Ordering::Acquire) {
            0 => ConnectionStatus::Connected,
            1 => ConnectionStatus::Connecting,
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn set_connection(&self, status: ConnectionStatus) -> ConnectionStatus {
        let previous = self.connection.swap(status as u8, Ordering::AcqRel);
        match previous {
            0 => ConnectionStatus::Connected,
            1 => ConnectionStatus::Connecting,
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn auth(&self) -> AuthState {
        match self.auth.load(Ordering::Acquire) {
            0 => AuthState::NotStarted,
            1 => AuthState::InProgress,
            2 => AuthState::Succeeded,
            _ => AuthState::Failed,
        }
    }

    pub fn set_auth(&self, state: AuthState) {
        self.auth.store(state as u8, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connection() == ConnectionStatus::Connected
    }

    /// Fail with [`SessionError::Disconnected`] unless connected.
    pub fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::Disconnected)
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

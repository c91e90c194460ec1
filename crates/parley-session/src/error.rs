//! Error types for the session core.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors returned synchronously by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not connected
    #[error("Disconnected")]
    Disconnected,

    /// A handle or identifier does not name a known identity
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A request is malformed or uses an unsupported value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation cannot be performed right now
    #[error("Not available: {0}")]
    NotAvailable(String),

    /// The referenced object does not exist
    #[error("Does not exist: {0}")]
    DoesNotExist(String),

    /// The object being created already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The remote side rejected a request
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The protocol engine refused a command
    #[error("Protocol engine error: {0}")]
    Engine(#[from] EngineError),
}

impl SessionError {
    /// Create a new invalid handle error.
    pub fn invalid_handle(msg: impl Into<String>) -> Self {
        Self::InvalidHandle(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new not available error.
    pub fn not_available(msg: impl Into<String>) -> Self {
        Self::NotAvailable(msg.into())
    }

    /// Create a new does not exist error.
    pub fn does_not_exist(msg: impl Into<String>) -> Self {
        Self::DoesNotExist(msg.into())
    }

    /// Create a new already exists error.
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    /// The D-Bus error name a host reports for this error.
    pub fn dbus_name(&self) -> &'static str {
        match self {
            Self::Disconnected => "org.freedesktop.Telepathy.Error.Disconnected",
            Self::InvalidHandle(_) => "org.freedesktop.Telepathy.Error.InvalidHandle",
            Self::InvalidArgument(_) => "org.freedesktop.Telepathy.Error.InvalidArgument",
            Self::NotAvailable(_) => "org.freedesktop.Telepathy.Error.NotAvailable",
            Self::DoesNotExist(_) => "org.freedesktop.Telepathy.Error.DoesNotExist",
            Self::AlreadyExists(_) => "org.freedesktop.Telepathy.Error.AlreadyExists",
            Self::Remote(err) => err.dbus_name(),
            Self::Engine(_) => "org.freedesktop.Telepathy.Error.NetworkError",
        }
    }
}

/// Errors reported by a [`ProtocolEngine`](crate::engine::ProtocolEngine).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine has shut down and accepts no more commands
    #[error("engine closed")]
    Closed,

    /// The engine's command queue is full
    #[error("engine queue full")]
    QueueFull,

    /// The engine refused the command
    #[error("command rejected: {0}")]
    Rejected(String),
}

/// A stanza-level error returned by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Defined condition
    pub condition: StanzaErrorCondition,
    /// Optional human readable text
    pub text: Option<String>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}: {}", self.condition, text),
            None => write!(f, "{}", self.condition),
        }
    }
}

impl std::error::Error for RemoteError {}

impl RemoteError {
    /// Create a remote error without text.
    pub fn new(condition: StanzaErrorCondition) -> Self {
        Self {
            condition,
            text: None,
        }
    }

    /// Attach a human readable description.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn dbus_name(&self) -> &'static str {
        match self.condition {
            StanzaErrorCondition::Forbidden
            | StanzaErrorCondition::NotAuthorized
            | StanzaErrorCondition::NotAllowed => "org.freedesktop.Telepathy.Error.PermissionDenied",
            StanzaErrorCondition::ItemNotFound
            | StanzaErrorCondition::RemoteServerNotFound => {
                "org.freedesktop.Telepathy.Error.DoesNotExist"
            }
            StanzaErrorCondition::Conflict => "org.freedesktop.Telepathy.Error.AlreadyExists",
            StanzaErrorCondition::BadRequest
            | StanzaErrorCondition::JidMalformed
            | StanzaErrorCondition::NotAcceptable => {
                "org.freedesktop.Telepathy.Error.InvalidArgument"
            }
            StanzaErrorCondition::FeatureNotImplemented
            | StanzaErrorCondition::ServiceUnavailable => {
                "org.freedesktop.Telepathy.Error.NotImplemented"
            }
            _ => "org.freedesktop.Telepathy.Error.NotAvailable",
        }
    }
}

/// Stanza error conditions (RFC 6120 Section 8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaErrorCondition {
    BadRequest,
    Conflict,
    FeatureNotImplemented,
    Forbidden,
    Gone,
    InternalServerError,
    ItemNotFound,
    JidMalformed,
    NotAcceptable,
    NotAllowed,
    NotAuthorized,
    PolicyViolation,
    RecipientUnavailable,
    Redirect,
    RegistrationRequired,
    RemoteServerNotFound,
    RemoteServerTimeout,
    ResourceConstraint,
    ServiceUnavailable,
    SubscriptionRequired,
    UndefinedCondition,
    UnexpectedRequest,
}

impl StanzaErrorCondition {
    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::Forbidden => "forbidden",
            Self::Gone => "gone",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::JidMalformed => "jid-malformed",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAllowed => "not-allowed",
            Self::NotAuthorized => "not-authorized",
            Self::PolicyViolation => "policy-violation",
            Self::RecipientUnavailable => "recipient-unavailable",
            Self::Redirect => "redirect",
            Self::RegistrationRequired => "registration-required",
            Self::RemoteServerNotFound => "remote-server-not-found",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::ResourceConstraint => "resource-constraint",
            Self::ServiceUnavailable => "service-unavailable",
            Self::SubscriptionRequired => "subscription-required",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnexpectedRequest => "unexpected-request",
        }
    }
}

impl FromStr for StanzaErrorCondition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bad-request" => Self::BadRequest,
            "conflict" => Self::Conflict,
            "feature-not-implemented" => Self::FeatureNotImplemented,
            "forbidden" => Self::Forbidden,
            "gone" => Self::Gone,
            "internal-server-error" => Self::InternalServerError,
            "item-not-found" => Self::ItemNotFound,
            "jid-malformed" => Self::JidMalformed,
            "not-acceptable" => Self::NotAcceptable,
            "not-allowed" => Self::NotAllowed,
            "not-authorized" => Self::NotAuthorized,
            "policy-violation" => Self::PolicyViolation,
            "recipient-unavailable" => Self::RecipientUnavailable,
            "redirect" => Self::Redirect,
            "registration-required" => Self::RegistrationRequired,
            "remote-server-not-found" => Self::RemoteServerNotFound,
            "remote-server-timeout" => Self::RemoteServerTimeout,
            "resource-constraint" => Self::ResourceConstraint,
            "service-unavailable" => Self::ServiceUnavailable,
            "subscription-required" => Self::SubscriptionRequired,
            "undefined-condition" => Self::UndefinedCondition,
            "unexpected-request" => Self::UnexpectedRequest,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::invalid_handle("handle 42 is unknown");
        assert_eq!(err.to_string(), "Invalid handle: handle 42 is unknown");

        let err = SessionError::Disconnected;
        assert_eq!(err.to_string(), "Disconnected");
    }

    #[test]
    fn test_dbus_names() {
        assert_eq!(
            SessionError::Disconnected.dbus_name(),
            "org.freedesktop.Telepathy.Error.Disconnected"
        );
        assert_eq!(
            SessionError::does_not_exist("Friends").dbus_name(),
            "org.freedesktop.Telepathy.Error.DoesNotExist"
        );
        assert_eq!(
            SessionError::from(EngineError::Closed).dbus_name(),
            "org.freedesktop.Telepathy.Error.NetworkError"
        );
        let remote = RemoteError::new(StanzaErrorCondition::Forbidden);
        assert_eq!(
            SessionError::from(remote).dbus_name(),
            "org.freedesktop.Telepathy.Error.PermissionDenied"
        );
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new(StanzaErrorCondition::NotAllowed);
        assert_eq!(err.to_string(), "not-allowed");

        let err = err.with_text("roster is locked");
        assert_eq!(err.to_string(), "not-allowed: roster is locked");
    }

    #[test]
    fn test_condition_round_trip_names() {
        assert_eq!(
            "item-not-found".parse::<StanzaErrorCondition>(),
            Ok(StanzaErrorCondition::ItemNotFound)
        );
        assert_eq!(StanzaErrorCondition::ItemNotFound.as_str(), "item-not-found");
        assert!("no-such-condition".parse::<StanzaErrorCondition>().is_err());
    }
}

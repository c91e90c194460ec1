use thiserror::Error;

/// Errors raised while converting between stanzas and session values.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unexpected element <{name} xmlns='{ns}'>")]
    UnexpectedElement { name: String, ns: String },

    #[error("missing '{attribute}' attribute on <{element}>")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("invalid JID: {0}")]
    InvalidJid(String),

    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: String },
}

impl AdapterError {
    pub(crate) fn missing(element: &'static str, attribute: &'static str) -> Self {
        Self::MissingAttribute { element, attribute }
    }

    pub(crate) fn invalid(what: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            what,
            value: value.into(),
        }
    }
}

//! Host channel requests, expressed as property maps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::file_transfer::TransferMetadata;
use super::ChannelKind;
use crate::error::SessionError;
use crate::types::{Handle, HandleKind};

pub const TYPE_TEXT: &str = "org.freedesktop.Telepathy.Channel.Type.Text";
pub const TYPE_FILE_TRANSFER: &str = "org.freedesktop.Telepathy.Channel.Type.FileTransfer";

pub const PROP_CHANNEL_TYPE: &str = "org.freedesktop.Telepathy.Channel.ChannelType";
pub const PROP_TARGET_HANDLE_TYPE: &str = "org.freedesktop.Telepathy.Channel.TargetHandleType";
pub const PROP_TARGET_HANDLE: &str = "org.freedesktop.Telepathy.Channel.TargetHandle";
pub const PROP_TARGET_ID: &str = "org.freedesktop.Telepathy.Channel.TargetID";

pub const PROP_FT_FILENAME: &str = "org.freedesktop.Telepathy.Channel.Type.FileTransfer.Filename";
pub const PROP_FT_SIZE: &str = "org.freedesktop.Telepathy.Channel.Type.FileTransfer.Size";
pub const PROP_FT_CONTENT_TYPE: &str =
    "org.freedesktop.Telepathy.Channel.Type.FileTransfer.ContentType";
pub const PROP_FT_DESCRIPTION: &str =
    "org.freedesktop.Telepathy.Channel.Type.FileTransfer.Description";
pub const PROP_FT_DATE: &str = "org.freedesktop.Telepathy.Channel.Type.FileTransfer.Date";
pub const PROP_FT_CONTENT_HASH: &str =
    "org.freedesktop.Telepathy.Channel.Type.FileTransfer.ContentHash";
pub const PROP_FT_CONTENT_HASH_TYPE: &str =
    "org.freedesktop.Telepathy.Channel.Type.FileTransfer.ContentHashType";

/// A property value in a request map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RequestValue {
    Str(String),
    U32(u32),
    U64(u64),
    Bool(bool),
}

impl From<&str> for RequestValue {
    fn from(value: &str) -> Self {
        RequestValue::Str(value.to_string())
    }
}

impl From<String> for RequestValue {
    fn from(value: String) -> Self {
        RequestValue::Str(value)
    }
}

impl From<u32> for RequestValue {
    fn from(value: u32) -> Self {
        RequestValue::U32(value)
    }
}

impl From<u64> for RequestValue {
    fn from(value: u64) -> Self {
        RequestValue::U64(value)
    }
}

pub type RequestMap = BTreeMap<String, RequestValue>;

/// A channel class hosts may request, advertised per contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestableChannelClass {
    pub fixed: RequestMap,
    pub allowed: Vec<String>,
}

impl RequestableChannelClass {
    pub fn text(handle_kind: HandleKind) -> Self {
        let mut fixed = RequestMap::new();
        fixed.insert(PROP_CHANNEL_TYPE.to_string(), TYPE_TEXT.into());
        fixed.insert(
            PROP_TARGET_HANDLE_TYPE.to_string(),
            handle_kind.as_u32().into(),
        );
        Self {
            fixed,
            allowed: vec![PROP_TARGET_HANDLE.to_string(), PROP_TARGET_ID.to_string()],
        }
    }

    pub fn file_transfer() -> Self {
        let mut fixed = RequestMap::new();
        fixed.insert(PROP_CHANNEL_TYPE.to_string(), TYPE_FILE_TRANSFER.into());
        fixed.insert(
            PROP_TARGET_HANDLE_TYPE.to_string(),
            HandleKind::Contact.as_u32().into(),
        );
        Self {
            fixed,
            allowed: [
                PROP_TARGET_HANDLE,
                PROP_TARGET_ID,
                PROP_FT_FILENAME,
                PROP_FT_SIZE,
                PROP_FT_CONTENT_TYPE,
                PROP_FT_DESCRIPTION,
                PROP_FT_DATE,
                PROP_FT_CONTENT_HASH,
                PROP_FT_CONTENT_HASH_TYPE,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Where a request points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    Handle(Handle),
    Id(String),
}

/// A validated host request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRequest {
    pub kind: ChannelKind,
    pub target: RequestTarget,
    /// Present for file transfer requests
    pub metadata: Option<TransferMetadata>,
}

impl ChannelRequest {
    /// Validate a request map.
    pub fn parse(map: &RequestMap) -> Result<Self, SessionError> {
        let channel_type = string_prop(map, PROP_CHANNEL_TYPE)?
            .ok_or_else(|| SessionError::invalid_argument("Channel type is missing"))?;
        let handle_type = u32_prop(map, PROP_TARGET_HANDLE_TYPE)?
            .ok_or_else(|| SessionError::invalid_argument("Target handle type is missing"))?;
        let handle_kind = match HandleKind::from_u32(handle_type) {
            Some(kind @ (HandleKind::Contact | HandleKind::Room)) => kind,
            _ => {
                return Err(SessionError::invalid_argument(format!(
                    "Unknown target handle type {handle_type}"
                )))
            }
        };

        let kind = match (channel_type.as_str(), handle_kind) {
            (TYPE_TEXT, HandleKind::Contact) => ChannelKind::Text,
            (TYPE_TEXT, HandleKind::Room) => ChannelKind::RoomText,
            (TYPE_FILE_TRANSFER, HandleKind::Contact) => ChannelKind::FileTransfer,
            (TYPE_FILE_TRANSFER, _) => {
                return Err(SessionError::invalid_argument(
                    "File transfers are only possible with contacts",
                ))
            }
            (other, _) => {
                return Err(SessionError::invalid_argument(format!(
                    "Unsupported channel type {other}"
                )))
            }
        };

        let target = match (u32_prop(map, PROP_TARGET_HANDLE)?, string_prop(map, PROP_TARGET_ID)?) {
            (Some(raw), _) => RequestTarget::Handle(
                Handle::new(raw).ok_or_else(|| SessionError::invalid_handle("Handle 0 is invalid"))?,
            ),
            (None, Some(id)) if !id.is_empty() => RequestTarget::Id(id),
            _ => return Err(SessionError::invalid_handle("Target handle is unknown")),
        };

        let metadata = match kind {
            ChannelKind::FileTransfer => Some(parse_metadata(map)?),
            _ => None,
        };

        Ok(Self {
            kind,
            target,
            metadata,
        })
    }
}

fn parse_metadata(map: &RequestMap) -> Result<TransferMetadata, SessionError> {
    let filename = string_prop(map, PROP_FT_FILENAME)?
        .filter(|name| !name.is_empty())
        .ok_or_else(|| SessionError::invalid_argument("Filename is required"))?;
    let size = u64_prop(map, PROP_FT_SIZE)?
        .ok_or_else(|| SessionError::invalid_argument("Size is required"))?;
    let content_type = string_prop(map, PROP_FT_CONTENT_TYPE)?
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let date = u64_prop(map, PROP_FT_DATE)?
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));

    Ok(TransferMetadata {
        filename,
        size,
        content_type,
        description: string_prop(map, PROP_FT_DESCRIPTION)?.filter(|d| !d.is_empty()),
        date,
        content_hash: string_prop(map, PROP_FT_CONTENT_HASH)?.filter(|h| !h.is_empty()),
    })
}

fn string_prop(map: &RequestMap, name: &str) -> Result<Option<String>, SessionError> {
    match map.get(name) {
        None => Ok(None),
        Some(RequestValue::Str(value)) => Ok(Some(value.clone())),
        Some(_) => Err(SessionError::invalid_argument(format!("{name} must be a string"))),
    }
}

fn u32_prop(map: &RequestMap, name: &str) -> Result<Option<u32>, SessionError> {
    match map.get(name) {
        None => Ok(None),
        Some(RequestValue::U32(value)) => Ok(Some(*value)),
        Some(RequestValue::U64(value)) => u32::try_from(*value)
            .map(Some)
            .map_err(|_| SessionError::invalid_argument(format!("{name} is out of range"))),
        Some(_) => Err(SessionError::invalid_argument(format!("{name} must be an integer"))),
    }
}

fn u64_prop(map: &RequestMap, name: &str) -> Result<Option<u64>, SessionError> {
    match map.get(name) {
        None => Ok(None),
        Some(RequestValue::U64(value)) => Ok(Some(*value)),
        Some(RequestValue::U32(value)) => Ok(Some(u64::from(*value))),
        Some(_) => Err(SessionError::invalid_argument(format!("{name} must be an integer"))),
    }
}

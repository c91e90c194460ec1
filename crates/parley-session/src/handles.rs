//! Handle allocation for protocol identities.
//!
//! Every identity the session observes (a bare contact address, a room
//! address, or a room participant's full address) is given a handle the
//! first time it is referenced. Handles are sequential per namespace and are
//! never reused or removed for the lifetime of the session.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use jid::Jid;
use tracing::{debug, instrument};

use crate::error::SessionError;
use crate::types::{Handle, HandleKind};

/// Bidirectional identity <-> handle map for one namespace.
#[derive(Debug)]
pub struct HandleRegistry {
    kind: HandleKind,
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    identities: Vec<String>,
    index: HashMap<String, Handle>,
}

impl HandleRegistry {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Return the handle for `identity`, allocating the next one if the
    /// identity has not been seen before.
    #[instrument(skip(self), fields(kind = ?self.kind))]
    pub fn resolve(&self, identity: &str) -> Handle {
        if let Some(handle) = self.lookup(identity) {
            return handle;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have allocated between the read and write lock.
        if let Some(handle) = inner.index.get(identity) {
            return *handle;
        }

        let handle = Handle::from_index(inner.identities.len());
        inner.identities.push(identity.to_string());
        inner.index.insert(identity.to_string(), handle);
        debug!(%handle, "Allocated handle");
        handle
    }

    /// Resolve several identities at once, preserving order.
    pub fn resolve_all<'a>(&self, identities: impl IntoIterator<Item = &'a str>) -> Vec<Handle> {
        identities.into_iter().map(|id| self.resolve(id)).collect()
    }

    /// Look up an existing handle without allocating.
    pub fn lookup(&self, identity: &str) -> Option<Handle> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.index.get(identity).copied()
    }

    /// The identity a handle was allocated for.
    pub fn identity(&self, handle: Handle) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.identities.get(handle.index()).cloned()
    }

    /// Map handles back to identities, failing on the first unknown one.
    pub fn identities(&self, handles: &[Handle]) -> Result<Vec<String>, SessionError> {
        handles
            .iter()
            .map(|handle| {
                self.identity(*handle)
                    .ok_or_else(|| SessionError::invalid_handle(format!("Unknown handle {handle}")))
            })
            .collect()
    }

    pub fn contains_handle(&self, handle: Handle) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        handle.index() < inner.identities.len()
    }

    pub fn contains_identity(&self, identity: &str) -> bool {
        self.lookup(identity).is_some()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The handle namespaces of one session.
#[derive(Debug, Clone)]
pub struct Handles {
    contacts: Arc<HandleRegistry>,
    rooms: Arc<HandleRegistry>,
}

impl Handles {
    pub fn new() -> Self {
        Self {
            contacts: Arc::new(HandleRegistry::new(HandleKind::Contact)),
            rooms: Arc::new(HandleRegistry::new(HandleKind::Room)),
        }
    }

    pub fn contacts(&self) -> &Arc<HandleRegistry> {
        &self.contacts
    }

    pub fn rooms(&self) -> &Arc<HandleRegistry> {
        &self.rooms
    }

    /// The registry for a host-supplied handle kind.
    pub fn registry(&self, kind: HandleKind) -> Result<&Arc<HandleRegistry>, SessionError> {
        match kind {
            HandleKind::Contact => Ok(&self.contacts),
            HandleKind::Room => Ok(&self.rooms),
            HandleKind::None => Err(SessionError::invalid_argument(
                "Unsupported handle type",
            )),
        }
    }

    /// Normalize and resolve identifiers supplied by a host.
    pub fn request(&self, kind: HandleKind, identifiers: &[String]) -> Result<Vec<Handle>, SessionError> {
        let registry = self.registry(kind)?;
        identifiers
            .iter()
            .map(|id| {
                let normalized = match kind {
                    HandleKind::Room => normalize_room(id)?,
                    _ => normalize_contact(id)?,
                };
                Ok(registry.resolve(&normalized))
            })
            .collect()
    }

    /// Identities for host-supplied handles of one kind.
    pub fn inspect(&self, kind: HandleKind, handles: &[Handle]) -> Result<Vec<String>, SessionError> {
        self.registry(kind)?.identities(handles)
    }
}

impl Default for Handles {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_address(address: &str) -> Result<Jid, SessionError> {
    address
        .trim()
        .parse::<Jid>()
        .map_err(|e| SessionError::invalid_handle(format!("Invalid address '{address}': {e}")))
}

/// Reduce a user-supplied contact identifier to its bare address.
pub fn normalize_contact(identifier: &str) -> Result<String, SessionError> {
    Ok(parse_address(identifier)?.to_bare().to_string())
}

/// Reduce a user-supplied room identifier to the bare room address.
pub fn normalize_room(identifier: &str) -> Result<String, SessionError> {
    let jid = parse_address(identifier)?;
    if jid.node().is_none() {
        return Err(SessionError::invalid_handle(format!(
            "Room address '{identifier}' has no room name"
        )));
    }
    Ok(jid.to_bare().to_string())
}

/// Split an address into its bare part and optional resource.
pub fn split_address(address: &str) -> Result<(String, Option<String>), SessionError> {
    let jid = parse_address(address)?;
    let resource = jid.resource().map(|resource| resource.to_string());
    Ok((jid.to_bare().to_string(), resource))
}

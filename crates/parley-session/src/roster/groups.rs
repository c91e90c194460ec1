use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument, warn};

use super::RosterItem;
use crate::engine::{OutboundCommand, ProtocolEngine, RequestId};
use crate::error::{RemoteError, SessionError};
use crate::events::{ContactSubscription, NotificationSink, SessionNotification};
use crate::handles::HandleRegistry;
use crate::types::SessionStatus;

/// Keeps group membership requested by the host consistent with the
/// server's roster.
///
/// Local edits are turned into one roster set per affected contact. Nothing
/// changes locally until the server answers the set (or pushes the item), so
/// the group view always mirrors what the server accepted. Groups are not
/// stored on their own: the catalog is derived from the items after every
/// change and group creation or removal is inferred by comparing catalogs.
pub struct RosterGroupSynchronizer {
    state: Mutex<RosterState>,
    next_request: AtomicU64,
    status: Arc<SessionStatus>,
    contacts: Arc<HandleRegistry>,
    engine: Arc<dyn ProtocolEngine>,
    sink: Arc<dyn NotificationSink>,
}

#[derive(Default)]
struct RosterState {
    items: BTreeMap<String, RosterItem>,
    /// group -> members, derived from `items`
    catalog: BTreeMap<String, BTreeSet<String>>,
    pending: HashMap<RequestId, PendingUpdate>,
    renames: HashMap<u64, PendingRename>,
    next_rename: u64,
}

struct PendingUpdate {
    identity: String,
    change: Change,
    rename: Option<u64>,
}

#[derive(Debug, Clone)]
enum Change {
    Groups(BTreeSet<String>),
    Name(Option<String>),
    Add,
    Remove,
}

struct PendingRename {
    old_name: String,
    new_name: String,
    outstanding: usize,
}

impl RosterGroupSynchronizer {
    pub fn new(
        status: Arc<SessionStatus>,
        contacts: Arc<HandleRegistry>,
        engine: Arc<dyn ProtocolEngine>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            state: Mutex::new(RosterState::default()),
            next_request: AtomicU64::new(1),
            status,
            contacts,
            engine,
            sink,
        }
    }

    // Queries

    pub fn item(&self, identity: &str) -> Option<RosterItem> {
        self.lock().items.get(identity).cloned()
    }

    pub fn items(&self) -> Vec<RosterItem> {
        self.lock().items.values().cloned().collect()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().items.contains_key(identity)
    }

    /// Every group referenced by at least one contact.
    pub fn groups(&self) -> Vec<String> {
        self.lock().catalog.keys().cloned().collect()
    }

    pub fn members(&self, group: &str) -> Vec<String> {
        self.lock()
            .catalog
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn groups_of(&self, identity: &str) -> BTreeSet<String> {
        self.lock()
            .items
            .get(identity)
            .map(|item| item.groups.clone())
            .unwrap_or_default()
    }

    // Group mutators

    /// Replace the groups of one contact.
    #[instrument(skip(self, groups))]
    pub fn set_groups_for_contact(
        &self,
        identity: &str,
        groups: impl IntoIterator<Item = String>,
    ) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let desired: BTreeSet<String> = groups.into_iter().collect();

        let mut state = self.lock();
        let current = projected(&state, identity).map(|item| item.groups);
        if current.as_ref() == Some(&desired) {
            return Ok(());
        }
        let changes = vec![(identity.to_string(), Change::Groups(desired))];
        self.issue(&mut state, changes, None)
    }

    /// Make `members` exactly the members of `group`.
    #[instrument(skip(self, members), fields(count = members.len()))]
    pub fn set_group_members(&self, group: &str, members: &[String]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let wanted: BTreeSet<&str> = members.iter().map(String::as_str).collect();

        let mut state = self.lock();
        let mut changes = Vec::new();
        for identity in &wanted {
            let groups = groups_of(&state, identity);
            if !groups.contains(group) {
                let mut groups = groups;
                groups.insert(group.to_string());
                changes.push((identity.to_string(), Change::Groups(groups)));
            }
        }
        for identity in current_members(&state, group) {
            if !wanted.contains(identity.as_str()) {
                let mut groups = groups_of(&state, &identity);
                groups.remove(group);
                changes.push((identity, Change::Groups(groups)));
            }
        }
        self.issue(&mut state, changes, None)
    }

    #[instrument(skip(self, members), fields(count = members.len()))]
    pub fn add_to_group(&self, group: &str, members: &[String]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;

        let mut state = self.lock();
        let changes = members
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|identity| {
                let mut groups = groups_of(&state, identity);
                groups
                    .insert(group.to_string())
                    .then(|| (identity.clone(), Change::Groups(groups)))
            })
            .collect();
        self.issue(&mut state, changes, None)
    }

    #[instrument(skip(self, members), fields(count = members.len()))]
    pub fn remove_from_group(&self, group: &str, members: &[String]) -> Result<(), SessionError> {
        self.status.ensure_connected()?;

        let mut state = self.lock();
        let changes = members
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|identity| state.items.contains_key(identity.as_str()))
            .filter_map(|identity| {
                let mut groups = groups_of(&state, identity);
                groups
                    .remove(group)
                    .then(|| (identity.clone(), Change::Groups(groups)))
            })
            .collect();
        self.issue(&mut state, changes, None)
    }

    /// Take every member out of `group`.
    #[instrument(skip(self))]
    pub fn remove_group(&self, group: &str) -> Result<(), SessionError> {
        self.status.ensure_connected()?;

        let mut state = self.lock();
        if !state.catalog.contains_key(group) {
            return Err(SessionError::does_not_exist(format!("Group '{group}'")));
        }
        let changes = current_members(&state, group)
            .into_iter()
            .map(|identity| {
                let mut groups = groups_of(&state, &identity);
                groups.remove(group);
                (identity, Change::Groups(groups))
            })
            .collect();
        self.issue(&mut state, changes, None)
    }

    /// Move every member of `old_name` to `new_name`.
    #[instrument(skip(self))]
    pub fn rename_group(&self, old_name: &str, new_name: &str) -> Result<(), SessionError> {
        self.status.ensure_connected()?;

        let mut state = self.lock();
        if !state.catalog.contains_key(old_name) {
            return Err(SessionError::does_not_exist(format!("Group '{old_name}'")));
        }
        if state.catalog.contains_key(new_name) {
            return Err(SessionError::already_exists(format!("Group '{new_name}'")));
        }

        let changes: Vec<_> = current_members(&state, old_name)
            .into_iter()
            .map(|identity| {
                let mut groups = groups_of(&state, &identity);
                groups.remove(old_name);
                groups.insert(new_name.to_string());
                (identity, Change::Groups(groups))
            })
            .collect();

        let batch = state.next_rename;
        state.next_rename += 1;
        state.renames.insert(
            batch,
            PendingRename {
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
                outstanding: changes.len(),
            },
        );
        self.issue(&mut state, changes, Some(batch))
    }

    // Contact list mutators

    /// Set the roster name of a contact.
    pub fn set_alias(&self, identity: &str, name: &str) -> Result<(), SessionError> {
        self.status.ensure_connected()?;
        let name = (!name.is_empty()).then(|| name.to_string());

        let mut state = self.lock();
        if projected(&state, identity).map(|item| item.name) == Some(name.clone()) {
            return Ok(());
        }
        self.issue(&mut state, vec![(identity.to_string(), Change::Name(name))], None)
    }

    /// Add a contact to the roster unless it is already there.
    pub fn ensure_contact(&self, identity: &str) -> Result<(), SessionError> {
        self.status.ensure_connected()?;

        let mut state = self.lock();
        if state.items.contains_key(identity) {
            return Ok(());
        }
        self.issue(&mut state, vec![(identity.to_string(), Change::Add)], None)
    }

    /// Remove a contact from the roster.
    pub fn remove_contact(&self, identity: &str) -> Result<(), SessionError> {
        self.status.ensure_connected()?;

        let mut state = self.lock();
        self.issue(&mut state, vec![(identity.to_string(), Change::Remove)], None)
    }

    // Server input

    /// Replace the mirror with a full roster from the server.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub fn load(&self, items: Vec<RosterItem>) {
        let notifications = {
            let mut state = self.lock();
            let incoming: BTreeMap<String, RosterItem> = items
                .into_iter()
                .filter(|item| !item.subscription.is_remove())
                .map(|item| (item.jid.clone(), item))
                .collect();

            let mut updates: Vec<(String, Option<RosterItem>)> = state
                .items
                .keys()
                .filter(|identity| !incoming.contains_key(*identity))
                .map(|identity| (identity.clone(), None))
                .collect();
            updates.extend(incoming.into_iter().map(|(id, item)| (id, Some(item))));
            self.reconcile(&mut state, updates)
        };
        info!("Roster loaded");
        self.emit(notifications);
    }

    /// Apply a server-initiated roster push.
    #[instrument(skip(self, item), fields(jid = %item.jid, subscription = %item.subscription))]
    pub fn apply_push(&self, item: RosterItem) {
        let notifications = {
            let mut state = self.lock();
            let identity = item.jid.clone();
            let item = (!item.subscription.is_remove()).then_some(item);
            self.reconcile(&mut state, vec![(identity, item)])
        };
        self.emit(notifications);
    }

    /// Apply the server's answer to a roster set we issued.
    #[instrument(skip(self, result), fields(ok = result.is_ok()))]
    pub fn resolve(&self, request_id: RequestId, result: Result<(), RemoteError>) {
        let notifications = {
            let mut state = self.lock();
            let Some(pending) = state.pending.remove(&request_id) else {
                debug!("Result for unknown roster request");
                return;
            };

            let mut notifications = match result {
                Ok(()) => {
                    let current = state.items.get(&pending.identity).cloned();
                    let desired = apply_change(current, &pending.identity, &pending.change);
                    self.reconcile(&mut state, vec![(pending.identity.clone(), desired)])
                }
                Err(error) => {
                    warn!(identity = %pending.identity, %error, "Roster update rejected");
                    vec![SessionNotification::RosterUpdateFailed {
                        handle: self.contacts.resolve(&pending.identity),
                        error,
                    }]
                }
            };

            if let Some(batch) = pending.rename {
                notifications.extend(finish_rename_step(&mut state, batch));
            }
            notifications
        };
        self.emit(notifications);
    }

    /// Drop everything learned from the server.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = RosterState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RosterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send one roster command per change. Every change is attempted even
    /// if an earlier one fails; the first failure is returned.
    fn issue(
        &self,
        state: &mut RosterState,
        changes: Vec<(String, Change)>,
        rename: Option<u64>,
    ) -> Result<(), SessionError> {
        if changes.is_empty() {
            if let Some(batch) = rename {
                state.renames.remove(&batch);
            }
            return Ok(());
        }

        let mut first_error = None;
        for (identity, change) in changes {
            let request_id = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
            let command = match &change {
                Change::Remove => OutboundCommand::RosterRemove {
                    request_id,
                    jid: identity.clone(),
                },
                other => {
                    let current = projected(state, &identity);
                    let item = apply_change(current, &identity, other)
                        .unwrap_or_else(|| RosterItem::new(identity.clone()));
                    OutboundCommand::RosterUpdate { request_id, item }
                }
            };

            debug!(%identity, %request_id, "Issuing roster update");
            match self.engine.send(command) {
                Ok(()) => {
                    state.pending.insert(
                        request_id,
                        PendingUpdate {
                            identity,
                            change,
                            rename,
                        },
                    );
                }
                Err(e) => {
                    warn!(%identity, error = %e, "Failed to issue roster update");
                    if let Some(batch) = rename {
                        if let Some(pending) = state.renames.get_mut(&batch) {
                            pending.outstanding -= 1;
                        }
                    }
                    first_error.get_or_insert(SessionError::Engine(e));
                }
            }
        }

        if let Some(batch) = rename {
            if state
                .renames
                .get(&batch)
                .is_some_and(|pending| pending.outstanding == 0)
            {
                state.renames.remove(&batch);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Apply item updates (`None` removes) and describe what changed.
    fn reconcile(
        &self,
        state: &mut RosterState,
        updates: Vec<(String, Option<RosterItem>)>,
    ) -> Vec<SessionNotification> {
        let mut contact_changes = Vec::new();
        let mut removals = Vec::new();
        let mut aliases = Vec::new();

        for (identity, item) in updates {
            let previous = match item {
                Some(item) => state.items.insert(identity.clone(), item),
                None => state.items.remove(&identity),
            };
            let current = state.items.get(&identity);

            match (previous.as_ref(), current) {
                (Some(_), None) => removals.push(self.contacts.resolve(&identity)),
                (previous, Some(current)) => {
                    let handle = self.contacts.resolve(&identity);
                    let subscription_changed = previous.map_or(true, |p| {
                        p.subscription != current.subscription || p.ask != current.ask
                    });
                    if subscription_changed {
                        contact_changes.push(ContactSubscription {
                            handle,
                            subscribe: current.subscribe_state(),
                            publish: current.publish_state(),
                        });
                    }
                    if previous.map(|p| &p.name) != Some(&current.name) {
                        aliases.push((handle, current.name.clone().unwrap_or_else(|| identity.clone())));
                    }
                }
                (None, None) => {}
            }
        }

        let old_catalog = std::mem::replace(&mut state.catalog, build_catalog(&state.items));
        let mut notifications = Vec::new();

        let created: Vec<String> = state
            .catalog
            .keys()
            .filter(|group| !old_catalog.contains_key(*group))
            .cloned()
            .collect();
        if !created.is_empty() {
            notifications.push(SessionNotification::GroupsCreated(created));
        }

        let empty = BTreeSet::new();
        let all_groups: BTreeSet<&String> = old_catalog.keys().chain(state.catalog.keys()).collect();
        for group in all_groups {
            let before = old_catalog.get(group).unwrap_or(&empty);
            let after = state.catalog.get(group).unwrap_or(&empty);
            let added: Vec<_> = after
                .difference(before)
                .map(|id| self.contacts.resolve(id))
                .collect();
            let removed: Vec<_> = before
                .difference(after)
                .map(|id| self.contacts.resolve(id))
                .collect();
            if !added.is_empty() || !removed.is_empty() {
                notifications.push(SessionNotification::GroupMembersChanged {
                    group: group.clone(),
                    added,
                    removed,
                });
            }
        }

        let removed_groups: Vec<String> = old_catalog
            .keys()
            .filter(|group| !state.catalog.contains_key(*group))
            .cloned()
            .collect();
        if !removed_groups.is_empty() {
            notifications.push(SessionNotification::GroupsRemoved(removed_groups));
        }

        if !contact_changes.is_empty() || !removals.is_empty() {
            notifications.push(SessionNotification::ContactsChanged {
                changes: contact_changes,
                removals,
            });
        }
        if !aliases.is_empty() {
            notifications.push(SessionNotification::AliasesChanged(aliases));
        }
        notifications
    }

    fn emit(&self, notifications: Vec<SessionNotification>) {
        for notification in notifications {
            self.sink.notify(notification);
        }
    }
}

fn groups_of(state: &RosterState, identity: &str) -> BTreeSet<String> {
    projected(state, identity)
        .map(|item| item.groups)
        .unwrap_or_default()
}

/// The confirmed item with every in-flight change for it applied in issue
/// order. New edits build on this so a later roster set carries the earlier
/// ones.
fn projected(state: &RosterState, identity: &str) -> Option<RosterItem> {
    let mut pending: Vec<_> = state
        .pending
        .iter()
        .filter(|(_, update)| update.identity == identity)
        .collect();
    pending.sort_by_key(|(request_id, _)| **request_id);
    pending
        .into_iter()
        .fold(state.items.get(identity).cloned(), |item, (_, update)| {
            apply_change(item, identity, &update.change)
        })
}

fn current_members(state: &RosterState, group: &str) -> Vec<String> {
    state
        .catalog
        .get(group)
        .map(|members| members.iter().cloned().collect())
        .unwrap_or_default()
}

fn build_catalog(items: &BTreeMap<String, RosterItem>) -> BTreeMap<String, BTreeSet<String>> {
    let mut catalog: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (identity, item) in items {
        for group in &item.groups {
            catalog
                .entry(group.clone())
                .or_default()
                .insert(identity.clone());
        }
    }
    catalog
}

fn apply_change(current: Option<RosterItem>, identity: &str, change: &Change) -> Option<RosterItem> {
    let item = current.unwrap_or_else(|| RosterItem::new(identity));
    match change {
        Change::Groups(groups) => Some(RosterItem {
            groups: groups.clone(),
            ..item
        }),
        Change::Name(name) => Some(RosterItem {
            name: name.clone(),
            ..item
        }),
        Change::Add => Some(item),
        Change::Remove => None,
    }
}

fn finish_rename_step(state: &mut RosterState, batch: u64) -> Option<SessionNotification> {
    let pending = state.renames.get_mut(&batch)?;
    pending.outstanding = pending.outstanding.saturating_sub(1);
    if pending.outstanding > 0 {
        return None;
    }

    let pending = state.renames.remove(&batch)?;
    let renamed = !state.catalog.contains_key(&pending.old_name)
        && state.catalog.contains_key(&pending.new_name);
    renamed.then(|| SessionNotification::GroupRenamed {
        old_name: pending.old_name,
        new_name: pending.new_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, StanzaErrorCondition};
    use crate::types::{ConnectionStatus, HandleKind};

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<OutboundCommand>>,
        notifications: Mutex<Vec<SessionNotification>>,
        refuse: std::sync::atomic::AtomicBool,
    }

    impl ProtocolEngine for Recorder {
        fn send(&self, command: OutboundCommand) -> Result<(), EngineError> {
            if self.refuse.load(Ordering::Relaxed) {
                return Err(EngineError::Closed);
            }
            self.commands.lock().unwrap().push(command);
            Ok(())
        }
    }

    impl NotificationSink for Recorder {
        fn notify(&self, notification: SessionNotification) {
            self.notifications.lock().unwrap().push(notification);
        }
    }

    impl Recorder {
        fn take_commands(&self) -> Vec<OutboundCommand> {
            std::mem::take(&mut *self.commands.lock().unwrap())
        }

        fn take_notifications(&self) -> Vec<SessionNotification> {
            std::mem::take(&mut *self.notifications.lock().unwrap())
        }
    }

    fn synchronizer() -> (RosterGroupSynchronizer, Arc<Recorder>, Arc<HandleRegistry>) {
        let status = Arc::new(SessionStatus::new());
        status.set_connection(ConnectionStatus::Connected);
        let contacts = Arc::new(HandleRegistry::new(HandleKind::Contact));
        let recorder = Arc::new(Recorder::default());
        let sync = RosterGroupSynchronizer::new(
            status,
            contacts.clone(),
            recorder.clone(),
            recorder.clone(),
        );
        (sync, recorder, contacts)
    }

    fn request_ids(commands: &[OutboundCommand]) -> Vec<RequestId> {
        commands
            .iter()
            .filter_map(|c| match c {
                OutboundCommand::RosterUpdate { request_id, .. }
                | OutboundCommand::RosterRemove { request_id, .. } => Some(*request_id),
                _ => None,
            })
            .collect()
    }

    fn accept_all(sync: &RosterGroupSynchronizer, recorder: &Recorder) {
        for id in request_ids(&recorder.take_commands()) {
            sync.resolve(id, Ok(()));
        }
    }

    fn friends_roster() -> Vec<RosterItem> {
        vec![
            RosterItem::new("a@example.com").add_group("Friends"),
            RosterItem::new("b@example.com").add_group("Friends").add_group("Work"),
        ]
    }

    #[test]
    fn test_load_creates_groups() {
        let (sync, recorder, _) = synchronizer();
        sync.load(friends_roster());

        assert_eq!(sync.groups(), vec!["Friends".to_string(), "Work".to_string()]);
        let notifications = recorder.take_notifications();
        assert_eq!(
            notifications[0],
            SessionNotification::GroupsCreated(vec!["Friends".into(), "Work".into()])
        );
    }

    #[test]
    fn test_changes_wait_for_confirmation() {
        let (sync, recorder, _) = synchronizer();
        sync.load(friends_roster());
        recorder.take_notifications();

        sync.set_groups_for_contact("a@example.com", vec!["Family".to_string()])
            .unwrap();
        assert_eq!(
            sync.groups_of("a@example.com"),
            BTreeSet::from(["Friends".to_string()])
        );
        assert!(recorder.take_notifications().is_empty());

        accept_all(&sync, &recorder);
        assert_eq!(
            sync.groups_of("a@example.com"),
            BTreeSet::from(["Family".to_string()])
        );
        let notifications = recorder.take_notifications();
        assert_eq!(
            notifications[0],
            SessionNotification::GroupsCreated(vec!["Family".into()])
        );
        assert!(!notifications
            .iter()
            .any(|n| matches!(n, SessionNotification::GroupsRemoved(_))));
    }

    #[test]
    fn test_last_member_leaving_removes_group_once() {
        let (sync, recorder, _) = synchronizer();
        sync.load(vec![RosterItem::new("a@example.com").add_group("Friends")]);
        recorder.take_notifications();

        sync.set_groups_for_contact("a@example.com", Vec::new()).unwrap();
        accept_all(&sync, &recorder);

        let removed: Vec<_> = recorder
            .take_notifications()
            .into_iter()
            .filter(|n| matches!(n, SessionNotification::GroupsRemoved(_)))
            .collect();
        assert_eq!(
            removed,
            vec![SessionNotification::GroupsRemoved(vec!["Friends".into()])]
        );
    }

    #[test]
    fn test_one_update_per_contact() {
        let (sync, recorder, _) = synchronizer();
        sync.load(friends_roster());

        sync.set_group_members(
            "Work",
            &["a@example.com".to_string(), "c@example.com".to_string()],
        )
        .unwrap();

        let commands = recorder.take_commands();
        assert_eq!(commands.len(), 3);
        let targets: BTreeSet<String> = commands
            .iter()
            .filter_map(|c| match c {
                OutboundCommand::RosterUpdate { item, .. } => Some(item.jid.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            targets,
            BTreeSet::from([
                "a@example.com".to_string(),
                "b@example.com".to_string(),
                "c@example.com".to_string()
            ])
        );
    }

    #[test]
    fn test_rename_missing_group() {
        let (sync, recorder, _) = synchronizer();
        sync.load(friends_roster());
        recorder.take_notifications();

        assert!(matches!(
            sync.rename_group("Enemies", "Rivals"),
            Err(SessionError::DoesNotExist(_))
        ));
        assert!(matches!(
            sync.rename_group("Friends", "Work"),
            Err(SessionError::AlreadyExists(_))
        ));
        assert!(recorder.take_commands().is_empty());
        assert!(recorder.take_notifications().is_empty());
    }

    #[test]
    fn test_rename_emits_once_batch_completes() {
        let (sync, recorder, _) = synchronizer();
        sync.load(friends_roster());
        recorder.take_notifications();

        sync.rename_group("Friends", "Pals").unwrap();
        let ids = request_ids(&recorder.take_commands());
        assert_eq!(ids.len(), 2);

        sync.resolve(ids[0], Ok(()));
        assert!(!recorder
            .take_notifications()
            .iter()
            .any(|n| matches!(n, SessionNotification::GroupRenamed { .. })));

        sync.resolve(ids[1], Ok(()));
        let notifications = recorder.take_notifications();
        assert!(notifications.contains(&SessionNotification::GroupsRemoved(vec!["Friends".into()])));
        assert_eq!(
            notifications.last(),
            Some(&SessionNotification::GroupRenamed {
                old_name: "Friends".into(),
                new_name: "Pals".into()
            })
        );
    }

    #[test]
    fn test_rejected_update_leaves_state() {
        let (sync, recorder, contacts) = synchronizer();
        sync.load(friends_roster());
        recorder.take_notifications();

        sync.remove_group("Friends").unwrap();
        let ids = request_ids(&recorder.take_commands());
        let error = RemoteError::new(StanzaErrorCondition::NotAllowed);
        sync.resolve(ids[0], Err(error.clone()));
        sync.resolve(ids[1], Ok(()));

        // a@ was rejected and keeps Friends; b@ moved out
        assert_eq!(sync.members("Friends"), vec!["a@example.com".to_string()]);
        let notifications = recorder.take_notifications();
        assert_eq!(
            notifications[0],
            SessionNotification::RosterUpdateFailed {
                handle: contacts.resolve("a@example.com"),
                error
            }
        );
        assert!(!notifications
            .iter()
            .any(|n| matches!(n, SessionNotification::GroupsRemoved(_))));
    }

    #[test]
    fn test_disconnected_refuses() {
        let status = Arc::new(SessionStatus::new());
        let recorder = Arc::new(Recorder::default());
        let sync = RosterGroupSynchronizer::new(
            status,
            Arc::new(HandleRegistry::new(HandleKind::Contact)),
            recorder.clone(),
            recorder.clone(),
        );
        assert!(matches!(
            sync.add_to_group("Friends", &["a@example.com".to_string()]),
            Err(SessionError::Disconnected)
        ));
        assert!(recorder.take_commands().is_empty());
    }

    #[test]
    fn test_push_reconciles_without_pending() {
        let (sync, recorder, contacts) = synchronizer();
        sync.load(friends_roster());
        recorder.take_notifications();

        sync.apply_push(RosterItem::new("a@example.com").add_group("Work"));
        let notifications = recorder.take_notifications();
        assert!(notifications.contains(&SessionNotification::GroupMembersChanged {
            group: "Work".into(),
            added: vec![contacts.resolve("a@example.com")],
            removed: vec![],
        }));
    }

    #[test]
    fn test_push_remove_reports_removal() {
        let (sync, recorder, contacts) = synchronizer();
        sync.load(friends_roster());
        recorder.take_notifications();

        sync.apply_push(
            RosterItem::new("b@example.com").set_subscription(crate::roster::Subscription::Remove),
        );
        assert!(!sync.contains("b@example.com"));
        let notifications = recorder.take_notifications();
        assert!(notifications.contains(&SessionNotification::GroupsRemoved(vec!["Work".into()])));
        assert!(notifications.contains(&SessionNotification::ContactsChanged {
            changes: vec![],
            removals: vec![contacts.resolve("b@example.com")],
        }));
    }

    #[test]
    fn test_engine_failure_does_not_block_others() {
        let (sync, recorder, _) = synchronizer();
        sync.load(friends_roster());
        recorder.refuse.store(true, Ordering::Relaxed);

        let result = sync.remove_group("Friends");
        assert!(matches!(result, Err(SessionError::Engine(EngineError::Closed))));
        assert_eq!(sync.members("Friends").len(), 2);
    }

    #[test]
    fn test_edits_in_flight_build_on_each_other() {
        let (sync, recorder, _) = synchronizer();
        sync.load(vec![RosterItem::new("b@example.com")]);
        recorder.take_notifications();

        sync.add_to_group("G1", &["b@example.com".to_string()]).unwrap();
        sync.add_to_group("G2", &["b@example.com".to_string()]).unwrap();
        sync.set_alias("b@example.com", "Bob").unwrap();

        let commands = recorder.take_commands();
        let sent: Vec<RosterItem> = commands
            .iter()
            .filter_map(|c| match c {
                OutboundCommand::RosterUpdate { item, .. } => Some(item.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].groups, BTreeSet::from(["G1".to_string()]));
        let both = BTreeSet::from(["G1".to_string(), "G2".to_string()]);
        assert_eq!(sent[1].groups, both);
        assert_eq!(sent[2].groups, both);
        assert_eq!(sent[2].name.as_deref(), Some("Bob"));

        for id in request_ids(&commands) {
            sync.resolve(id, Ok(()));
        }
        assert_eq!(sync.groups_of("b@example.com"), both);
        assert_eq!(sync.item("b@example.com").unwrap().name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_repeated_edit_in_flight_is_not_resent() {
        let (sync, recorder, _) = synchronizer();
        sync.load(vec![RosterItem::new("b@example.com")]);

        sync.add_to_group("G1", &["b@example.com".to_string()]).unwrap();
        sync.add_to_group("G1", &["b@example.com".to_string()]).unwrap();
        assert_eq!(recorder.take_commands().len(), 1);
    }
}

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, instrument};

use super::{AggregatedPresence, ResourcePresence, StatusRanking};
use crate::events::{NotificationSink, SessionNotification};
use crate::handles::HandleRegistry;

/// Per-resource presence table with on-demand aggregation.
///
/// Resources are kept in the order they first appeared so that equally
/// ranked resources resolve to the earliest one.
pub struct PresenceAggregator {
    table: RwLock<HashMap<String, Vec<(String, ResourcePresence)>>>,
    ranking: StatusRanking,
    contacts: Arc<HandleRegistry>,
    sink: Arc<dyn NotificationSink>,
}

impl PresenceAggregator {
    pub fn new(
        ranking: StatusRanking,
        contacts: Arc<HandleRegistry>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            ranking,
            contacts,
            sink,
        }
    }

    /// Replace the presence of one resource and report the new aggregate.
    #[instrument(skip(self, presence), fields(show = %presence.show, error = presence.error))]
    pub fn update(&self, identity: &str, resource: &str, presence: ResourcePresence) {
        {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            let entries = table.entry(identity.to_string()).or_default();
            match entries.iter_mut().find(|(r, _)| r == resource) {
                Some((_, existing)) => *existing = presence,
                None => entries.push((resource.to_string(), presence)),
            }
        }
        self.publish(identity);
    }

    /// Drop a resource that went unavailable. Nothing is reported for a
    /// resource that was never recorded.
    #[instrument(skip(self))]
    pub fn remove(&self, identity: &str, resource: &str) {
        {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            let Some(entries) = table.get_mut(identity) else {
                return;
            };
            let before = entries.len();
            entries.retain(|(r, _)| r != resource);
            if entries.len() == before {
                return;
            }
            if entries.is_empty() {
                table.remove(identity);
            }
        }
        self.publish(identity);
    }

    /// Representative presence of an identity; offline when nothing usable
    /// is known.
    pub fn aggregate(&self, identity: &str) -> AggregatedPresence {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = table.get(identity) else {
            return AggregatedPresence::offline();
        };

        let mut best: Option<&ResourcePresence> = None;
        for (_, presence) in entries.iter().filter(|(_, p)| !p.error) {
            match best {
                Some(current) if self.ranking.rank(presence.show) >= self.ranking.rank(current.show) => {}
                _ => best = Some(presence),
            }
        }

        best.map(AggregatedPresence::from_resource)
            .unwrap_or_else(AggregatedPresence::offline)
    }

    /// Present resources of an identity in arrival order.
    pub fn resources(&self, identity: &str) -> Vec<(String, ResourcePresence)> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.get(identity).cloned().unwrap_or_default()
    }

    pub fn is_present(&self, identity: &str, resource: &str) -> bool {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table
            .get(identity)
            .is_some_and(|entries| entries.iter().any(|(r, p)| r == resource && !p.error))
    }

    /// Forget everything, reporting every known identity as offline.
    pub fn clear(&self) {
        let identities: Vec<String> = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            table.drain().map(|(identity, _)| identity).collect()
        };
        for identity in identities {
            self.publish(&identity);
        }
    }

    fn publish(&self, identity: &str) {
        let handle = self.contacts.resolve(identity);
        let presence = self.aggregate(identity);
        debug!(%handle, status = %presence.status, "Presence changed");
        self.sink
            .notify(SessionNotification::PresenceChanged { handle, presence });
    }
}

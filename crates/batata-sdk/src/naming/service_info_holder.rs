//! Service info holder for caching service instance lists locally

use batata_sdk_api::naming::{Instance, Service, ServiceKey};
use dashmap::DashMap;

/// Whether a snapshot reflects the server or local optimistic changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotState {
    /// Changed locally by a registration the server has not yet echoed.
    /// `confirmed_version` is the last server version accepted, if any.
    Pending { confirmed_version: Option<u64> },
    /// Exactly what the server sent at `server_version`.
    Confirmed { server_version: u64 },
}

impl SnapshotState {
    pub fn confirmed_version(&self) -> Option<u64> {
        match self {
            SnapshotState::Pending { confirmed_version } => *confirmed_version,
            SnapshotState::Confirmed { server_version } => Some(*server_version),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, SnapshotState::Confirmed { .. })
    }
}

/// Locally cached instance list of one service.
#[derive(Clone, Debug)]
pub struct ServiceSnapshot {
    pub key: ServiceKey,
    pub instances: Vec<Instance>,
    /// Local revision, bumped on every accepted update
    pub revision: u64,
    pub state: SnapshotState,
}

impl ServiceSnapshot {
    fn empty(key: ServiceKey) -> Self {
        Self {
            key,
            instances: Vec::new(),
            revision: 0,
            state: SnapshotState::Pending {
                confirmed_version: None,
            },
        }
    }
}

/// Result of offering a server snapshot to the holder.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Stored; `changed` tells whether the instance list differs from before.
    Accepted {
        snapshot: ServiceSnapshot,
        changed: bool,
    },
    /// Server version not newer than the last confirmed one.
    Stale { cached_version: u64 },
    /// Empty list rejected in favour of the non-empty cached one.
    EmptyProtected,
}

/// Local cache of service instance information.
///
/// Updated when the server pushes `NotifySubscriberRequest`, when a
/// `SubscribeServiceResponse` arrives and optimistically after local
/// registrations.
pub struct ServiceInfoHolder {
    snapshots: DashMap<ServiceKey, ServiceSnapshot>,
    push_empty_protection: bool,
}

impl ServiceInfoHolder {
    pub fn new(push_empty_protection: bool) -> Self {
        Self {
            snapshots: DashMap::new(),
            push_empty_protection,
        }
    }

    pub fn get(&self, key: &ServiceKey) -> Option<ServiceSnapshot> {
        self.snapshots.get(key).map(|e| e.clone())
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.snapshots.contains_key(key)
    }

    pub fn keys(&self) -> Vec<ServiceKey> {
        self.snapshots.iter().map(|e| e.key().clone()).collect()
    }

    /// Seed a confirmed snapshot, e.g. from the on-disk cache.
    pub fn load(&self, key: ServiceKey, service: Service) {
        self.snapshots.entry(key.clone()).or_insert(ServiceSnapshot {
            key,
            instances: service.hosts,
            revision: 1,
            state: SnapshotState::Confirmed {
                server_version: service.version,
            },
        });
    }

    /// Revision and confirmed version of a snapshot; changes whenever an
    /// update is applied to it.
    pub fn marker(&self, key: &ServiceKey) -> Option<(u64, Option<u64>)> {
        self.snapshots
            .get(key)
            .map(|s| (s.revision, s.state.confirmed_version()))
    }

    /// Offer a snapshot received from the server.
    ///
    /// Unless `force` is set, a version not newer than the last confirmed
    /// one is rejected. Subscription responses are normally forced: they
    /// answer a request of ours and may come from a restarted server.
    pub fn apply_server(&self, key: &ServiceKey, service: Service, force: bool) -> ApplyOutcome {
        let mut snapshot = self
            .snapshots
            .entry(key.clone())
            .or_insert_with(|| ServiceSnapshot::empty(key.clone()));

        if !force
            && let Some(cached_version) = snapshot.state.confirmed_version()
            && service.version <= cached_version
        {
            return ApplyOutcome::Stale { cached_version };
        }

        if self.push_empty_protection && service.hosts.is_empty() && !snapshot.instances.is_empty()
        {
            return ApplyOutcome::EmptyProtected;
        }

        let changed = !same_instances(&snapshot.instances, &service.hosts);
        snapshot.instances = service.hosts;
        snapshot.state = SnapshotState::Confirmed {
            server_version: service.version,
        };
        if changed {
            snapshot.revision += 1;
        }

        ApplyOutcome::Accepted {
            snapshot: snapshot.clone(),
            changed,
        }
    }

    /// Apply a local optimistic change and mark the snapshot pending.
    pub fn apply_local(
        &self,
        key: &ServiceKey,
        change: impl FnOnce(&mut Vec<Instance>),
    ) -> ServiceSnapshot {
        let mut snapshot = self
            .snapshots
            .entry(key.clone())
            .or_insert_with(|| ServiceSnapshot::empty(key.clone()));

        let confirmed_version = snapshot.state.confirmed_version();
        change(&mut snapshot.instances);
        snapshot.revision += 1;
        snapshot.state = SnapshotState::Pending { confirmed_version };
        snapshot.clone()
    }
}

/// Insert or replace by `(ip, port)`.
pub fn upsert_instance(instances: &mut Vec<Instance>, instance: Instance) {
    match instances
        .iter_mut()
        .find(|i| i.ip == instance.ip && i.port == instance.port)
    {
        Some(existing) => *existing = instance,
        None => instances.push(instance),
    }
}

pub fn remove_instance(instances: &mut Vec<Instance>, instance: &Instance) {
    instances.retain(|i| !(i.ip == instance.ip && i.port == instance.port));
}

fn same_instances(a: &[Instance], b: &[Instance]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<&Instance> = a.iter().collect();
    let mut b: Vec<&Instance> = b.iter().collect();
    a.sort_by_key(|i| i.key());
    b.sort_by_key(|i| i.key());
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ServiceKey {
        ServiceKey::new("test-service", "DEFAULT_GROUP", "")
    }

    fn service(version: u64, hosts: Vec<Instance>) -> Service {
        let mut service = Service::new("test-service", "DEFAULT_GROUP");
        service.version = version;
        service.hosts = hosts;
        service
    }

    #[test]
    fn test_stale_server_versions_are_discarded() {
        let holder = ServiceInfoHolder::new(true);
        let hosts = vec![Instance::new("127.0.0.1", 8080)];

        assert!(matches!(
            holder.apply_server(&key(), service(2, hosts.clone()), false),
            ApplyOutcome::Accepted { changed: true, .. }
        ));
        assert!(matches!(
            holder.apply_server(&key(), service(2, vec![]), false),
            ApplyOutcome::Stale { cached_version: 2 }
        ));
        assert!(matches!(
            holder.apply_server(&key(), service(1, hosts), false),
            ApplyOutcome::Stale { .. }
        ));
        assert_eq!(holder.get(&key()).unwrap().revision, 1);
    }

    #[test]
    fn test_first_server_snapshot_accepted_at_any_version() {
        let holder = ServiceInfoHolder::new(true);
        let outcome = holder.apply_server(&key(), service(0, vec![]), false);
        assert!(matches!(outcome, ApplyOutcome::Accepted { changed: false, .. }));
        assert!(holder.get(&key()).unwrap().state.is_confirmed());
    }

    #[test]
    fn test_empty_push_protection() {
        let holder = ServiceInfoHolder::new(true);
        holder.apply_server(&key(), service(1, vec![Instance::new("10.0.0.1", 80)]), false);
        assert!(matches!(
            holder.apply_server(&key(), service(2, vec![]), false),
            ApplyOutcome::EmptyProtected
        ));
        assert_eq!(holder.get(&key()).unwrap().instances.len(), 1);

        let unprotected = ServiceInfoHolder::new(false);
        unprotected.apply_server(&key(), service(1, vec![Instance::new("10.0.0.1", 80)]), false);
        unprotected.apply_server(&key(), service(2, vec![]), false);
        assert!(unprotected.get(&key()).unwrap().instances.is_empty());
    }

    #[test]
    fn test_local_changes_are_pending_and_bump_revision() {
        let holder = ServiceInfoHolder::new(true);
        holder.apply_server(&key(), service(3, vec![]), false);

        let snapshot = holder.apply_local(&key(), |list| {
            upsert_instance(list, Instance::new("10.0.0.1", 80))
        });
        assert_eq!(snapshot.revision, 1);
        assert_eq!(
            snapshot.state,
            SnapshotState::Pending {
                confirmed_version: Some(3)
            }
        );

        let snapshot = holder.apply_local(&key(), |list| {
            upsert_instance(list, Instance::new("10.0.0.1", 80).with_weight(5.0))
        });
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.instances.len(), 1);
        assert_eq!(snapshot.instances[0].weight, 5.0);

        // The server echo resolves the pending state without a new revision.
        let echoed = snapshot.instances.clone();
        match holder.apply_server(&key(), service(4, echoed), false) {
            ApplyOutcome::Accepted { snapshot, changed } => {
                assert!(!changed);
                assert_eq!(snapshot.revision, 2);
                assert_eq!(
                    snapshot.state,
                    SnapshotState::Confirmed { server_version: 4 }
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_forced_apply_ignores_version() {
        let holder = ServiceInfoHolder::new(true);
        holder.apply_server(&key(), service(9, vec![Instance::new("10.0.0.1", 80)]), false);
        let outcome = holder.apply_server(&key(), service(1, vec![Instance::new("10.0.0.2", 80)]), true);
        assert!(matches!(outcome, ApplyOutcome::Accepted { changed: true, .. }));
    }

    #[test]
    fn test_marker_tracks_version_without_instance_change() {
        let holder = ServiceInfoHolder::new(true);
        assert_eq!(holder.marker(&key()), None);

        let hosts = vec![Instance::new("10.0.0.1", 80)];
        holder.apply_server(&key(), service(2, hosts.clone()), false);
        let first = holder.marker(&key());
        assert_eq!(first, Some((1, Some(2))));

        // Same instances at a newer version still move the marker
        holder.apply_server(&key(), service(3, hosts), false);
        assert_ne!(holder.marker(&key()), first);
    }

    #[test]
    fn test_remove_instance() {
        let mut list = vec![Instance::new("10.0.0.1", 80), Instance::new("10.0.0.2", 80)];
        remove_instance(&mut list, &Instance::new("10.0.0.1", 80));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].ip, "10.0.0.2");
    }
}

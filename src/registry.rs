//! Node Registry: the authoritative local mirror of master-reported state.
//!
//! The registry holds every known [`SlaveNode`] in the order the master
//! first reported it, together with the [`ClusterConfig`]. It only changes
//! through the `apply_*` operations, which the controller calls strictly in
//! delivery order, and every change is published to subscribers right
//! after it is applied.
//!
//! # Invariants
//!
//! * node ids are unique
//! * [`connected_nodes`](NodeRegistry::connected_nodes) and
//!   [`idle_nodes`](NodeRegistry::idle_nodes) partition the node set, and
//!   are computed from the current nodes on every read
//! * nodes are only ever dropped by an explicit removal or by omission
//!   from a snapshot; a channel that ends only marks the registry stale

use tokio::sync::mpsc;

use crate::{
    error::{Error, Result},
    events::{Change, Listeners},
    node::{ClusterConfig, ConnectionState, NodeId, NodeUpdate, SlaveNode},
};

#[derive(Debug, Default)]
pub struct NodeRegistry {
    config: ClusterConfig,
    nodes: Vec<SlaveNode>,
    stale: bool,
    listeners: Listeners,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the configuration and the entire node collection.
    ///
    /// Nodes missing from the snapshot are dropped. Nodes already known
    /// keep what is set-once about them, and a duplicate id within the
    /// snapshot overwrites the earlier entry in place.
    pub fn apply_full_state(&mut self, config: ClusterConfig, nodes: Vec<SlaveNode>) {
        let mut previous = std::mem::take(&mut self.nodes);
        let mut replaced: Vec<SlaveNode> = Vec::with_capacity(nodes.len());

        for report in nodes {
            if let Some(existing) = replaced.iter_mut().find(|node| node.id == report.id) {
                warn!("snapshot lists slave {} more than once", report.id);
                existing.overwrite(report);
                continue;
            }

            let node = match previous.iter().position(|node| node.id == report.id) {
                Some(index) => {
                    let mut node = previous.swap_remove(index);
                    node.overwrite(report);
                    node
                }
                None => report,
            };
            replaced.push(node);
        }

        self.config = config;
        self.nodes = replaced;
        self.stale = false;

        info!(
            "snapshot applied: {} slaves, voting {}",
            self.nodes.len(),
            if config.voting_enabled { "enabled" } else { "disabled" }
        );
        self.publish(&Change::Snapshot);
    }

    /// Inserts `node`, or overwrites it in place when the id is known.
    pub fn apply_node_added(&mut self, node: SlaveNode) {
        let id = node.id.clone();
        match self.find_mut(&id) {
            Some(existing) => {
                debug!("slave {id} added again, overwriting");
                existing.overwrite(node);
            }
            None => self.nodes.push(node),
        }

        self.publish(&Change::NodeAdded(id));
    }

    /// Removes the node with `id`. Removing an unknown id is a no-op.
    ///
    /// Returns whether a node was removed.
    pub fn apply_node_removed(&mut self, id: &NodeId) -> bool {
        let Some(index) = self.nodes.iter().position(|node| &node.id == id) else {
            debug!("slave {id} already removed");
            return false;
        };

        self.nodes.remove(index);
        self.publish(&Change::NodeRemoved(id.clone()));
        true
    }

    /// Merges the fields present in `update` into the known node.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` when the registry does not know the node, in
    /// which case nothing changes.
    pub fn apply_node_updated(&mut self, update: NodeUpdate) -> Result<()> {
        let id = update.id.clone();
        let node = self.find_mut(&id).ok_or_else(|| unknown(&id))?;
        node.merge(update);

        self.publish(&Change::NodeUpdated(id));
        Ok(())
    }

    /// Records the outcome of a login attempt.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` when the registry does not know the node.
    pub fn apply_login_result(&mut self, id: &NodeId, passed: bool) -> Result<()> {
        let node = self.find_mut(id).ok_or_else(|| unknown(id))?;
        node.connection_state = if passed {
            ConnectionState::Connected
        } else {
            ConnectionState::LoginFailed
        };

        self.publish(&Change::LoginResult {
            id: id.clone(),
            passed,
        });
        Ok(())
    }

    /// Marks a node as connecting after credentials were submitted for it.
    /// The next authoritative event for the node overwrites this.
    pub(crate) fn mark_connecting(&mut self, id: &NodeId) -> Result<()> {
        let node = self.find_mut(id).ok_or_else(|| unknown(id))?;
        node.connection_state = ConnectionState::Connecting;

        self.publish(&Change::Connecting(id.clone()));
        Ok(())
    }

    /// Freezes the mirrored state as being of unknown freshness.
    pub(crate) fn mark_stale(&mut self) {
        if !self.stale {
            self.stale = true;
            self.publish(&Change::Stale);
        }
    }

    pub(crate) fn publish(&mut self, change: &Change) {
        trace!("publishing: {change}");
        self.listeners.publish(change);
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Change> {
        self.listeners.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> ClusterConfig {
        self.config
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&SlaveNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }

    /// All nodes, in the order the master first reported them.
    #[must_use]
    pub fn nodes(&self) -> &[SlaveNode] {
        &self.nodes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes whose login is established.
    pub fn connected_nodes(&self) -> impl Iterator<Item = &SlaveNode> {
        self.nodes.iter().filter(|node| node.is_connected())
    }

    /// Every node that is not connected, including pending and failed
    /// logins.
    pub fn idle_nodes(&self) -> impl Iterator<Item = &SlaveNode> {
        self.nodes.iter().filter(|node| !node.is_connected())
    }

    /// Whether the channel ended since the last snapshot.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn find_mut(&mut self, id: &NodeId) -> Option<&mut SlaveNode> {
        self.nodes.iter_mut().find(|node| &node.id == id)
    }
}

fn unknown(id: &NodeId) -> Error {
    Error::unknown_node(format!("slave {id} is not known"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{error::ErrorKind, node::Timestamp};

    fn node(id: &str, connected: bool) -> SlaveNode {
        let mut node = SlaveNode::new(NodeId::from(id));
        if connected {
            node.connection_state = ConnectionState::Connected;
        }
        node
    }

    fn ids<'a>(nodes: impl Iterator<Item = &'a SlaveNode>) -> Vec<&'a str> {
        nodes.map(|node| node.id.as_str()).collect()
    }

    fn assert_unique(registry: &NodeRegistry) {
        let unique: HashSet<_> = registry.nodes().iter().map(|node| &node.id).collect();
        assert_eq!(unique.len(), registry.len());
    }

    fn assert_partitioned(registry: &NodeRegistry) {
        let connected: HashSet<_> = registry.connected_nodes().map(|node| &node.id).collect();
        let idle: HashSet<_> = registry.idle_nodes().map(|node| &node.id).collect();
        let all: HashSet<_> = registry.nodes().iter().map(|node| &node.id).collect();

        assert!(connected.is_disjoint(&idle));
        assert_eq!(&connected | &idle, all);
    }

    #[test]
    fn full_state_replaces_everything() {
        let mut registry = NodeRegistry::new();
        registry.apply_node_added(node("old", true));

        let config = ClusterConfig {
            voting_enabled: true,
            votes_required_for_skip: 2,
        };
        registry.apply_full_state(config, vec![node("n1", true)]);

        assert_eq!(registry.config(), config);
        assert_eq!(ids(registry.nodes().iter()), ["n1"]);
        assert_eq!(ids(registry.connected_nodes()), ["n1"]);
        assert_eq!(registry.idle_nodes().count(), 0);
    }

    #[test]
    fn full_state_collapses_duplicate_ids() {
        let mut registry = NodeRegistry::new();
        let mut later = node("n1", true);
        later.display_name = Some("Kitchen".to_owned());

        registry.apply_full_state(
            ClusterConfig::default(),
            vec![node("n1", false), node("n2", false), later],
        );

        assert_eq!(ids(registry.nodes().iter()), ["n1", "n2"]);
        let n1 = registry.node(&NodeId::from("n1")).unwrap();
        assert_eq!(n1.display_name.as_deref(), Some("Kitchen"));
        assert!(n1.is_connected());
    }

    #[test]
    fn full_state_keeps_first_connected_at_and_clears_stale() {
        let first: Timestamp = "2017-03-04T12:00:00".parse().unwrap();
        let later: Timestamp = "2017-03-05T12:00:00".parse().unwrap();

        let mut registry = NodeRegistry::new();
        let mut n1 = node("n1", true);
        n1.first_connected_at = Some(first);
        registry.apply_node_added(n1);
        registry.mark_stale();
        assert!(registry.is_stale());

        let mut report = node("n1", true);
        report.first_connected_at = Some(later);
        registry.apply_full_state(ClusterConfig::default(), vec![report]);

        assert!(!registry.is_stale());
        assert_eq!(
            registry.node(&NodeId::from("n1")).unwrap().first_connected_at,
            Some(first)
        );
    }

    #[test]
    fn node_added_is_idempotent() {
        let mut once = NodeRegistry::new();
        once.apply_node_added(node("n1", true));

        let mut twice = NodeRegistry::new();
        twice.apply_node_added(node("n1", true));
        twice.apply_node_added(node("n1", true));

        assert_eq!(once.nodes(), twice.nodes());
    }

    #[test]
    fn removing_twice_is_a_no_op() {
        let mut registry = NodeRegistry::new();
        registry.apply_node_added(node("n1", true));

        assert!(registry.apply_node_removed(&NodeId::from("n1")));
        assert!(registry.is_empty());

        assert!(!registry.apply_node_removed(&NodeId::from("n1")));
        assert!(registry.is_empty());
    }

    #[test]
    fn update_for_unknown_node_changes_nothing() {
        let mut registry = NodeRegistry::new();
        registry.apply_node_added(node("n1", true));
        let before = registry.nodes().to_vec();

        let err = registry
            .apply_node_updated(NodeUpdate {
                id: NodeId::from("ghost"),
                is_paused: Some(false),
                ..NodeUpdate::default()
            })
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::UnknownNode);
        assert_eq!(registry.nodes(), before);
    }

    #[test]
    fn login_result_transitions_connection_state() {
        let mut registry = NodeRegistry::new();
        registry.apply_node_added(node("n2", false));
        let id = NodeId::from("n2");

        registry.mark_connecting(&id).unwrap();
        assert_eq!(registry.node(&id).unwrap().connection_state, ConnectionState::Connecting);
        assert_partitioned(&registry);

        registry.apply_login_result(&id, false).unwrap();
        assert_eq!(registry.node(&id).unwrap().connection_state, ConnectionState::LoginFailed);

        registry.apply_login_result(&id, true).unwrap();
        assert_eq!(ids(registry.connected_nodes()), ["n2"]);

        let err = registry
            .apply_login_result(&NodeId::from("ghost"), true)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownNode);
    }

    #[test]
    fn publishes_each_applied_change() {
        let mut registry = NodeRegistry::new();
        let mut rx = registry.subscribe();
        let id = NodeId::from("n1");

        registry.apply_node_added(node("n1", false));
        registry
            .apply_node_updated(NodeUpdate {
                id: id.clone(),
                is_connected: Some(true),
                ..NodeUpdate::default()
            })
            .unwrap();
        registry.apply_node_removed(&id);
        registry.apply_node_removed(&id);
        registry.mark_stale();
        registry.mark_stale();

        let mut received = Vec::new();
        while let Ok(change) = rx.try_recv() {
            received.push(change);
        }
        assert_eq!(
            received,
            [
                Change::NodeAdded(id.clone()),
                Change::NodeUpdated(id.clone()),
                Change::NodeRemoved(id),
                Change::Stale,
            ]
        );
    }

    #[test]
    fn random_event_sequences_keep_ids_unique_and_views_partitioned() {
        let mut rng = fastrand::Rng::with_seed(0x5107_0e7);
        let pool = ["n1", "n2", "n3", "n4", "n5"];

        for _ in 0..64 {
            let mut registry = NodeRegistry::new();
            for _ in 0..32 {
                let id = pool[rng.usize(..pool.len())];
                match rng.u8(..5) {
                    0 => registry.apply_node_added(node(id, rng.bool())),
                    1 => {
                        registry.apply_node_removed(&NodeId::from(id));
                    }
                    2 => {
                        let count = rng.usize(..=pool.len());
                        let nodes = (0..count)
                            .map(|_| node(pool[rng.usize(..pool.len())], rng.bool()))
                            .collect();
                        registry.apply_full_state(ClusterConfig::default(), nodes);
                    }
                    3 => {
                        let _ = registry.apply_node_updated(NodeUpdate {
                            id: NodeId::from(id),
                            is_connected: Some(rng.bool()),
                            ..NodeUpdate::default()
                        });
                    }
                    _ => {
                        let _ = registry.apply_login_result(&NodeId::from(id), rng.bool());
                    }
                }

                assert_unique(&registry);
                assert_partitioned(&registry);
            }
        }
    }
}

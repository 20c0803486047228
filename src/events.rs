//! Change notifications published after every state mutation.
//!
//! Observers subscribe explicitly and receive every [`Change`] in the order
//! the mutations were applied. A notification only names what changed;
//! observers read the current state from the registry.
//!
//! # Example
//!
//! ```rust
//! use spotnet::events::{Change, Listeners};
//!
//! let mut listeners = Listeners::default();
//! let mut rx = listeners.subscribe();
//!
//! listeners.publish(&Change::Snapshot);
//! assert_eq!(rx.try_recv().ok(), Some(Change::Snapshot));
//! ```

use std::fmt;

use tokio::sync::mpsc;

use crate::{controller::SyncState, node::NodeId};

/// What changed in the mirrored cluster state.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Change {
    /// A snapshot replaced the configuration and every node.
    Snapshot,

    NodeAdded(NodeId),

    NodeRemoved(NodeId),

    /// Fields of a known node were merged from a partial report.
    NodeUpdated(NodeId),

    /// Credentials were submitted for this node and its login is pending.
    Connecting(NodeId),

    LoginResult {
        id: NodeId,
        passed: bool,
    },

    /// The channel ended; the mirrored state is of unknown freshness.
    Stale,

    /// The controller moved to another lifecycle state.
    SyncState(SyncState),
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => write!(f, "snapshot applied"),
            Self::NodeAdded(id) => write!(f, "slave {id} added"),
            Self::NodeRemoved(id) => write!(f, "slave {id} removed"),
            Self::NodeUpdated(id) => write!(f, "slave {id} updated"),
            Self::Connecting(id) => write!(f, "slave {id} connecting"),
            Self::LoginResult { id, passed: true } => write!(f, "slave {id} login passed"),
            Self::LoginResult { id, passed: false } => write!(f, "slave {id} login failed"),
            Self::Stale => write!(f, "state is stale"),
            Self::SyncState(state) => write!(f, "sync state {state}"),
        }
    }
}

/// Fan-out of change notifications to any number of subscribers.
#[derive(Debug, Default)]
pub struct Listeners {
    subscribers: Vec<mpsc::UnboundedSender<Change>>,
}

impl Listeners {
    /// Registers a new subscriber. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Change> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Delivers `change` to every live subscriber and prunes the rest.
    pub fn publish(&mut self, change: &Change) {
        self.subscribers
            .retain(|subscriber| subscriber.send(change.clone()).is_ok());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_in_order_to_every_subscriber() {
        let mut listeners = Listeners::default();
        let mut first = listeners.subscribe();
        let mut second = listeners.subscribe();

        listeners.publish(&Change::Snapshot);
        listeners.publish(&Change::NodeAdded(NodeId::from("n1")));

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.try_recv().ok(), Some(Change::Snapshot));
            assert_eq!(rx.try_recv().ok(), Some(Change::NodeAdded(NodeId::from("n1"))));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn prunes_dropped_subscribers() {
        let mut listeners = Listeners::default();
        let kept = listeners.subscribe();
        drop(listeners.subscribe());
        assert_eq!(listeners.len(), 2);

        listeners.publish(&Change::Stale);
        assert_eq!(listeners.len(), 1);

        drop(kept);
        listeners.publish(&Change::Stale);
        assert!(listeners.is_empty());
    }
}

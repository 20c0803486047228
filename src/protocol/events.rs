//! Inbound events from the master.

use std::{fmt, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::{
    error::Error,
    node::{ClusterConfig, NodeId, NodeUpdate, SlaveNode},
};

/// Kinds of events the master pushes, keyed by the envelope `status`.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum EventKind {
    /// Snapshot of the whole cluster.
    FullState,
    /// Partial report of one node.
    SlaveState,
    SlaveAdded,
    SlaveRemoved,
    LoginPassed,
    LoginFailed,
}

impl EventKind {
    /// Wire value for [`EventKind::FullState`].
    const FULL_STATE: &'static str = "send-state";

    /// Wire value for [`EventKind::SlaveState`].
    const SLAVE_STATE: &'static str = "send-slave-state";

    /// Wire value for [`EventKind::SlaveAdded`].
    const SLAVE_ADDED: &'static str = "add-slave";

    /// Wire value for [`EventKind::SlaveRemoved`].
    const SLAVE_REMOVED: &'static str = "remove-slave";

    /// Wire value for [`EventKind::LoginPassed`].
    const LOGIN_PASSED: &'static str = "login-passed";

    /// Wire value for [`EventKind::LoginFailed`].
    const LOGIN_FAILED: &'static str = "login-failed";
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullState => Self::FULL_STATE,
            Self::SlaveState => Self::SLAVE_STATE,
            Self::SlaveAdded => Self::SLAVE_ADDED,
            Self::SlaveRemoved => Self::SLAVE_REMOVED,
            Self::LoginPassed => Self::LOGIN_PASSED,
            Self::LoginFailed => Self::LOGIN_FAILED,
        };

        f.write_str(s)
    }
}

impl FromStr for EventKind {
    type Err = Error;

    /// Parses an envelope `status`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEventKind` for anything this client does not know,
    /// which includes the command kinds the client itself sends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let variant = match s {
            Self::FULL_STATE => Self::FullState,
            Self::SLAVE_STATE => Self::SlaveState,
            Self::SLAVE_ADDED => Self::SlaveAdded,
            Self::SLAVE_REMOVED => Self::SlaveRemoved,
            Self::LOGIN_PASSED => Self::LoginPassed,
            Self::LOGIN_FAILED => Self::LoginFailed,
            _ => return Err(Self::Err::unknown_event_kind(format!("event kind `{s}`"))),
        };

        Ok(variant)
    }
}

/// A typed inbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    FullState {
        config: ClusterConfig,
        nodes: Vec<SlaveNode>,
    },
    SlaveState(NodeUpdate),
    SlaveAdded(SlaveNode),
    SlaveRemoved(NodeId),
    LoginPassed(NodeId),
    LoginFailed(NodeId),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::FullState { .. } => EventKind::FullState,
            Self::SlaveState(_) => EventKind::SlaveState,
            Self::SlaveAdded(_) => EventKind::SlaveAdded,
            Self::SlaveRemoved(_) => EventKind::SlaveRemoved,
            Self::LoginPassed(_) => EventKind::LoginPassed,
            Self::LoginFailed(_) => EventKind::LoginFailed,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullState { config, nodes } => write!(
                f,
                "{} with {} slaves (voting {}, {} votes for skip)",
                self.kind(),
                nodes.len(),
                if config.voting_enabled { "on" } else { "off" },
                config.votes_required_for_skip
            ),
            Self::SlaveState(update) => write!(f, "{} for {}", self.kind(), update.id),
            Self::SlaveAdded(node) => write!(f, "{} {}", self.kind(), node.id),
            Self::SlaveRemoved(id) | Self::LoginPassed(id) | Self::LoginFailed(id) => {
                write!(f, "{} {id}", self.kind())
            }
        }
    }
}

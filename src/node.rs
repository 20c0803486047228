//! Slave nodes and the cluster-wide configuration, as mirrored from the
//! master.
//!
//! A [`SlaveNode`] is only ever created or changed by applying master
//! events (see [`registry`](crate::registry)). The single exception is the
//! [`ConnectionState::Connecting`] state, which the command façade sets
//! right after credentials are submitted.

use std::{fmt, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use time::{
    format_description::well_known::{
        iso8601::{Config, EncodedConfig, FormattedComponents},
        Iso8601,
    },
    PrimitiveDateTime,
};

use crate::error::Error;

/// Opaque node identifier as minted by the master.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::invalid_argument("node id should not be empty"));
        }

        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A pointer into the music catalog. The engine never looks inside it.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TrackRef {
    pub catalog_id: String,
    pub uri: String,
}

impl TrackRef {
    #[must_use]
    pub fn new(catalog_id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            uri: uri.into(),
        }
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.catalog_id, self.uri)
    }
}

/// Login lifecycle of a slave node.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,

    /// Credentials were submitted and no outcome has arrived yet. Only the
    /// command façade enters this state; any later authoritative event
    /// carrying connection information leaves it.
    Connecting,

    Connected,

    LoginFailed,
}

impl ConnectionState {
    /// Resolves the state after the master reported `is-connected`.
    ///
    /// A failed login stays visible while the master keeps reporting the
    /// node as not connected.
    #[must_use]
    pub fn reported(self, is_connected: bool) -> Self {
        match (self, is_connected) {
            (_, true) => Self::Connected,
            (Self::LoginFailed, false) => Self::LoginFailed,
            (_, false) => Self::Disconnected,
        }
    }

    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::LoginFailed => write!(f, "login failed"),
        }
    }
}

/// Moment a node first connected to the master.
///
/// The master reports local time in ISO 8601 without an offset, e.g.
/// `2017-03-04T12:34:56.123456`.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct Timestamp(pub PrimitiveDateTime);

impl Timestamp {
    /// ISO 8601 date and time, without offset.
    const FORMAT: EncodedConfig = Config::DEFAULT
        .set_formatted_components(FormattedComponents::DateTime)
        .encode();
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(&Iso8601::<{ Self::FORMAT }>).map_err(|_| fmt::Error)?;
        f.write_str(&formatted)
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let datetime = PrimitiveDateTime::parse(s, &Iso8601::<{ Self::FORMAT }>)?;
        Ok(Self(datetime))
    }
}

/// A remote playback device known to the master.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlaveNode {
    pub id: NodeId,
    pub display_name: Option<String>,
    pub connection_state: ConnectionState,
    pub first_connected_at: Option<Timestamp>,
    pub counted_votes_for_skip: u32,
    pub is_paused: bool,

    /// Index 0 is now playing, the rest is coming up.
    pub track_queue: Vec<TrackRef>,
}

impl SlaveNode {
    #[must_use]
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            display_name: None,
            connection_state: ConnectionState::default(),
            first_connected_at: None,
            counted_votes_for_skip: 0,
            is_paused: true,
            track_queue: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state.is_connected()
    }

    #[must_use]
    pub fn now_playing(&self) -> Option<&TrackRef> {
        self.track_queue.first()
    }

    #[must_use]
    pub fn coming_up(&self) -> &[TrackRef] {
        self.track_queue.get(1..).unwrap_or_default()
    }

    /// Overwrites this node with a full report of the same node.
    ///
    /// `first_connected_at` is kept once known, and the reported connection
    /// state is resolved against the current one.
    pub(crate) fn overwrite(&mut self, report: SlaveNode) {
        debug_assert_eq!(self.id, report.id);

        let first_connected_at = self.first_connected_at.or(report.first_connected_at);
        let connection_state = self.connection_state.reported(report.is_connected());

        *self = SlaveNode {
            first_connected_at,
            connection_state,
            ..report
        };
    }

    /// Merges the fields present in `update`.
    pub(crate) fn merge(&mut self, update: NodeUpdate) {
        debug_assert_eq!(self.id, update.id);

        if let Some(display_name) = update.display_name {
            self.display_name = display_name;
        }

        match update.is_connected {
            Some(is_connected) => {
                self.connection_state = self.connection_state.reported(is_connected);
            }
            // Any report for the node resolves a pending login.
            None if self.connection_state == ConnectionState::Connecting => {
                self.connection_state = ConnectionState::Disconnected;
            }
            None => {}
        }

        if self.first_connected_at.is_none() {
            if let Some(first_connected_at) = update.first_connected_at.flatten() {
                self.first_connected_at = Some(first_connected_at);
            }
        }

        if let Some(votes) = update.counted_votes_for_skip {
            self.counted_votes_for_skip = votes;
        }

        if let Some(is_paused) = update.is_paused {
            self.is_paused = is_paused;
        }

        if let Some(track_queue) = update.track_queue {
            self.track_queue = track_queue;
        }
    }
}

impl fmt::Display for SlaveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{name} [{}]", self.id)?,
            None => write!(f, "[{}]", self.id)?,
        }

        write!(f, " {}", self.connection_state)?;
        if self.is_connected() {
            let transport = if self.is_paused { "paused" } else { "playing" };
            write!(f, ", {transport}, {} queued", self.track_queue.len())?;
        }

        Ok(())
    }
}

/// A partial node report: `None` means "not reported".
///
/// Fields that may legitimately be `null` on the wire are doubly optional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeUpdate {
    pub id: NodeId,
    pub display_name: Option<Option<String>>,
    pub is_connected: Option<bool>,
    pub first_connected_at: Option<Option<Timestamp>>,
    pub counted_votes_for_skip: Option<u32>,
    pub is_paused: Option<bool>,
    pub track_queue: Option<Vec<TrackRef>>,
}

/// Process-wide voting settings, replaced wholesale by every snapshot.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct ClusterConfig {
    pub voting_enabled: bool,
    pub votes_required_for_skip: u32,
}

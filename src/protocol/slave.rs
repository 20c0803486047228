//! Wire shapes of slave node reports.
//!
//! The master uses hyphenated keys; these types map them onto the domain
//! types in [`node`](crate::node):
//!
//! | wire                     | domain                   |
//! |--------------------------|--------------------------|
//! | `uuid`                   | `id`                     |
//! | `name`                   | `display_name`           |
//! | `is-connected`           | `connection_state`       |
//! | `is-paused`              | `is_paused`              |
//! | `counted-votes-for-skip` | `counted_votes_for_skip` |
//! | `first-connected-at`     | `first_connected_at`     |
//! | `track-queue`            | `track_queue`            |

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::node::{ClusterConfig, ConnectionState, NodeId, NodeUpdate, SlaveNode, Timestamp, TrackRef};

/// A track as it appears in a `track-queue` or an `add-track` command.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TrackWire {
    pub id: String,
    pub uri: String,
}

impl From<TrackWire> for TrackRef {
    fn from(track: TrackWire) -> Self {
        Self {
            catalog_id: track.id,
            uri: track.uri,
        }
    }
}

impl From<&TrackRef> for TrackWire {
    fn from(track: &TrackRef) -> Self {
        Self {
            id: track.catalog_id.clone(),
            uri: track.uri.clone(),
        }
    }
}

/// A complete node report, as found in snapshots and `add-slave` events.
///
/// Nodes that have not been given credentials yet have no `name`, and older
/// masters omit the playback fields; those default.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SlaveWire {
    pub uuid: NodeId,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub is_connected: bool,

    #[serde(default = "SlaveWire::default_paused")]
    pub is_paused: bool,

    #[serde(default)]
    pub counted_votes_for_skip: u32,

    #[serde(default)]
    pub first_connected_at: Option<Timestamp>,

    #[serde(default)]
    pub track_queue: Vec<TrackWire>,
}

impl SlaveWire {
    // Slaves start out paused.
    fn default_paused() -> bool {
        true
    }
}

impl From<SlaveWire> for SlaveNode {
    fn from(wire: SlaveWire) -> Self {
        let connection_state = if wire.is_connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };

        Self {
            id: wire.uuid,
            display_name: wire.name,
            connection_state,
            first_connected_at: wire.first_connected_at,
            counted_votes_for_skip: wire.counted_votes_for_skip,
            is_paused: wire.is_paused,
            track_queue: wire.track_queue.into_iter().map(TrackRef::from).collect(),
        }
    }
}

/// A partial node report, as found in `send-slave-state` events.
///
/// Absent keys are "not reported". A key that is present with `null` is
/// reported as empty, which is distinct for the nullable fields.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SlaveUpdateWire {
    pub uuid: NodeId,

    #[serde(default, with = "::serde_with::rust::double_option")]
    pub name: Option<Option<String>>,

    #[serde(default)]
    pub is_connected: Option<bool>,

    #[serde(default)]
    pub is_paused: Option<bool>,

    #[serde(default)]
    pub counted_votes_for_skip: Option<u32>,

    #[serde(default, with = "::serde_with::rust::double_option")]
    pub first_connected_at: Option<Option<Timestamp>>,

    #[serde(default)]
    pub track_queue: Option<Vec<TrackWire>>,
}

impl From<SlaveUpdateWire> for NodeUpdate {
    fn from(wire: SlaveUpdateWire) -> Self {
        Self {
            id: wire.uuid,
            display_name: wire.name,
            is_connected: wire.is_connected,
            first_connected_at: wire.first_connected_at,
            counted_votes_for_skip: wire.counted_votes_for_skip,
            is_paused: wire.is_paused,
            track_queue: wire
                .track_queue
                .map(|queue| queue.into_iter().map(TrackRef::from).collect()),
        }
    }
}

/// `data` of a `send-state` snapshot.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct StateWire {
    pub voting_enabled: bool,

    // The master's command line hands this through as a string.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub votes_for_skip: u32,

    #[serde(default)]
    pub slaves: Vec<SlaveWire>,
}

impl StateWire {
    #[must_use]
    pub fn config(&self) -> ClusterConfig {
        ClusterConfig {
            voting_enabled: self.voting_enabled,
            votes_required_for_skip: self.votes_for_skip,
        }
    }
}

/// `data` of `add-slave` and `send-slave-state` events.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SlaveData<T> {
    pub slave: T,
}

/// `data` of events that only name a node.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct UuidData {
    pub uuid: NodeId,
}

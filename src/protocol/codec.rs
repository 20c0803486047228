//! Message codec for the master's websocket protocol.
//!
//! Every frame is a JSON envelope:
//!
//! ```json
//! { "status": "<kind>", "sender": "web-client" | "master", "data": { ... } }
//! ```
//!
//! Outbound, [`Codec::encode`] wraps a [`Command`] in an envelope that names
//! this client as the sender. Inbound, [`Codec::decode`] validates in this
//! order, and stops at the first failure:
//!
//! 1. frame size and structure (`MalformedEnvelope`)
//! 2. `sender` equals the master identity (`UntrustedSender`)
//! 3. `status` is a known [`EventKind`] (`UnknownEventKind`)
//! 4. `data` has the shape the kind requires (`MalformedEnvelope`)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    commands::{Command, CommandKind, Position},
    events::{Event, EventKind},
    slave::{SlaveData, SlaveUpdateWire, SlaveWire, StateWire, TrackWire, UuidData},
};
use crate::{
    config::Config,
    error::{Error, Result},
    node::{NodeId, SlaveNode},
};

/// Encodes commands and decodes events for one peer pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Codec {
    client_sender: String,
    master_sender: String,
    max_message_size: usize,
}

impl Codec {
    /// Identity this client announces in every outbound envelope.
    pub const CLIENT_SENDER: &'static str = "web-client";

    /// The only identity inbound envelopes are accepted from.
    pub const MASTER_SENDER: &'static str = "master";

    /// Default upper bound for inbound frames.
    pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            client_sender: config.client_sender.clone(),
            master_sender: config.master_sender.clone(),
            max_message_size: config.max_message_size,
        }
    }

    /// Serializes `command` into a wire envelope.
    ///
    /// # Errors
    ///
    /// Only fails if JSON serialization itself fails.
    pub fn encode(&self, command: &Command) -> Result<String> {
        let envelope = OutboundEnvelope {
            status: command.kind(),
            sender: &self.client_sender,
            data: CommandData::from(command),
        };

        serde_json::to_string(&envelope).map_err(Error::internal)
    }

    /// Parses and validates an inbound frame into a typed [`Event`].
    ///
    /// # Errors
    ///
    /// Returns a protocol error of kind `MalformedEnvelope`,
    /// `UntrustedSender` or `UnknownEventKind`. The caller is expected to
    /// drop the frame.
    pub fn decode(&self, frame: &[u8]) -> Result<Event> {
        let size = frame.len();
        if size > self.max_message_size {
            return Err(Error::malformed_envelope(format!(
                "frame of {size} bytes exceeds limit of {} bytes",
                self.max_message_size
            )));
        }

        let text = std::str::from_utf8(frame).map_err(Error::malformed_envelope)?;
        let envelope: InboundEnvelope = super::json(text, "inbound envelope")?;

        if envelope.sender != self.master_sender {
            return Err(Error::untrusted_sender(format!(
                "`{}` is not `{}`",
                envelope.sender, self.master_sender
            )));
        }

        let kind = envelope.status.parse::<EventKind>()?;
        let event = match kind {
            EventKind::FullState => {
                let state: StateWire = serde_json::from_value(envelope.data)?;
                Event::FullState {
                    config: state.config(),
                    nodes: state.slaves.into_iter().map(SlaveNode::from).collect(),
                }
            }
            EventKind::SlaveState => {
                let data: SlaveData<SlaveUpdateWire> = serde_json::from_value(envelope.data)?;
                Event::SlaveState(data.slave.into())
            }
            EventKind::SlaveAdded => {
                let data: SlaveData<SlaveWire> = serde_json::from_value(envelope.data)?;
                Event::SlaveAdded(data.slave.into())
            }
            EventKind::SlaveRemoved => Event::SlaveRemoved(uuid(envelope.data)?),
            EventKind::LoginPassed => Event::LoginPassed(uuid(envelope.data)?),
            EventKind::LoginFailed => Event::LoginFailed(uuid(envelope.data)?),
        };

        Ok(event)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            client_sender: Self::CLIENT_SENDER.to_owned(),
            master_sender: Self::MASTER_SENDER.to_owned(),
            max_message_size: Self::MAX_MESSAGE_SIZE,
        }
    }
}

fn uuid(data: Value) -> Result<NodeId> {
    let data: UuidData = serde_json::from_value(data)?;
    Ok(data.uuid)
}

/// Structural shape of an inbound frame. `data` is typed once the kind is
/// known.
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    status: String,
    sender: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Serialize)]
struct OutboundEnvelope<'a> {
    status: CommandKind,
    sender: &'a str,
    data: CommandData<'a>,
}

/// Borrowed `data` payloads, one shape per command kind.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum CommandData<'a> {
    Empty {},
    Credentials {
        uuid: &'a NodeId,
        name: &'a str,
        username: &'a str,
        password: &'a str,
    },
    AddTrack {
        uuid: &'a NodeId,
        position: Position,
        track: TrackWire,
    },
    RemoveTrack {
        uuid: &'a NodeId,
        position: usize,
    },
    Target {
        uuid: &'a NodeId,
    },
}

impl<'a> From<&'a Command> for CommandData<'a> {
    fn from(command: &'a Command) -> Self {
        match command {
            Command::RequestState => Self::Empty {},
            Command::SendCredentials {
                uuid,
                name,
                username,
                password,
            } => Self::Credentials {
                uuid,
                name,
                username,
                password,
            },
            Command::AddTrack {
                uuid,
                position,
                track,
            } => Self::AddTrack {
                uuid,
                position: *position,
                track: TrackWire::from(track),
            },
            Command::RemoveTrack { uuid, position } => Self::RemoveTrack {
                uuid,
                position: *position,
            },
            Command::PlayAudio { uuid }
            | Command::PauseAudio { uuid }
            | Command::VoteForSkip { uuid } => Self::Target { uuid },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        error::ErrorKind,
        node::{ConnectionState, TrackRef},
    };

    fn frame(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    fn decode(value: &Value) -> Result<Event> {
        Codec::default().decode(&frame(value))
    }

    fn encode(command: &Command) -> Value {
        let text = Codec::default().encode(command).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn encodes_request_state_with_empty_data() {
        assert_eq!(
            encode(&Command::RequestState),
            json!({ "status": "request-state", "sender": "web-client", "data": {} })
        );
    }

    #[test]
    fn encodes_send_credentials() {
        let command = Command::SendCredentials {
            uuid: NodeId::from("n2"),
            name: "Kitchen".to_owned(),
            username: "alice".to_owned(),
            password: "pw".to_owned(),
        };

        assert_eq!(
            encode(&command),
            json!({
                "status": "send-credentials",
                "sender": "web-client",
                "data": { "uuid": "n2", "name": "Kitchen", "username": "alice", "password": "pw" }
            })
        );
        assert!(!format!("{command:?}").contains("pw\""));
    }

    #[test]
    fn encodes_add_and_remove_track() {
        let add = Command::AddTrack {
            uuid: NodeId::from("n1"),
            position: Position::Next,
            track: TrackRef::new("t1", "spotify:track:t1"),
        };
        assert_eq!(
            encode(&add)["data"],
            json!({ "uuid": "n1", "position": "next", "track": { "id": "t1", "uri": "spotify:track:t1" } })
        );

        let remove = Command::RemoveTrack {
            uuid: NodeId::from("n1"),
            position: 2,
        };
        assert_eq!(encode(&remove)["data"], json!({ "uuid": "n1", "position": 2 }));
        assert_eq!(encode(&remove)["status"], json!("remove-track"));
    }

    #[test]
    fn encodes_transport_commands() {
        let play = encode(&Command::PlayAudio {
            uuid: NodeId::from("n1"),
        });
        assert_eq!(play["status"], json!("play-audio"));
        assert_eq!(play["data"], json!({ "uuid": "n1" }));

        let pause = encode(&Command::PauseAudio {
            uuid: NodeId::from("n1"),
        });
        assert_eq!(pause["status"], json!("pause-audio"));
    }

    #[test]
    fn decodes_full_state() {
        let event = decode(&json!({
            "status": "send-state",
            "sender": "master",
            "data": {
                "voting-enabled": true,
                "votes-for-skip": 2,
                "slaves": [{
                    "uuid": "n1",
                    "is-connected": true,
                    "counted-votes-for-skip": 0,
                    "name": "Kitchen",
                    "track-queue": []
                }]
            }
        }))
        .unwrap();

        let Event::FullState { config, nodes } = event else {
            panic!("expected full state, got {event:?}");
        };
        assert!(config.voting_enabled);
        assert_eq!(config.votes_required_for_skip, 2);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, NodeId::from("n1"));
        assert_eq!(nodes[0].connection_state, ConnectionState::Connected);
        assert_eq!(nodes[0].display_name.as_deref(), Some("Kitchen"));
        assert!(nodes[0].is_paused);
    }

    #[test]
    fn decodes_votes_for_skip_given_as_string() {
        let event = decode(&json!({
            "status": "send-state",
            "sender": "master",
            "data": { "voting-enabled": false, "votes-for-skip": "5", "slaves": [] }
        }))
        .unwrap();

        assert!(matches!(
            event,
            Event::FullState { config, .. } if config.votes_required_for_skip == 5
        ));
    }

    #[test]
    fn decodes_partial_slave_state() {
        let event = decode(&json!({
            "status": "send-slave-state",
            "sender": "master",
            "data": { "slave": { "uuid": "n1", "is-paused": false, "name": null } }
        }))
        .unwrap();

        let Event::SlaveState(update) = event else {
            panic!("expected slave state, got {event:?}");
        };
        assert_eq!(update.id, NodeId::from("n1"));
        assert_eq!(update.is_paused, Some(false));
        assert_eq!(update.display_name, Some(None));
        assert_eq!(update.is_connected, None);
        assert_eq!(update.track_queue, None);
    }

    #[test]
    fn decodes_node_events() {
        let added = decode(&json!({
            "status": "add-slave",
            "sender": "master",
            "data": { "slave": {
                "uuid": "n3",
                "name": null,
                "is-connected": false,
                "is-paused": true,
                "counted-votes-for-skip": 0,
                "first-connected-at": "2017-03-04T12:34:56.123456",
                "track-queue": [{ "id": "t1", "uri": "spotify:track:t1" }]
            } }
        }))
        .unwrap();
        let Event::SlaveAdded(node) = added else {
            panic!("expected slave added, got {added:?}");
        };
        assert!(node.first_connected_at.is_some());
        assert_eq!(node.track_queue, vec![TrackRef::new("t1", "spotify:track:t1")]);

        for (status, expected) in [
            ("remove-slave", Event::SlaveRemoved(NodeId::from("n3"))),
            ("login-passed", Event::LoginPassed(NodeId::from("n3"))),
            ("login-failed", Event::LoginFailed(NodeId::from("n3"))),
        ] {
            let event = decode(&json!({
                "status": status,
                "sender": "master",
                "data": { "uuid": "n3" }
            }))
            .unwrap();
            assert_eq!(event, expected);
        }
    }

    #[test]
    fn rejects_unparseable_bytes() {
        let err = Codec::default().decode(b"\xff\xfe not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedEnvelope);

        let err = Codec::default().decode(b"{\"status\": 1}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedEnvelope);
    }

    #[test]
    fn rejects_untrusted_sender_before_kind() {
        let err = decode(&json!({
            "status": "no-such-kind",
            "sender": "slave",
            "data": {}
        }))
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UntrustedSender);
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = decode(&json!({
            "status": "shuffle-everything",
            "sender": "master",
            "data": {}
        }))
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownEventKind);
    }

    #[test]
    fn rejects_data_of_wrong_shape() {
        let err = decode(&json!({
            "status": "remove-slave",
            "sender": "master",
            "data": { "id": "n1" }
        }))
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedEnvelope);

        let err = decode(&json!({
            "status": "login-passed",
            "sender": "master",
            "data": { "uuid": "" }
        }))
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedEnvelope);
    }

    #[test]
    fn rejects_oversized_frames() {
        let codec = Codec {
            max_message_size: 16,
            ..Codec::default()
        };
        let err = codec
            .decode(&frame(&json!({ "status": "login-passed", "sender": "master", "data": { "uuid": "n1" } })))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedEnvelope);
    }
}

//! Command Façade: the calls a user interface makes against the cluster.
//!
//! Every call validates locally, then sends one fire-and-forget command.
//! Validation and reference failures are returned before anything is sent.
//! The only local change a call makes is marking a node as connecting
//! after its credentials were submitted; queues and playback state only
//! change once the master reports them.

use std::fmt;

use veil::Redact;

use crate::{
    controller::Controller,
    error::{Error, Result},
    node::{NodeId, SlaveNode, TrackRef},
    protocol::{Command, Position},
    transport::Outbound,
};

/// A façade call as data, so it can be queued and executed later.
#[derive(Clone, PartialEq, Eq, Redact)]
pub enum Request {
    SubmitCredentials {
        id: NodeId,
        name: String,
        username: String,
        #[redact]
        password: String,
    },

    AddTrack {
        id: NodeId,
        position: Position,
        track: TrackRef,
    },

    RemoveTrack {
        id: NodeId,
        position: usize,
    },

    /// Removes entry `index` of the coming-up list.
    RemoveComingUp {
        id: NodeId,
        index: usize,
    },

    Play(NodeId),

    Pause(NodeId),

    Skip(NodeId),

    VoteForSkip(NodeId),
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubmitCredentials { id, username, .. } => {
                write!(f, "submit credentials of {username} for {id}")
            }
            Self::AddTrack {
                id,
                position,
                track,
            } => write!(f, "add {track} as {position} on {id}"),
            Self::RemoveTrack { id, position } => write!(f, "remove track {position} on {id}"),
            Self::RemoveComingUp { id, index } => write!(f, "remove coming up {index} on {id}"),
            Self::Play(id) => write!(f, "play on {id}"),
            Self::Pause(id) => write!(f, "pause on {id}"),
            Self::Skip(id) => write!(f, "skip on {id}"),
            Self::VoteForSkip(id) => write!(f, "vote for skip on {id}"),
        }
    }
}

pub struct Remote<'a, C> {
    controller: &'a mut Controller<C>,
}

impl<'a, C: Outbound> Remote<'a, C> {
    pub fn new(controller: &'a mut Controller<C>) -> Self {
        Self { controller }
    }

    /// Performs `request`.
    ///
    /// # Errors
    ///
    /// See the individual calls.
    pub fn execute(&mut self, request: Request) -> Result<()> {
        debug!("executing: {request}");

        match request {
            Request::SubmitCredentials {
                id,
                name,
                username,
                password,
            } => self.submit_credentials(&id, &name, &username, &password),
            Request::AddTrack {
                id,
                position,
                track,
            } => self.add_track(&id, position, track),
            Request::RemoveTrack { id, position } => self.remove_track(&id, position),
            Request::RemoveComingUp { id, index } => self.remove_coming_up(&id, index),
            Request::Play(id) => self.play(&id),
            Request::Pause(id) => self.pause(&id),
            Request::Skip(id) => self.skip(&id),
            Request::VoteForSkip(id) => self.vote_for_skip(&id),
        }
    }

    /// Sends login credentials for a node and marks it as connecting.
    ///
    /// # Errors
    ///
    /// * `MissingField` if any argument is empty
    /// * `UnknownNode` if the node is not known
    /// * `Transport` if the channel is not open
    pub fn submit_credentials(
        &mut self,
        id: &NodeId,
        name: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        for (field, value) in [
            ("uuid", id.as_str()),
            ("name", name),
            ("username", username),
            ("password", password),
        ] {
            if value.is_empty() {
                return Err(Error::missing_field(format!("{field} should not be empty")));
            }
        }

        self.target(id)?;
        self.controller.send(&Command::SendCredentials {
            uuid: id.clone(),
            name: name.to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
        })?;

        self.controller.registry_mut().mark_connecting(id)
    }

    /// Queues `track` on a node, either replacing what plays now or right
    /// after it.
    ///
    /// # Errors
    ///
    /// * `MissingField` if the track has no id or uri
    /// * `UnknownNode` if the node is not known
    /// * `Transport` if the channel is not open
    pub fn add_track(&mut self, id: &NodeId, position: Position, track: TrackRef) -> Result<()> {
        if track.catalog_id.is_empty() || track.uri.is_empty() {
            return Err(Error::missing_field("track should have an id and a uri"));
        }

        self.target(id)?;
        self.controller.send(&Command::AddTrack {
            uuid: id.clone(),
            position,
            track,
        })
    }

    /// Removes the track at queue `position`, where 0 is now playing.
    ///
    /// # Errors
    ///
    /// * `UnknownNode` if the node is not known
    /// * `Transport` if the channel is not open
    pub fn remove_track(&mut self, id: &NodeId, position: usize) -> Result<()> {
        self.target(id)?;
        self.controller.send(&Command::RemoveTrack {
            uuid: id.clone(),
            position,
        })
    }

    /// Removes entry `index` of the coming-up list.
    ///
    /// # Errors
    ///
    /// As [`remove_track`](Self::remove_track).
    pub fn remove_coming_up(&mut self, id: &NodeId, index: usize) -> Result<()> {
        let position = index
            .checked_add(1)
            .ok_or_else(|| Error::invalid_argument("coming up index out of range"))?;
        self.remove_track(id, position)
    }

    /// # Errors
    ///
    /// * `UnknownNode` if the node is not known
    /// * `Transport` if the channel is not open
    pub fn play(&mut self, id: &NodeId) -> Result<()> {
        self.target(id)?;
        self.controller.send(&Command::PlayAudio { uuid: id.clone() })
    }

    /// # Errors
    ///
    /// * `UnknownNode` if the node is not known
    /// * `Transport` if the channel is not open
    pub fn pause(&mut self, id: &NodeId) -> Result<()> {
        self.target(id)?;
        self.controller.send(&Command::PauseAudio { uuid: id.clone() })
    }

    /// Drops what plays now so the next track starts.
    ///
    /// # Errors
    ///
    /// * `UnknownNode` if the node is not known
    /// * `FailedPrecondition` if nothing is coming up
    /// * `Transport` if the channel is not open
    pub fn skip(&mut self, id: &NodeId) -> Result<()> {
        let node = self.target(id)?;
        if node.coming_up().is_empty() {
            return Err(Error::failed_precondition(format!(
                "nothing is coming up on {id}"
            )));
        }

        self.remove_track(id, 0)
    }

    /// Casts a vote to skip what plays now.
    ///
    /// # Errors
    ///
    /// * `UnknownNode` if the node is not known
    /// * `FailedPrecondition` if voting is disabled
    /// * `Transport` if the channel is not open
    pub fn vote_for_skip(&mut self, id: &NodeId) -> Result<()> {
        self.target(id)?;
        if !self.controller.registry().config().voting_enabled {
            return Err(Error::failed_precondition("voting is disabled"));
        }

        self.controller.send(&Command::VoteForSkip { uuid: id.clone() })
    }

    fn target(&self, id: &NodeId) -> Result<&SlaveNode> {
        self.controller
            .registry()
            .node(id)
            .ok_or_else(|| Error::unknown_node(format!("slave {id} is not known")))
    }
}

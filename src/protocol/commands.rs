//! Outbound commands to the master.
//!
//! Commands are fire-and-forget: the protocol has no correlation ids, so
//! their effect is only observed through later events.

use std::{fmt, str::FromStr};

use serde::Serialize;
use serde_with::SerializeDisplay;
use veil::Redact;

use crate::{
    error::Error,
    node::{NodeId, TrackRef},
};

/// Kinds of commands this client sends, keyed by the envelope `status`.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, SerializeDisplay)]
pub enum CommandKind {
    RequestState,
    SendCredentials,
    AddTrack,
    RemoveTrack,
    PlayAudio,
    PauseAudio,
    VoteForSkip,
}

impl CommandKind {
    /// Wire value for [`CommandKind::RequestState`].
    const REQUEST_STATE: &'static str = "request-state";

    /// Wire value for [`CommandKind::SendCredentials`].
    const SEND_CREDENTIALS: &'static str = "send-credentials";

    /// Wire value for [`CommandKind::AddTrack`].
    const ADD_TRACK: &'static str = "add-track";

    /// Wire value for [`CommandKind::RemoveTrack`].
    const REMOVE_TRACK: &'static str = "remove-track";

    /// Wire value for [`CommandKind::PlayAudio`].
    const PLAY_AUDIO: &'static str = "play-audio";

    /// Wire value for [`CommandKind::PauseAudio`].
    const PAUSE_AUDIO: &'static str = "pause-audio";

    /// Wire value for [`CommandKind::VoteForSkip`].
    const VOTE_FOR_SKIP: &'static str = "vote-for-skip";
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RequestState => Self::REQUEST_STATE,
            Self::SendCredentials => Self::SEND_CREDENTIALS,
            Self::AddTrack => Self::ADD_TRACK,
            Self::RemoveTrack => Self::REMOVE_TRACK,
            Self::PlayAudio => Self::PLAY_AUDIO,
            Self::PauseAudio => Self::PAUSE_AUDIO,
            Self::VoteForSkip => Self::VOTE_FOR_SKIP,
        };

        f.write_str(s)
    }
}

/// Where in a slave's queue to put a new track.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Replace what is playing now.
    Current,
    /// Play right after the current track.
    #[default]
    Next,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Next => write!(f, "next"),
        }
    }
}

impl FromStr for Position {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(Self::Current),
            "next" => Ok(Self::Next),
            _ => Err(Error::invalid_argument(format!(
                "position should be `current` or `next`, not `{s}`"
            ))),
        }
    }
}

/// A typed outbound command.
///
/// The password in [`Command::SendCredentials`] is redacted from `Debug`
/// output.
#[derive(Clone, PartialEq, Eq, Redact)]
pub enum Command {
    RequestState,

    SendCredentials {
        uuid: NodeId,
        name: String,
        username: String,
        #[redact]
        password: String,
    },

    AddTrack {
        uuid: NodeId,
        position: Position,
        track: TrackRef,
    },

    RemoveTrack {
        uuid: NodeId,
        position: usize,
    },

    PlayAudio {
        uuid: NodeId,
    },

    PauseAudio {
        uuid: NodeId,
    },

    VoteForSkip {
        uuid: NodeId,
    },
}

impl Command {
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::RequestState => CommandKind::RequestState,
            Self::SendCredentials { .. } => CommandKind::SendCredentials,
            Self::AddTrack { .. } => CommandKind::AddTrack,
            Self::RemoveTrack { .. } => CommandKind::RemoveTrack,
            Self::PlayAudio { .. } => CommandKind::PlayAudio,
            Self::PauseAudio { .. } => CommandKind::PauseAudio,
            Self::VoteForSkip { .. } => CommandKind::VoteForSkip,
        }
    }

    /// The node this command targets, if any.
    #[must_use]
    pub fn target(&self) -> Option<&NodeId> {
        match self {
            Self::RequestState => None,
            Self::SendCredentials { uuid, .. }
            | Self::AddTrack { uuid, .. }
            | Self::RemoveTrack { uuid, .. }
            | Self::PlayAudio { uuid }
            | Self::PauseAudio { uuid }
            | Self::VoteForSkip { uuid } => Some(uuid),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTrack {
                uuid,
                position,
                track,
            } => write!(f, "{} {track} as {position} on {uuid}", self.kind()),
            Self::RemoveTrack { uuid, position } => {
                write!(f, "{} at {position} on {uuid}", self.kind())
            }
            _ => match self.target() {
                Some(uuid) => write!(f, "{} for {uuid}", self.kind()),
                None => write!(f, "{}", self.kind()),
            },
        }
    }
}

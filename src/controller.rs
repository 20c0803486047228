//! Synchronization Controller: drives one channel's lifecycle and routes
//! master events into the registry.
//!
//! ```text
//!   Idle --open--> AwaitingSnapshot --send-state--> Synced
//!     \                  |                            |
//!      +------ close ----+------------+---------------+--> ChannelClosed
//!      +------ error ----+------------+---------------+--> ChannelErrored
//! ```
//!
//! Both end states are terminal for their channel. The controller never
//! reopens a channel on its own: a caller attaches a brand-new one, which
//! starts over at [`SyncState::Idle`].
//!
//! Bad inbound messages and events that reference unknown nodes are
//! logged and dropped. Neither ends the session.

use std::fmt;

use crate::{
    error::{Error, Result},
    events::Change,
    protocol::{Codec, Command, Event},
    registry::NodeRegistry,
    transport::{ChannelEvent, Outbound},
};

/// Lifecycle of the controller with respect to its current channel.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub enum SyncState {
    /// No channel has opened yet.
    #[default]
    Idle,

    /// The channel is open and a snapshot was requested.
    AwaitingSnapshot,

    Synced,

    /// The channel closed; the registry is stale.
    ChannelClosed,

    /// The channel failed; the registry is stale.
    ChannelErrored,
}

impl SyncState {
    /// Whether the mirrored state has not been loaded yet.
    #[must_use]
    pub fn is_loading(self) -> bool {
        matches!(self, Self::Idle | Self::AwaitingSnapshot)
    }

    /// Whether the channel this state belongs to has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ChannelClosed | Self::ChannelErrored)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingSnapshot => write!(f, "awaiting snapshot"),
            Self::Synced => write!(f, "synced"),
            Self::ChannelClosed => write!(f, "channel closed"),
            Self::ChannelErrored => write!(f, "channel errored"),
        }
    }
}

#[derive(Debug)]
pub struct Controller<C> {
    channel: Option<C>,
    state: SyncState,
    registry: NodeRegistry,
    codec: Codec,
    was_connection_error: bool,
}

impl<C: Outbound> Controller<C> {
    #[must_use]
    pub fn new(codec: Codec) -> Self {
        Self {
            channel: None,
            state: SyncState::Idle,
            registry: NodeRegistry::new(),
            codec,
            was_connection_error: false,
        }
    }

    /// Takes ownership of a fresh channel and starts over at `Idle`.
    ///
    /// A previous channel is closed. The registry keeps its nodes until the
    /// new channel delivers a snapshot.
    pub fn attach(&mut self, channel: C) {
        if let Some(mut previous) = self.channel.replace(channel) {
            previous.close();
        }

        self.was_connection_error = false;
        self.set_state(SyncState::Idle);
    }

    /// Dispatches one channel event to its handler.
    pub fn handle(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_open(),
            ChannelEvent::Message(frame) => self.on_message(&frame),
            ChannelEvent::Close(reason) => self.on_close(reason.as_deref()),
            ChannelEvent::Error(e) => self.on_error(&e),
        }
    }

    pub fn on_open(&mut self) {
        info!("channel opened, requesting state");
        self.set_state(SyncState::AwaitingSnapshot);

        if let Err(e) = self.send(&Command::RequestState) {
            error!("requesting state failed: {e}");
        }
    }

    /// Decodes and applies one inbound frame. Never fails: protocol errors
    /// drop the frame and reference errors discard the event.
    pub fn on_message(&mut self, frame: &[u8]) {
        trace!("received {} bytes", frame.len());

        let event = match self.codec.decode(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!("dropping message: {e}");
                return;
            }
        };

        debug!("received {event}");
        if let Err(e) = self.route(event) {
            error!("discarding event: {e}");
        }
    }

    fn route(&mut self, event: Event) -> Result<()> {
        match event {
            Event::FullState { config, nodes } => {
                self.registry.apply_full_state(config, nodes);
                if self.state == SyncState::AwaitingSnapshot {
                    self.set_state(SyncState::Synced);
                }
            }
            Event::SlaveState(update) => self.registry.apply_node_updated(update)?,
            Event::SlaveAdded(node) => self.registry.apply_node_added(node),
            Event::SlaveRemoved(id) => {
                self.registry.apply_node_removed(&id);
            }
            Event::LoginPassed(id) => self.registry.apply_login_result(&id, true)?,
            Event::LoginFailed(id) => self.registry.apply_login_result(&id, false)?,
        }

        Ok(())
    }

    pub fn on_close(&mut self, reason: Option<&str>) {
        match reason {
            Some(reason) if !reason.is_empty() => info!("channel closed: {reason}"),
            _ => info!("channel closed"),
        }

        self.end(SyncState::ChannelClosed);
    }

    pub fn on_error(&mut self, error: &Error) {
        error!("channel error: {error}");
        self.end(SyncState::ChannelErrored);
    }

    fn end(&mut self, state: SyncState) {
        self.channel = None;
        self.was_connection_error = true;
        self.registry.mark_stale();
        self.set_state(state);
    }

    fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            debug!("sync state: {} -> {state}", self.state);
            self.state = state;
        }

        // Also republished on `attach`, which always restarts the lifecycle.
        self.registry.publish(&Change::SyncState(state));
    }

    /// Encodes and sends `command` over the current channel.
    ///
    /// # Errors
    ///
    /// Returns a transport error when there is no open channel.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        let channel = self
            .channel
            .as_mut()
            .filter(|channel| channel.is_open())
            .ok_or_else(|| Error::transport("no open channel to the master"))?;

        let frame = self.codec.encode(command)?;
        debug!("sending {command}");
        channel.send(frame)
    }

    /// Starts closing the current channel, if any. Its close still arrives
    /// as a channel event.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    #[must_use]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    pub(crate) fn channel_mut(&mut self) -> Option<&mut C> {
        self.channel.as_mut()
    }

    /// Whether the last channel closed or failed. Reset by
    /// [`attach`](Self::attach).
    #[must_use]
    pub fn was_connection_error(&self) -> bool {
        self.was_connection_error
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        node::{ConnectionState, NodeId},
        transport::recording::Recorder,
    };

    fn frame(value: &serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    fn snapshot() -> Vec<u8> {
        frame(&json!({
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
    }

    fn synced() -> (Controller<Recorder>, Recorder) {
        let recorder = Recorder::new();
        let mut controller = Controller::new(Codec::default());
        controller.attach(recorder.clone());
        controller.on_open();
        controller.on_message(&snapshot());
        (controller, recorder)
    }

    #[test]
    fn open_requests_state_and_snapshot_syncs() {
        let recorder = Recorder::new();
        let mut controller = Controller::new(Codec::default());
        assert_eq!(controller.state(), SyncState::Idle);

        controller.attach(recorder.clone());
        controller.on_open();
        assert_eq!(controller.state(), SyncState::AwaitingSnapshot);
        assert!(controller.state().is_loading());
        assert_eq!(
            recorder.frames(),
            [json!({ "status": "request-state", "sender": "web-client", "data": {} })]
        );

        controller.on_message(&snapshot());
        assert_eq!(controller.state(), SyncState::Synced);

        let registry = controller.registry();
        assert_eq!(registry.len(), 1);
        let n1 = registry.node(&NodeId::from("n1")).unwrap();
        assert_eq!(n1.connection_state, ConnectionState::Connected);
        let connected: Vec<_> = registry.connected_nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(connected, ["n1"]);
    }

    #[test]
    fn malformed_message_is_dropped_and_state_stays_synced() {
        let (mut controller, _) = synced();
        let before = controller.registry().nodes().to_vec();

        controller.on_message(b"{ this is not json");
        controller.on_message(&frame(&json!({
            "status": "remove-slave",
            "sender": "slave",
            "data": { "uuid": "n1" }
        })));
        controller.on_message(&frame(&json!({
            "status": "self-destruct",
            "sender": "master",
            "data": {}
        })));

        assert_eq!(controller.state(), SyncState::Synced);
        assert_eq!(controller.registry().nodes(), before);
    }

    #[test]
    fn update_for_unknown_node_is_discarded() {
        let (mut controller, _) = synced();
        let before = controller.registry().nodes().to_vec();

        controller.on_message(&frame(&json!({
            "status": "send-slave-state",
            "sender": "master",
            "data": { "slave": { "uuid": "ghost", "is-paused": false } }
        })));

        assert_eq!(controller.state(), SyncState::Synced);
        assert_eq!(controller.registry().nodes(), before);
    }

    #[test]
    fn routes_incremental_events() {
        let (mut controller, _) = synced();

        controller.on_message(&frame(&json!({
            "status": "add-slave",
            "sender": "master",
            "data": { "slave": { "uuid": "n2", "name": null, "is-connected": false } }
        })));
        controller.on_message(&frame(&json!({
            "status": "send-slave-state",
            "sender": "master",
            "data": { "slave": {
                "uuid": "n1",
                "is-paused": false,
                "track-queue": [{ "id": "t1", "uri": "spotify:track:t1" }]
            } }
        })));
        controller.on_message(&frame(&json!({
            "status": "login-passed",
            "sender": "master",
            "data": { "uuid": "n2" }
        })));

        let registry = controller.registry();
        assert_eq!(registry.connected_nodes().count(), 2);
        let n1 = registry.node(&NodeId::from("n1")).unwrap();
        assert!(!n1.is_paused);
        assert_eq!(n1.now_playing().map(|t| t.uri.as_str()), Some("spotify:track:t1"));

        controller.on_message(&frame(&json!({
            "status": "remove-slave",
            "sender": "master",
            "data": { "uuid": "n1" }
        })));
        assert_eq!(controller.registry().len(), 1);
    }

    #[test]
    fn partial_update_resolves_pending_login() {
        let (mut controller, recorder) = synced();
        let id = NodeId::from("n1");

        crate::remote::Remote::new(&mut controller)
            .submit_credentials(&id, "Kitchen", "alice", "pw")
            .unwrap();
        assert_eq!(
            controller.registry().node(&id).unwrap().connection_state,
            ConnectionState::Connecting
        );

        controller.on_message(&frame(&json!({
            "status": "send-slave-state",
            "sender": "master",
            "data": { "slave": { "uuid": "n1", "is-paused": false } }
        })));

        let n1 = controller.registry().node(&id).unwrap();
        assert_eq!(n1.connection_state, ConnectionState::Disconnected);
        assert!(!n1.is_paused);
        assert_eq!(recorder.statuses(), ["request-state", "send-credentials"]);
    }

    #[test]
    fn close_keeps_nodes_and_marks_stale() {
        let (mut controller, recorder) = synced();
        let mut changes = controller.registry_mut().subscribe();

        controller.on_close(Some("bye"));
        assert_eq!(controller.state(), SyncState::ChannelClosed);
        assert!(controller.state().is_terminal());
        assert!(controller.was_connection_error());
        assert!(controller.registry().is_stale());
        assert_eq!(controller.registry().len(), 1);

        assert_eq!(changes.try_recv().ok(), Some(Change::Stale));
        assert_eq!(
            changes.try_recv().ok(),
            Some(Change::SyncState(SyncState::ChannelClosed))
        );

        let err = controller.send(&Command::RequestState).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Transport);
        assert_eq!(recorder.frames().len(), 1);
    }

    #[test]
    fn error_is_terminal_and_new_channel_restarts() {
        let (mut controller, _) = synced();

        controller.on_error(&Error::transport("connection reset"));
        assert_eq!(controller.state(), SyncState::ChannelErrored);
        assert!(controller.was_connection_error());

        let fresh = Recorder::new();
        controller.attach(fresh.clone());
        assert_eq!(controller.state(), SyncState::Idle);
        assert!(!controller.was_connection_error());
        assert!(controller.registry().is_stale());

        controller.on_open();
        controller.on_message(&snapshot());
        assert_eq!(controller.state(), SyncState::Synced);
        assert!(!controller.registry().is_stale());
        assert_eq!(fresh.statuses(), ["request-state"]);
    }

    #[test]
    fn send_after_local_close_fails_fast() {
        let (mut controller, recorder) = synced();

        controller.close();
        let err = controller.send(&Command::RequestState).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Transport);
        assert_eq!(recorder.statuses(), ["request-state"]);
    }
}

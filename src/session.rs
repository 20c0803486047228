//! The session: one controller, one channel at a time, one event loop.
//!
//! [`Session::run`] connects, then serves channel events and façade
//! requests from a single `select!` loop until the channel ends. Each
//! event or request is handled to completion before the next one is
//! polled, so all state changes are serialized without locks.
//!
//! User-facing code talks to the session through a cloneable [`Handle`].
//! Requests are served while [`Session::run`] or [`Session::run_after`] is
//! awaited. Commands that arrive while no channel is open fail with a
//! transport error; they are never held for the next channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::{
    config::Config,
    controller::{Controller, SyncState},
    error::{Error, Result},
    events::Change,
    node::{ClusterConfig, NodeId, SlaveNode, TrackRef},
    protocol::{Codec, Position},
    remote::{Remote, Request},
    transport::{Channel, Outbound},
};

/// A copy of the session state at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    pub sync_state: SyncState,
    pub was_connection_error: bool,
    pub is_stale: bool,
    pub config: ClusterConfig,
    pub nodes: Vec<SlaveNode>,
}

impl View {
    pub fn connected_nodes(&self) -> impl Iterator<Item = &SlaveNode> {
        self.nodes.iter().filter(|node| node.is_connected())
    }

    pub fn idle_nodes(&self) -> impl Iterator<Item = &SlaveNode> {
        self.nodes.iter().filter(|node| !node.is_connected())
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&SlaveNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }
}

#[derive(Debug)]
enum Job {
    Execute {
        request: Request,
        reply: oneshot::Sender<Result<()>>,
    },
    View(oneshot::Sender<View>),
    Subscribe(oneshot::Sender<mpsc::UnboundedReceiver<Change>>),
    Close,
}

#[derive(Debug)]
pub struct Session {
    config: Config,
    controller: Controller<Channel>,
    jobs_tx: mpsc::UnboundedSender<Job>,
    jobs_rx: mpsc::UnboundedReceiver<Job>,
}

impl Session {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        Self {
            controller: Controller::new(Codec::new(&config)),
            config,
            jobs_tx,
            jobs_rx,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle {
            jobs_tx: self.jobs_tx.clone(),
        }
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Change> {
        self.controller.registry_mut().subscribe()
    }

    #[must_use]
    pub fn controller(&self) -> &Controller<Channel> {
        &self.controller
    }

    /// Opens a new channel and runs until it closes or fails.
    ///
    /// Call again to reconnect; the new channel starts over at
    /// [`SyncState::Idle`] while the registry keeps its stale nodes.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the channel cannot be opened. A channel
    /// that ends after opening is not an error; see
    /// [`Controller::was_connection_error`].
    pub async fn run(&mut self) -> Result<SyncState> {
        let opened = Channel::open(&self.config.master_url).await;
        // Whatever queued up while connecting saw no open channel.
        self.drain();
        let channel = opened?;
        info!("connected to {}", self.config.master_url);
        self.controller.attach(channel);

        loop {
            let Some(channel) = self.controller.channel_mut() else {
                break;
            };

            tokio::select! {
                // Drain the channel first so requests see the newest state.
                biased;

                event = channel.next_event() => match event {
                    Some(event) => self.controller.handle(event),
                    None => break,
                },

                Some(job) = self.jobs_rx.recv() => self.serve(job),
            }
        }

        self.drain();
        Ok(self.controller.state())
    }

    /// Serves requests without a channel for `delay`, then
    /// [`run`](Self::run)s a new one.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run).
    pub async fn run_after(&mut self, delay: Duration) -> Result<SyncState> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                () = &mut sleep => break,

                Some(job) = self.jobs_rx.recv() => self.serve(job),
            }
        }

        self.run().await
    }

    fn drain(&mut self) {
        while let Ok(job) = self.jobs_rx.try_recv() {
            self.serve(job);
        }
    }

    fn serve(&mut self, job: Job) {
        match job {
            Job::Execute { request, reply } => {
                let result = Remote::new(&mut self.controller).execute(request);
                if let Err(e) = &result {
                    debug!("request failed: {e}");
                }
                let _ = reply.send(result);
            }
            Job::View(reply) => {
                let _ = reply.send(self.view());
            }
            Job::Subscribe(reply) => {
                let _ = reply.send(self.subscribe());
            }
            Job::Close => self.close(),
        }
    }

    #[must_use]
    pub fn view(&self) -> View {
        let registry = self.controller.registry();
        View {
            sync_state: self.controller.state(),
            was_connection_error: self.controller.was_connection_error(),
            is_stale: registry.is_stale(),
            config: registry.config(),
            nodes: registry.nodes().to_vec(),
        }
    }

    /// Starts closing the current channel. [`run`](Self::run) returns once
    /// the close completes.
    pub fn close(&mut self) {
        if self.controller.channel_mut().is_some_and(|channel| channel.is_open()) {
            info!("closing channel");
        }
        self.controller.close();
    }

    /// Closes the current channel and waits until it has ended.
    pub async fn stop(&mut self) {
        self.close();

        while let Some(channel) = self.controller.channel_mut() {
            match channel.next_event().await {
                Some(event) => self.controller.handle(event),
                None => break,
            }
        }
    }
}

/// Cloneable access to a [`Session`] from other tasks.
///
/// Every call waits for the session loop to serve it, never for the
/// master.
#[derive(Clone, Debug)]
pub struct Handle {
    jobs_tx: mpsc::UnboundedSender<Job>,
}

impl Handle {
    /// Executes a façade request on the session loop.
    ///
    /// # Errors
    ///
    /// Returns whatever the façade call returns, or `Internal` if the
    /// session is gone.
    pub async fn execute(&self, request: Request) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Execute { request, reply })?;
        rx.await.map_err(|_| gone())?
    }

    /// # Errors
    ///
    /// See [`Remote::submit_credentials`].
    pub async fn submit_credentials(
        &self,
        id: NodeId,
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<()> {
        self.execute(Request::SubmitCredentials {
            id,
            name: name.into(),
            username: username.into(),
            password: password.into(),
        })
        .await
    }

    /// # Errors
    ///
    /// See [`Remote::add_track`].
    pub async fn add_track(&self, id: NodeId, position: Position, track: TrackRef) -> Result<()> {
        self.execute(Request::AddTrack {
            id,
            position,
            track,
        })
        .await
    }

    /// # Errors
    ///
    /// See [`Remote::remove_track`].
    pub async fn remove_track(&self, id: NodeId, position: usize) -> Result<()> {
        self.execute(Request::RemoveTrack { id, position }).await
    }

    /// # Errors
    ///
    /// See [`Remote::remove_coming_up`].
    pub async fn remove_coming_up(&self, id: NodeId, index: usize) -> Result<()> {
        self.execute(Request::RemoveComingUp { id, index }).await
    }

    /// # Errors
    ///
    /// See [`Remote::play`].
    pub async fn play(&self, id: NodeId) -> Result<()> {
        self.execute(Request::Play(id)).await
    }

    /// # Errors
    ///
    /// See [`Remote::pause`].
    pub async fn pause(&self, id: NodeId) -> Result<()> {
        self.execute(Request::Pause(id)).await
    }

    /// # Errors
    ///
    /// See [`Remote::skip`].
    pub async fn skip(&self, id: NodeId) -> Result<()> {
        self.execute(Request::Skip(id)).await
    }

    /// # Errors
    ///
    /// See [`Remote::vote_for_skip`].
    pub async fn vote_for_skip(&self, id: NodeId) -> Result<()> {
        self.execute(Request::VoteForSkip(id)).await
    }

    /// # Errors
    ///
    /// Returns `Internal` if the session is gone.
    pub async fn view(&self) -> Result<View> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::View(reply))?;
        rx.await.map_err(|_| gone())
    }

    /// # Errors
    ///
    /// Returns `Internal` if the session is gone.
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Change>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Subscribe(reply))?;
        rx.await.map_err(|_| gone())
    }

    /// Asks the session to close its channel.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the session is gone.
    pub fn close(&self) -> Result<()> {
        self.submit(Job::Close)
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.jobs_tx.send(job).map_err(|_| gone())
    }
}

fn gone() -> Error {
    Error::internal("session is gone")
}

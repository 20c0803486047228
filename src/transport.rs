//! Transport Channel: one persistent websocket to the master.
//!
//! The channel knows nothing about the protocol. It delivers exactly one
//! [`ChannelEvent`] per underlying event, in order, to a single consumer:
//! first [`ChannelEvent::Open`], then any number of messages, and finally
//! one [`ChannelEvent::Close`] or [`ChannelEvent::Error`], after which it
//! yields nothing more.
//!
//! Outbound frames are handed to a writer task that owns the websocket
//! sink. Nothing is buffered for later: a send on a channel that is not
//! open fails immediately with a transport error.

use std::fmt;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    tungstenite::Message as WebsocketMessage, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::error::{Error, Result};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the channel observed.
#[derive(Debug)]
pub enum ChannelEvent {
    Open,
    Message(Vec<u8>),
    /// Closed by either side, with the peer's reason if it gave one.
    Close(Option<String>),
    Error(Error),
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    /// Closed locally, waiting for the stream to end.
    Closing,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// The sending side the controller talks through.
pub trait Outbound {
    /// Queues one text frame.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the channel is not open.
    fn send(&mut self, frame: String) -> Result<()>;

    /// Starts closing the channel. Closing twice has no effect.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// A websocket connection to the master.
pub struct Channel {
    url: Url,
    state: ChannelState,
    open_pending: bool,
    ws_rx: Option<SplitStream<Stream>>,
    writer_tx: Option<mpsc::UnboundedSender<WebsocketMessage>>,
    writer: Option<JoinHandle<()>>,
}

impl Channel {
    /// Connects to `url`.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the connection cannot be established.
    pub async fn open(url: &Url) -> Result<Self> {
        debug!("connecting to {url}");
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (ws_tx, ws_rx) = ws_stream.split();

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(Self::write(ws_tx, writer_rx));

        Ok(Self {
            url: url.clone(),
            state: ChannelState::Open,
            open_pending: true,
            ws_rx: Some(ws_rx),
            writer_tx: Some(writer_tx),
            writer: Some(writer),
        })
    }

    async fn write(
        mut ws_tx: SplitSink<Stream, WebsocketMessage>,
        mut writer_rx: mpsc::UnboundedReceiver<WebsocketMessage>,
    ) {
        while let Some(message) = writer_rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                error!("error sending frame: {e}");
                return;
            }
        }

        if let Err(e) = ws_tx.close().await {
            debug!("error closing sink: {e}");
        }
    }

    /// Waits for the next event. Returns `None` once the channel has
    /// delivered its final close or error event.
    ///
    /// Cancelling the returned future loses no events.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.open_pending {
            self.open_pending = false;
            return Some(ChannelEvent::Open);
        }

        let ws_rx = self.ws_rx.as_mut()?;
        let event = loop {
            match ws_rx.next().await {
                Some(Ok(WebsocketMessage::Text(text))) => {
                    break ChannelEvent::Message(text.as_bytes().to_vec());
                }
                Some(Ok(WebsocketMessage::Binary(data))) => {
                    break ChannelEvent::Message(data.to_vec());
                }
                Some(Ok(WebsocketMessage::Close(frame))) => {
                    break ChannelEvent::Close(frame.map(|frame| (*frame.reason).to_owned()));
                }
                // Pings are answered by the websocket layer.
                Some(Ok(other)) => trace!("ignoring {} byte control frame", other.len()),
                Some(Err(e)) => break ChannelEvent::Error(e.into()),
                None => break ChannelEvent::Close(None),
            }
        };

        if matches!(event, ChannelEvent::Close(_) | ChannelEvent::Error(_)) {
            self.shut_down();
        }

        Some(event)
    }

    fn shut_down(&mut self) {
        self.state = ChannelState::Closed;
        self.ws_rx = None;
        self.writer_tx = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Outbound for Channel {
    fn send(&mut self, frame: String) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(Error::transport(format!("channel is {}", self.state)));
        }

        trace!("sending frame: {frame}");
        let writer_tx = self
            .writer_tx
            .as_ref()
            .ok_or_else(|| Error::transport("writer is gone"))?;
        writer_tx
            .send(WebsocketMessage::text(frame))
            .map_err(|_| Error::transport("writer is gone"))
    }

    fn close(&mut self) {
        if self.state != ChannelState::Open {
            return;
        }

        debug!("closing channel to {}", self.url);
        self.state = ChannelState::Closing;

        // The writer drains what is queued, then closes the sink.
        self.writer_tx = None;
    }

    fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("url", &self.url.as_str())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

/// An [`Outbound`] that records every frame it is asked to send.
#[cfg(test)]
pub(crate) mod recording {
    use std::{cell::RefCell, rc::Rc};

    use super::Outbound;
    use crate::error::{Error, Result};

    /// Clones share the same record.
    #[derive(Clone, Debug)]
    pub struct Recorder {
        inner: Rc<RefCell<Record>>,
    }

    #[derive(Debug)]
    struct Record {
        frames: Vec<String>,
        open: bool,
    }

    impl Recorder {
        pub fn new() -> Self {
            Self {
                inner: Rc::new(RefCell::new(Record {
                    frames: Vec::new(),
                    open: true,
                })),
            }
        }

        /// Sent frames, parsed back into JSON.
        pub fn frames(&self) -> Vec<serde_json::Value> {
            self.inner
                .borrow()
                .frames
                .iter()
                .map(|frame| serde_json::from_str(frame).unwrap())
                .collect()
        }

        pub fn statuses(&self) -> Vec<String> {
            self.frames()
                .iter()
                .map(|frame| frame["status"].as_str().unwrap().to_owned())
                .collect()
        }
    }

    impl Outbound for Recorder {
        fn send(&mut self, frame: String) -> Result<()> {
            let mut record = self.inner.borrow_mut();
            if !record.open {
                return Err(Error::transport("recorder is closed"));
            }
            record.frames.push(frame);
            Ok(())
        }

        fn close(&mut self) {
            self.inner.borrow_mut().open = false;
        }

        fn is_open(&self) -> bool {
            self.inner.borrow().open
        }
    }
}

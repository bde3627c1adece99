//! The single real-time socket between the relay and the stim server.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone)]
struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn load(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Handle to an open (or opening) socket.
///
/// Frames are only accepted while the socket is [`ReadyState::Open`]; anything
/// offered in another state is discarded. Dropping the handle closes the socket.
#[derive(Debug)]
pub struct Connection {
    endpoint: Url,
    state: SharedReadyState,
    outbound: mpsc::UnboundedSender<String>,
}

impl Connection {
    /// Starts connecting in the background and returns immediately.
    ///
    /// Inbound text frames are delivered on the returned receiver, which closes
    /// when the socket does. A failed handshake is logged and leaves the handle
    /// `Closed`; it is never retried.
    pub fn open(endpoint: Url) -> (Self, mpsc::UnboundedReceiver<String>) {
        let state = SharedReadyState::new(ReadyState::Connecting);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive_socket(
            endpoint.clone(),
            state.clone(),
            outbound_rx,
            inbound_tx,
        ));

        (
            Self {
                endpoint,
                state,
                outbound,
            },
            inbound_rx,
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    /// Hands a frame to the writer. Returns `false` when the frame was dropped.
    pub fn send_text(&self, text: String) -> bool {
        if self.ready_state() != ReadyState::Open {
            return false;
        }
        self.outbound.send(text).is_ok()
    }

    /// A connection with no socket behind it; frames land on the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(state: ReadyState) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let endpoint = Url::parse("ws://detached.invalid:5545").expect("static url");
        (
            Self {
                endpoint,
                state: SharedReadyState::new(state),
                outbound,
            },
            outbound_rx,
        )
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: ReadyState) {
        self.state.store(state);
    }
}

async fn drive_socket(
    endpoint: Url,
    state: SharedReadyState,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<String>,
) {
    let ws_stream = match connect_async(endpoint.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(err) => {
            warn!(endpoint = %endpoint, %err, "relay socket failed to connect");
            state.store(ReadyState::Closed);
            return;
        }
    };
    state.store(ReadyState::Open);
    info!(endpoint = %endpoint, "relay socket connected");

    let (mut ws_writer, mut ws_reader) = ws_stream.split();

    let writer_state = state.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(err) = ws_writer.send(Message::Text(text)).await {
                debug!(%err, "relay socket write failed");
                break;
            }
        }
        writer_state.store(ReadyState::Closing);
        let _ = ws_writer.close().await;
    });

    while let Some(msg) = ws_reader.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if inbound_tx.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                state.store(ReadyState::Closing);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(endpoint = %endpoint, %err, "relay socket receive failed");
                break;
            }
        }
    }

    state.store(ReadyState::Closed);
    writer_task.abort();
    info!(endpoint = %endpoint, "relay socket closed");
}

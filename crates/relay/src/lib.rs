use std::sync::{Arc, OnceLock, Weak};

use serde_json::Value;
use shared::{
    domain::{PageLocation, RELAY_PORT},
    error::ProtocolError,
    protocol::{parse_state_frame, OutboundMessage, StateMap},
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

pub mod connection;
pub mod hooks;
pub mod sequencer;
pub mod state;
pub mod stimulus;

pub use connection::{Connection, ReadyState};
pub use hooks::TrialHooks;
pub use sequencer::{CheckerFrame, RunSummary, Sequencer, Shade, TrialPlan};
pub use state::Datastore;
pub use stimulus::{Fixation, RadialCheckerboard, StimulusImage};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay is already connected to {0}")]
    AlreadyConnected(String),
    #[error("cannot derive relay endpoint: {0}")]
    Endpoint(#[source] ProtocolError),
    #[error("invalid inbound frame: {0}")]
    InvalidFrame(#[from] ProtocolError),
}

/// Forwards experiment lifecycle events to the stim server and folds server
/// pushes back into experiment state.
///
/// Every send is best-effort: while the socket is missing or not open, frames
/// are dropped without error.
pub struct TriggerRelay {
    port: u16,
    connection: OnceLock<Connection>,
    state: Mutex<Datastore>,
}

impl TriggerRelay {
    pub fn new() -> Arc<Self> {
        Self::with_port(RELAY_PORT)
    }

    pub fn with_port(port: u16) -> Arc<Self> {
        Arc::new(Self {
            port,
            connection: OnceLock::new(),
            state: Mutex::new(Datastore::default()),
        })
    }

    /// Opens the one connection for this relay, on the page host.
    pub fn connect(self: &Arc<Self>, location: &PageLocation) -> Result<(), RelayError> {
        if let Some(existing) = self.connection.get() {
            return Err(RelayError::AlreadyConnected(existing.endpoint().to_string()));
        }
        let endpoint = location
            .relay_endpoint(self.port)
            .map_err(RelayError::Endpoint)?;
        info!(endpoint = %endpoint, "relay connecting");

        let (connection, inbound) = Connection::open(endpoint);
        self.connection
            .set(connection)
            .map_err(|lost| RelayError::AlreadyConnected(lost.endpoint().to_string()))?;

        tokio::spawn(dispatch_inbound(Arc::downgrade(self), inbound));
        Ok(())
    }

    /// `None` until [`TriggerRelay::connect`] has been called.
    pub fn ready_state(&self) -> Option<ReadyState> {
        self.connection.get().map(Connection::ready_state)
    }

    /// Sends `message` if the socket is open; returns whether it went out.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let Some(connection) = self.connection.get() else {
            return false;
        };
        if connection.ready_state() != ReadyState::Open {
            debug!(kind = message.kind(), "relay not open; dropping frame");
            return false;
        }
        match serde_json::to_string(message) {
            Ok(text) => connection.send_text(text),
            Err(err) => {
                warn!(kind = message.kind(), %err, "failed to encode relay frame");
                false
            }
        }
    }

    /// Streams the full committed state after a commit.
    pub fn on_commit(&self, snapshot: StateMap) -> bool {
        self.send(&OutboundMessage::LogJson { value: snapshot })
    }

    /// Merges a server push into state and commits it in one step.
    ///
    /// The commit echoes the merged state back out as a single LOGJSON frame.
    pub async fn on_message(&self, raw: &str) -> Result<StateMap, RelayError> {
        let frame = parse_state_frame(raw)?;
        Ok(self.commit_with(|store| store.stage_all(frame)).await)
    }

    pub fn send_trigger(&self, label: &str, start: f64, stop: f64) -> bool {
        info!(label, start, stop, "trigger");
        self.send(&OutboundMessage::Trigger {
            value: label.to_string(),
            start,
            stop,
        })
    }

    pub fn send_event(&self, label: &str) -> bool {
        info!(label, "event");
        self.send(&OutboundMessage::Event {
            value: label.to_string(),
        })
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.lock().await.set(key, value);
    }

    /// Commits staged state and streams the result.
    pub async fn commit(&self) -> StateMap {
        self.commit_with(|_| {}).await
    }

    pub async fn snapshot(&self) -> StateMap {
        self.state.lock().await.snapshot()
    }

    pub async fn commit_count(&self) -> u64 {
        self.state.lock().await.commit_count()
    }

    /// Stages every key of `record` and commits them together.
    pub async fn commit_record(&self, record: StateMap) -> StateMap {
        self.commit_with(|store| store.stage_all(record)).await
    }

    /// Stages, commits and streams under one lock, so concurrent commits never
    /// see each other's partial writes and their frames leave in commit order.
    pub(crate) async fn commit_with(&self, stage: impl FnOnce(&mut Datastore)) -> StateMap {
        let mut store = self.state.lock().await;
        stage(&mut store);
        let snapshot = store.commit();
        self.on_commit(snapshot.clone());
        snapshot
    }

    #[cfg(test)]
    fn attach(&self, connection: Connection) {
        if self.connection.set(connection).is_err() {
            panic!("relay already has a connection");
        }
    }

    #[cfg(test)]
    fn connection(&self) -> Option<&Connection> {
        self.connection.get()
    }
}

async fn dispatch_inbound(relay: Weak<TriggerRelay>, mut inbound: mpsc::UnboundedReceiver<String>) {
    while let Some(raw) = inbound.recv().await {
        let Some(relay) = relay.upgrade() else {
            break;
        };
        if let Err(err) = relay.on_message(&raw).await {
            warn!(%err, "dropping inbound frame");
        }
    }
    debug!("relay inbound dispatch finished");
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

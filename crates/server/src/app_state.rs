use shared::protocol::SampleTrigger;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

const STREAM_CAPACITY: usize = 256;

/// Output streams of the stim server.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) triggers: broadcast::Sender<SampleTrigger>,
    pub(crate) events: broadcast::Sender<SampleTrigger>,
}

impl AppState {
    pub(crate) fn new() -> Self {
        let (triggers, _) = broadcast::channel(STREAM_CAPACITY);
        let (events, _) = broadcast::channel(STREAM_CAPACITY);
        Self { triggers, events }
    }
}

/// Logs everything published on `rx` until the stream closes.
pub(crate) fn spawn_debug_log(stream: &'static str, mut rx: broadcast::Receiver<SampleTrigger>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(sample) => debug!(
                    stream,
                    value = ?sample.value,
                    period = ?sample.period,
                    timestamp = %sample.timestamp,
                    "sample trigger"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(stream, skipped, "debug log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

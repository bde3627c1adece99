use std::{future::IntoFuture, path::Path, sync::Arc};

use axum::{
    extract::{ws::Message, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use tower_http::services::ServeDir;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::{classify_frame, publish};
use app_state::{spawn_debug_log, AppState};
use config::load_settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let state = Arc::new(AppState::new());
    spawn_debug_log("trigger", state.triggers.subscribe());
    spawn_debug_log("event", state.events.subscribe());

    let http_addr = settings.http_addr()?;
    let ws_addr = settings.ws_addr()?;
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await?;
    info!(
        %http_addr,
        web_dir = %settings.web_dir.display(),
        "stim server listening"
    );
    info!(%ws_addr, "relay websocket listening");

    let http = axum::serve(http_listener, build_http_router(&settings.web_dir));
    let ws = axum::serve(ws_listener, build_ws_router(state));
    let result = tokio::try_join!(http.into_future(), ws.into_future());
    info!("closing websocket server");
    result?;
    Ok(())
}

fn build_http_router(web_dir: &Path) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback_service(ServeDir::new(web_dir))
}

fn build_ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/*path", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, mut socket: axum::extract::ws::WebSocket) {
    info!("client connected to websocket input");

    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Text(text)) => match classify_frame(&text, Utc::now()) {
                Ok(frame) => publish(&state, frame),
                Err(err) => {
                    warn!(%err, "error in websocket server");
                    break;
                }
            },
            Ok(Message::Close(_)) => {
                info!("websocket client closed connection");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "error in websocket server");
                break;
            }
        }
    }

    info!("websocket client handler concluded");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

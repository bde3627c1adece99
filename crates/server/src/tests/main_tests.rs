use super::*;

use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
};
use futures::{SinkExt, StreamExt};
use rand::{rngs::StdRng, SeedableRng};
use relay::{ReadyState, Sequencer, TrialHooks, TrialPlan, TriggerRelay};
use serde_json::json;
use shared::{
    domain::{PageLocation, QueryParameters, RunParameters, SettingsForm},
    protocol::SampleTrigger,
};
use tokio::{net::TcpListener, sync::broadcast, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message as ClientMessage};
use tower::ServiceExt;

async fn serve_ws(state: Arc<AppState>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        axum::serve(listener, build_ws_router(state))
            .await
            .expect("serve");
    });
    port
}

async fn connected_relay(port: u16) -> Arc<TriggerRelay> {
    let relay = TriggerRelay::with_port(port);
    relay
        .connect(&PageLocation::parse("http://127.0.0.1/").expect("page"))
        .expect("connect");
    timeout(Duration::from_secs(5), async {
        while relay.ready_state() != Some(ReadyState::Open) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay opened");
    relay
}

async fn next_sample(rx: &mut broadcast::Receiver<SampleTrigger>) -> SampleTrigger {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("sample before timeout")
        .expect("stream open")
}

fn params(query: &str) -> RunParameters {
    SettingsForm::from(&QueryParameters::from_query(query))
        .submit()
        .expect("valid parameters")
}

#[tokio::test]
async fn healthz_reports_ok() {
    let dir = tempfile::tempdir().expect("tempdir");
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = build_http_router(dir.path())
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn serves_stimulus_pages_from_web_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("index.html"), "<main>stim</main>").expect("write page");
    let app = build_http_router(dir.path());

    let page = app
        .clone()
        .oneshot(
            Request::get("/index.html")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(page.status(), StatusCode::OK);
    let body = body::to_bytes(page.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"<main>stim</main>");

    let missing = app
        .oneshot(
            Request::get("/missing.js")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn relay_hooks_arrive_as_events_and_triggers() {
    let state = Arc::new(AppState::new());
    let mut triggers = state.triggers.subscribe();
    let mut events = state.events.subscribe();
    let port = serve_ws(state.clone()).await;
    let relay = connected_relay(port).await;

    let hooks = TrialHooks::new(&relay, params("strobe_freq=8&trial_dur=250"));
    hooks.fixation_started();
    hooks.fixation_ended();

    assert_eq!(next_sample(&mut events).await.value, Some(json!("0")));
    assert_eq!(next_sample(&mut events).await.value, Some(json!("8Hz")));

    let trigger = next_sample(&mut triggers).await;
    assert_eq!(trigger.value, Some(json!("8Hz")));
    assert_eq!(trigger.period, Some((-0.25, 0.25)));
}

#[tokio::test]
async fn full_run_publishes_one_trigger_per_trial() {
    let state = Arc::new(AppState::new());
    let mut triggers = state.triggers.subscribe();
    let mut events = state.events.subscribe();
    let port = serve_ws(state.clone()).await;
    let relay = connected_relay(port).await;

    let plan = TrialPlan::new(params("trials=3&trial_dur=100&strobe_freq=20&isi_jitter=20"));
    let mut rng = StdRng::seed_from_u64(3);
    let summary = Sequencer::new(&relay, plan).run(&mut rng).await;
    assert_eq!(summary.trials, 3);
    assert_eq!(summary.reversals, 6);

    for _ in 0..3 {
        let trigger = next_sample(&mut triggers).await;
        assert_eq!(trigger.value, Some(json!("20Hz")));
        assert_eq!(trigger.period, Some((-0.1, 0.1)));
    }
    let mut event_values = Vec::new();
    for _ in 0..6 {
        event_values.push(next_sample(&mut events).await.value);
    }
    assert_eq!(
        event_values,
        [Some(json!("0")), Some(json!("20Hz"))].iter().cloned().cycle().take(6).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn unknown_frames_are_skipped_but_malformed_json_ends_the_handler() {
    let state = Arc::new(AppState::new());
    let mut events = state.events.subscribe();
    let port = serve_ws(state.clone()).await;

    let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}/"))
        .await
        .expect("connect");
    client
        .send(ClientMessage::Text(r#"{"type":"PING"}"#.into()))
        .await
        .expect("send");
    client
        .send(ClientMessage::Text("[1,2]".into()))
        .await
        .expect("send");
    client
        .send(ClientMessage::Text(r#"{"type":"EVENT","value":"alive"}"#.into()))
        .await
        .expect("send");
    assert_eq!(next_sample(&mut events).await.value, Some(json!("alive")));

    client
        .send(ClientMessage::Text("{broken".into()))
        .await
        .expect("send");
    timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(ClientMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("server dropped the connection");
}

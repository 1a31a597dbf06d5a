//! End-to-end tests: a scripted WebSocket server on one side, the real
//! transport/manager/engine stack on the other.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use draftsync::api::{
    GenerationApi, GenerationRequest, InputType, ProcessStateRow, StartResponse, StateSnapshot,
};
use draftsync::engine::GenerationEngine;
use draftsync::errors::{ApiError, RealtimeError};
use draftsync::realtime::{RealtimeTransport, TransportEvent, WsTransport};
use draftsync::reconciler::{StepId, StepStatus};

// ── Scripted server side ─────────────────────────────────────────────

async fn accept_and_ack(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    let msg = ws.next().await.unwrap().unwrap();
    let frame: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(frame["type"], "subscribe");
    assert_eq!(frame["data"]["process_id"], "p1");
    assert_eq!(frame["data"]["token"], "tok");

    ws.send(Message::Text(
        json!({"type": "subscribed", "data": {"process_id": "p1"}}).to_string(),
    ))
    .await
    .unwrap();
    ws
}

fn event_frame(id: &str, event_type: &str, data: Value) -> Message {
    Message::Text(
        json!({
            "type": "event_inserted",
            "data": {
                "event": {
                    "id": id,
                    "process_id": "p1",
                    "event_type": event_type,
                    "event_data": data,
                    "created_at": "2026-08-01T12:00:00Z",
                }
            }
        })
        .to_string(),
    )
}

fn row_frame(fields: Value) -> Message {
    let mut row = json!({"id": "p1", "user_id": "u1"});
    if let (Some(base), Some(extra)) = (row.as_object_mut(), fields.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    Message::Text(json!({"type": "row_updated", "data": {"row": row}}).to_string())
}

// ── Stub HTTP API (the manager's initial fetch) ──────────────────────

struct StubApi;

#[async_trait]
impl GenerationApi for StubApi {
    async fn fetch_process(&self, process_id: &str) -> Result<ProcessStateRow, ApiError> {
        Ok(ProcessStateRow {
            id: process_id.to_string(),
            user_id: Some("u1".to_string()),
            state: StateSnapshot::default(),
        })
    }
    async fn submit_user_input(&self, _: &str, _: InputType, _: Value) -> Result<(), ApiError> {
        Ok(())
    }
    async fn pause(&self, _: &str) -> Result<bool, ApiError> {
        Ok(true)
    }
    async fn resume(&self, _: &str) -> Result<bool, ApiError> {
        Ok(true)
    }
    async fn cancel(&self, _: &str) -> Result<bool, ApiError> {
        Ok(true)
    }
    async fn start_generation(&self, _: &GenerationRequest) -> Result<StartResponse, ApiError> {
        Ok(StartResponse {
            process_id: "p-new".to_string(),
            status: None,
        })
    }
}

// ── Transport-level tests ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn transport_subscribes_and_streams_both_shapes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut ws = accept_and_ack(&listener).await;
        ws.send(event_frame(
            "e1",
            "step_started",
            json!({"step_name": "keyword_analysis"}),
        ))
        .await
        .unwrap();
        ws.send(row_frame(json!({
            "status": "running",
            "current_step": "persona_generation",
        })))
        .await
        .unwrap();
        // Hold the socket open until the client hangs up.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let transport = WsTransport::new(format!("ws://{addr}"));
    let mut subscription = transport.open("p1", "tok").await.unwrap();

    match subscription.next().await {
        Some(TransportEvent::EventInserted(event)) => {
            assert_eq!(event.id, "e1");
            assert_eq!(event.event_type, "step_started");
        }
        other => panic!("Expected EventInserted, got {other:?}"),
    }
    match subscription.next().await {
        Some(TransportEvent::RowUpdated(row)) => {
            assert_eq!(row.id, "p1");
            assert_eq!(row.state.backend_step(), Some("persona_generation"));
        }
        other => panic!("Expected RowUpdated, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_surfaces_subscribe_rejection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        ws.send(Message::Text(
            json!({"type": "error", "data": {"message": "invalid token"}}).to_string(),
        ))
        .await
        .unwrap();
    });

    let transport = WsTransport::new(format!("ws://{addr}"));
    let err = transport.open("p1", "bad").await.unwrap_err();
    match err {
        RealtimeError::SubscribeRejected(message) => assert!(message.contains("invalid token")),
        other => panic!("Expected SubscribeRejected, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_reports_remote_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let ws = accept_and_ack(&listener).await;
        drop(ws);
    });

    let transport = WsTransport::new(format!("ws://{addr}"));
    let mut subscription = transport.open("p1", "tok").await.unwrap();
    match subscription.next().await {
        Some(TransportEvent::Closed { .. }) => {}
        other => panic!("Expected Closed, got {other:?}"),
    }
}

// ── Full-stack test: server → transport → manager → reconciler ───────

#[tokio::test(flavor = "multi_thread")]
async fn engine_reconciles_a_live_stream_and_survives_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // First connection: stream a few pipeline transitions, then
        // drop the socket to force a reconnect.
        let mut ws = accept_and_ack(&listener).await;
        ws.send(event_frame("e1", "generation_started", json!({})))
            .await
            .unwrap();
        ws.send(event_frame(
            "e2",
            "step_completed",
            json!({"step_name": "keyword_analysis"}),
        ))
        .await
        .unwrap();
        drop(ws);

        // Second connection: replay one already-seen event (redelivery)
        // plus the next transition.
        let mut ws = accept_and_ack(&listener).await;
        ws.send(event_frame(
            "e2",
            "step_completed",
            json!({"step_name": "keyword_analysis"}),
        ))
        .await
        .unwrap();
        ws.send(event_frame(
            "e3",
            "user_input_required",
            json!({
                "input_type": "select_persona",
                "personas": [{"id": 1, "name": "Writer", "description": ""}],
            }),
        ))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let transport = Arc::new(WsTransport::new(format!("ws://{addr}")));
    let engine = GenerationEngine::new(transport, Arc::new(StubApi), "p1", "u1", "tok");
    let mut state = engine.state();
    engine.connect().await;

    // End state: keyword analysis completed (applied once despite the
    // replay), persona step waiting for a decision.
    loop {
        state.changed().await.unwrap();
        if state.borrow().is_waiting_for_input {
            break;
        }
    }
    let snapshot = state.borrow().clone();
    assert_eq!(snapshot.current_step, StepId::PersonaGenerating);
    assert_eq!(
        snapshot.step_status(StepId::KeywordAnalyzing),
        StepStatus::Completed
    );
    assert_eq!(snapshot.input_type, Some(InputType::SelectPersona));
    assert_eq!(snapshot.personas.len(), 1);

    // The reconnect bumped the attempt counter and recovered.
    let connection = engine.connection().borrow().clone();
    assert!(connection.is_connected);

    engine.disconnect().await;
}

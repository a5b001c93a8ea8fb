//! Streaming ask handler
//!
//! `POST /ask-smart-stream` answers over `text/event-stream`. Progress and
//! retrieval events flow while the strategy runs; the final answer arrives
//! as a `result` event followed by `metadata` and a terminal `done` event.
//! Errors become an `error` event; `done` is always delivered.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use std::convert::Infallible;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use super::ask::{to_ask_request, AskApiResponse, AskBody};
use crate::AppState;
use smartrag_engine::progress::{ProgressBus, StreamItem, PROGRESS_BUFFER};

fn json_event(name: &str, payload: &impl serde::Serialize) -> Event {
    match serde_json::to_string(payload) {
        Ok(data) => Event::default().event(name.to_string()).data(data),
        Err(e) => {
            tracing::error!(error = %e, event = name, "Failed to serialize SSE payload");
            Event::default()
                .event("error".to_string())
                .data(r#"{"kind": "INTERNAL_ERROR", "message": "serialization failed"}"#)
        }
    }
}

fn item_event(item: StreamItem) -> Event {
    match item {
        StreamItem::Progress(event) => json_event("progress", &event),
        StreamItem::Retrieval(summary) => json_event("retrieval", &summary),
    }
}

/// POST /ask-smart-stream
pub async fn ask_smart_stream(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (out_tx, out_rx) = mpsc::channel::<Event>(PROGRESS_BUFFER);

    match to_ask_request(body, None) {
        Ok(request) => {
            let router = state.router.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let (bus, mut progress_rx) = ProgressBus::channel(PROGRESS_BUFFER);
                let mut ask = Box::pin(router.ask(request, bus));
                let mut progress_open = true;

                let result = loop {
                    tokio::select! {
                        item = progress_rx.recv(), if progress_open => match item {
                            Some(item) => {
                                // A gone consumer also closes the bus, which
                                // cancels the run at its next stage boundary
                                let _ = out_tx.send(item_event(item)).await;
                            }
                            None => progress_open = false,
                        },
                        result = &mut ask => break result,
                    }
                };

                // Drain progress emitted while the final stages completed
                while let Ok(item) = progress_rx.try_recv() {
                    let _ = out_tx.send(item_event(item)).await;
                }

                match result {
                    Ok(response) => {
                        let total_time_ms = start.elapsed().as_millis() as u64;
                        let api = AskApiResponse::from_engine(response);
                        let metadata = serde_json::json!({
                            "token_usage": api.token_usage,
                            "cost": api.token_cost_usd,
                            "total_time_ms": total_time_ms,
                        });
                        let _ = out_tx.send(json_event("result", &api)).await;
                        let _ = out_tx.send(json_event("metadata", &metadata)).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Streaming ask failed");
                        let payload = serde_json::json!({
                            "kind": e.kind().as_str(),
                            "message": e.public_message(),
                        });
                        let _ = out_tx.send(json_event("error", &payload)).await;
                    }
                }

                // The terminal event is always delivered
                let _ = out_tx
                    .send(Event::default().event("done".to_string()).data("[DONE]"))
                    .await;
            });
        }
        Err(e) => {
            // Invalid input still answers over the stream contract
            let payload = serde_json::json!({
                "kind": e.kind().as_str(),
                "message": e.public_message(),
            });
            let _ = out_tx.try_send(json_event("error", &payload));
            let _ = out_tx.try_send(Event::default().event("done".to_string()).data("[DONE]"));
        }
    }

    Sse::new(ReceiverStream::new(out_rx).map(Ok::<Event, Infallible>))
        .keep_alive(KeepAlive::default())
}

use axum::Json;
use axum::extract::{Query, State};
use axum::response::Sse;
use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use super::AppState;
use crate::FaqError;
use crate::chat::handle_chat_message;

#[derive(Debug, Deserialize)]
pub(super) struct MessageQuery {
    user_message: String,
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// Stream the answer as server-sent events, one raw text fragment per event
pub(super) async fn conversation_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Sse<impl Stream<Item = Result<Event, FaqError>>> {
    info!("Received user message ({} chars)", query.user_message.chars().count());

    let stream = handle_chat_message(state.factory, query.user_message).map(|chunk| {
        chunk
            .map(|text| Event::default().data(text))
            .inspect_err(|e| error!("Aborting answer stream: {}", e))
    });
    Sse::new(stream)
}

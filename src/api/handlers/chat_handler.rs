use axum::{
    Json,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    api::{app_state::AppState, dto::chat_dto::ChatRequest, sse},
    error::AppError,
    models::conversation::{ChatTurn, validate_conversation},
    observability::AppMetrics,
    services::llm::{ChatCompletionStream, LlmError},
};

/// Fixed apology emitted when the provider rejects the output on policy
/// grounds. The stream still completes normally.
const CONTENT_FILTER_APOLOGY: &str =
    "Beklager, jeg kan ikke svare på det. Er det noe annet om FAIA jeg kan hjelpe deg med?";

/// Generic message for the hardened provider-failure path.
const STREAM_ERROR_MESSAGE: &str = "stream_failed";

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let request_id = Uuid::new_v4();
    state.metrics.record_chat_request();

    let messages = request.messages.unwrap_or_default();
    let contents: Vec<&str> = messages
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    let turns = validate_conversation(&contents).map_err(|e| {
        state.metrics.record_validation_error();
        debug!(%request_id, "Conversation rejected: {}", e);
        AppError::Validation(e.to_string())
    })?;

    debug!(%request_id, turns = turns.len(), "Chat request validated");

    let system_prompt = state.prompt_builder.build().await;

    let (tx, rx) = mpsc::channel::<Bytes>(32);
    let llm = state.llm.clone();
    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        relay_stream(llm, system_prompt, turns, tx, metrics, request_id).await;
    });

    let body = Body::from_stream(
        ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>),
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Relay the provider token stream to the client as SSE frames.
///
/// A failed channel send means the response body was dropped, i.e. the client
/// disconnected: stop at once without the terminator frame, and let dropping
/// the provider stream abort the upstream call. Every other ending emits the
/// `[DONE]` terminator.
async fn relay_stream(
    llm: std::sync::Arc<dyn ChatCompletionStream>,
    system_prompt: String,
    turns: Vec<ChatTurn>,
    tx: mpsc::Sender<Bytes>,
    metrics: AppMetrics,
    request_id: Uuid,
) {
    match llm.stream_chat(&system_prompt, &turns).await {
        Ok(mut stream) => {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(fragment) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        let frame = Bytes::from(sse::encode_data_frame(&fragment));
                        if tx.send(frame).await.is_err() {
                            metrics.record_stream_cancelled();
                            debug!(%request_id, "Client disconnected mid-stream");
                            return;
                        }
                    }
                    Err(LlmError::ContentFiltered) => {
                        if !substitute_apology(&tx, &metrics, request_id).await {
                            return;
                        }
                        break;
                    }
                    Err(e) => {
                        if !surface_stream_error(&tx, &metrics, request_id, &e).await {
                            return;
                        }
                        break;
                    }
                }
            }
        }
        Err(LlmError::ContentFiltered) => {
            if !substitute_apology(&tx, &metrics, request_id).await {
                return;
            }
        }
        Err(e) => {
            if !surface_stream_error(&tx, &metrics, request_id, &e).await {
                return;
            }
        }
    }

    if tx.send(Bytes::from_static(sse::DONE_FRAME.as_bytes())).await.is_ok() {
        metrics.record_stream_completed();
    } else {
        metrics.record_stream_cancelled();
    }
}

/// Replace a content-filtered response with the fixed apology frame.
///
/// Returns false when the client is already gone.
async fn substitute_apology(
    tx: &mpsc::Sender<Bytes>,
    metrics: &AppMetrics,
    request_id: Uuid,
) -> bool {
    metrics.record_content_filtered();
    debug!(%request_id, "Provider content filter triggered, substituting apology");
    tx.send(Bytes::from(sse::encode_data_frame(CONTENT_FILTER_APOLOGY)))
        .await
        .is_ok()
}

/// Surface a non-filter provider failure as a generic SSE error event.
///
/// Returns false when the client is already gone.
async fn surface_stream_error(
    tx: &mpsc::Sender<Bytes>,
    metrics: &AppMetrics,
    request_id: Uuid,
    error: &LlmError,
) -> bool {
    metrics.record_provider_error();
    error!(%request_id, "Provider stream failed: {}", error);
    tx.send(Bytes::from(sse::encode_event_frame(
        "error",
        STREAM_ERROR_MESSAGE,
    )))
    .await
    .is_ok()
}

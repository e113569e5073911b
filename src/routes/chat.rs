use std::convert::Infallible;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::{Stream, stream};
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::{
    error::AppError,
    services::{
        normalizer::{Normalized, normalize},
        translator::{
            CompletionMeta, DONE_FRAME, completion, translate_batch, translate_stream,
        },
        upstream::{Delivery, ForwardHeaders},
    },
    state::SharedState,
};

pub async fn chat_completions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("chat", %request_id);
    handle_chat(state, headers, body, request_id)
        .instrument(span)
        .await
}

async fn handle_chat(
    state: SharedState,
    headers: HeaderMap,
    body: Bytes,
    request_id: String,
) -> Result<Response, AppError> {
    let normalized = normalize(
        &body,
        state.config.query_mode,
        state.config.default_temperature,
    )?;

    let (query, model) = match normalized {
        Normalized::Meta { stream: streaming, model } => {
            info!(streaming, "blocked title/summary request");
            return Ok(empty_reply(streaming, model));
        }
        Normalized::Forward { query, model } => (query, model),
    };

    let forward_headers = ForwardHeaders::from_inbound(&headers).with_request_id(&request_id);
    info!(
        stream = query.stream,
        query_chars = query.query.chars().count(),
        authorized = forward_headers.has_authorization(),
        "forwarding chat request"
    );

    let meta = CompletionMeta::new(model);
    match state
        .upstream
        .forward(&state.endpoints, &query, &forward_headers)
        .await?
    {
        Delivery::Body(body) => {
            let reply = translate_batch(&body, &meta)?;
            debug!("batch reply translated");
            Ok(Json(reply).into_response())
        }
        Delivery::Stream(response) => Ok(event_stream_response(translate_stream(
            response.bytes_stream(),
            meta,
            state.config.request_timeout,
        ))),
    }
}

fn empty_reply(streaming: bool, model: Option<String>) -> Response {
    if streaming {
        let done = stream::iter([Ok::<Bytes, Infallible>(Bytes::from_static(
            DONE_FRAME.as_bytes(),
        ))]);
        event_stream_response(done)
    } else {
        let meta = CompletionMeta::new(model);
        Json(completion(&meta, String::new())).into_response()
    }
}

pub fn event_stream_response<S>(frames: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut resp = Response::new(Body::from_stream(frames));
    *resp.status_mut() = StatusCode::OK;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    resp
}

use std::convert::Infallible;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::message::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, Choice, ChunkChoice, Delta,
    UpstreamResult,
};

pub const DONE_FRAME: &str = "data: [DONE]\n\n";
pub const DEFAULT_MODEL: &str = "assistant-backend";

/// Envelope fields shared by every frame of one response.
#[derive(Debug, Clone)]
pub struct CompletionMeta {
    pub id: String,
    pub created: u64,
    pub model: String,
}

impl CompletionMeta {
    pub fn new(model: Option<String>) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            created,
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }
}

/// `structured` joined by a blank line, falling back to `original`.
pub fn joined_content(result: &UpstreamResult) -> Option<String> {
    match result.structured.as_deref() {
        Some(parts) if !parts.is_empty() => Some(parts.join("\n\n")),
        _ => result.original.clone().filter(|s| !s.is_empty()),
    }
}

pub fn batch_content(body: &[u8]) -> Result<String, AppError> {
    match serde_json::from_slice::<UpstreamResult>(body) {
        Ok(result) => joined_content(&result).ok_or(AppError::EmptyUpstreamResponse),
        Err(e) => {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                return Err(AppError::EmptyUpstreamResponse);
            }
            debug!(error = %e, "upstream reply is not JSON, using it as plain text");
            Ok(text.to_string())
        }
    }
}

pub fn completion(meta: &CompletionMeta, content: String) -> ChatCompletion {
    ChatCompletion {
        id: meta.id.clone(),
        object: "chat.completion".to_string(),
        created: meta.created,
        model: meta.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: "stop".to_string(),
        }],
    }
}

pub fn translate_batch(body: &[u8], meta: &CompletionMeta) -> Result<ChatCompletion, AppError> {
    batch_content(body).map(|content| completion(meta, content))
}

/// Content of one streamed chunk: `structured[0]`, else `original`. Undecodable chunks yield `None`.
pub fn chunk_content(chunk: &[u8]) -> Option<String> {
    let result: UpstreamResult = match serde_json::from_slice(chunk) {
        Ok(result) => result,
        Err(e) => {
            warn!(
                error = %e,
                chunk = %String::from_utf8_lossy(chunk),
                "dropping undecodable stream chunk"
            );
            return None;
        }
    };

    result
        .structured
        .as_ref()
        .and_then(|parts| parts.first())
        .filter(|s| !s.is_empty())
        .cloned()
        .or_else(|| result.original.filter(|s| !s.is_empty()))
}

pub fn delta_frame(meta: &CompletionMeta, content: String) -> Option<Bytes> {
    let chunk = ChatCompletionChunk {
        id: meta.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: meta.created,
        model: meta.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta { content },
            finish_reason: None,
        }],
    };
    match serde_json::to_string(&chunk) {
        Ok(json) => Some(Bytes::from(format!("data: {json}\n\n"))),
        Err(e) => {
            warn!(error = %e, "failed to encode delta frame");
            None
        }
    }
}

/// Re-frames the upstream byte stream as OpenAI SSE deltas, one frame per decodable chunk,
/// always finishing with `[DONE]`. A read error or an idle gap longer than `idle_timeout`
/// ends the stream early.
pub fn translate_stream<S, E>(
    upstream: S,
    meta: CompletionMeta,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut frames: u64 = 0;

        loop {
            let item = match tokio::time::timeout(idle_timeout, upstream.next()).await {
                Ok(item) => item,
                Err(_) => {
                    warn!(frames, idle_ms = idle_timeout.as_millis() as u64, "upstream stream went idle");
                    break;
                }
            };

            let Some(item) = item else {
                break;
            };

            match item {
                Ok(chunk) => {
                    let Some(content) = chunk_content(&chunk) else {
                        continue;
                    };
                    if let Some(frame) = delta_frame(&meta, content) {
                        frames += 1;
                        yield Ok::<Bytes, Infallible>(frame);
                    }
                }
                Err(e) => {
                    warn!(frames, error = %e, "upstream stream read error");
                    break;
                }
            }
        }

        debug!(frames, "upstream stream finished");
        yield Ok::<Bytes, Infallible>(Bytes::from_static(DONE_FRAME.as_bytes()));
    }
}

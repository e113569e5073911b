// src/routes/mod.rs
pub mod chat;

use std::any::Any;

use crate::{error::AppError, state::SharedState};
use axum::{
    Router,
    extract::{Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chat::chat_completions;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
/// Path the bundled web client posts to.
pub const LEGACY_CHAT_COMPLETIONS_PATH: &str = "/api/openai/v1/chat/completions";

pub fn create_router(state: SharedState) -> Router {
    let chat_routes = Router::new()
        .route(CHAT_COMPLETIONS_PATH, post(chat_completions))
        .route(LEGACY_CHAT_COMPLETIONS_PATH, post(chat_completions))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(chat_routes)
        .route("/health", get(|| async { "OK" }))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Public access tolerates a missing authorization header.
    let has_credentials = req
        .headers()
        .get(header::AUTHORIZATION)
        .is_some_and(|v| !v.as_bytes().iter().all(u8::is_ascii_whitespace));
    if state.config.public_access || has_credentials {
        Ok(next.run(req).await)
    } else {
        Err(AppError::AuthenticationRequired)
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    AppError::Internal(format!("handler panicked: {detail}")).into_response()
}

//! HTTP routes for the WeCom callback URL.
//!
//! `GET` is the one-time URL verification handshake. `POST` delivers
//! encrypted messages; it is always acknowledged with `success` and the
//! decoded message is handled on a spawned task, so validation details never
//! leak and the platform sees its ack within its deadline.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn, Instrument};

use wecomrelay_protocol::{extract_ciphertext, Decoded};

use crate::dispatch::ReplySink;
use crate::logging::preview;
use crate::state::AppState;

pub const CALLBACK_PATH: &str = "/wecom/callback";

const ACK: &str = "success";
const REJECTED: &str = "verification failed";

#[derive(Debug, Deserialize)]
struct VerifyParams {
    msg_signature: String,
    timestamp: String,
    nonce: String,
    echostr: String,
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    msg_signature: String,
    timestamp: String,
    nonce: String,
}

pub fn router<S: ReplySink>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            CALLBACK_PATH,
            get(verify_url::<S>).post(receive_message::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn verify_url<S: ReplySink>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    match state.codec.verify_url(
        &params.msg_signature,
        &params.timestamp,
        &params.nonce,
        &params.echostr,
    ) {
        Ok(echo) => {
            info!(
                component = "callback",
                event = "callback.url_verified",
                timestamp = %params.timestamp,
                "Callback URL verified"
            );
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                echo,
            )
                .into_response()
        }
        Err(e) => {
            warn!(
                component = "callback",
                event = "callback.url_rejected",
                timestamp = %params.timestamp,
                error = %e,
                "Callback URL verification failed"
            );
            (StatusCode::FORBIDDEN, REJECTED).into_response()
        }
    }
}

async fn receive_message<S: ReplySink>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<MessageParams>,
    body: Bytes,
) -> &'static str {
    let request_id = uuid::Uuid::new_v4();
    let body = String::from_utf8_lossy(&body);

    let decoded = extract_ciphertext(&body).and_then(|ciphertext| {
        state.codec.decode_message(
            &params.msg_signature,
            &params.timestamp,
            &params.nonce,
            &ciphertext,
        )
    });

    match decoded {
        Ok(Decoded::Text(msg)) => {
            info!(
                component = "callback",
                event = "callback.message_accepted",
                request_id = %request_id,
                user_id = %msg.from_user,
                content = %preview(&msg.content),
                "Message accepted"
            );
            let span = info_span!("message", request_id = %request_id, user_id = %msg.from_user);
            tokio::spawn(
                async move {
                    state.pipeline.handle(msg).await;
                }
                .instrument(span),
            );
        }
        Ok(Decoded::Ignored { msg_type }) => {
            debug!(
                component = "callback",
                event = "callback.message_ignored",
                request_id = %request_id,
                msg_type = %msg_type,
                "Non-text message ignored"
            );
        }
        Err(e) => {
            warn!(
                component = "callback",
                event = "callback.message_rejected",
                request_id = %request_id,
                error = %e,
                "Callback could not be decoded"
            );
        }
    }

    ACK
}

//! HTTP plumbing: middleware stages and the request pipeline.
//!
//! Stages run in a fixed onion order, outermost first: panic recovery,
//! request logging, secure headers, session load/save, then identity
//! derivation. Gating of protected routes sits innermost, applied per
//! route group.

pub mod forms;
pub mod handlers;
pub mod templates;


use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use tracing::{error, info};

use crate::AppState;
use crate::errors::Error;
use crate::session::token_from_headers;

/// Outermost stage: convert panics from any inner stage into a generic 500.
///
/// The panic payload is logged server-side and never reaches the response
/// body. The connection is closed afterwards since the failed handler may
/// have left it in an unknown state.
pub async fn recover_panic(request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            error!("request handler panicked: {}", panic_message(&panic));
            let mut response = (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            // Inner stages never ran to completion, so apply these here too
            apply_secure_headers(response.headers_mut());
            response
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Log every request on arrival. The remote address comes from request
/// extensions and is absent when the router is not serving real sockets.
pub async fn log_request(request: Request, next: Next) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    info!(
        remote = %remote,
        version = ?request.version(),
        "{} {}",
        request.method(),
        request.uri()
    );
    next.run(request).await
}

/// Defensive response headers, applied to every response including errors.
pub async fn secure_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    apply_secure_headers(response.headers_mut());
    response
}

fn apply_secure_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; style-src 'self' fonts.googleapis.com; font-src fonts.gstatic.com"),
    );
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("origin-when-cross-origin"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("deny"));
}

/// Load the session before the handler, persist it after.
///
/// The per-token guard is held across the whole span so requests sharing a
/// token serialize. A panicking handler still gets its session writes
/// persisted: the unwind is caught, the save runs, then the panic is
/// re-raised for [`recover_panic`] to answer.
pub async fn session_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = token_from_headers(request.headers(), state.sessions.cookie_name());
    let (session, guard) = match state.sessions.load(token.as_deref()).await {
        Ok(loaded) => loaded,
        Err(e) => return e.into_response(),
    };
    request.extensions_mut().insert(session.clone());

    let result = AssertUnwindSafe(next.run(request)).catch_unwind().await;

    let cookie = state.sessions.save(&session).await;
    drop(guard);

    let mut response = match result {
        Ok(response) => response,
        Err(panic) => {
            if let Err(e) = &cookie {
                error!("failed to save session while unwinding: {e:#}");
            }
            std::panic::resume_unwind(panic);
        }
    };

    match cookie {
        Ok(Some(value)) => match HeaderValue::from_str(&value) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
                response
            }
            Err(e) => Error::from(anyhow::Error::new(e).context("encode session cookie")).into_response(),
        },
        Ok(None) => response,
        Err(e) => e.into_response(),
    }
}

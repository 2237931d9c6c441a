//! Access gating for protected routes.

use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::auth::CurrentUser;
use crate::session::{Session, keys};

/// Refuse unauthenticated access to the wrapped routes.
///
/// Without an identity the wrapped handler is never invoked: the requested
/// path is remembered in the session and the client is bounced to the login
/// page with a 303. Authenticated responses are marked `no-store` so pages
/// behind login never land in shared caches.
pub async fn require_authentication(request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentUser>().is_none() {
        if let Some(session) = request.extensions().get::<Session>() {
            let path = request.uri().path().to_string();
            debug!("unauthenticated request to {path}, redirecting to login");
            if let Err(e) = session.put(keys::REDIRECT_PATH_AFTER_LOGIN, path) {
                return e.into_response();
            }
        }
        return Redirect::to("/user/login").into_response();
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

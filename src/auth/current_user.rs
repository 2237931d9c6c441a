//! Request identity, derived from the session.

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::errors::Error;
use crate::session::{Session, keys};
use crate::types::{UserId, abbrev_uuid};
use crate::AppState;

/// The authenticated user for the current request.
///
/// Derived once per request by the [`authenticate`] middleware and attached
/// to request extensions; it is never persisted anywhere.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

/// Derive the request identity from the session.
///
/// Reads the authenticated-user key, then confirms the account still exists.
/// A session pointing at a deleted account is treated as unauthenticated and
/// the stale key is dropped; it is never an error.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(session) = request.extensions().get::<Session>().cloned() {
        if let Some(user_id) = session.get::<UserId>(keys::AUTHENTICATED_USER_ID) {
            match state.users.get(user_id).await {
                Ok(Some(user)) => {
                    request.extensions_mut().insert(CurrentUser {
                        id: user.id,
                        name: user.name,
                        email: user.email,
                    });
                }
                Ok(None) => {
                    debug!("session references deleted user {}", abbrev_uuid(&user_id));
                    session.remove(keys::AUTHENTICATED_USER_ID);
                }
                Err(e) => return Error::Database(e).into_response(),
            }
        }
    }

    next.run(request).await
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(Error::Unauthenticated { message: None })
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<CurrentUser>().cloned())
    }
}

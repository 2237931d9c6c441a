//! Home, about and health-check pages.

use axum::{extract::State, response::Html};
use minijinja::context;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::errors::Result;
use crate::session::Session;
use crate::web::handlers::snippets::snippet_context;
use crate::web::templates::base_context;

/// Latest snippets.
pub async fn home(State(state): State<AppState>, session: Session, user: Option<CurrentUser>) -> Result<Html<String>> {
    let snippets = state.snippets.latest().await?;
    let snippets: Vec<_> = snippets.iter().map(snippet_context).collect();

    let ctx = context! { snippets, ..base_context(&session, user.as_ref()) };
    Ok(Html(state.templates.render("home.html", ctx)?))
}

pub async fn about(State(state): State<AppState>, session: Session, user: Option<CurrentUser>) -> Result<Html<String>> {
    let ctx = base_context(&session, user.as_ref());
    Ok(Html(state.templates.render("about.html", ctx)?))
}

/// Liveness probe.
pub async fn ping() -> &'static str {
    "OK"
}

//! Snippet viewing and publishing.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use minijinja::context;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::db::snippets::Snippet;
use crate::errors::{Error, Result};
use crate::session::{Session, keys};
use crate::types::SnippetId;
use crate::web::forms::{Form, SnippetCreateForm, Validator};
use crate::web::templates::{base_context, human_date};

/// Render-ready view of a snippet.
pub(crate) fn snippet_context(snippet: &Snippet) -> minijinja::Value {
    context! {
        id => snippet.id.to_string(),
        title => snippet.title,
        content => snippet.content,
        created => human_date(&snippet.created_at),
        expires => human_date(&snippet.expires_at),
    }
}

/// A single snippet page. Unknown, malformed and expired ids are all 404.
pub async fn view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    session: Session,
    user: Option<CurrentUser>,
) -> Result<Html<String>> {
    let not_found = || Error::NotFound {
        resource: "snippet".to_string(),
        id: id.clone(),
    };
    let id: SnippetId = id.parse().map_err(|_| not_found())?;
    let snippet = state.snippets.get(id).await?.ok_or_else(not_found)?;

    let ctx = context! { snippet => snippet_context(&snippet), ..base_context(&session, user.as_ref()) };
    Ok(Html(state.templates.render("view.html", ctx)?))
}

/// The publish form, defaulting to a one-year expiry.
pub async fn create_form(State(state): State<AppState>, session: Session, user: Option<CurrentUser>) -> Result<Html<String>> {
    let form = SnippetCreateForm {
        title: String::new(),
        content: String::new(),
        expires: 365,
    };
    let ctx = context! { form, errors => Validator::default(), ..base_context(&session, user.as_ref()) };
    Ok(Html(state.templates.render("create.html", ctx)?))
}

/// Publish a snippet. Validation failures re-render the form with every
/// violation and a 422; nothing reaches the store.
pub async fn create(
    State(state): State<AppState>,
    session: Session,
    user: Option<CurrentUser>,
    Form(form): Form<SnippetCreateForm>,
) -> Result<Response> {
    let errors = form.validate();
    if !errors.is_valid() {
        let ctx = context! { form, errors, ..base_context(&session, user.as_ref()) };
        let body = state.templates.render("create.html", ctx)?;
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(body)).into_response());
    }

    let snippet = state.snippets.create(&form.title, &form.content, form.expires).await?;
    session.put(keys::FLASH, "Snippet successfully created!")?;

    Ok(Redirect::to(&format!("/snippet/view/{}", snippet.id)).into_response())
}

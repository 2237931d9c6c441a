//! Account pages (always behind the authentication gate).

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use minijinja::context;
use tracing::info;

use crate::AppState;
use crate::auth::{CurrentUser, password};
use crate::errors::{Error, Result};
use crate::session::{Session, keys};
use crate::types::abbrev_uuid;
use crate::web::forms::{Form, PasswordUpdateForm, Validator};
use crate::web::templates::{base_context, human_date};

pub async fn view(State(state): State<AppState>, session: Session, user: CurrentUser) -> Result<Response> {
    // The account may have been deleted between the liveness check and now
    let Some(record) = state.users.get(user.id).await? else {
        return Ok(Redirect::to("/user/login").into_response());
    };

    let ctx = context! {
        user => context! {
            name => record.name,
            email => record.email,
            created => human_date(&record.created_at),
        },
        ..base_context(&session, Some(&user))
    };
    Ok(Html(state.templates.render("account.html", ctx)?).into_response())
}

pub async fn password_form(State(state): State<AppState>, session: Session, user: CurrentUser) -> Result<Html<String>> {
    let ctx = context! { errors => Validator::default(), ..base_context(&session, Some(&user)) };
    Ok(Html(state.templates.render("password.html", ctx)?))
}

pub async fn update_password(
    State(state): State<AppState>,
    session: Session,
    user: CurrentUser,
    Form(form): Form<PasswordUpdateForm>,
) -> Result<Response> {
    let mut errors = form.validate(&state.config.password);
    if !errors.is_valid() {
        let ctx = context! { errors, ..base_context(&session, Some(&user)) };
        let body = state.templates.render("password.html", ctx)?;
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(body)).into_response());
    }

    let Some(record) = state.users.get(user.id).await? else {
        return Ok(Redirect::to("/user/login").into_response());
    };

    let current = form.current_password.clone();
    let stored = record.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || password::verify_password(&current, &stored))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join password verification task: {e}"),
        })??;

    if !verified {
        errors.add_field_error("current_password", "Current password is incorrect");
        let ctx = context! { errors, ..base_context(&session, Some(&user)) };
        let body = state.templates.render("password.html", ctx)?;
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(body)).into_response());
    }

    let new_password = form.new_password.clone();
    let params = state.config.password.argon2_params();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password_with_params(&new_password, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join password hashing task: {e}"),
        })??;

    state.users.update_password_hash(user.id, &password_hash).await?;
    session.put(keys::FLASH, "Your password has been updated!")?;
    info!("user {} changed their password", abbrev_uuid(&user.id));

    Ok(Redirect::to("/account/view").into_response())
}

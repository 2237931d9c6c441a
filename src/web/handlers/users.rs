//! Signup, login and logout.

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
use crate::web::forms::{Form, LoginForm, SignupForm, Validator};
use crate::web::templates::base_context;

/// Where a successful login lands when no protected path was recorded.
const DEFAULT_POST_LOGIN_PATH: &str = "/snippet/create";

pub async fn signup_form(State(state): State<AppState>, session: Session, user: Option<CurrentUser>) -> Result<Html<String>> {
    let form = SignupForm {
        name: String::new(),
        email: String::new(),
        password: String::new(),
    };
    let ctx = context! { form, errors => Validator::default(), ..base_context(&session, user.as_ref()) };
    Ok(Html(state.templates.render("signup.html", ctx)?))
}

pub async fn signup(
    State(state): State<AppState>,
    session: Session,
    user: Option<CurrentUser>,
    Form(form): Form<SignupForm>,
) -> Result<Response> {
    let mut errors = form.validate(&state.config.password);
    if !errors.is_valid() {
        let ctx = context! { form, errors, ..base_context(&session, user.as_ref()) };
        let body = state.templates.render("signup.html", ctx)?;
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(body)).into_response());
    }

    // Hashing is deliberately slow, keep it off the async runtime
    let plaintext = form.password.clone();
    let params = state.config.password.argon2_params();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password_with_params(&plaintext, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join password hashing task: {e}"),
        })??;

    match state.users.create(&form.name, &form.email, &password_hash).await {
        Ok(created) => {
            info!("new user {} signed up", abbrev_uuid(&created.id));
            session.put(keys::FLASH, "Your signup was successful. Please log in.")?;
            Ok(Redirect::to("/user/login").into_response())
        }
        Err(e) if e.is_duplicate_email("users") => {
            errors.add_field_error("email", "Email address is already in use");
            let ctx = context! { form, errors, ..base_context(&session, user.as_ref()) };
            let body = state.templates.render("signup.html", ctx)?;
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(body)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn login_form(State(state): State<AppState>, session: Session, user: Option<CurrentUser>) -> Result<Html<String>> {
    let form = LoginForm {
        email: String::new(),
        password: String::new(),
    };
    let ctx = context! { form, errors => Validator::default(), ..base_context(&session, user.as_ref()) };
    Ok(Html(state.templates.render("login.html", ctx)?))
}

/// Credential check and privilege transition.
///
/// The failure message never distinguishes an unknown email from a wrong
/// password. On success the session token is renewed before the identity
/// key is written, then the user lands on whatever protected path first
/// sent them here.
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    user: Option<CurrentUser>,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let mut errors = form.validate();
    if !errors.is_valid() {
        let ctx = context! { form, errors, ..base_context(&session, user.as_ref()) };
        let body = state.templates.render("login.html", ctx)?;
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(body)).into_response());
    }

    let account = state.users.get_by_email(&form.email).await?;
    let verified = match &account {
        Some(account) => {
            let plaintext = form.password.clone();
            let stored = account.password_hash.clone();
            tokio::task::spawn_blocking(move || password::verify_password(&plaintext, &stored))
                .await
                .map_err(|e| Error::Internal {
                    operation: format!("join password verification task: {e}"),
                })??
        }
        None => false,
    };

    let Some(account) = account.filter(|_| verified) else {
        errors.add_non_field_error("Email or password is incorrect");
        let ctx = context! { form, errors, ..base_context(&session, user.as_ref()) };
        let body = state.templates.render("login.html", ctx)?;
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(body)).into_response());
    };

    // Fresh token on privilege escalation, so a pre-login token planted in
    // the browser cannot become an authenticated session
    state.sessions.renew_token(&session).await?;
    session.put(keys::AUTHENTICATED_USER_ID, account.id)?;
    info!("user {} logged in", abbrev_uuid(&account.id));

    let path = session
        .pop::<String>(keys::REDIRECT_PATH_AFTER_LOGIN)
        .unwrap_or_else(|| DEFAULT_POST_LOGIN_PATH.to_string());
    Ok(Redirect::to(&path).into_response())
}

/// Privilege drop: renew the token, forget the identity, bounce home.
pub async fn logout(State(state): State<AppState>, session: Session, user: CurrentUser) -> Result<Response> {
    state.sessions.renew_token(&session).await?;
    session.remove(keys::AUTHENTICATED_USER_ID);
    session.put(keys::FLASH, "You've been logged out successfully!")?;
    info!("user {} logged out", abbrev_uuid(&user.id));

    Ok(Redirect::to("/").into_response())
}

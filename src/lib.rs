//! Snipbox - a web application for publishing short text snippets.
//!
//! Anyone can read snippets; publishing and account pages sit behind
//! session-cookie authentication. The request pipeline runs a fixed chain of
//! middleware (panic recovery, request logging, secure headers, session
//! load/save, identity derivation) around axum route handlers, with
//! PostgreSQL behind store traits for users, snippets and sessions.
//!
//! # Modules
//!
//! - [`auth`]: Password hashing, identity derivation, access gating
//! - [`session`]: Opaque-token server-side sessions
//! - [`web`]: Middleware, forms, templates and route handlers
//! - [`db`]: Store traits with PostgreSQL and in-memory implementations
//! - [`config`]: YAML + environment configuration
//! - [`errors`]: Error taxonomy and HTTP mapping
//! - [`telemetry`]: Tracing setup

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod session;
pub mod telemetry;
pub mod types;
pub mod web;

#[cfg(test)]
pub(crate) mod test_utils;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use bon::Builder;
use sqlx::{migrate::Migrator, postgres::PgPoolOptions};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{current_user::authenticate, middleware::require_authentication};
use crate::config::Config;
use crate::db::snippets::{PgSnippets, SnippetStore};
use crate::db::users::{PgUsers, UserStore};
use crate::session::{SessionManager, store::PgSessionStore};
use crate::web::handlers::{account, pages, snippets, static_assets, users};
use crate::web::templates::Templates;
use crate::web::{log_request, recover_panic, secure_headers, session_middleware};

/// Shared application state available to handlers and middleware.
#[derive(Clone, Builder)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub snippets: Arc<dyn SnippetStore>,
    pub sessions: SessionManager,
    pub templates: Arc<Templates>,
    pub config: Config,
}

/// Database migrations, embedded at compile time.
pub fn migrator() -> Migrator {
    sqlx::migrate!("./migrations")
}

/// Assemble the router with extra state-bearing routes merged in before the
/// middleware chain is applied. Tests use this to mount probe handlers that
/// run inside the full pipeline.
pub(crate) fn build_router_with(state: AppState, extra: Router<AppState>) -> Router {
    let protected = Router::new()
        .route("/snippet/create", get(snippets::create_form).post(snippets::create))
        .route("/user/logout", post(users::logout))
        .route("/account/view", get(account::view))
        .route(
            "/account/password/update",
            get(account::password_form).post(account::update_password),
        )
        .route_layer(middleware::from_fn(require_authentication));

    Router::new()
        .route("/", get(pages::home))
        .route("/about", get(pages::about))
        .route("/ping", get(pages::ping))
        .route("/snippet/view/{id}", get(snippets::view))
        .route("/user/signup", get(users::signup_form).post(users::signup))
        .route("/user/login", get(users::login_form).post(users::login))
        .route("/static/{*path}", get(static_assets::serve))
        .merge(protected)
        .merge(extra)
        // Layers wrap bottom-up: the last layer added is the outermost stage
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn_with_state(state.clone(), session_middleware))
        .layer(middleware::from_fn(secure_headers))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(log_request))
        .layer(middleware::from_fn(recover_panic))
        .with_state(state)
}

/// Build the full application router for the given state.
pub fn build_router(state: AppState) -> Router {
    build_router_with(state, Router::new())
}

/// The running application: connected pool, migrated schema, assembled
/// router.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        migrator().run(&pool).await?;

        let state = AppState::builder()
            .users(Arc::new(PgUsers::new(pool.clone())))
            .snippets(Arc::new(PgSnippets::new(pool.clone())))
            .sessions(SessionManager::new(
                Arc::new(PgSessionStore::new(pool.clone())),
                config.session.clone(),
            ))
            .templates(Arc::new(Templates::new()?))
            .config(config.clone())
            .build();

        Ok(Self {
            router: build_router(state),
            config,
        })
    }

    /// Serve until the shutdown future resolves, then drain gracefully.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        Ok(())
    }
}

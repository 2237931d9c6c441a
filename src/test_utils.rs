//! Shared helpers for the test suite: in-memory app state and servers.

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;

use crate::auth::password::{self, Argon2Params};
use crate::config::Config;
use crate::db::snippets::MemorySnippets;
use crate::db::users::{MemoryUsers, User, UserStore};
use crate::session::store::MemorySessionStore;
use crate::session::SessionManager;
use crate::web::templates::Templates;
use crate::{AppState, build_router, build_router_with};

pub const TEST_PASSWORD: &str = "pa$$word123";

/// Low-cost hashing so the suite stays fast; production costs come from
/// config.
pub fn test_argon2_params() -> Argon2Params {
    Argon2Params {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

/// App state plus direct handles on the backing stores for assertions.
pub struct TestHarness {
    pub state: AppState,
    pub users: Arc<MemoryUsers>,
    pub snippets: Arc<MemorySnippets>,
    pub session_store: Arc<MemorySessionStore>,
}

pub fn test_harness() -> TestHarness {
    let mut config = Config::default();
    config.password.argon2_memory_kib = 1024;
    config.password.argon2_iterations = 1;

    let users = Arc::new(MemoryUsers::new());
    let snippets = Arc::new(MemorySnippets::new());
    let session_store = Arc::new(MemorySessionStore::new());

    let state = AppState::builder()
        .users(users.clone())
        .snippets(snippets.clone())
        .sessions(SessionManager::new(session_store.clone(), config.session.clone()))
        .templates(Arc::new(Templates::new().expect("templates should compile")))
        .config(config)
        .build();

    TestHarness {
        state,
        users,
        snippets,
        session_store,
    }
}

/// A cookie-keeping server over the full middleware pipeline.
pub fn test_server(state: AppState) -> TestServer {
    TestServer::builder()
        .save_cookies()
        .build(build_router(state))
        .expect("Failed to create test server")
}

/// Same, with extra state-bearing routes mounted inside the pipeline.
pub fn test_server_with(state: AppState, extra: Router<AppState>) -> TestServer {
    TestServer::builder()
        .save_cookies()
        .build(build_router_with(state, extra))
        .expect("Failed to create test server")
}

/// Register a user directly in the store with [`TEST_PASSWORD`].
pub async fn create_test_user(users: &MemoryUsers, email: &str) -> User {
    let hash = password::hash_password_with_params(TEST_PASSWORD, Some(test_argon2_params()))
        .expect("hashing should succeed");
    users
        .create("Test User", email, &hash)
        .await
        .expect("user creation should succeed")
}

//! HTML rendering via minijinja.
//!
//! Templates are embedded at compile time. Every page receives a common data
//! bag (current year, one-shot flash, authentication state) on top of its
//! page-specific data.

use chrono::{DateTime, Datelike, Utc};
use minijinja::{Environment, context};

use crate::auth::CurrentUser;
use crate::errors::Error;
use crate::session::{Session, keys};

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../../templates/base.html")),
    ("home.html", include_str!("../../templates/home.html")),
    ("view.html", include_str!("../../templates/view.html")),
    ("create.html", include_str!("../../templates/create.html")),
    ("signup.html", include_str!("../../templates/signup.html")),
    ("login.html", include_str!("../../templates/login.html")),
    ("account.html", include_str!("../../templates/account.html")),
    ("password.html", include_str!("../../templates/password.html")),
    ("about.html", include_str!("../../templates/about.html")),
];

/// Compiled template environment, shared across requests.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, Error> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source).map_err(|e| Error::Internal {
                operation: format!("compile template {name}: {e}"),
            })?;
        }
        Ok(Self { env })
    }

    /// Render a page. Failures are server faults; the caller's error path
    /// turns them into a generic 500.
    pub fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, Error> {
        let template = self.env.get_template(name).map_err(|e| Error::Internal {
            operation: format!("look up template {name}: {e}"),
        })?;
        template.render(ctx).map_err(|e| Error::Internal {
            operation: format!("render template {name}: {e}"),
        })
    }
}

/// The data every page gets. Popping the flash clears it, so a notification
/// renders exactly once.
pub fn base_context(session: &Session, user: Option<&CurrentUser>) -> minijinja::Value {
    context! {
        current_year => Utc::now().year(),
        flash => session.pop::<String>(keys::FLASH),
        is_authenticated => user.is_some(),
    }
}

/// Timestamp formatting used across page templates.
pub fn human_date(ts: &DateTime<Utc>) -> String {
    ts.format("%d %b %Y at %H:%M").to_string()
}

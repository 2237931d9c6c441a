//! Form types and server-side validation.
//!
//! Validation accumulates: every check runs and every violation is recorded,
//! so one submission round-trip reports everything wrong with it. A form with
//! any recorded error never reaches a store.

use std::collections::HashMap;

use axum::extract::{FromRequest, Request};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::config::PasswordConfig;
use crate::errors::Error;

/// `axum::Form` with the rejection remapped: a body that cannot be decoded
/// at all is a 400, while 422 stays reserved for validation failures on a
/// well-formed submission.
pub struct Form<T>(pub T);

impl<S, T> FromRequest<S> for Form<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Form(value) = axum::Form::<T>::from_request(req, state)
            .await
            .map_err(|e| Error::BadRequest {
                message: e.body_text(),
            })?;
        Ok(Self(value))
    }
}

/// Accumulated validation state for one form submission.
///
/// Field errors keep every message recorded against a field; templates render
/// the first. Non-field errors cover failures that are not attributable to a
/// single input, like bad credentials.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Validator {
    pub field_errors: HashMap<String, Vec<String>>,
    pub non_field_errors: Vec<String>,
}

impl Validator {
    pub fn is_valid(&self) -> bool {
        self.field_errors.is_empty() && self.non_field_errors.is_empty()
    }

    pub fn add_field_error(&mut self, field: &str, message: &str) {
        self.field_errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn add_non_field_error(&mut self, message: &str) {
        self.non_field_errors.push(message.to_string());
    }

    /// Record `message` against `field` unless `ok` holds. Never
    /// short-circuits: callers chain every check unconditionally.
    pub fn check_field(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_field_error(field, message);
        }
    }
}

pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

pub fn max_chars(value: &str, n: usize) -> bool {
    value.chars().count() <= n
}

pub fn min_chars(value: &str, n: usize) -> bool {
    value.chars().count() >= n
}

pub fn permitted_value<T: PartialEq>(value: &T, permitted: &[T]) -> bool {
    permitted.contains(value)
}

/// Record the configured password length bounds against `field`.
fn check_password_length(v: &mut Validator, field: &str, password: &str, rules: &PasswordConfig) {
    v.check_field(
        min_chars(password, rules.min_length),
        field,
        &format!("This field must be at least {} characters long", rules.min_length),
    );
    v.check_field(
        max_chars(password, rules.max_length),
        field,
        &format!("This field cannot be more than {} characters long", rules.max_length),
    );
}

/// Structural email check: something non-empty, one `@`, and a dotted
/// domain. Deliverability is the mail server's problem.
pub fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !value.contains(char::is_whitespace)
}

/// Fields for publishing a snippet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnippetCreateForm {
    pub title: String,
    pub content: String,
    pub expires: i64,
}

impl SnippetCreateForm {
    pub fn validate(&self) -> Validator {
        let mut v = Validator::default();
        v.check_field(not_blank(&self.title), "title", "This field cannot be blank");
        v.check_field(
            max_chars(&self.title, 100),
            "title",
            "This field cannot be more than 100 characters long",
        );
        v.check_field(not_blank(&self.content), "content", "This field cannot be blank");
        v.check_field(
            permitted_value(&self.expires, &[1, 7, 365]),
            "expires",
            "This field must equal 1, 7 or 365",
        );
        v
    }
}

/// Fields for creating an account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl SignupForm {
    pub fn validate(&self, rules: &PasswordConfig) -> Validator {
        let mut v = Validator::default();
        v.check_field(not_blank(&self.name), "name", "This field cannot be blank");
        v.check_field(not_blank(&self.email), "email", "This field cannot be blank");
        v.check_field(
            looks_like_email(&self.email),
            "email",
            "This field must be a valid email address",
        );
        v.check_field(not_blank(&self.password), "password", "This field cannot be blank");
        check_password_length(&mut v, "password", &self.password, rules);
        v
    }
}

/// Fields for logging in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginForm {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Validator {
        let mut v = Validator::default();
        v.check_field(not_blank(&self.email), "email", "This field cannot be blank");
        v.check_field(
            looks_like_email(&self.email),
            "email",
            "This field must be a valid email address",
        );
        v.check_field(not_blank(&self.password), "password", "This field cannot be blank");
        v
    }
}

/// Fields for changing the account password.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PasswordUpdateForm {
    #[serde(skip_serializing)]
    pub current_password: String,
    #[serde(skip_serializing)]
    pub new_password: String,
    #[serde(skip_serializing)]
    pub new_password_confirmation: String,
}

impl PasswordUpdateForm {
    pub fn validate(&self, rules: &PasswordConfig) -> Validator {
        let mut v = Validator::default();
        v.check_field(
            not_blank(&self.current_password),
            "current_password",
            "This field cannot be blank",
        );
        v.check_field(not_blank(&self.new_password), "new_password", "This field cannot be blank");
        check_password_length(&mut v, "new_password", &self.new_password, rules);
        v.check_field(
            not_blank(&self.new_password_confirmation),
            "new_password_confirmation",
            "This field cannot be blank",
        );
        v.check_field(
            self.new_password == self.new_password_confirmation,
            "new_password_confirmation",
            "Passwords do not match",
        );
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> PasswordConfig {
        PasswordConfig::default()
    }

    #[test]
    fn validation_accumulates_everything() {
        let form = SnippetCreateForm {
            title: "a".repeat(101),
            content: "   ".to_string(),
            expires: 42,
        };
        let v = form.validate();
        assert!(!v.is_valid());
        // one violation per field, all reported in a single pass
        assert_eq!(v.field_errors["title"], vec!["This field cannot be more than 100 characters long"]);
        assert_eq!(v.field_errors["content"], vec!["This field cannot be blank"]);
        assert_eq!(v.field_errors["expires"], vec!["This field must equal 1, 7 or 365"]);
    }

    #[test]
    fn multiple_messages_per_field_are_kept() {
        let form = SignupForm {
            name: "Alice".to_string(),
            email: "".to_string(),
            password: "pw".to_string(),
        };
        let v = form.validate(&rules());
        assert_eq!(
            v.field_errors["email"],
            vec!["This field cannot be blank", "This field must be a valid email address"]
        );
        assert_eq!(
            v.field_errors["password"],
            vec!["This field must be at least 8 characters long"]
        );
    }

    #[test]
    fn valid_forms_pass() {
        let form = SnippetCreateForm {
            title: "O snail".to_string(),
            content: "Climb Mount Fuji".to_string(),
            expires: 7,
        };
        assert!(form.validate().is_valid());

        let signup = SignupForm {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "pa$$word123".to_string(),
        };
        assert!(signup.validate(&rules()).is_valid());
    }

    #[test]
    fn email_shape_check() {
        for good in ["a@b.co", "first.last@sub.example.com", "x+tag@example.org"] {
            assert!(looks_like_email(good), "{good} should pass");
        }
        for bad in ["", "plain", "@example.com", "a@", "a@nodot", "a b@example.com", "a@.com", "a@com."] {
            assert!(!looks_like_email(bad), "{bad} should fail");
        }
    }

    #[test]
    fn character_counts_not_bytes() {
        // 100 multibyte characters is still within a 100-character limit
        let title = "\u{00e9}".repeat(100);
        assert!(max_chars(&title, 100));
        assert!(!max_chars(&format!("{title}x"), 100));
    }

    #[test]
    fn overlong_passwords_are_rejected() {
        let form = SignupForm {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "x".repeat(65),
        };
        let v = form.validate(&rules());
        assert_eq!(
            v.field_errors["password"],
            vec!["This field cannot be more than 64 characters long"]
        );
    }

    #[test]
    fn password_confirmation_must_match() {
        let form = PasswordUpdateForm {
            current_password: "old-password".to_string(),
            new_password: "new-password".to_string(),
            new_password_confirmation: "different".to_string(),
        };
        let v = form.validate(&rules());
        assert_eq!(v.field_errors["new_password_confirmation"], vec!["Passwords do not match"]);
    }
}

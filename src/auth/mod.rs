//! Authentication: password hashing, identity derivation and access gating.

pub mod current_user;
pub mod middleware;
pub mod password;

pub use current_user::CurrentUser;

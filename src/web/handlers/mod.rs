//! Route handlers.

pub mod account;
pub mod pages;
pub mod snippets;
pub mod static_assets;
pub mod users;

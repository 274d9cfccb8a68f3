//! # Warden (Authentication & Token Lifecycle Engine)
//!
//! `warden` is a small OpenID-Connect-style identity provider that sits in front of a
//! relational user store. It authenticates users by password, issues RS256 signed
//! ID/access tokens, and manages opaque refresh tokens that can be used exactly once.
//!
//! ## Security state
//!
//! Every account carries three pieces of mutable security state:
//!
//! 1. **Failed-attempt counter:** incremented atomically on every wrong password.
//! 2. **Lock status:** the account flips to `locked` for a fixed window once the
//!    counter reaches the configured threshold.
//! 3. **Version:** embedded in every issued token as the `v` claim. Bumping it
//!    invalidates all previously issued tokens for that identity.
//!
//! All mutations are single conditional statements in the store, so concurrent
//! requests for the same account never need an application-side lock.
//!
//! ## Refresh tokens
//!
//! Refresh tokens are 256-bit random values. Only their `SHA-256` digest is persisted.
//! Rotation deletes the presented token before issuing a new one; whichever concurrent
//! caller removes the row wins and every other caller receives `invalid_grant`.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod credentials;
pub mod store;
pub mod tokens;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

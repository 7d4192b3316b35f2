//! Client-side session management for token-authenticated REST APIs.
//!
//! A [`SessionManager`] logs in, keeps the access/refresh token pair in a
//! durable [`TokenStore`], attaches the access token to every call made through
//! its [`ApiClient`], and refreshes it at most once at a time when it expires.

pub mod client;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod session;
pub mod startup;
pub mod store;
pub mod utils;

pub use client::{ApiClient, ApiRequest};
pub use errors::{RefreshFailure, SessionError, SessionResult};
pub use session::{AuthOutcome, EndReason, SessionEvent, SessionManager};
pub use startup::SessionRegistry;
pub use store::TokenStore;

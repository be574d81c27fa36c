//! Client SDK for parley chat servers.
//!
//! The SDK keeps a chat feed synchronized with the server over a live
//! WebSocket stream that may drop at any time. The pieces, leaves first:
//!
//! - [`auth::AuthTokenGateway`] holds the session credential.
//! - [`backoff::ReconnectPolicy`] decides how long to wait between attempts.
//! - [`connection::ConnectionStateMachine`] owns the connection lifecycle.
//! - [`merger::MessageStreamMerger`] merges history snapshots with live entries.
//! - [`viewport`] decides whether a view should follow new entries.
//!
//! [`client::connect`] wires them together behind a single tokio task.

pub mod api;
pub mod auth;
pub mod backoff;
pub mod client;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod feed;
pub mod merger;
pub mod store;
pub mod viewport;

pub use error::{Error, Result};

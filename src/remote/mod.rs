//! Remote learning platform
//!
//! The sync core talks to the platform through [`RemoteClient`] only.
//! [`HttpRemoteClient`] is the production implementation.

mod auth;
mod client;
mod http;
#[cfg(test)]
pub mod mock;
mod types;

pub use auth::{StaticTokens, TokenSource};
pub use client::RemoteClient;
pub use http::HttpRemoteClient;
pub use types::{CreateAck, RemoteError, RemoteNode, RemoteWrite};

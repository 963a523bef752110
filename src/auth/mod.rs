//! Credential handling for the realtime client.
//!
//! The session transport and the HTTP API client never read tokens from a
//! global location. They receive a [`CredentialProvider`] at construction and
//! ask it for the current token whenever a connection is opened.

mod credentials;

pub use credentials::{CredentialProvider, StaticToken, TokenStore};

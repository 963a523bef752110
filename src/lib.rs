pub mod api;
pub mod auth;
pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use auth::{CredentialProvider, StaticToken, TokenStore};
pub use config::ClientConfig;
pub use core::*;

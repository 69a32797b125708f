//! Authentication and authorization: API keys, workload-identity tokens and
//! the upload policy over them.

pub mod keys;
pub mod oidc;
pub mod policy;

use thiserror::Error;

pub use keys::{ApiKey, KeyScope, KeyStore, Role};
pub use oidc::{OidcVerifier, WorkloadClaims};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("could not fetch signing keys: {0}")]
    JwksFetch(String),
    #[error("key store error: {0}")]
    Store(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

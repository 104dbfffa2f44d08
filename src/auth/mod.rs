//! Identity types and the bearer token validation seam.
//!
//! The pipeline owns only the authentication *decision*; verifying that a
//! token is genuine is delegated to a [`TokenValidator`]. The shipped
//! implementation, [`JwtTokenValidator`], verifies tokens issued by the
//! Supabase auth service. Tests and alternative deployments plug in their
//! own implementation.

mod identity;
mod jwt;

pub use identity::{Identity, Role, UnknownRole};
pub use jwt::{JwtTokenValidator, SupabaseClaims};

use async_trait::async_trait;
use thiserror::Error;

/// Failure of the validation collaborator itself, as opposed to a token
/// that was checked and found invalid.
#[derive(Debug, Error)]
pub enum TokenValidatorError {
    #[error("token validator is unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Decides whether a bearer token represents a caller.
///
/// - `Ok(Some(identity))`: the token is valid
/// - `Ok(None)`: the token was checked and rejected
/// - `Err(_)`: the check could not be performed
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Option<Identity>, TokenValidatorError>;
}

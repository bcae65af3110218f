//! Identity verifier seam.
//!
//! Credentials are opaque to the core: a verifier turns one into a
//! `VerifiedIdentity` or an `AuthError`, and the coordinator records the user.

use crate::model::entities::UserId;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Identity asserted by a verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
}

/// Credential rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredential,
    Expired,
    /// Verifier backend could not be reached.
    Unavailable(String),
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredential => write!(f, "invalid credential"),
            Self::Expired => write!(f, "credential expired"),
            Self::Unavailable(message) => write!(f, "identity verifier unavailable: {message}"),
        }
    }
}

impl Error for AuthError {}

/// External collaborator that validates bearer credentials.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Fixed credential table, for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticIdentityVerifier {
    credentials: HashMap<String, Result<VerifiedIdentity, AuthError>>,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `credential` as `identity`.
    pub fn with_identity(mut self, credential: impl Into<String>, identity: VerifiedIdentity) -> Self {
        self.credentials.insert(credential.into(), Ok(identity));
        self
    }

    /// Rejects `credential` as expired.
    pub fn with_expired(mut self, credential: impl Into<String>) -> Self {
        self.credentials
            .insert(credential.into(), Err(AuthError::Expired));
        self
    }
}

impl IdentityVerifier for StaticIdentityVerifier {
    fn verify(&self, credential: &str) -> Result<VerifiedIdentity, AuthError> {
        self.credentials
            .get(credential)
            .cloned()
            .unwrap_or(Err(AuthError::InvalidCredential))
    }
}

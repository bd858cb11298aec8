//! Identity collaborator.
//!
//! Credential issuance (sign-up, sign-in, email verification) is opaque to the
//! sync core; all it needs is a stable identifier for the signed-in user.

use thiserror::Error;

/// The signed-in identity as reported by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub photo_url: Option<String>,
    /// Sign-in provider, e.g. `password` or `google.com`.
    pub provider: String,
}

impl AuthUser {
    /// Federated providers vouch for the email address themselves.
    pub fn is_federated(&self) -> bool {
        self.provider != "password"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no signed-in user")]
    SignedOut,
    #[error("authenticator error: {0}")]
    Other(String),
}

pub trait Authenticator: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    fn sign_out(&self) -> Result<(), AuthError>;
}

//! Authentication: users, passwords and session tokens.

mod login;
pub mod password;
mod token;
mod users;

pub use login::{AuthService, AuthStats, Session};
pub use token::{IssuedToken, JwtKeys, SessionClaims, TokenData, TokenService, TokenVerification};
pub use users::{PasswordHook, USERS_COLLECTION, strip_passwords, users_collection};

use thiserror::Error;

use crate::query::{MutationError, QueryError};
use crate::store::StoreError;

/// Token plumbing failed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Login and install failures.
#[derive(Debug, Error)]
pub enum LoginError {
    /// Unknown email, wrong password and inactive user all look the same.
    #[error("incorrect credentials")]
    IncorrectCredentials,

    #[error("a user already exists")]
    AlreadyInstalled,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

impl From<QueryError> for LoginError {
    fn from(err: QueryError) -> Self {
        LoginError::Auth(AuthError::Query(err))
    }
}

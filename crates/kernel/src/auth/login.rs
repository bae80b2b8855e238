//! Login and first-run install.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::password::verify_off_thread;
use super::{LoginError, TokenService, USERS_COLLECTION};
use crate::field::is_truthy;
use crate::query::Filter;
use crate::schema::ID_COLUMN;
use crate::state::AppState;
use crate::store::Record;

/// Counters for authentication work.
#[derive(Debug, Clone, Default)]
pub struct AuthStats {
    password_checks: Arc<AtomicU64>,
}

impl AuthStats {
    pub fn record_password_check(&self) {
        self.password_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Password hash verifications performed, including dummy ones.
    pub fn password_checks(&self) -> u64 {
        self.password_checks.load(Ordering::Relaxed)
    }
}

/// A logged-in session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: i64,
}

/// Credential checks on top of the users collection.
#[derive(Debug, Clone)]
pub struct AuthService {
    state: AppState,
}

impl AuthService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn tokens(&self) -> TokenService {
        TokenService::new(self.state.clone())
    }

    /// Check credentials and open a session.
    ///
    /// Unknown emails still cost one hash verification, and every failure is
    /// [`LoginError::IncorrectCredentials`].
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, LoginError> {
        let email = email.trim().to_lowercase();
        let user = self
            .state
            .query(USERS_COLLECTION)?
            .where_eq("email", email.as_str())
            .limit(1)
            .fetch_raw(None)
            .await?
            .into_iter()
            .next();

        let hash = user
            .as_ref()
            .and_then(|u| u.get("password"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let verified = verify_off_thread(password.to_string(), hash).await;
        self.state.auth_stats().record_password_check();

        let active_user = user.filter(|u| verified && u.get("is_active").is_some_and(is_truthy));
        let Some(user_id) = active_user
            .as_ref()
            .and_then(|u| u.get(ID_COLUMN))
            .and_then(Value::as_str)
        else {
            warn!("login failed");
            return Err(LoginError::IncorrectCredentials);
        };

        let issued = self
            .tokens()
            .issue(user_id, self.state.config().session_token_lifetime)
            .await?;
        info!(user_id, "user logged in");

        Ok(Session {
            token: issued.token,
            user_id: user_id.to_string(),
            expires_at: issued.claims.exp,
        })
    }

    /// Create the first administrator. Fails once any user exists.
    pub async fn install(&self, email: &str, password: &str) -> Result<Session, LoginError> {
        if self.state.query(USERS_COLLECTION)?.count_raw().await? > 0 {
            return Err(LoginError::AlreadyInstalled);
        }

        let mut input = Record::new();
        input.insert("email".into(), json!(email));
        input.insert("password".into(), json!(password));
        input.insert("is_admin".into(), json!(true));

        let user = self.state.query(USERS_COLLECTION)?.create(input).await?;
        let user_id = user
            .get(ID_COLUMN)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let issued = self
            .tokens()
            .issue(&user_id, self.state.config().session_token_lifetime)
            .await?;
        info!(user_id = %user_id, "administrator installed");

        Ok(Session {
            token: issued.token,
            user_id,
            expires_at: issued.claims.exp,
        })
    }

    /// End a session.
    pub async fn logout(&self, token: &str) -> Result<bool, LoginError> {
        Ok(self.tokens().remove(token).await? > 0)
    }
}

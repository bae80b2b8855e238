//! Session tokens.
//!
//! Tokens are HS256 JWTs. The durable `tokens` table is the source of truth;
//! rows are keyed by the SHA-256 of the token so raw tokens are never stored.
//! The cache mirrors each row as `{iat}:{exp}` under `token:{hash}` with a TTL
//! equal to the token's remaining lifetime.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::{AuthError, USERS_COLLECTION};
use crate::field::is_truthy;
use crate::query::Filter;
use crate::schema::ID_COLUMN;
use crate::state::AppState;
use crate::store::{Condition, Operator, Record, StoreQuery};

const TOKENS_TABLE: &str = "tokens";

/// Signing keys derived from the configured secret.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.encoding,
        )?)
    }

    /// Check signature and expiry. Any failure is `None`.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        jsonwebtoken::decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .ok()
    }
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

/// Claims of a session token. Times are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionClaims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// The stored side of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Outcome of [`TokenService::verify`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenVerification {
    pub is_valid: bool,
    pub user: Option<Record>,
    pub token_data: Option<TokenData>,
}

impl TokenVerification {
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            user: None,
            token_data: None,
        }
    }
}

fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn cache_key(hash: &str) -> String {
    format!("token:{hash}")
}

fn cache_value(iat: i64, exp: i64) -> String {
    format!("{iat}:{exp}")
}

fn remaining(exp: i64) -> Duration {
    let left = exp - chrono::Utc::now().timestamp();
    Duration::from_secs(u64::try_from(left).unwrap_or(0))
}

/// Issue, verify and revoke session tokens.
#[derive(Debug, Clone)]
pub struct TokenService {
    state: AppState,
}

impl TokenService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Sign a token for `user_id` valid for `expires_in`.
    pub fn generate(&self, user_id: &str, expires_in: Duration) -> Result<IssuedToken, AuthError> {
        let iat = chrono::Utc::now().timestamp();
        let lifetime = i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX / 2);
        let claims = SessionClaims {
            user_id: user_id.to_string(),
            jti: Uuid::now_v7().to_string(),
            iat,
            exp: iat.saturating_add(lifetime),
        };
        let token = self.state.jwt().sign(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    /// Persist a token, then mirror it in the cache.
    pub async fn store(&self, issued: &IssuedToken) -> Result<(), AuthError> {
        let hash = token_hash(&issued.token);
        let mut row = Record::new();
        row.insert("token".into(), Value::from(hash.as_str()));
        row.insert("user_id".into(), Value::from(issued.claims.user_id.as_str()));
        row.insert("iat".into(), Value::from(issued.claims.iat));
        row.insert("exp".into(), Value::from(issued.claims.exp));
        self.state.store().insert(TOKENS_TABLE, &row).await?;

        self.state
            .cache()
            .set(
                &cache_key(&hash),
                &cache_value(issued.claims.iat, issued.claims.exp),
                remaining(issued.claims.exp),
            )
            .await;
        Ok(())
    }

    /// Generate and store.
    pub async fn issue(
        &self,
        user_id: &str,
        expires_in: Duration,
    ) -> Result<IssuedToken, AuthError> {
        let issued = self.generate(user_id, expires_in)?;
        self.store(&issued).await?;
        debug!(user_id, "session token issued");
        Ok(issued)
    }

    /// Check a token end to end. Any failure is an invalid result.
    pub async fn verify(&self, token: &str) -> TokenVerification {
        match self.try_verify(token).await {
            Ok(Some(verification)) => verification,
            Ok(None) => TokenVerification::invalid(),
            Err(e) => {
                debug!(error = %e, "token verification failed");
                TokenVerification::invalid()
            }
        }
    }

    async fn try_verify(&self, token: &str) -> Result<Option<TokenVerification>, AuthError> {
        let Some(claims) = self.state.jwt().verify::<SessionClaims>(token) else {
            return Ok(None);
        };
        let hash = token_hash(token);
        let expected = cache_value(claims.iat, claims.exp);

        match self.state.cache().get(&cache_key(&hash)).await {
            Some(cached) if cached == expected => {}
            Some(_) => return Ok(None),
            None => {
                let Some(row) = self.find_row(&hash).await? else {
                    return Ok(None);
                };
                let matches = row.get("iat").and_then(Value::as_i64) == Some(claims.iat)
                    && row.get("exp").and_then(Value::as_i64) == Some(claims.exp)
                    && row.get("user_id").and_then(Value::as_str) == Some(claims.user_id.as_str());
                if !matches {
                    return Ok(None);
                }
                self.state
                    .cache()
                    .set(&cache_key(&hash), &expected, remaining(claims.exp))
                    .await;
            }
        }

        let user = self
            .state
            .query(USERS_COLLECTION)?
            .where_eq(ID_COLUMN, claims.user_id.as_str())
            .first()
            .await?;
        let Some(user) = user.filter(|u| u.get("is_active").is_some_and(is_truthy)) else {
            return Ok(None);
        };

        Ok(Some(TokenVerification {
            is_valid: true,
            user: Some(user),
            token_data: Some(TokenData {
                user_id: claims.user_id,
                iat: claims.iat,
                exp: claims.exp,
            }),
        }))
    }

    async fn find_row(&self, hash: &str) -> Result<Option<Record>, AuthError> {
        let query = StoreQuery::new(TOKENS_TABLE)
            .filter(Condition::eq("token", hash))
            .limit(1);
        Ok(self.state.store().select(&query).await?.into_iter().next())
    }

    /// Revoke one token. Returns how many rows were removed.
    pub async fn remove(&self, token: &str) -> Result<u64, AuthError> {
        let hash = token_hash(token);
        let removed = self
            .state
            .store()
            .delete(TOKENS_TABLE, &Condition::eq("token", hash.as_str()))
            .await?;
        self.state.cache().del(&cache_key(&hash)).await;
        Ok(removed)
    }

    /// Revoke every token of a user, optionally keeping one.
    pub async fn remove_user_tokens(
        &self,
        user_id: &str,
        except: Option<&str>,
    ) -> Result<u64, AuthError> {
        let mut condition = Condition::eq("user_id", user_id);
        if let Some(keep) = except {
            condition = condition.and(Condition::predicate(
                "token",
                Operator::Ne,
                Value::from(token_hash(keep)),
            ));
        }

        let mut lookup = StoreQuery::new(TOKENS_TABLE).filter(condition.clone());
        lookup.columns = Some(vec!["token".to_string()]);
        let hashes: Vec<String> = self
            .state
            .store()
            .select(&lookup)
            .await?
            .into_iter()
            .filter_map(|row| row.get("token").and_then(Value::as_str).map(str::to_string))
            .collect();

        let removed = self.state.store().delete(TOKENS_TABLE, &condition).await?;
        for hash in &hashes {
            self.state.cache().del(&cache_key(hash)).await;
        }

        info!(user_id, removed, "user tokens revoked");
        Ok(removed)
    }

    /// Delete expired rows. Cached copies expire on their own.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let removed = self
            .state
            .store()
            .delete(
                TOKENS_TABLE,
                &Condition::predicate("exp", Operator::Lte, Value::from(now)),
            )
            .await?;
        if removed > 0 {
            info!(removed, "expired tokens swept");
        }
        Ok(removed)
    }

    /// Replace a valid token with a fresh one. `None` for invalid tokens.
    pub async fn renew(&self, token: &str) -> Result<Option<IssuedToken>, AuthError> {
        let verification = self.verify(token).await;
        let Some(data) = verification.token_data.filter(|_| verification.is_valid) else {
            return Ok(None);
        };

        let issued = self
            .issue(&data.user_id, self.state.config().session_token_lifetime)
            .await?;
        self.remove(token).await?;
        Ok(Some(issued))
    }
}

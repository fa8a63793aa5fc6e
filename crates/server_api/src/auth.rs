use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{AccountStatus, Identity, PlatformRole, UserId},
    error::{ApiError, ErrorCode},
};
use thiserror::Error;
use tracing::debug;

use crate::{directory::AccountDirectory, internal};

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: PlatformRole,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
enum TokenError {
    #[error("subject '{0}' is not a user id")]
    Subject(String),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// HS256 bearer tokens. With an account directory attached, the role and
/// suspension state come from the directory rather than the token.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    accounts: Option<Arc<dyn AccountDirectory>>,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            accounts: None,
        }
    }

    pub fn with_accounts(mut self, accounts: Arc<dyn AccountDirectory>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    fn decode_claims(&self, token: &str) -> Result<(UserId, Claims), TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let user_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| TokenError::Subject(data.claims.sub.clone()))?;
        Ok((UserId(user_id), data.claims))
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let (user_id, claims) = self.decode_claims(token).map_err(|err| {
            debug!(error = %err, "rejected bearer token");
            ApiError::new(ErrorCode::Unauthorized, "invalid token")
        })?;

        let Some(accounts) = &self.accounts else {
            return Ok(Identity {
                user_id,
                role: claims.role,
                status: AccountStatus::Active,
            });
        };

        accounts
            .identity(user_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown user"))
    }
}

/// Verifies `token` and refuses suspended accounts, so no session is ever
/// established for them.
pub async fn authenticate(verifier: &dyn TokenVerifier, token: &str) -> Result<Identity, ApiError> {
    let identity = verifier.verify(token).await?;
    if identity.status == AccountStatus::Suspended {
        return Err(ApiError::new(ErrorCode::Unauthorized, "account suspended"));
    }
    Ok(identity)
}

/// Mints a development token accepted by [`JwtVerifier`].
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    role: PlatformRole,
    ttl_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.0.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;

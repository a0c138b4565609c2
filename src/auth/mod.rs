use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

use crate::errors::ErrorResponse;
use crate::AppState;

/// Claim structure for session tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (buyer ID)
    pub jti: String, // Unique identifier for this token
    pub iat: i64,    // Issued at time
    pub exp: i64,    // Expiration time
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Invalid authentication token")]
    InvalidToken,
    #[error("Authentication token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let err = ErrorResponse {
            error: "Unauthorized".to_string(),
            message: self.to_string(),
            available_stock: None,
            timestamp: Utc::now().to_rfc3339(),
        };
        (StatusCode::UNAUTHORIZED, Json(err)).into_response()
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_lifetime_secs: i64,
}

/// Issues and validates HS256 session tokens.
#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a session token for a buyer.
    pub fn issue_token(&self, buyer_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: buyer_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.token_lifetime_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|_| AuthError::InvalidToken)
    }

    /// Validates a session token and extracts the claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }
}

/// Authenticated buyer extracted from the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let claims = app.auth_service.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthUser { user_id })
    }
}

/// Session extraction for endpoints that also accept link-token auth.
///
/// A missing or unusable bearer header yields `None` rather than rejecting,
/// so the handler can fall back to the single-use token carried in the
/// query string.
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalAuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuthUser(
            AuthUser::from_request_parts(parts, state).await.ok(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(AuthConfig {
            jwt_secret: "test_secret_key_for_testing_purposes_only".to_string(),
            token_lifetime_secs: 3600,
        })
    }

    #[test]
    fn issued_token_round_trips() {
        let svc = service();
        let buyer = Uuid::new_v4();
        let token = svc.issue_token(buyer).unwrap();
        let claims = svc.validate_token(&token).unwrap();
        assert_eq!(claims.sub, buyer.to_string());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let svc = service();
        let token = svc.issue_token(Uuid::new_v4()).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            svc.validate_token(&tampered),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let svc = service();
        let other = AuthService::new(AuthConfig {
            jwt_secret: "a_completely_different_secret_value".to_string(),
            token_lifetime_secs: 3600,
        });
        let token = other.issue_token(Uuid::new_v4()).unwrap();
        assert!(svc.validate_token(&token).is_err());
    }
}

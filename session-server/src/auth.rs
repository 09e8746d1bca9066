//! Token handling for the socket upgrade. Tokens are HS256-signed over a
//! shared secret and carry the game and seat they grant; both claims must
//! be present and the token unexpired, or the upgrade is refused.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long a minted token stays valid.
const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub game_id: String,
    pub player: String,
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization")]
    MissingHeader,
    #[error("invalid authorization header")]
    MalformedHeader,
    #[error("invalid token")]
    InvalidToken,
    #[error("missing claims")]
    MissingClaims,
}

/// Mints a token for one seat of one game, expiring in 24 hours.
pub fn sign_token(
    secret: &str,
    game_id: &str,
    player: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        game_id: game_id.to_string(),
        player: player.to_string(),
        exp: (Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies signature, algorithm and expiry, then the claim contents.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AuthError::InvalidToken)?;

    let claims = data.claims;
    if claims.game_id.trim().is_empty() || claims.player.trim().is_empty() {
        return Err(AuthError::MissingClaims);
    }
    Ok(claims)
}

/// Pulls the bearer token out of the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

use crate::model::role::Role;
use crate::models::{Claims, TokenType};

fn issue(
    user_id: &str,
    role: Role,
    token_type: TokenType,
    secret: &str,
    ttl: usize,
    now: DateTime<Utc>,
) -> Result<(String, Claims), Error> {
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: now.timestamp().max(0) as usize + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn generate_access_token(
    user_id: &str,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    issue(user_id, role, TokenType::Access, secret, ttl, Utc::now()).map(|(token, _)| token)
}

pub fn generate_refresh_token(
    user_id: &str,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    issue(user_id, role, TokenType::Refresh, secret, ttl, Utc::now())
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

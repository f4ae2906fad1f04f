/// file: src/auth.rs
/// description: JWT access/refresh tokens, password hashing, and bearer parsing.
use crate::config::AuthConfig;
use crate::models::{AppError, UserRow};
use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const ACCESS_USE: &str = "access";
const REFRESH_USE: &str = "refresh";

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub username: String,
    /// "access" or "refresh" — a token is only accepted for its own use.
    pub token_use: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

/// The authenticated caller, as far as handlers care.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: Uuid,
    pub username: String,
}

// ---------------------------------------------------------------------------
// AuthService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl AuthService {
    pub fn new(cfg: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
            issuer: cfg.jwt_issuer.clone(),
            access_ttl_seconds: cfg.access_ttl_seconds,
            refresh_ttl_seconds: cfg.refresh_ttl_seconds,
        }
    }

    fn issue_token(
        &self,
        user_id: Uuid,
        username: &str,
        token_use: &str,
        ttl_seconds: i64,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_owned(),
            token_use: token_use.to_owned(),
            exp: (now + chrono::Duration::seconds(ttl_seconds)).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("token encode failed: {e}")))
    }

    /// Short-lived access token + long-lived refresh token.
    pub fn issue_pair(&self, user: &UserRow) -> Result<(String, String), AppError> {
        let access =
            self.issue_token(user.id, &user.username, ACCESS_USE, self.access_ttl_seconds)?;
        let refresh =
            self.issue_token(user.id, &user.username, REFRESH_USE, self.refresh_ttl_seconds)?;
        Ok((access, refresh))
    }

    fn verify(&self, token: &str, expected_use: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::Unauthorized)?;

        if claims.token_use != expected_use {
            return Err(AppError::Unauthorized);
        }
        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<AuthedUser, AppError> {
        let claims = self.verify(token, ACCESS_USE)?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
        Ok(AuthedUser {
            id,
            username: claims.username,
        })
    }

    /// Returns the subject of a valid refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<AuthedUser, AppError> {
        let claims = self.verify(token, REFRESH_USE)?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
        Ok(AuthedUser {
            id,
            username: claims.username,
        })
    }

    /// Mint a fresh access token for an already-verified refresh subject.
    pub fn issue_access(&self, user: &AuthedUser) -> Result<String, AppError> {
        self.issue_token(user.id, &user.username, ACCESS_USE, self.access_ttl_seconds)
    }
}

// ---------------------------------------------------------------------------
// Password hashing — salted SHA-256, stored as "salt$digest" (hex)
// ---------------------------------------------------------------------------

pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::rng().random();
    let digest = salted_digest(&salt, password);
    format!("{}${}", hex::encode(salt), hex::encode(digest))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(digest_hex) else {
        return false;
    };
    salted_digest(&salt, password).as_slice() == expected.as_slice()
}

fn salted_digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> AuthService {
        AuthService::new(&AuthConfig {
            jwt_secret: "unit-test-secret-key".to_owned(),
            jwt_issuer: "dealfinder-test".to_owned(),
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 86_400,
        })
    }

    fn test_user() -> UserRow {
        UserRow {
            id: Uuid::new_v4(),
            username: "wanjiku".to_owned(),
            email: "wanjiku@example.com".to_owned(),
            password_hash: String::new(),
        }
    }

    #[test]
    fn access_token_round_trips() {
        let svc = test_service();
        let user = test_user();
        let (access, _) = svc.issue_pair(&user).unwrap();

        let authed = svc.verify_access(&access).unwrap();
        assert_eq!(authed.id, user.id);
        assert_eq!(authed.username, "wanjiku");
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let svc = test_service();
        let user = test_user();
        let (access, refresh) = svc.issue_pair(&user).unwrap();

        assert!(svc.verify_access(&refresh).is_err());
        assert!(svc.verify_refresh(&access).is_err());
        assert!(svc.verify_refresh(&refresh).is_ok());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let svc = test_service();
        let user = test_user();
        let stale = svc
            .issue_token(user.id, &user.username, ACCESS_USE, -3600)
            .unwrap();
        assert!(svc.verify_access(&stale).is_err());
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let svc = test_service();
        let other = AuthService::new(&AuthConfig {
            jwt_secret: "unit-test-secret-key".to_owned(),
            jwt_issuer: "someone-else".to_owned(),
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 86_400,
        });

        let user = test_user();
        let (access, _) = other.issue_pair(&user).unwrap();
        assert!(svc.verify_access(&access).is_err());
    }

    #[test]
    fn passwords_hash_with_unique_salts() {
        let a = hash_password("hunter2");
        let b = hash_password("hunter2");
        assert_ne!(a, b);
        assert!(verify_password("hunter2", &a));
        assert!(verify_password("hunter2", &b));
        assert!(!verify_password("hunter3", &a));
    }

    #[test]
    fn malformed_stored_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "nodollar"));
        assert!(!verify_password("x", "zz$notahexdigest"));
    }

    #[test]
    fn parses_bearer_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        let mut bad = HeaderMap::new();
        bad.insert("Authorization", "Basic dXNlcjpwdw==".parse().unwrap());
        assert_eq!(bearer_token(&bad), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}

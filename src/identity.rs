//! Caller identity: signed access tokens, the anonymous-id cookie, and
//! password hashing.
//!
//! Access tokens are self-contained HMAC-SHA256 signatures over the user id
//! and an expiry timestamp, so verification needs no store lookup. Anonymous
//! visitors are keyed by a UUID cookie minted on first contact.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the anonymous visitor id.
pub const ANONYMOUS_COOKIE: &str = "redesign_anonymous_id";

const TOKEN_VERSION: &str = "v1";
const COOKIE_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated(i64),
    Anonymous(String),
    Unidentified,
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated(_))
    }
}

/// Issues and verifies access tokens of the form
/// `v1.<user_id>.<expiry_unix>.<hex hmac>`.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
        }
    }

    fn sign(&self, message: &str) -> String {
        // key length is unconstrained for HMAC, so new_from_slice cannot fail
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Issue a token for a user, expiring after the configured ttl.
    pub fn issue(&self, user_id: i64) -> String {
        let expiry = now_unix() + self.ttl.as_secs();
        let message = format!("{TOKEN_VERSION}.{user_id}.{expiry}");
        let signature = self.sign(&message);
        format!("{message}.{signature}")
    }

    /// Verify a token, returning the user id when the signature matches and
    /// the token has not expired.
    pub fn verify(&self, token: &str) -> Option<i64> {
        let mut parts = token.splitn(4, '.');
        let version = parts.next()?;
        let user_id: i64 = parts.next()?.parse().ok()?;
        let expiry: u64 = parts.next()?.parse().ok()?;
        let signature = parts.next()?;
        if version != TOKEN_VERSION {
            return None;
        }

        let message = format!("{TOKEN_VERSION}.{user_id}.{expiry}");
        let expected = self.sign(&message);
        if expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() != 1 {
            return None;
        }
        if expiry <= now_unix() {
            return None;
        }
        Some(user_id)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Extract a bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Find the anonymous-id cookie value, if present.
pub fn anonymous_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(ANONYMOUS_COOKIE) {
            if let Some(value) = value.strip_prefix('=') {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Build the Set-Cookie value for a freshly minted anonymous id.
pub fn anonymous_set_cookie(id: &str) -> String {
    format!(
        "{ANONYMOUS_COOKIE}={id}; Max-Age={COOKIE_MAX_AGE_SECS}; Path=/; HttpOnly; SameSite=Strict"
    )
}

/// Resolve the caller's identity from request headers. A valid bearer token
/// wins; otherwise the anonymous cookie is used, minting a fresh id (and
/// returning its Set-Cookie value) when none is present.
pub fn resolve_or_mint(headers: &HeaderMap, signer: &TokenSigner) -> (Identity, Option<String>) {
    if let Some(token) = bearer_token(headers) {
        if let Some(user_id) = signer.verify(token) {
            return (Identity::Authenticated(user_id), None);
        }
    }
    if let Some(id) = anonymous_cookie(headers) {
        return (Identity::Anonymous(id), None);
    }
    let id = uuid::Uuid::new_v4().to_string();
    let cookie = anonymous_set_cookie(&id);
    (Identity::Anonymous(id), Some(cookie))
}

/// Resolve identity without minting: requests that must already belong to a
/// known caller (login-protected reads) use this.
pub fn resolve(headers: &HeaderMap, signer: &TokenSigner) -> Identity {
    if let Some(token) = bearer_token(headers) {
        if let Some(user_id) = signer.verify(token) {
            return Identity::Authenticated(user_id);
        }
    }
    match anonymous_cookie(headers) {
        Some(id) => Identity::Anonymous(id),
        None => Identity::Unidentified,
    }
}

/// Hash a password as `salt$hex(hmac_sha256(salt, password))`.
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let digest = hmac_hex(salt.as_bytes(), password.as_bytes());
    format!("{salt}${digest}")
}

/// Verify a password against a stored `salt$digest` hash.
pub fn verify_password(stored: &str, password: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    let expected = hmac_hex(salt.as_bytes(), password.as_bytes());
    expected.as_bytes().ct_eq(digest.as_bytes()).unwrap_u8() == 1
}

fn hmac_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret", Duration::from_secs(3600))
    }

    #[test]
    fn issued_tokens_round_trip() {
        let s = signer();
        let token = s.issue(42);
        assert_eq!(s.verify(&token), Some(42));
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let s = signer();
        let token = s.issue(42);
        let forged = token.replacen("42", "43", 1);
        assert_eq!(s.verify(&forged), None);

        let other = TokenSigner::new("other-secret", Duration::from_secs(3600));
        assert_eq!(other.verify(&token), None);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let s = TokenSigner::new("test-secret", Duration::from_secs(0));
        let token = s.issue(7);
        assert_eq!(s.verify(&token), None);
    }

    #[test]
    fn bearer_token_wins_over_cookie() {
        let s = signer();
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", s.issue(9))).unwrap(),
        );
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{ANONYMOUS_COOKIE}=abc")).unwrap(),
        );
        let (identity, cookie) = resolve_or_mint(&headers, &s);
        assert_eq!(identity, Identity::Authenticated(9));
        assert!(cookie.is_none());
    }

    #[test]
    fn missing_cookie_mints_one() {
        let s = signer();
        let (identity, cookie) = resolve_or_mint(&HeaderMap::new(), &s);
        let Identity::Anonymous(id) = identity else {
            panic!("expected anonymous identity");
        };
        let cookie = cookie.expect("set-cookie expected");
        assert!(cookie.starts_with(&format!("{ANONYMOUS_COOKIE}={id}")));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
    }

    #[test]
    fn existing_cookie_is_reused() {
        let s = signer();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; redesign_anonymous_id=anon-1; theme=dark"),
        );
        let (identity, cookie) = resolve_or_mint(&headers, &s);
        assert_eq!(identity, Identity::Anonymous("anon-1".to_string()));
        assert!(cookie.is_none());
    }

    #[test]
    fn invalid_bearer_falls_back_to_unidentified() {
        let s = signer();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer junk"));
        assert_eq!(resolve(&headers, &s), Identity::Unidentified);
    }

    #[test]
    fn password_hashing_verifies_and_salts() {
        let a = hash_password("hunter2");
        let b = hash_password("hunter2");
        assert_ne!(a, b);
        assert!(verify_password(&a, "hunter2"));
        assert!(verify_password(&b, "hunter2"));
        assert!(!verify_password(&a, "hunter3"));
        assert!(!verify_password("garbage", "hunter2"));
    }
}

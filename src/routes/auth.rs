use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::json_with_cookie;
use crate::error::{ApiError, ApiResult};
use crate::identity::{
    anonymous_cookie, hash_password, resolve, resolve_or_mint, verify_password, Identity,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Loose structural email check: one `@`, a dot somewhere in the domain.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(' ')
        && email.matches('@').count() == 1
}

/// At least 8 characters with one digit and one uppercase letter.
fn is_strong_password(password: &str) -> bool {
    password.len() >= 8
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_ascii_uppercase())
}

fn require_credentials(creds: &Credentials) -> ApiResult<()> {
    if creds.email.is_empty() || creds.password.is_empty() {
        return Err(ApiError::InvalidInput(
            "Email and password are required".to_string(),
        ));
    }
    Ok(())
}

/// Create an account, sign the caller in, and fold any anonymous history
/// into the new account.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(creds): Json<Credentials>,
) -> ApiResult<Response> {
    require_credentials(&creds)?;
    if !is_valid_email(&creds.email) {
        return Err(ApiError::InvalidInput("Invalid email format".to_string()));
    }
    if !is_strong_password(&creds.password) {
        return Err(ApiError::InvalidInput(
            "Password is too weak. It must be at least 8 characters and contain \
             at least one digit and one uppercase letter."
                .to_string(),
        ));
    }

    let user = state
        .users
        .create(&creds.email, &hash_password(&creds.password))
        .await?;
    let access_token = state.signer.issue(user.id);

    if let Some(anonymous_id) = anonymous_cookie(&headers) {
        state.usage.merge(&anonymous_id, user.id).await?;
    }

    tracing::info!(user_id = user.id, "user registered");
    Ok(json_with_cookie(
        StatusCode::CREATED,
        json!({
            "message": "User registered successfully",
            "user": {"id": user.id, "email": user.email},
            "access_token": access_token,
        }),
        None,
    ))
}

/// Verify credentials and issue an access token, folding anonymous history
/// into the account.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(creds): Json<Credentials>,
) -> ApiResult<impl IntoResponse> {
    require_credentials(&creds)?;

    let user = state
        .users
        .find_by_email(&creds.email)
        .await?
        .filter(|u| verify_password(&u.password_hash, &creds.password))
        .ok_or_else(|| ApiError::Unauthorized("Invalid email or password".to_string()))?;

    state.users.touch_last_login(user.id).await?;
    let access_token = state.signer.issue(user.id);

    if let Some(anonymous_id) = anonymous_cookie(&headers) {
        state.usage.merge(&anonymous_id, user.id).await?;
    }

    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(json!({
        "message": "Login successful",
        "user": {"id": user.id, "email": user.email},
        "access_token": access_token,
    })))
}

/// Stateless logout: tokens simply expire, the client discards its copy.
pub async fn logout() -> impl IntoResponse {
    Json(json!({"message": "Logout successful"}))
}

/// Exchange a still-valid access token for a fresh one.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let Identity::Authenticated(user_id) = resolve(&headers, &state.signer) else {
        return Err(ApiError::Unauthorized(
            "Missing or invalid token".to_string(),
        ));
    };
    let access_token = state.signer.issue(user_id);
    Ok(Json(json!({"access_token": access_token})))
}

/// Current account info plus lifetime usage count.
pub async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let Identity::Authenticated(user_id) = resolve(&headers, &state.signer) else {
        return Err(ApiError::Unauthorized(
            "Missing or invalid token".to_string(),
        ));
    };
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let usage_count = state.records.count_for_user(user_id).await?;

    Ok(Json(json!({
        "user": {
            "id": user.id,
            "email": user.email,
            "created_at": user.created_at.to_rfc3339(),
            "last_login": user.last_login.map(|t| t.to_rfc3339()),
        },
        "usage_count": usage_count,
    })))
}

/// Anonymous usage status, minting a cookie for first-time visitors.
pub async fn check_anonymous(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let (identity, cookie) = resolve_or_mint(&headers, &state.signer);
    let quota = state.usage.quota();

    let body = match &identity {
        Identity::Anonymous(id) => {
            let used = state.records.count_for_anonymous(id).await?;
            json!({
                "anonymous_id": id,
                "usage_count": used,
                "remaining": u64::from(quota).saturating_sub(used),
            })
        }
        _ => json!({
            "anonymous_id": serde_json::Value::Null,
            "usage_count": 0,
            "remaining": quota,
        }),
    };

    Ok(json_with_cookie(StatusCode::OK, body, cookie))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_catches_malformed_addresses() {
        assert!(is_valid_email("a@example.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@nodot"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("a@@example.com"));
    }

    #[test]
    fn password_strength_requires_length_digit_and_uppercase() {
        assert!(is_strong_password("Abcdefg1"));
        assert!(!is_strong_password("short1A"));
        assert!(!is_strong_password("alllowercase1"));
        assert!(!is_strong_password("NoDigitsHere"));
    }
}

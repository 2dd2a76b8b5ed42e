use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde_json::json;

use super::json_with_cookie;
use crate::error::ApiResult;
use crate::identity::{resolve_or_mint, Identity};
use crate::state::AppState;

/// Remaining anonymous usage for the caller. Authenticated users are
/// reported as unlimited; first-time visitors get a cookie minted here.
pub async fn usage_count(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let (identity, cookie) = resolve_or_mint(&headers, &state.signer);
    let quota = state.usage.quota();

    let body = match &identity {
        Identity::Authenticated(_) => json!({
            "usage_count": 0,
            "remaining": "unlimited",
            "authenticated": true,
        }),
        Identity::Anonymous(id) => {
            let used = state.records.count_for_anonymous(id).await?;
            json!({
                "usage_count": used,
                "remaining": u64::from(quota).saturating_sub(used),
                "authenticated": false,
            })
        }
        Identity::Unidentified => json!({
            "usage_count": 0,
            "remaining": quota,
            "authenticated": false,
        }),
    };

    Ok(json_with_cookie(StatusCode::OK, body, cookie))
}

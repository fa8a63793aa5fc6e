use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
    Json,
};
use server_api::authenticate;
use shared::{
    domain::Identity,
    error::{ApiError, ErrorCode},
};

use crate::{api::reject, app_state::AppState};

/// Picks the bearer credential in priority order: explicit handshake token,
/// `Authorization: Bearer` header, then the session cookie.
pub(crate) fn extract_credential(
    explicit: Option<&str>,
    headers: &HeaderMap,
    cookie_name: &str,
) -> Option<String> {
    if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub(crate) async fn identify(
    state: &AppState,
    explicit: Option<&str>,
    headers: &HeaderMap,
) -> Result<Identity, ApiError> {
    let token = extract_credential(explicit, headers, &state.auth_cookie)
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "missing credential"))?;
    authenticate(state.verifier.as_ref(), &token).await
}

/// Authenticated caller of a REST route.
pub(crate) struct AuthUser(pub(crate) Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        identify(state, None, &parts.headers)
            .await
            .map(AuthUser)
            .map_err(reject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn explicit_token_wins_over_header_and_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(header::COOKIE, HeaderValue::from_static("community_token=from-cookie"));

        assert_eq!(
            extract_credential(Some("explicit"), &headers, "community_token").as_deref(),
            Some("explicit")
        );
        assert_eq!(
            extract_credential(None, &headers, "community_token").as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn cookie_is_the_last_resort() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; community_token=abc.def; lang=en"),
        );
        assert_eq!(
            extract_credential(Some("  "), &headers, "community_token").as_deref(),
            Some("abc.def")
        );
        assert_eq!(extract_credential(None, &headers, "other"), None);
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(extract_credential(None, &headers, "community_token"), None);
    }
}

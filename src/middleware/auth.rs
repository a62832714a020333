use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use headers::{Authorization, HeaderMapExt, authorization::Bearer};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::CrmError;
use crate::router::CrmState;
use crate::service::rac::Principal;

fn ct_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Pull the presented credential out of the request.
/// Accepts either:
/// - Header: `x-api-key: <admin key>`
/// - Header: `Authorization: Bearer <user id>.<secret>`
/// - Query string: `?token=<user id>.<secret>` (for `EventSource` clients)
enum Credential {
    AdminKey(String),
    UserToken(String),
}

fn credential(headers: &HeaderMap, query: Option<&str>) -> Option<Credential> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(Credential::AdminKey(key.trim().to_string()));
    }

    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(Credential::UserToken(bearer.token().trim().to_string()));
    }

    query.and_then(|qs| {
        url::form_urlencoded::parse(qs.as_bytes())
            .find(|(k, _)| k == "token")
            .map(|(_, v)| Credential::UserToken(v.into_owned()))
    })
}

/// Resolve the request's credential into a principal.
pub async fn authenticate(
    state: &CrmState,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<Principal, CrmError> {
    match credential(headers, query).ok_or(CrmError::Unauthorized)? {
        Credential::AdminKey(key) => {
            let expected = state.cfg.basic.admin_key.as_str();
            if !expected.is_empty() && ct_eq(&key, expected) {
                Ok(Principal::admin())
            } else {
                Err(CrmError::Unauthorized)
            }
        }
        Credential::UserToken(token) => {
            let (id, secret) = token.split_once('.').ok_or(CrmError::Unauthorized)?;
            let id: i64 = id.parse().map_err(|_| CrmError::Unauthorized)?;
            let user = match state.storage.get_user(id).await {
                Ok(user) => user,
                Err(CrmError::NotFound(_)) => return Err(CrmError::Unauthorized),
                Err(e) => return Err(e),
            };
            if !user.active || !ct_eq(secret, &user.api_token) {
                debug!(user_id = id, "rejected user token");
                return Err(CrmError::Unauthorized);
            }
            let role = state.storage.role_by_id(user.role_id).await?;
            Ok(Principal::from_role(user.id, user.name, &role))
        }
    }
}

/// The authenticated caller. Rejects with 401 when the credential is missing
/// or does not match.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Principal);

impl FromRequestParts<CrmState> for AuthUser {
    type Rejection = CrmError;

    async fn from_request_parts(parts: &mut Parts, state: &CrmState) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers, parts.uri.query())
            .await
            .map(AuthUser)
    }
}

/// Provider callbacks carry the shared secret in `x-webhook-secret` when one
/// is configured.
#[derive(Debug, Clone, Copy)]
pub struct WebhookAuth;

impl FromRequestParts<CrmState> for WebhookAuth {
    type Rejection = CrmError;

    async fn from_request_parts(parts: &mut Parts, state: &CrmState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.cfg.basic.webhook_secret.as_deref() else {
            return Ok(Self);
        };
        let presented = parts
            .headers
            .get("x-webhook-secret")
            .and_then(|v| v.to_str().ok())
            .ok_or(CrmError::Unauthorized)?;
        if ct_eq(presented, expected) {
            Ok(Self)
        } else {
            Err(CrmError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn admin_key_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("k"));
        headers.insert("authorization", HeaderValue::from_static("Bearer 1.s"));
        assert!(matches!(credential(&headers, None), Some(Credential::AdminKey(k)) if k == "k"));
    }

    #[test]
    fn bearer_and_query_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer 3.abc"));
        assert!(matches!(credential(&headers, None), Some(Credential::UserToken(t)) if t == "3.abc"));

        let empty = HeaderMap::new();
        assert!(matches!(
            credential(&empty, Some("a=1&token=4.xyz")),
            Some(Credential::UserToken(t)) if t == "4.xyz"
        ));
        assert!(credential(&empty, Some("a=1")).is_none());
    }
}

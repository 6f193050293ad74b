//! Caller identity.
//!
//! Session issuance lives upstream; by the time a request reaches us the
//! gateway has put the authenticated user id in the `x-user-id` header.
//! WebSocket upgrades from browsers cannot set headers, so `?user_id=` is
//! accepted as well.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;

use courier_shared::constants::USER_ID_HEADER;
use courier_shared::UserId;

use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

#[derive(Deserialize)]
struct IdentityQuery {
    user_id: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let raw = match from_header {
            Some(id) => Some(id),
            None => Query::<IdentityQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.user_id),
        };

        raw.as_deref()
            .and_then(|id| UserId::parse(id).ok())
            .map(AuthUser)
            .ok_or(ServerError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<AuthUser, ServerError> {
        let (mut parts, _) = req.into_parts();
        AuthUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_header_identity() {
        let req = Request::builder()
            .uri("/users")
            .header(USER_ID_HEADER, "alice")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.unwrap().0.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_query_identity() {
        let req = Request::builder().uri("/ws?user_id=bob").body(()).unwrap();
        assert_eq!(extract(req).await.unwrap().0.as_str(), "bob");
    }

    #[tokio::test]
    async fn test_missing_or_blank_identity() {
        let req = Request::builder().uri("/users").body(()).unwrap();
        assert!(matches!(extract(req).await, Err(ServerError::Unauthorized)));

        let req = Request::builder()
            .uri("/users")
            .header(USER_ID_HEADER, "   ")
            .body(())
            .unwrap();
        assert!(matches!(extract(req).await, Err(ServerError::Unauthorized)));
    }
}

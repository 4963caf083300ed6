// ==============================================================================
// middleware/auth.rs - Forwarded User Extraction
// ==============================================================================
// Description: Extract the authenticated user id set by the upstream auth proxy
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
//
// Authentication itself happens upstream. The proxy sets X-Forwarded-User on
// every request it lets through; requests without it are rejected with 401.
// The user id is the ownership boundary for uploads, downloads and
// completion notifications.
//
// ==============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::models::ErrorResponse;

pub const USER_HEADER: &str = "X-Forwarded-User";

/// Authenticated user id
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match user {
            Some(user) => Ok(AuthUser(user.to_string())),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Authentication required")),
            )
                .into_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_auth_user_extraction() {
        let req = Request::builder()
            .header(USER_HEADER, "alice")
            .body(())
            .unwrap();

        let (mut parts, _) = req.into_parts();
        let result = AuthUser::from_request_parts(&mut parts, &()).await;

        assert_eq!(result.unwrap().0, "alice");
    }

    #[tokio::test]
    async fn test_auth_user_missing_header() {
        let req = Request::builder().body(()).unwrap();
        let (mut parts, _) = req.into_parts();
        let result = AuthUser::from_request_parts(&mut parts, &()).await;

        assert_eq!(result.unwrap_err().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_user_blank_header() {
        let req = Request::builder()
            .header(USER_HEADER, "   ")
            .body(())
            .unwrap();

        let (mut parts, _) = req.into_parts();
        let result = AuthUser::from_request_parts(&mut parts, &()).await;

        assert!(result.is_err());
    }
}

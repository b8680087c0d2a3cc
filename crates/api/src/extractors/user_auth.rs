//! User JWT authentication extractor.

use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::user_auth::{bearer_token, UserAuth as UserAuthData};

/// The caller's identity. Export jobs are owned by `user_id`.
///
/// Uses what [`require_user_auth`](crate::middleware::user_auth::require_user_auth)
/// stored in the request, or validates the bearer token itself.
#[derive(Debug, Clone)]
pub struct UserAuth {
    pub user_id: Uuid,
    pub jti: String,
}

impl From<UserAuthData> for UserAuth {
    fn from(data: UserAuthData) -> Self {
        Self {
            user_id: data.user_id,
            jti: data.jti,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for UserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(auth) = parts.extensions.get::<UserAuthData>() {
            return Ok(auth.clone().into());
        }

        let token = bearer_token(parts.headers.get(header::AUTHORIZATION))
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

        let auth_data = UserAuthData::validate(&state.jwt, token)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

        Ok(auth_data.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_auth_from_data() {
        let user_id = Uuid::new_v4();
        let auth: UserAuth = UserAuthData {
            user_id,
            jti: "test_jti".to_string(),
        }
        .into();
        assert_eq!(auth.user_id, user_id);
        assert_eq!(auth.jti, "test_jti");
    }
}

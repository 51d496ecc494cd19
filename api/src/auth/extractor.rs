use super::dto::JwtClaims;
use crate::models::ApiResponse;
use crate::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};
use common::domain::skill::is_valid_handle;
use common::services::publish::PublishActor;
use jsonwebtoken::{decode, DecodingKey, Validation};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub handle: String,
    pub role: String,
}

impl AuthUser {
    pub fn actor(&self) -> PublishActor {
        PublishActor {
            user_id: self.user_id,
            handle: self.handle.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        status,
        Json(ApiResponse::error(status.as_u16() as i32, message.to_string())),
    )
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = (StatusCode, Json<ApiResponse<()>>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

        let jwt = &state.settings.auth.jwt;
        let signing_key = jwt.signing_key.as_deref().ok_or_else(|| {
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "jwt signing key not configured",
            )
        })?;

        let mut validation = Validation::default();
        validation.set_issuer(std::slice::from_ref(&jwt.issuer));
        validation.set_audience(std::slice::from_ref(&jwt.audience));

        let decoded = decode::<JwtClaims>(
            token,
            &DecodingKey::from_secret(signing_key.as_bytes()),
            &validation,
        )
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "invalid token"))?;

        let user_id = Uuid::parse_str(&decoded.claims.sub)
            .map_err(|_| reject(StatusCode::UNAUTHORIZED, "invalid token sub"))?;

        let handle = decoded.claims.handle.trim().to_string();
        if !is_valid_handle(&handle) {
            return Err(reject(StatusCode::UNAUTHORIZED, "invalid token handle"));
        }

        Ok(Self {
            user_id,
            handle,
            role: decoded.claims.role,
        })
    }
}

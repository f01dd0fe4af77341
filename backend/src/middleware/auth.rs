//! Authentication middleware
//!
//! Bearer tokens are issued by the external identity provider; this module only
//! verifies them and exposes the caller's role and warehouse assignments.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use shared::{Actor, Role};

use crate::error::{ErrorDetail, ErrorResponse};
use crate::AppState;

/// Header carrying the machine intake token
pub const API_TOKEN_HEADER: &str = "x-api-token";

/// Authenticated user information extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: uuid::Uuid,
    pub role: Role,
    pub warehouses: Vec<String>,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.role, self.warehouses.clone())
    }
}

/// JWT claims structure
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    #[serde(default)]
    pub warehouses: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => return unauthorized_response("Missing or invalid Authorization header"),
    };

    let claims = match decode_jwt(token, &state.config.jwt.secret) {
        Ok(claims) => claims,
        Err(msg) => return unauthorized_response(&msg),
    };

    let auth_user = match auth_user_from_claims(claims) {
        Ok(user) => user,
        Err(msg) => return unauthorized_response(msg),
    };

    request.extensions_mut().insert(auth_user);

    next.run(request).await
}

/// Guard for the machine intake endpoint
pub async fn api_token_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !api_token_accepted(request.headers(), state.config.intake.api_token.as_deref()) {
        tracing::warn!("Intake request rejected: bad or missing API token");
        return unauthorized_response("Invalid API token");
    }
    next.run(request).await
}

/// Without a configured token the intake endpoint is open.
fn api_token_accepted(headers: &HeaderMap, expected: Option<&str>) -> bool {
    match expected.map(str::trim).filter(|t| !t.is_empty()) {
        None => true,
        Some(expected) => headers
            .get(API_TOKEN_HEADER)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|provided| provided == expected),
    }
}

fn auth_user_from_claims(claims: Claims) -> Result<AuthUser, &'static str> {
    let user_id =
        uuid::Uuid::parse_str(&claims.sub).map_err(|_| "Invalid user ID in token")?;
    let role = Role::from_str(&claims.role).ok_or("Unknown role in token")?;

    Ok(AuthUser {
        user_id,
        role,
        warehouses: claims.warehouses,
    })
}

/// Decode and validate JWT token
fn decode_jwt(token: &str, secret: &str) -> Result<Claims, String> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {}", e))
}

/// Create unauthorized response
fn unauthorized_response(message: &str) -> Response {
    let error = ErrorResponse {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message_en: message.to_string(),
            message_es: "No autorizado".to_string(),
            field: None,
        },
    };

    (StatusCode::UNAUTHORIZED, Json(error)).into_response()
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                let error = ErrorResponse {
                    error: ErrorDetail {
                        code: "UNAUTHORIZED".to_string(),
                        message_en: "Authentication required".to_string(),
                        message_es: "Debe iniciar sesión".to_string(),
                        field: None,
                    },
                };
                (StatusCode::UNAUTHORIZED, Json(error))
            })
    }
}

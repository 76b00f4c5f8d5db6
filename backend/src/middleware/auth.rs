//! Authentication middleware
//!
//! Bearer JWT validation and permission checks. Token issuance lives outside this service;
//! the middleware only verifies signatures against the configured secret.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

/// Authenticated user information extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// Check if user has a specific permission
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        let permission = format!("{}:{}", resource, action);
        self.permissions.contains(&permission)
    }
}

/// Validate the bearer token and attach the [`AuthUser`] to the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        Some(token) => token,
        None => {
            return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
                .into_response()
        }
    };

    let auth_user = match decode_jwt(token, &state.config.jwt.secret) {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// JWT claims structure
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Decode and validate a JWT, returning the user it names
pub fn decode_jwt(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid user ID in token".to_string()))?;

    Ok(AuthUser {
        user_id,
        permissions: claims.permissions,
    })
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
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

/// Permission guard for use in handlers
pub fn check_permission(user: &AuthUser, resource: &str, action: &str) -> Result<(), AppError> {
    if user.has_permission(resource, action) {
        Ok(())
    } else {
        Err(AppError::InsufficientPermissions(format!(
            "{}:{}",
            resource, action
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-at-least-16";

    fn token(sub: &str, permissions: &[&str]) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            exp: now + 3600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_valid_token() {
        let user_id = Uuid::new_v4();
        let user = decode_jwt(&token(&user_id.to_string(), &["stock:write"]), SECRET).unwrap();
        assert_eq!(user.user_id, user_id);
        assert!(user.has_permission("stock", "write"));
        assert!(!user.has_permission("stock", "purge"));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let jwt = token(&Uuid::new_v4().to_string(), &[]);
        assert!(matches!(
            decode_jwt(&jwt, "another-secret-value"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_check_permission_names_requirement() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            permissions: vec!["physical_counts:review".to_string()],
        };
        assert!(check_permission(&user, "physical_counts", "review").is_ok());
        let err = check_permission(&user, "stock", "purge").unwrap_err();
        assert!(err.to_string().contains("stock:purge"));
    }
}

//! Bearer-token authentication for the admin surface.
//!
//! Tokens are prefix-scoped: `admin_*` carries {read, write, admin},
//! `analyst_*` carries {read}. Admin endpoints require the `admin`
//! permission and answer 403 otherwise.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Analyst,
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub role: Role,
    pub permissions: &'static [&'static str],
}

impl AuthContext {
    pub fn can(&self, permission: &str) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Map a bearer token to its auth context.
pub fn authenticate(token: &str) -> Option<AuthContext> {
    if token.starts_with("admin_") {
        Some(AuthContext {
            role: Role::Admin,
            permissions: &["read", "write", "admin"],
        })
    } else if token.starts_with("analyst_") {
        Some(AuthContext {
            role: Role::Analyst,
            permissions: &["read"],
        })
    } else {
        None
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Middleware guarding admin endpoints.
pub async fn require_admin(mut req: Request, next: Next) -> Result<Response, AuthError> {
    let token = bearer_token(&req).ok_or(AuthError::MissingToken)?;
    let ctx = authenticate(&token).ok_or(AuthError::InvalidToken)?;
    if !ctx.can("admin") {
        return Err(AuthError::Forbidden);
    }
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "Admin permission required"),
        };
        let body = Json(serde_json::json!({
            "status": "error",
            "timestamp": Utc::now().to_rfc3339(),
            "error": message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[test]
    fn token_prefixes_map_to_permissions() {
        let admin = authenticate("admin_token123").unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.can("admin"));
        assert!(admin.can("write"));

        let analyst = authenticate("analyst_token123").unwrap();
        assert_eq!(analyst.role, Role::Analyst);
        assert!(analyst.can("read"));
        assert!(!analyst.can("admin"));

        assert!(authenticate("random_token").is_none());
        assert!(authenticate("").is_none());
    }

    #[test]
    fn bearer_extraction() {
        let req = HttpRequest::builder()
            .header("Authorization", "Bearer admin_abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req.into()), Some("admin_abc".to_string()));

        let no_scheme = HttpRequest::builder()
            .header("Authorization", "admin_abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&no_scheme.into()), None);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            AuthError::MissingToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }
}

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use lesprivate_common::{AppError, UserRole};

use crate::jwt::{Claims, JwtService, TokenKind};

/// Validates the bearer token and stores its claims in the request extensions.
pub async fn auth_middleware(
    State(jwt_service): State<JwtService>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token_from_headers(request.headers())
        .ok_or_else(|| AppError::Authentication("Missing bearer token".to_string()))?;

    let claims = jwt_service.validate_token(token, TokenKind::Access)?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

fn check_role(request: &Request, role: UserRole) -> Result<(), AppError> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::Authentication("Not authenticated".to_string()))?;

    if claims.has_role(role) {
        Ok(())
    } else {
        Err(AppError::Authorization(format!("{} role required", role.as_str())))
    }
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    check_role(&request, UserRole::Admin)?;
    Ok(next.run(request).await)
}

pub async fn require_tutor(request: Request, next: Next) -> Result<Response, AppError> {
    check_role(&request, UserRole::Tutor)?;
    Ok(next.run(request).await)
}

pub async fn require_student(request: Request, next: Next) -> Result<Response, AppError> {
    check_role(&request, UserRole::Student)?;
    Ok(next.run(request).await)
}

fn extract_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .ok_or_else(|| AppError::Authentication("Not authenticated".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use lesprivate_common::JwtConfig;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn jwt() -> JwtService {
        JwtService::new(&JwtConfig {
            secret: "middleware-secret-value".to_string(),
            issuer: "lesprivate".to_string(),
            access_expiration_minutes: 5,
            refresh_expiration_hours: 1,
        })
    }

    fn app(jwt: JwtService) -> Router {
        Router::new()
            .route("/admin", get(|claims: Claims| async move { claims.email }))
            .route_layer(middleware::from_fn(require_admin))
            .route_layer(middleware::from_fn_with_state(jwt, auth_middleware))
    }

    fn request(token: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/admin");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Token abc".parse().unwrap());
        assert_eq!(extract_token_from_headers(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(extract_token_from_headers(&headers), Some("abc"));
    }

    #[tokio::test]
    async fn missing_token_is_401() {
        let response = app(jwt()).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_role_is_403() {
        let jwt = jwt();
        let pair = jwt
            .issue_pair(Uuid::new_v4(), "s@example.com", &[UserRole::Student])
            .unwrap();
        let response = app(jwt).oneshot(request(Some(&pair.access))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_passes() {
        let jwt = jwt();
        let pair = jwt
            .issue_pair(Uuid::new_v4(), "a@example.com", &[UserRole::Admin])
            .unwrap();
        let response = app(jwt).oneshot(request(Some(&pair.access))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

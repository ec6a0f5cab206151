use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use lesprivate_auth::{JwtService, PasswordService, TokenKind, TokenPair};
use lesprivate_common::{AppError, UserRole};
use lesprivate_database::{Database, User};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, message = "is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub roles: Vec<UserRole>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: SessionUser,
}

/// Password login and refresh-token rotation.
#[derive(Clone)]
pub struct AccountService {
    db: Database,
    jwt: JwtService,
}

impl AccountService {
    pub fn new(db: Database, jwt: JwtService) -> Self {
        Self { db, jwt }
    }

    async fn roles(&self, user_id: Uuid) -> Result<Vec<UserRole>, AppError> {
        let roles = sqlx::query_scalar::<_, UserRole>(
            "SELECT role FROM user_roles WHERE user_id = $1 ORDER BY role",
        )
        .bind(user_id)
        .fetch_all(self.db.reader())
        .await?;
        Ok(roles)
    }

    async fn session(&self, user: User) -> Result<Session, AppError> {
        let roles = self.roles(user.id).await?;
        let tokens = self.jwt.issue_pair(user.id, &user.email, &roles)?;
        Ok(Session {
            tokens,
            user: SessionUser {
                id: user.id,
                email: user.email,
                name: user.name,
                roles,
            },
        })
    }

    pub async fn login(&self, request: LoginRequest) -> Result<Session, AppError> {
        request.validate()?;

        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE LOWER(email) = LOWER($1) AND deleted_at IS NULL",
        )
        .bind(request.email.trim())
        .fetch_optional(self.db.reader())
        .await?;

        let invalid = || AppError::Authentication("Invalid email or password".to_string());
        let user = user.ok_or_else(invalid)?;
        let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
        if !PasswordService::verify_password(&request.password, hash) {
            return Err(invalid());
        }

        tracing::info!(user_id = %user.id, "User logged in");
        self.session(user).await
    }

    pub async fn refresh(&self, request: RefreshRequest) -> Result<Session, AppError> {
        let claims = self.jwt.validate_token(&request.refresh, TokenKind::Refresh)?;

        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(claims.user_id())
        .fetch_optional(self.db.reader())
        .await?
        .ok_or_else(|| AppError::Authentication("Account no longer exists".to_string()))?;

        self.session(user).await
    }
}

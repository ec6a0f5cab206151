use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lesprivate_common::{AppError, JwtConfig, UserRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub roles: Vec<UserRole>,
    pub kind: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

impl Claims {
    pub fn user_id(&self) -> Uuid {
        self.sub
    }

    pub fn has_role(&self, role: UserRole) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[config.issuer.as_str()]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config: config.clone(),
        }
    }

    fn sign(
        &self,
        user_id: Uuid,
        email: &str,
        roles: &[UserRole],
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>), AppError> {
        let now = Utc::now();
        let exp = now + ttl;
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            roles: roles.to_vec(),
            kind,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.config.issuer.clone(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to generate token: {}", e)))?;
        Ok((token, exp))
    }

    pub fn issue_pair(
        &self,
        user_id: Uuid,
        email: &str,
        roles: &[UserRole],
    ) -> Result<TokenPair, AppError> {
        let (access, expires_at) = self.sign(
            user_id,
            email,
            roles,
            TokenKind::Access,
            Duration::minutes(self.config.access_expiration_minutes),
        )?;
        let (refresh, _) = self.sign(
            user_id,
            email,
            roles,
            TokenKind::Refresh,
            Duration::hours(self.config.refresh_expiration_hours),
        )?;

        Ok(TokenPair {
            access,
            refresh,
            expires_at,
        })
    }

    pub fn validate_token(&self, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Authentication(format!("Invalid token: {}", e)))?;

        if claims.kind != kind {
            return Err(AppError::Authentication("Wrong token type".to_string()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new(&JwtConfig {
            secret: "test-secret-test-secret".to_string(),
            issuer: "lesprivate".to_string(),
            access_expiration_minutes: 15,
            refresh_expiration_hours: 24,
        })
    }

    #[test]
    fn access_token_round_trips_roles() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let pair = jwt
            .issue_pair(user_id, "tutor@example.com", &[UserRole::Tutor])
            .unwrap();

        let claims = jwt.validate_token(&pair.access, TokenKind::Access).unwrap();
        assert_eq!(claims.user_id(), user_id);
        assert!(claims.has_role(UserRole::Tutor));
        assert!(!claims.has_role(UserRole::Admin));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let jwt = service();
        let pair = jwt
            .issue_pair(Uuid::new_v4(), "s@example.com", &[UserRole::Student])
            .unwrap();

        assert!(jwt.validate_token(&pair.refresh, TokenKind::Access).is_err());
        assert!(jwt.validate_token(&pair.refresh, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = JwtService::new(&JwtConfig {
            secret: "another-secret-another".to_string(),
            issuer: "lesprivate".to_string(),
            access_expiration_minutes: 15,
            refresh_expiration_hours: 24,
        });
        let pair = other
            .issue_pair(Uuid::new_v4(), "a@example.com", &[UserRole::Admin])
            .unwrap();

        let err = service().validate_token(&pair.access, TokenKind::Access).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}

use bcrypt::{hash, verify, DEFAULT_COST};
use lesprivate_common::AppError;

pub struct PasswordService;

impl PasswordService {
    pub fn hash_password(password: &str) -> Result<String, AppError> {
        hash(password, DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn verify_password(password: &str, hashed: &str) -> bool {
        verify(password, hashed).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Stored password hash is unreadable");
            false
        })
    }

    pub fn validate_password_strength(password: &str) -> Result<(), AppError> {
        let rules: [(&str, fn(&str) -> bool); 4] = [
            ("at least 8 characters", |p| p.chars().count() >= 8),
            ("an uppercase letter", |p| p.chars().any(char::is_uppercase)),
            ("a lowercase letter", |p| p.chars().any(char::is_lowercase)),
            ("a digit", |p| p.chars().any(|c| c.is_ascii_digit())),
        ];

        match rules.iter().find(|(_, ok)| !ok(password)) {
            Some((rule, _)) => Err(AppError::Validation(format!("Password must contain {}", rule))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_passwords_name_the_first_missing_rule() {
        let err = PasswordService::validate_password_strength("short").unwrap_err();
        assert_eq!(err.public_message(), "Password must contain at least 8 characters");

        let err = PasswordService::validate_password_strength("alllowercase1").unwrap_err();
        assert_eq!(err.public_message(), "Password must contain an uppercase letter");

        assert!(PasswordService::validate_password_strength("Sufficient1").is_ok());
    }

    #[test]
    fn hash_then_verify() {
        let hashed = PasswordService::hash_password("Sufficient1").unwrap();
        assert!(PasswordService::verify_password("Sufficient1", &hashed));
        assert!(!PasswordService::verify_password("Different1", &hashed));
        assert!(!PasswordService::verify_password("Sufficient1", "not-a-hash"));
    }
}

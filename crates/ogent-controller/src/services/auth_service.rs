use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ogent_shared::{OgentError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Bearer-token issuance and verification for both the bootstrap HTTP API
/// and WebSocket connect-time authentication. There is no user table: a
/// single admin credential is configured at startup and its password is
/// hashed once, the same way a per-user password hash would be.
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    admin_username: String,
    admin_password_hash: String,
    token_ttl_minutes: i64,
}

impl AuthService {
    pub fn new(
        jwt_secret: String,
        admin_username: String,
        admin_password: &str,
        token_ttl_minutes: i64,
    ) -> Self {
        let admin_password_hash =
            Self::hash_password(admin_password).expect("admin password must hash");

        Self {
            jwt_secret,
            admin_username,
            admin_password_hash,
            token_ttl_minutes,
        }
    }

    #[cfg(test)]
    pub fn new_test() -> Self {
        Self::new(
            "test-secret-key".to_string(),
            "admin".to_string(),
            "password",
            60,
        )
    }

    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| OgentError::InternalError(e.to_string()))?;

        Ok(password_hash.to_string())
    }

    fn verify_password(password: &str, hash: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        let ok = username == self.admin_username
            && Self::verify_password(password, &self.admin_password_hash);

        if ok {
            tracing::info!(
                target: "ogent_controller",
                security = "credential_verification",
                event = "credentials_verified",
                status = "success",
                "bootstrap credentials verified"
            );
        } else {
            tracing::warn!(
                target: "ogent_controller",
                security = "credential_verification",
                event = "credential_verification_failed",
                status = "failed",
                "bootstrap credential verification failed"
            );
        }

        ok
    }

    pub fn generate_token(&self, subject: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.token_ttl_minutes);

        let claims = Claims {
            sub: subject.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        match encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_ref()),
        ) {
            Ok(token) => {
                tracing::info!(
                    target: "ogent_controller",
                    security = "token_generation",
                    event = "token_generated",
                    subject,
                    expires_at = %exp.format("%Y-%m-%d %H:%M:%S UTC"),
                    status = "success",
                    "bearer token generated"
                );
                Ok(token)
            }
            Err(e) => {
                tracing::error!(
                    target: "ogent_controller",
                    security = "token_generation",
                    event = "token_generation_failed",
                    subject,
                    error = %e,
                    status = "failed",
                    "bearer token generation failed"
                );
                Err(OgentError::InternalError(e.to_string()))
            }
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_ref()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|_| OgentError::AuthFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_password() {
        let service = AuthService::new_test();
        assert!(!service.verify_credentials("admin", "wrong"));
    }

    #[test]
    fn accepts_configured_credential() {
        let service = AuthService::new_test();
        assert!(service.verify_credentials("admin", "password"));
    }

    #[test]
    fn generated_token_round_trips() {
        let service = AuthService::new_test();
        let token = service.generate_token("admin").unwrap();
        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "admin");
    }
}

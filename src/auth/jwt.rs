//! Verification of Supabase-issued HS256 access tokens.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{Identity, Role, TokenValidator, TokenValidatorError};
use crate::config::SecretString;

/// Claims carried by a Supabase access token.
///
/// The top-level `role` claim is the Postgres role (`authenticated`), not the
/// application role; the application role lives in `app_metadata.role` and,
/// for older accounts, `user_metadata.role`.
#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseClaims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiration timestamp (Unix epoch)
    pub exp: i64,
    #[serde(default)]
    pub app_metadata: Option<Value>,
    #[serde(default)]
    pub user_metadata: Option<Value>,
}

impl SupabaseClaims {
    fn application_role(&self) -> Option<&str> {
        [&self.app_metadata, &self.user_metadata]
            .into_iter()
            .flatten()
            .find_map(|meta| meta.get("role").and_then(Value::as_str))
    }
}

/// Validates bearer tokens locally against the shared JWT secret.
pub struct JwtTokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtTokenValidator {
    /// Build a validator for the given secret and optional expected audience.
    pub fn new(secret: &SecretString, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.expose().as_bytes()),
            validation,
        }
    }

    fn identity_from_claims(claims: SupabaseClaims) -> Option<Identity> {
        let Some(role_name) = claims.application_role() else {
            debug!(user_id = %claims.sub, "Token carries no application role");
            return None;
        };

        let role: Role = match role_name.parse() {
            Ok(role) => role,
            Err(e) => {
                debug!(user_id = %claims.sub, error = %e, "Token carries an unrecognized role");
                return None;
            }
        };

        Some(Identity::new(
            claims.sub,
            claims.email.unwrap_or_default(),
            role,
        ))
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<Option<Identity>, TokenValidatorError> {
        match decode::<SupabaseClaims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(Self::identity_from_claims(data.claims)),
            Err(e) => {
                // Reason stays in debug logs; callers only learn "invalid"
                debug!(error = %e, "Bearer token failed verification");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &str = "test-jwt-secret-with-enough-entropy";

    fn sign(claims: Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn validator() -> JwtTokenValidator {
        JwtTokenValidator::new(&SecretString::new(SECRET), None)
    }

    fn exp_in(seconds: i64) -> i64 {
        Utc::now().timestamp() + seconds
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let token = sign(
            json!({
                "sub": "user-123",
                "email": "nurse@example.org",
                "exp": exp_in(3600),
                "role": "authenticated",
                "app_metadata": { "role": "Technician" }
            }),
            SECRET,
        );

        let identity = validator().validate(&token).await.unwrap().unwrap();

        assert_eq!(identity.id, "user-123");
        assert_eq!(identity.email, "nurse@example.org");
        assert_eq!(identity.role, Role::Technician);
    }

    #[tokio::test]
    async fn test_user_metadata_role_fallback() {
        let token = sign(
            json!({
                "sub": "user-9",
                "exp": exp_in(3600),
                "user_metadata": { "role": "Administrator" }
            }),
            SECRET,
        );

        let identity = validator().validate(&token).await.unwrap().unwrap();
        assert_eq!(identity.role, Role::Administrator);
        assert_eq!(identity.email, "");
    }

    #[tokio::test]
    async fn test_wrong_secret_is_invalid() {
        let token = sign(
            json!({ "sub": "u", "exp": exp_in(3600), "app_metadata": { "role": "Staff" } }),
            "some-other-secret",
        );

        assert!(validator().validate(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_invalid() {
        let token = sign(
            json!({ "sub": "u", "exp": exp_in(-3600), "app_metadata": { "role": "Staff" } }),
            SECRET,
        );

        assert!(validator().validate(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_role_is_invalid() {
        let token = sign(
            json!({ "sub": "u", "exp": exp_in(3600), "app_metadata": { "role": "Janitor" } }),
            SECRET,
        );

        assert!(validator().validate(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        assert!(validator().validate("not.a.jwt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audience_is_enforced_when_configured() {
        let strict = JwtTokenValidator::new(&SecretString::new(SECRET), Some("authenticated"));
        let claims = |aud: &str| {
            json!({
                "sub": "u",
                "aud": aud,
                "exp": exp_in(3600),
                "app_metadata": { "role": "Manager" }
            })
        };

        assert!(
            strict
                .validate(&sign(claims("authenticated"), SECRET))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            strict
                .validate(&sign(claims("anon"), SECRET))
                .await
                .unwrap()
                .is_none()
        );
    }
}

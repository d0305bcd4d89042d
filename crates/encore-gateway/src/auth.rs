use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::debug;

use encore_types::api::Claims;
use encore_types::error::{ChatError, ChatResult};
use encore_types::models::Principal;

/// Verifies bearer tokens. Issuance lives outside this service.
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> ChatResult<Principal>;
}

/// HS256 JWT verification against a shared secret.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, token: &str) -> ChatResult<Principal> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Rejected token: {}", e);
            ChatError::Unauthorized
        })?;

        Ok(Principal {
            user_id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

/// Strip the `Bearer ` scheme from an Authorization header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    fn token(secret: &str, sub: Uuid, exp_offset: i64) -> String {
        let claims = Claims {
            sub,
            role: "organizer".into(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let auth = JwtAuthenticator::new("s3cret");
        let user = Uuid::new_v4();
        let principal = auth.verify(&token("s3cret", user, 3600)).unwrap();
        assert_eq!(principal.user_id, user);
        assert_eq!(principal.role, "organizer");
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let auth = JwtAuthenticator::new("s3cret");
        let user = Uuid::new_v4();
        assert!(matches!(auth.verify(&token("other", user, 3600)), Err(ChatError::Unauthorized)));
        assert!(matches!(auth.verify(&token("s3cret", user, -3600)), Err(ChatError::Unauthorized)));
        assert!(matches!(auth.verify("garbage"), Err(ChatError::Unauthorized)));
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}

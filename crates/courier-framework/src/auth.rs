//! HS256 delivery tokens.

use std::collections::HashSet;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use courier_core::{AuthError, Claims, TokenVerifier};

/// Verifies and issues delivery tokens signed with a shared secret.
///
/// Expiry is not enforced unless asked for: webhook URLs are configured
/// once in third-party tools and live for as long as the service does. A
/// bad signature is rejected either way.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, verify_expiry: bool) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = verify_expiry;
        validation.required_spec_claims = if verify_expiry {
            HashSet::from(["exp".to_string()])
        } else {
            HashSet::new()
        };

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Signs claims into a token.
    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Malformed(e.to_string()))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Malformed(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: Option<u64>) -> Claims {
        Claims {
            service_id: "gh".into(),
            validation_key: "k1".into(),
            exp,
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let verifier = JwtVerifier::new("secret", false);
        let token = verifier.issue(&claims(None)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), claims(None));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtVerifier::new("other", false).issue(&claims(None)).unwrap();
        assert_eq!(
            JwtVerifier::new("secret", false).verify(&token),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn test_expiry_only_when_enabled() {
        let expired = claims(Some(1_000));
        let lenient = JwtVerifier::new("secret", false);
        let token = lenient.issue(&expired).unwrap();
        assert!(lenient.verify(&token).is_ok());

        let strict = JwtVerifier::new("secret", true);
        assert_eq!(strict.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let verifier = JwtVerifier::new("secret", false);
        assert!(matches!(verifier.verify("not.a.jwt"), Err(AuthError::Malformed(_))));
    }
}

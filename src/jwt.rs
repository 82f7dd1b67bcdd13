//! Signed, expiring claims encoded as JWTs (HS256).
//!
//! `TokenCodec::issue` merges the registered claims (`jti`, `iat`, `exp`, `iss`)
//! into any serializable claims body. `TokenCodec::decode` verifies the signature,
//! the issuer and the expiry against the injected clock. Audience is not checked.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived, stateless
    Access,
    /// Long-lived, tracked in the refresh token allowlist
    Refresh,
}

/// Claims body of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Public user id (UUID)
    pub user_id: String,
    /// Organization of the user's first active membership
    pub organization_id: Option<String>,
    /// Role names from that membership, in order
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
}

/// Claims body of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Public user id (UUID)
    pub user_id: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
}

/// A decoded token: registered claims plus the caller's body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims<T> {
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    #[serde(flatten)]
    pub body: T,
}

/// Result of issuing a token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT string
    pub token: String,
    pub jti: String,
    /// Unix seconds
    pub issued_at: i64,
    /// Unix seconds
    pub expires_at: i64,
    pub lifetime: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Bad signature, wrong issuer, wrong algorithm or wrong token type
    #[error("invalid token")]
    Invalid,
    #[error("token has expired")]
    Expired,
    /// Not a parseable JWT or missing required claims
    #[error("malformed token")]
    Malformed,
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("claims must serialize to a JSON object")]
    Claims,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_) => TokenError::Malformed,
            _ => TokenError::Invalid,
        }
    }
}

pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(secret: &[u8], issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            clock,
        }
    }

    /// Sign `claims` for `lifetime`. A fresh UUID is used when `jti` is `None`.
    /// Registered claims override any same-named keys in the body.
    pub fn issue<C: Serialize>(
        &self,
        claims: &C,
        lifetime: Duration,
        jti: Option<String>,
    ) -> Result<IssuedToken, TokenError> {
        let Value::Object(mut payload) =
            serde_json::to_value(claims).map_err(|_| TokenError::Claims)?
        else {
            return Err(TokenError::Claims);
        };

        let jti = jti.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = self.clock.now();
        let exp = now + lifetime.as_secs() as i64;

        payload.insert("jti".into(), Value::from(jti.clone()));
        payload.insert("iat".into(), Value::from(now));
        payload.insert("exp".into(), Value::from(exp));
        payload.insert("iss".into(), Value::from(self.issuer.clone()));

        let token = jsonwebtoken::encode(&Header::new(ALGORITHM), &payload, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
            lifetime,
        })
    }

    /// Verify and decode a token. Expiry is checked against the codec's clock:
    /// a token is expired once `now >= exp`.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenClaims<T>, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = jsonwebtoken::decode::<TokenClaims<T>>(token, &self.decoding_key, &validation)?;

        if self.clock.now() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }

    pub fn issue_access(
        &self,
        claims: &AccessClaims,
        lifetime: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.issue(claims, lifetime, None)
    }

    /// Decode a token and require it to be an access token.
    pub fn decode_access(&self, token: &str) -> Result<TokenClaims<AccessClaims>, TokenError> {
        let claims = self.decode::<AccessClaims>(token)?;
        if claims.body.token_type != TokenType::Access {
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }

    /// Decode a token and require it to be a refresh token.
    pub fn decode_refresh(&self, token: &str) -> Result<TokenClaims<RefreshClaims>, TokenError> {
        let claims = self.decode::<RefreshClaims>(token)?;
        if claims.body.token_type != TokenType::Refresh {
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::BTreeMap;

    const ISSUER: &str = "test-issuer";

    fn codec_with_clock() -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let codec = TokenCodec::new(b"test-secret-key-for-testing", ISSUER, clock.clone());
        (codec, clock)
    }

    fn access_claims() -> AccessClaims {
        AccessClaims {
            user_id: "uuid-123".to_string(),
            organization_id: Some("org-1".to_string()),
            roles: vec!["Organization Administrator".to_string()],
            token_type: TokenType::Access,
        }
    }

    #[test]
    fn test_issue_and_decode_roundtrip() {
        let (codec, _) = codec_with_clock();

        let issued = codec
            .issue_access(&access_claims(), Duration::from_secs(300))
            .unwrap();
        assert_eq!(issued.expires_at - issued.issued_at, 300);

        let claims = codec.decode_access(&issued.token).unwrap();
        assert_eq!(claims.body, access_claims());
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.iat, 1_700_000_000);
        assert_eq!(claims.exp, 1_700_000_300);
        assert_eq!(claims.iss, ISSUER);
    }

    #[test]
    fn test_issue_with_arbitrary_map() {
        let (codec, _) = codec_with_clock();

        let mut body = BTreeMap::new();
        body.insert("scope", "reports");
        let issued = codec
            .issue(&body, Duration::from_secs(60), Some("fixed-jti".to_string()))
            .unwrap();

        let claims = codec
            .decode::<BTreeMap<String, String>>(&issued.token)
            .unwrap();
        assert_eq!(claims.jti, "fixed-jti");
        assert_eq!(claims.body.get("scope").map(String::as_str), Some("reports"));
    }

    #[test]
    fn test_registered_claims_override_body() {
        let (codec, _) = codec_with_clock();

        let body = serde_json::json!({ "exp": 1, "iss": "someone-else", "user_id": "u" });
        let issued = codec.issue(&body, Duration::from_secs(60), None).unwrap();

        let claims = codec.decode::<serde_json::Value>(&issued.token).unwrap();
        assert_eq!(claims.exp, 1_700_000_060);
        assert_eq!(claims.iss, ISSUER);
    }

    #[test]
    fn test_non_object_claims_rejected() {
        let (codec, _) = codec_with_clock();
        let result = codec.issue(&"just a string", Duration::from_secs(60), None);
        assert!(matches!(result, Err(TokenError::Claims)));
    }

    #[test]
    fn test_expired_after_lifetime() {
        let (codec, clock) = codec_with_clock();

        let issued = codec
            .issue_access(&access_claims(), Duration::from_secs(300))
            .unwrap();

        clock.advance(Duration::from_secs(299));
        assert!(codec.decode_access(&issued.token).is_ok());

        clock.advance(Duration::from_secs(1));
        assert!(matches!(
            codec.decode_access(&issued.token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec1 = TokenCodec::new(b"secret-1", ISSUER, clock.clone());
        let codec2 = TokenCodec::new(b"secret-2", ISSUER, clock);

        let issued = codec1
            .issue_access(&access_claims(), Duration::from_secs(300))
            .unwrap();

        assert!(matches!(
            codec2.decode_access(&issued.token),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn test_wrong_issuer_is_invalid() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec1 = TokenCodec::new(b"shared", "issuer-a", clock.clone());
        let codec2 = TokenCodec::new(b"shared", "issuer-b", clock);

        let issued = codec1
            .issue_access(&access_claims(), Duration::from_secs(300))
            .unwrap();

        assert!(matches!(
            codec2.decode_access(&issued.token),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let (codec, _) = codec_with_clock();
        assert!(matches!(
            codec.decode_access("invalid-token"),
            Err(TokenError::Malformed)
        ));
        assert!(matches!(
            codec.decode_access("a.b.c"),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn test_wrong_token_type_rejected() {
        let (codec, _) = codec_with_clock();

        let access = codec
            .issue_access(&access_claims(), Duration::from_secs(300))
            .unwrap();
        let refresh = codec
            .issue(
                &RefreshClaims {
                    user_id: "uuid-123".to_string(),
                    token_type: TokenType::Refresh,
                },
                Duration::from_secs(300),
                None,
            )
            .unwrap();

        assert!(matches!(
            codec.decode_refresh(&access.token),
            Err(TokenError::Invalid)
        ));
        assert!(codec.decode_access(&refresh.token).is_err());
        assert!(codec.decode_refresh(&refresh.token).is_ok());
    }

    #[test]
    fn test_unique_jti_per_token() {
        let (codec, _) = codec_with_clock();

        let a = codec
            .issue_access(&access_claims(), Duration::from_secs(300))
            .unwrap();
        let b = codec
            .issue_access(&access_claims(), Duration::from_secs(300))
            .unwrap();

        assert_ne!(a.jti, b.jti, "Each token should have a unique jti");
    }
}

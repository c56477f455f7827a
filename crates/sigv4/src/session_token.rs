//! Session-token validation (§6 "Session token"): an opaque token produced
//! by a separate signing subsystem, consumed here only to validate it and
//! extract its claims — the subsystem that issues tokens stays an external
//! collaborator (SPEC_FULL §4.5–4.7).

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use idg_core::model::Uuid;
use idg_core::VerifyError;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

const MAX_TOKEN_BYTES: usize = 64 * 1024;

/// Claim set carried by a session token (§6): `{uuid, roleArn?,
/// sessionName?, exp, iat, iss, aud, tokenVersion, keyId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenClaims {
    pub uuid: Uuid,
    #[serde(default, rename = "roleArn")]
    pub role_arn: Option<String>,
    #[serde(default, rename = "sessionName")]
    pub session_name: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub nbf: Option<i64>,
    pub iat: i64,
    pub iss: String,
    pub aud: String,
    #[serde(rename = "tokenVersion")]
    pub token_version: String,
    #[serde(rename = "keyId")]
    pub key_id: String,
}

/// Validates an opaque session token and extracts its claims. The signing
/// subsystem that issues tokens is an external collaborator; this trait is
/// the only seam the verifier needs.
#[async_trait]
pub trait SessionTokenVerifier: Send + Sync {
    async fn verify(&self, token: &str, now: i64) -> Result<SessionTokenClaims, VerifyError>;
}

/// HMAC-SHA256-over-JSON construction: `base64url(claims_json) + "." +
/// hex(HMAC-SHA256(secret, base64url(claims_json)))`, the simplest
/// construction consistent with the claim set and a "secret-key
/// configuration keyed by keyId" (SPEC_FULL §4.5–4.7).
pub struct HmacSessionTokenVerifier {
    secrets: HashMap<String, Vec<u8>>,
}

impl HmacSessionTokenVerifier {
    pub fn new(secrets: HashMap<String, Vec<u8>>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl SessionTokenVerifier for HmacSessionTokenVerifier {
    async fn verify(&self, token: &str, now: i64) -> Result<SessionTokenClaims, VerifyError> {
        if token.len() > MAX_TOKEN_BYTES {
            return Err(VerifyError::SessionTokenInvalid(
                "token exceeds 64 KiB".into(),
            ));
        }

        let (payload_b64, signature_hex) = token
            .rsplit_once('.')
            .ok_or_else(|| VerifyError::SessionTokenInvalid("malformed token".into()))?;

        let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| VerifyError::SessionTokenInvalid("invalid base64 payload".into()))?;
        let claims: SessionTokenClaims = serde_json::from_slice(&payload_bytes)
            .map_err(|_| VerifyError::SessionTokenInvalid("invalid claim payload".into()))?;

        let secret = self
            .secrets
            .get(&claims.key_id)
            .ok_or_else(|| VerifyError::SessionTokenInvalid("unknown keyId".into()))?;

        let expected = crate::canonical::signature_hmac(secret, payload_b64);
        let presented = hex::decode(signature_hex)
            .map_err(|_| VerifyError::SessionTokenInvalid("invalid signature encoding".into()))?;
        let expected_bytes =
            hex::decode(&expected).expect("signature_hmac always produces valid hex");
        if expected_bytes.ct_eq(&presented).unwrap_u8() != 1 {
            return Err(VerifyError::SessionTokenInvalid("signature mismatch".into()));
        }

        if claims.exp <= now {
            return Err(VerifyError::CredentialExpired);
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now {
                return Err(VerifyError::SessionTokenInvalid("token not yet valid".into()));
            }
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], payload_b64: &str) -> String {
        crate::canonical::signature_hmac(secret, payload_b64)
    }

    fn make_token(secret: &[u8], claims: &SessionTokenClaims) -> String {
        let json = serde_json::to_vec(claims).unwrap();
        let payload_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
        let sig = sign(secret, &payload_b64);
        format!("{payload_b64}.{sig}")
    }

    fn claims(exp: i64) -> SessionTokenClaims {
        SessionTokenClaims {
            uuid: Uuid::new_unchecked("123e4567-e89b-12d3-a456-426614174000"),
            role_arn: None,
            session_name: None,
            exp,
            nbf: None,
            iat: 0,
            iss: "idg".into(),
            aud: "idg".into(),
            token_version: "1".into(),
            key_id: "k1".into(),
        }
    }

    #[tokio::test]
    async fn valid_token_verifies_and_extracts_uuid() {
        let secret = b"s3cr3t".to_vec();
        let mut secrets = HashMap::new();
        secrets.insert("k1".to_owned(), secret.clone());
        let verifier = HmacSessionTokenVerifier::new(secrets);

        let token = make_token(&secret, &claims(1000));
        let verified = verifier.verify(&token, 500).await.unwrap();
        assert_eq!(verified.uuid.as_str(), "123e4567-e89b-12d3-a456-426614174000");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let secret = b"s3cr3t".to_vec();
        let mut secrets = HashMap::new();
        secrets.insert("k1".to_owned(), secret.clone());
        let verifier = HmacSessionTokenVerifier::new(secrets);

        let token = make_token(&secret, &claims(100));
        let err = verifier.verify(&token, 500).await.unwrap_err();
        assert!(matches!(err, VerifyError::CredentialExpired));
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let secret = b"s3cr3t".to_vec();
        let mut secrets = HashMap::new();
        secrets.insert("k1".to_owned(), secret);
        let verifier = HmacSessionTokenVerifier::new(secrets);

        let token = make_token(b"wrong-secret", &claims(1000));
        let err = verifier.verify(&token, 500).await.unwrap_err();
        assert!(matches!(err, VerifyError::SessionTokenInvalid(_)));
    }
}

//! Credential Resolver (component F, §4.6): maps an access-key id and,
//! for temporary credentials, a presented session token, to the caller's
//! identity.

use chrono::{DateTime, Utc};
use idg_core::keys::{accesskey_key, is_temporary_access_key, uuid_key};
use idg_core::model::{Record, TemporaryCredential, Uuid};
use idg_core::VerifyError;
use idg_store::{decode_json, Store};

use crate::session_token::SessionTokenVerifier;

/// The resolved identity and secret a caller's signature is checked
/// against.
pub struct ResolvedCredential {
    pub user_uuid: Uuid,
    pub secret_access_key: String,
    pub assumed_role: Option<Uuid>,
}

async fn load_record(store: &dyn Store, uuid: &Uuid) -> Result<Record, VerifyError> {
    let key = uuid_key(uuid);
    let raw = store
        .get(&key)
        .await
        .map_err(VerifyError::Store)?
        .ok_or_else(|| VerifyError::UserNotFound(uuid.as_str().to_owned()))?;
    decode_json(&key, &raw).map_err(VerifyError::Store)
}

fn accesskeys_of(record: &Record) -> Option<&std::collections::HashMap<String, String>> {
    match record {
        Record::Account(a) => Some(&a.accesskeys),
        Record::User(u) => Some(&u.accesskeys),
        _ => None,
    }
}

/// Permanent-credential resolution: `/accesskey/{id}` -> userUuid ->
/// `/uuid/{userUuid}` -> `accesskeys[id]`.
pub async fn resolve_permanent(
    store: &dyn Store,
    access_key_id: &str,
) -> Result<ResolvedCredential, VerifyError> {
    let user_uuid_raw = store
        .get(&accesskey_key(access_key_id))
        .await
        .map_err(VerifyError::Store)?
        .ok_or_else(|| VerifyError::InvalidAccessKey(access_key_id.to_owned()))?;
    let user_uuid = Uuid::new_unchecked(user_uuid_raw);

    let record = load_record(store, &user_uuid).await?;
    let secret = accesskeys_of(&record)
        .and_then(|m| m.get(access_key_id))
        .ok_or_else(|| VerifyError::InvalidAccessKey(access_key_id.to_owned()))?
        .clone();

    Ok(ResolvedCredential {
        user_uuid,
        secret_access_key: secret,
        assumed_role: None,
    })
}

/// Temporary-credential resolution: `/accesskey/{id}` holds a JSON
/// [`TemporaryCredential`] record, validated against `presented_token` and
/// the session-token verifier.
pub async fn resolve_temporary(
    store: &dyn Store,
    verifier: &dyn SessionTokenVerifier,
    access_key_id: &str,
    presented_token: &str,
    now: DateTime<Utc>,
) -> Result<ResolvedCredential, VerifyError> {
    debug_assert!(is_temporary_access_key(access_key_id));

    let raw = store
        .get(&accesskey_key(access_key_id))
        .await
        .map_err(VerifyError::Store)?
        .ok_or_else(|| VerifyError::InvalidAccessKey(access_key_id.to_owned()))?;
    let credential: TemporaryCredential =
        decode_json(&accesskey_key(access_key_id), &raw).map_err(VerifyError::Store)?;

    if credential.is_expired(now) {
        return Err(VerifyError::CredentialExpired);
    }
    if credential.session_token != presented_token {
        return Err(VerifyError::SessionTokenMismatch);
    }

    verifier
        .verify(presented_token, now.timestamp())
        .await?;

    Ok(ResolvedCredential {
        user_uuid: credential.user_uuid,
        secret_access_key: credential.secret_access_key,
        assumed_role: credential.assumed_role.map(|r| r.role_uuid),
    })
}

/// Dispatches on the access-key-id prefix (§4.6). `presented_token` is
/// required for temporary credentials and ignored for permanent ones.
pub async fn resolve(
    store: &dyn Store,
    verifier: &dyn SessionTokenVerifier,
    access_key_id: &str,
    presented_token: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ResolvedCredential, VerifyError> {
    if is_temporary_access_key(access_key_id) {
        let token = presented_token
            .ok_or(VerifyError::TemporaryCredentialWithoutSessionToken)?;
        resolve_temporary(store, verifier, access_key_id, token, now).await
    } else {
        resolve_permanent(store, access_key_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_token::{HmacSessionTokenVerifier, SessionTokenClaims};
    use base64::Engine;
    use idg_core::model::{AccountRecord, AssumedRole};
    use idg_store::MemoryStore;
    use std::collections::HashMap;

    fn user_uuid() -> Uuid {
        Uuid::new_unchecked("123e4567-e89b-12d3-a456-426614174000")
    }

    async fn seed_permanent(store: &MemoryStore) {
        let u = user_uuid();
        let mut accesskeys = HashMap::new();
        accesskeys.insert("AKIAEXAMPLE".to_owned(), "shh-secret".to_owned());
        let account = AccountRecord {
            uuid: u.clone(),
            login: "alice".into(),
            approved_for_provisioning: true,
            groups: HashMap::new(),
            keys: HashMap::new(),
            accesskeys,
        };
        store
            .set(&uuid_key(&u), &serde_json::to_string(&Record::Account(account)).unwrap())
            .await
            .unwrap();
        store
            .set(&accesskey_key("AKIAEXAMPLE"), u.as_str())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn permanent_credential_resolves_secret() {
        let store = MemoryStore::new();
        seed_permanent(&store).await;
        let secrets = HashMap::new();
        let verifier = HmacSessionTokenVerifier::new(secrets);

        let resolved = resolve(&store, &verifier, "AKIAEXAMPLE", None, Utc::now())
            .await
            .unwrap();
        assert_eq!(resolved.secret_access_key, "shh-secret");
        assert_eq!(resolved.user_uuid, user_uuid());
    }

    #[tokio::test]
    async fn unknown_access_key_is_invalid() {
        let store = MemoryStore::new();
        let verifier = HmacSessionTokenVerifier::new(HashMap::new());
        let err = resolve(&store, &verifier, "AKIANOPE", None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidAccessKey(_)));
    }

    fn make_token(secret: &[u8], key_id: &str, exp: i64) -> String {
        let claims = SessionTokenClaims {
            uuid: user_uuid(),
            role_arn: None,
            session_name: None,
            exp,
            nbf: None,
            iat: 0,
            iss: "idg".into(),
            aud: "idg".into(),
            token_version: "1".into(),
            key_id: key_id.into(),
        };
        let json = serde_json::to_vec(&claims).unwrap();
        let payload_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
        let sig = crate::canonical::signature_hmac(secret, &payload_b64);
        format!("{payload_b64}.{sig}")
    }

    #[tokio::test]
    async fn temporary_credential_without_token_is_rejected() {
        let store = MemoryStore::new();
        let verifier = HmacSessionTokenVerifier::new(HashMap::new());
        let err = resolve(&store, &verifier, "MSTS00000000", None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::TemporaryCredentialWithoutSessionToken
        ));
    }

    #[tokio::test]
    async fn temporary_credential_resolves_when_token_matches() {
        let store = MemoryStore::new();
        let secret = b"tok-secret".to_vec();
        let mut secrets = HashMap::new();
        secrets.insert("k1".to_owned(), secret.clone());
        let verifier = HmacSessionTokenVerifier::new(secrets);

        let token = make_token(&secret, "k1", (Utc::now().timestamp()) + 3600);
        let credential = TemporaryCredential {
            access_key_id: "MSTS00000000".into(),
            secret_access_key: "temp-secret".into(),
            user_uuid: user_uuid(),
            assumed_role: Some(AssumedRole {
                role_uuid: user_uuid(),
                arn: "arn:aws:sts::0:assumed-role/test".into(),
                policies: Vec::new(),
            }),
            credential_type: "federated".into(),
            expiration: Utc::now() + chrono::Duration::hours(1),
            session_token: token.clone(),
            session_name: None,
        };
        store
            .set(
                &accesskey_key("MSTS00000000"),
                &serde_json::to_string(&credential).unwrap(),
            )
            .await
            .unwrap();

        let resolved = resolve(&store, &verifier, "MSTS00000000", Some(&token), Utc::now())
            .await
            .unwrap();
        assert_eq!(resolved.secret_access_key, "temp-secret");
        assert_eq!(resolved.assumed_role, Some(user_uuid()));
    }

    #[tokio::test]
    async fn temporary_credential_rejects_mismatched_token() {
        let store = MemoryStore::new();
        let secret = b"tok-secret".to_vec();
        let mut secrets = HashMap::new();
        secrets.insert("k1".to_owned(), secret.clone());
        let verifier = HmacSessionTokenVerifier::new(secrets);

        let stored_token = make_token(&secret, "k1", Utc::now().timestamp() + 3600);
        let credential = TemporaryCredential {
            access_key_id: "MSTS00000000".into(),
            secret_access_key: "temp-secret".into(),
            user_uuid: user_uuid(),
            assumed_role: None,
            credential_type: "federated".into(),
            expiration: Utc::now() + chrono::Duration::hours(1),
            session_token: stored_token,
            session_name: None,
        };
        store
            .set(
                &accesskey_key("MSTS00000000"),
                &serde_json::to_string(&credential).unwrap(),
            )
            .await
            .unwrap();

        let other_token = make_token(&secret, "k1", Utc::now().timestamp() + 3600);
        let err = resolve(
            &store,
            &verifier,
            "MSTS00000000",
            Some(&other_token),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerifyError::SessionTokenMismatch));
    }

    #[tokio::test]
    async fn expired_temporary_credential_is_rejected() {
        let store = MemoryStore::new();
        let secret = b"tok-secret".to_vec();
        let mut secrets = HashMap::new();
        secrets.insert("k1".to_owned(), secret.clone());
        let verifier = HmacSessionTokenVerifier::new(secrets);

        let token = make_token(&secret, "k1", Utc::now().timestamp() + 3600);
        let credential = TemporaryCredential {
            access_key_id: "MSTS00000000".into(),
            secret_access_key: "temp-secret".into(),
            user_uuid: user_uuid(),
            assumed_role: None,
            credential_type: "federated".into(),
            expiration: Utc::now() - chrono::Duration::hours(1),
            session_token: token.clone(),
            session_name: None,
        };
        store
            .set(
                &accesskey_key("MSTS00000000"),
                &serde_json::to_string(&credential).unwrap(),
            )
            .await
            .unwrap();

        let err = resolve(&store, &verifier, "MSTS00000000", Some(&token), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::CredentialExpired));
    }
}

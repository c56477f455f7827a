//! The Verifier Orchestrator (component G, §4.7): parses an
//! `Authorization: AWS4-HMAC-SHA256 ...` header, resolves the signing
//! credential, and checks the presented signature.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use idg_core::keys::is_temporary_access_key;
use idg_core::model::Uuid;
use idg_core::VerifyError;
use idg_store::Store;
use subtle::ConstantTimeEq;

use crate::canonical::{self, header_lookup, CanonicalInput};
use crate::resolve::resolve;
use crate::session_token::SessionTokenVerifier;

const MIN_SESSION_TOKEN_LEN: usize = 10;
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Request-side overrides carried by the `query` object (§4.7 step 6): a
/// verification proxy forwards the original request's method/url/session
/// token this way when it cannot replay the raw HTTP request verbatim.
#[derive(Debug, Default, Clone)]
pub struct QueryOverrides {
    pub method: Option<String>,
    pub url: Option<String>,
    pub session_token: Option<String>,
}

/// Everything the orchestrator needs from the inbound request.
pub struct VerifyRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub query: QueryOverrides,
}

/// Successful verification result (§4.7 step 8).
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub user_uuid: Uuid,
    pub access_key_id: String,
    pub is_temporary_credential: bool,
    pub assumed_role: Option<Uuid>,
    pub principal_uuid: Uuid,
}

struct ParsedAuth {
    access_key_id: String,
    date_stamp: String,
    region: String,
    service: String,
    signed_headers: Vec<String>,
    signature: String,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// §4.7 step 1.
fn parse_authorization(raw: &str) -> Result<ParsedAuth, VerifyError> {
    const PREFIX: &str = "AWS4-HMAC-SHA256 ";
    let rest = raw
        .strip_prefix(PREFIX)
        .ok_or_else(|| VerifyError::MalformedAuthHeader("missing AWS4-HMAC-SHA256 prefix".into()))?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| {
            VerifyError::MalformedAuthHeader(format!("malformed component: {part}"))
        })?;
        match key {
            "Credential" => credential = Some(value),
            "SignedHeaders" => signed_headers = Some(value),
            "Signature" => signature = Some(value),
            _ => {}
        }
    }

    let credential = credential
        .ok_or_else(|| VerifyError::MalformedAuthHeader("missing Credential".into()))?;
    let signed_headers = signed_headers
        .ok_or_else(|| VerifyError::MalformedAuthHeader("missing SignedHeaders".into()))?;
    let signature = signature
        .ok_or_else(|| VerifyError::MalformedAuthHeader("missing Signature".into()))?;

    let components: Vec<&str> = credential.split('/').collect();
    if components.len() != 5 {
        return Err(VerifyError::MalformedAuthHeader(
            "Credential must have 5 components".into(),
        ));
    }
    if components.iter().any(|c| c.trim().is_empty()) {
        return Err(VerifyError::MalformedAuthHeader(
            "Credential component is empty".into(),
        ));
    }
    let [access_key_id, date_stamp, region, service, request_type] = [
        components[0],
        components[1],
        components[2],
        components[3],
        components[4],
    ];

    if date_stamp.len() != 8 || !date_stamp.chars().all(|c| c.is_ascii_digit()) {
        return Err(VerifyError::MalformedAuthHeader(
            "dateStamp must be 8 digits".into(),
        ));
    }
    if request_type != "aws4_request" {
        return Err(VerifyError::MalformedAuthHeader(
            "requestType must be aws4_request".into(),
        ));
    }
    if !(16..=128).contains(&access_key_id.len()) || !access_key_id.chars().all(is_word_char) {
        return Err(VerifyError::MalformedAuthHeader(
            "accessKeyId has invalid shape or length".into(),
        ));
    }

    Ok(ParsedAuth {
        access_key_id: access_key_id.to_owned(),
        date_stamp: date_stamp.to_owned(),
        region: region.to_owned(),
        service: service.to_owned(),
        signed_headers: signed_headers.split(';').map(str::to_owned).collect(),
        signature: signature.to_owned(),
    })
}

/// Pulls a `key=value` parameter out of a raw query string without a query
/// string parser dependency; used for `sessionToken` embedded in
/// `query.url`.
fn find_query_param<'a>(raw_query: &'a str, name: &str) -> Option<&'a str> {
    raw_query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            Some(v)
        } else {
            None
        }
    })
}

/// §4.7 step 2: sniff a session token from the header, the `query` object,
/// or `query.url`'s own query string.
fn extract_session_token(req: &VerifyRequest) -> Option<String> {
    if let Some(header) = header_lookup(req.headers, "x-amz-security-token") {
        return Some(header.to_owned());
    }
    if let Some(token) = &req.query.session_token {
        return Some(token.clone());
    }
    if let Some(url) = &req.query.url {
        if let Some((_, query)) = url.split_once('?') {
            if let Some(token) = find_query_param(query, "sessionToken") {
                return Some(token.to_owned());
            }
        }
    }
    None
}

/// §4.7 step 5: basic (`YYYYMMDDTHHMMSSZ`) or extended ISO-8601.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%SZ") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Strips a `sessionToken=...` parameter (and a leading `&` or `?`) from a
/// raw query string, used on the temporary-credential path because the
/// token was appended by the proxy after the client signed the request.
fn strip_session_token(raw_query: &str) -> String {
    let kept: Vec<&str> = raw_query
        .split('&')
        .filter(|pair| !pair.starts_with("sessionToken="))
        .collect();
    kept.join("&")
}

pub async fn verify(
    store: &dyn Store,
    token_verifier: &dyn SessionTokenVerifier,
    req: &VerifyRequest<'_>,
    now: DateTime<Utc>,
    max_skew_seconds: i64,
) -> Result<Principal, VerifyError> {
    let auth_header = header_lookup(req.headers, "authorization").ok_or_else(|| {
        VerifyError::MalformedAuthHeader("missing Authorization header".into())
    })?;
    let parsed = parse_authorization(auth_header)?;

    let session_token = extract_session_token(req);
    let is_temporary = session_token
        .as_ref()
        .is_some_and(|t| t.len() >= MIN_SESSION_TOKEN_LEN);

    if is_temporary_access_key(&parsed.access_key_id) && !is_temporary {
        return Err(VerifyError::TemporaryCredentialWithoutSessionToken);
    }

    let resolved = resolve(
        store,
        token_verifier,
        &parsed.access_key_id,
        session_token.as_deref(),
        now,
    )
    .await?;

    let timestamp_raw = header_lookup(req.headers, "x-amz-date")
        .or_else(|| header_lookup(req.headers, "date"))
        .ok_or(VerifyError::MissingTimestamp)?;
    let timestamp = parse_timestamp(timestamp_raw).ok_or(VerifyError::MissingTimestamp)?;
    let skew = (now - timestamp).num_seconds().abs();
    if skew > max_skew_seconds {
        return Err(VerifyError::TimestampSkew);
    }

    let method = req.query.method.as_deref().unwrap_or(req.method);
    let effective_url = req.query.url.as_deref().unwrap_or(req.url);
    let (uri, raw_query) = match effective_url.split_once('?') {
        Some((uri, query)) => (uri, query),
        None => (effective_url, ""),
    };
    let raw_query = if is_temporary {
        strip_session_token(raw_query)
    } else {
        raw_query.to_owned()
    };

    let payload_hash = header_lookup(req.headers, "x-amz-content-sha256").unwrap_or(UNSIGNED_PAYLOAD);

    let input = CanonicalInput {
        method,
        uri,
        raw_query: &raw_query,
        headers: req.headers,
        signed_headers: &parsed.signed_headers,
        payload_hash,
    };

    let expected = canonical::compute_signature(
        &input,
        timestamp_raw,
        &parsed.date_stamp,
        &parsed.region,
        &parsed.service,
        &resolved.secret_access_key,
    );

    if expected.len() != parsed.signature.len()
        || expected.as_bytes().ct_eq(parsed.signature.as_bytes()).unwrap_u8() != 1
    {
        return Err(VerifyError::SignatureMismatch);
    }

    Ok(Principal {
        user_uuid: resolved.user_uuid.clone(),
        access_key_id: parsed.access_key_id,
        is_temporary_credential: is_temporary,
        assumed_role: resolved.assumed_role,
        principal_uuid: resolved.user_uuid,
    })
}

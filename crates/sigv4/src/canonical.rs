//! The SigV4 canonicalizer (component E, §4.5): canonical request,
//! string-to-sign, signing-key derivation, and signature computation.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Everything the canonicalizer needs to reconstruct a request (§4.5).
pub struct CanonicalInput<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub raw_query: &'a str,
    /// Case-insensitive header map; keys are compared case-insensitively by
    /// the caller before lookup.
    pub headers: &'a BTreeMap<String, String>,
    pub signed_headers: &'a [String],
    pub payload_hash: &'a str,
}

/// `true` for RFC 3986 unreserved characters. SigV4 additionally encodes
/// `!'()*`, which `percent_encode` below handles explicitly.
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}

/// Percent-encode `s`, leaving `/` untouched when `encode_slash` is false
/// (used for already-segmented URI paths).
fn percent_encode(s: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) || (b == b'/' && !encode_slash) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// URI path canonicalization (§4.5 step 2): split on `/`, percent-encode
/// each segment, rejoin. Empty path becomes `/`.
pub fn canonical_uri(uri: &str) -> String {
    if uri.is_empty() {
        return "/".to_owned();
    }
    uri.split('/')
        .map(|segment| percent_encode(segment, true))
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical query string (§4.5 step 3).
pub fn canonical_query_string(raw_query: &str) -> String {
    if raw_query.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<String> = raw_query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("");
            format!(
                "{}={}",
                percent_encode(key, true),
                percent_encode(value, true)
            )
        })
        .collect();
    pairs.sort();
    pairs.join("&")
}

/// Collapse runs of whitespace to a single space and trim (§4.5 step 4).
fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn header_lookup<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Canonical headers block (§4.5 step 4), including the
/// `manta-s3-content-{length,md5}` substitution that defends against
/// intermediary rewriting of `content-length`/`content-md5`.
pub fn canonical_headers(headers: &BTreeMap<String, String>, signed_headers: &[String]) -> String {
    let mut sorted: Vec<String> = signed_headers.iter().map(|h| h.to_lowercase()).collect();
    sorted.sort();

    let mut out = String::new();
    for name in &sorted {
        let value = match name.as_str() {
            "content-length" => header_lookup(headers, "manta-s3-content-length")
                .or_else(|| header_lookup(headers, name))
                .unwrap_or(""),
            "content-md5" => header_lookup(headers, "manta-s3-content-md5")
                .or_else(|| header_lookup(headers, name))
                .unwrap_or(""),
            _ => header_lookup(headers, name).unwrap_or(""),
        };
        out.push_str(name);
        out.push(':');
        out.push_str(&normalize_header_value(value));
        out.push('\n');
    }
    out
}

/// `;`-joined, sorted, lowercased signed-header names.
pub fn signed_headers_line(signed_headers: &[String]) -> String {
    let mut sorted: Vec<String> = signed_headers.iter().map(|h| h.to_lowercase()).collect();
    sorted.sort();
    sorted.join(";")
}

/// The full canonical request (§4.5 step 5).
pub fn canonical_request(input: &CanonicalInput) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        canonical_uri(input.uri),
        canonical_query_string(input.raw_query),
        canonical_headers(input.headers, input.signed_headers),
        signed_headers_line(input.signed_headers),
        input.payload_hash
    )
}

pub fn hex_sha256(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// `"AWS4-HMAC-SHA256\n" + timestamp + "\n" + scope + "\n" + hex(SHA256(canonicalRequest))`.
pub fn string_to_sign(timestamp: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256\n{timestamp}\n{scope}\n{}",
        hex_sha256(canonical_request)
    )
}

fn hmac_bytes(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// `kDate -> kRegion -> kService -> kSigning` (§4.5).
pub fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_bytes(format!("AWS4{secret}").as_bytes(), date_stamp);
    let k_region = hmac_bytes(&k_date, region);
    let k_service = hmac_bytes(&k_region, service);
    hmac_bytes(&k_service, "aws4_request")
}

/// `hex(HMAC-SHA256(kSigning, stringToSign))`.
pub fn signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_bytes(signing_key, string_to_sign))
}

/// Raw `hex(HMAC-SHA256(key, data))`, used outside the SigV4 derivation
/// chain by the session-token verifier.
pub fn signature_hmac(key: &[u8], data: &str) -> String {
    hex::encode(hmac_bytes(key, data))
}

/// One-shot: compute the signature AWS's reference vector expects, given a
/// secret and a pre-split credential scope (§4.5, scenario 4).
pub fn compute_signature(
    input: &CanonicalInput,
    timestamp: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
    secret: &str,
) -> String {
    let scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let creq = canonical_request(input);
    let sts = string_to_sign(timestamp, &scope, &creq);
    let key = signing_key(secret, date_stamp, region, service);
    signature(&key, &sts)
}

//! SigV4 canonicalization, session-token validation, and credential
//! resolution (components E and F, §4.5–4.6).

pub mod canonical;
pub mod resolve;
pub mod session_token;
pub mod verify;

pub use canonical::{canonical_request, compute_signature, signature, CanonicalInput};
pub use resolve::{resolve, resolve_permanent, resolve_temporary, ResolvedCredential};
pub use session_token::{HmacSessionTokenVerifier, SessionTokenClaims, SessionTokenVerifier};
pub use verify::{verify as verify_request, Principal, QueryOverrides, VerifyRequest};

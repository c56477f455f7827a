//! Shared error taxonomy for the identity gateway.
//!
//! Each layer of the system owns one error enum. `idg-gateway` composes all
//! three into the HTTP boundary mapping (`{restCode, statusCode, message}`).

/// Errors surfaced by the key-value store adapter (component A).
///
/// Always transient: callers retry-after-backoff on the replication side,
/// or answer 5xx on the verification side.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(String),

    #[error("store timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("store returned malformed data for key {key}: {message}")]
    Malformed { key: String, message: String },
}

/// Errors raised while transforming a changelog entry into store commands
/// (component C). `UnsupportedOperation` and `CorruptEntry` are
/// ReplicationFatal: the driver logs and does not advance the change number.
#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("unsupported operation: changetype {changetype} on objectclass {objectclass}")]
    UnsupportedOperation {
        objectclass: String,
        changetype: String,
    },

    #[error("corrupt changelog entry (changenumber {changenumber}): {message}")]
    CorruptEntry { changenumber: u64, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while resolving credentials or verifying a SigV4 request
/// (components F, G). Each non-transient variant carries the `restCode` the
/// HTTP boundary renders directly.
#[derive(thiserror::Error, Debug)]
pub enum VerifyError {
    #[error("access key does not exist: {0}")]
    InvalidAccessKey(String),

    #[error("user does not exist: {0}")]
    UserNotFound(String),

    #[error("account does not exist: {0}")]
    AccountDoesNotExist(String),

    #[error("account is not approved for provisioning: {0}")]
    NotApprovedForProvisioning(String),

    #[error("role does not exist: {0}")]
    RoleDoesNotExist(String),

    #[error("group does not exist: {0}")]
    GroupDoesNotExist(String),

    #[error("policy does not exist: {0}")]
    PolicyDoesNotExist(String),

    #[error("credential expired")]
    CredentialExpired,

    #[error("session token does not match stored credential")]
    SessionTokenMismatch,

    #[error("session token invalid: {0}")]
    SessionTokenInvalid(String),

    #[error("malformed authorization header: {0}")]
    MalformedAuthHeader(String),

    #[error("timestamp skew exceeds allowed window")]
    TimestampSkew,

    #[error("missing or unparseable timestamp")]
    MissingTimestamp,

    #[error("temporary credentials require session token")]
    TemporaryCredentialWithoutSessionToken,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VerifyError {
    /// The stable `restCode` rendered to HTTP clients (§6, §7).
    pub fn rest_code(&self) -> &'static str {
        match self {
            VerifyError::InvalidAccessKey(_) => "InvalidSignature",
            VerifyError::UserNotFound(_) => "UserDoesNotExist",
            VerifyError::AccountDoesNotExist(_) => "AccountDoesNotExist",
            VerifyError::NotApprovedForProvisioning(_) => "NotApprovedForProvisioning",
            VerifyError::RoleDoesNotExist(_) => "RoleDoesNotExist",
            VerifyError::GroupDoesNotExist(_) => "GroupDoesNotExist",
            VerifyError::PolicyDoesNotExist(_) => "PolicyDoesNotExist",
            VerifyError::CredentialExpired => "InvalidSignature",
            VerifyError::SessionTokenMismatch => "InvalidSignature",
            VerifyError::SessionTokenInvalid(_) => "InvalidSignature",
            VerifyError::MalformedAuthHeader(_) => "InvalidSignature",
            VerifyError::TimestampSkew => "InvalidSignature",
            VerifyError::MissingTimestamp => "InvalidSignature",
            VerifyError::TemporaryCredentialWithoutSessionToken => "InvalidSignature",
            VerifyError::SignatureMismatch => "InvalidSignature",
            VerifyError::Store(_) => "RedisError",
        }
    }

    /// The HTTP status this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            VerifyError::AccountDoesNotExist(_) => 403,
            VerifyError::NotApprovedForProvisioning(_) => 403,
            VerifyError::UserNotFound(_)
            | VerifyError::RoleDoesNotExist(_)
            | VerifyError::GroupDoesNotExist(_)
            | VerifyError::PolicyDoesNotExist(_) => 404,
            VerifyError::Store(_) => 500,
            _ => 401,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

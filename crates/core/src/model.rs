//! The cache's data model (§3): tagged record variants, the changelog wire
//! format, and the temporary-credential record.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Uuid
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A 36-character lowercase hex-with-dashes identifier.
///
/// Newtype-wrapped so a login string or role name cannot silently satisfy a
/// uuid-typed field, and so [`crate::model::RolePolicies`] has a concrete
/// type to pattern-match on when disambiguating inline policy text from
/// policy uuids (§9).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uuid(String);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("not a valid uuid: {0:?}")]
pub struct UuidError(String);

impl Uuid {
    pub fn parse(s: impl Into<String>) -> Result<Self, UuidError> {
        let s = s.into();
        if is_uuid_shaped(&s) {
            Ok(Uuid(s))
        } else {
            Err(UuidError(s))
        }
    }

    /// Construct without validation. Used when reading values that were
    /// already validated at write time (store round-trips).
    pub fn new_unchecked(s: impl Into<String>) -> Self {
        Uuid(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// True iff `s` is 36 characters, lowercase, and shaped like
/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
pub fn is_uuid_shaped(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    let bytes = s.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        let is_dash_pos = matches!(i, 8 | 13 | 18 | 23);
        if is_dash_pos {
            if *b != b'-' {
                return false;
            }
        } else if !(b.is_ascii_digit() || (b'a'..=b'f').contains(b)) {
            return false;
        }
    }
    true
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uuid {
    type Err = UuidError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Primary records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tagged union over the primary record kinds, discriminated by the
/// stored `type` field (§9 "implicit object shape").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    Account(AccountRecord),
    User(UserRecord),
    Role(RoleRecord),
    Policy(PolicyRecord),
    Group(GroupRecord),
}

impl Record {
    pub fn uuid(&self) -> &Uuid {
        match self {
            Record::Account(r) => &r.uuid,
            Record::User(r) => &r.uuid,
            Record::Role(r) => &r.uuid,
            Record::Policy(r) => &r.uuid,
            Record::Group(r) => &r.uuid,
        }
    }

    /// The owning account, if this record kind has one. Accounts own
    /// themselves.
    pub fn account(&self) -> &Uuid {
        match self {
            Record::Account(r) => &r.uuid,
            Record::User(r) => &r.account,
            Record::Role(r) => &r.account,
            Record::Policy(r) => &r.account,
            Record::Group(r) => &r.account,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountRecord {
    pub uuid: Uuid,
    pub login: String,
    #[serde(default)]
    pub approved_for_provisioning: bool,
    /// Directory-level group membership (e.g. `operators`): presence of a
    /// key with value `true` means membership.
    #[serde(default)]
    pub groups: HashMap<String, bool>,
    /// SSH/GPG keys: fingerprint -> PEM-encoded public key.
    #[serde(default)]
    pub keys: HashMap<String, String>,
    /// Access keys: access-key-id -> secret.
    #[serde(default)]
    pub accesskeys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub uuid: Uuid,
    pub account: Uuid,
    pub login: String,
    #[serde(default)]
    pub roles: Vec<Uuid>,
    /// Account-group uuids this sub-user belongs to (distinct shape from
    /// [`AccountRecord::groups`], which is a directory-level-group map).
    #[serde(default)]
    pub groups: Vec<Uuid>,
    #[serde(default)]
    pub keys: HashMap<String, String>,
    #[serde(default)]
    pub accesskeys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleRecord {
    pub uuid: Uuid,
    pub name: String,
    pub account: Uuid,
    #[serde(default)]
    pub policies: RolePolicies,
}

/// A role's `policies` field carries either raw policy-document text lines
/// or policy uuids, depending on the source directory's deployment variant
/// (§9 Open Question). Both shapes are accepted by inspection, and the
/// transformer always writes back whichever shape it observed.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(untagged)]
pub enum RolePolicies {
    #[default]
    Empty,
    Inline(Vec<String>),
    ByUuid(Vec<Uuid>),
}

impl RolePolicies {
    pub fn values(&self) -> Vec<String> {
        match self {
            RolePolicies::Empty => Vec::new(),
            RolePolicies::Inline(v) => v.clone(),
            RolePolicies::ByUuid(v) => v.iter().map(|u| u.as_str().to_owned()).collect(),
        }
    }

    pub fn from_strings(values: Vec<String>) -> Self {
        if values.is_empty() {
            return RolePolicies::Empty;
        }
        if values.iter().all(|v| is_uuid_shaped(v)) {
            RolePolicies::ByUuid(values.into_iter().map(Uuid::new_unchecked).collect())
        } else {
            RolePolicies::Inline(values)
        }
    }
}

impl<'de> Deserialize<'de> for RolePolicies {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values: Vec<String> = Vec::deserialize(deserializer)?;
        Ok(RolePolicies::from_strings(values))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRecord {
    pub uuid: Uuid,
    pub name: String,
    pub account: Uuid,
    /// `[text, parsed]` pairs; `parsed` is an opaque JSON value produced by
    /// the directory-side policy parser, passed through unchanged.
    #[serde(default)]
    pub rules: Vec<(String, serde_json::Value)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupRecord {
    pub uuid: Uuid,
    pub name: String,
    pub account: Uuid,
    /// Role uuids this account-group confers on its members.
    #[serde(default)]
    pub roles: Vec<Uuid>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Temporary credentials
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssumedRole {
    pub role_uuid: Uuid,
    pub arn: String,
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Record stored at `/accesskey/{id}` when `id` begins with `MSTS` or
/// `MSAR` (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporaryCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub user_uuid: Uuid,
    #[serde(default)]
    pub assumed_role: Option<AssumedRole>,
    pub credential_type: String,
    pub expiration: DateTime<Utc>,
    pub session_token: String,
    #[serde(default)]
    pub session_name: Option<String>,
}

impl TemporaryCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration < now
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Changelog wire format (consumed from the directory server, §6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

/// One operation within a `modify` changelog entry's `changes` sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub op: ModOp,
    #[serde(rename = "type")]
    pub attr: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// The `changes` payload: a map of attribute -> values for add/delete, or a
/// sequence of modifications for modify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangesPayload {
    Attrs(HashMap<String, Vec<String>>),
    Mods(Vec<Modification>),
}

impl ChangesPayload {
    pub fn as_attrs(&self) -> Option<&HashMap<String, Vec<String>>> {
        match self {
            ChangesPayload::Attrs(m) => Some(m),
            ChangesPayload::Mods(_) => None,
        }
    }

    pub fn as_mods(&self) -> Option<&[Modification]> {
        match self {
            ChangesPayload::Mods(m) => Some(m),
            ChangesPayload::Attrs(_) => None,
        }
    }

    /// Single-valued attribute lookup, for add/delete entries (`changes.objectclass` etc).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.as_attrs()
            .and_then(|m| m.get(name))
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    pub fn attr_values(&self, name: &str) -> Vec<String> {
        self.as_attrs()
            .and_then(|m| m.get(name))
            .cloned()
            .unwrap_or_default()
    }
}

/// One entry from the directory server's `cn=changelog` container (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub targetdn: String,
    pub changetype: ChangeType,
    pub changes: ChangesPayload,
    /// Full post-state, present only on `modify`.
    #[serde(default)]
    pub entry: Option<serde_json::Value>,
    pub changenumber: u64,
    #[serde(default)]
    pub changetime: Option<String>,
}

impl ChangelogEntry {
    /// The dispatch key's objectclass half (§4.3): `changes.objectclass`
    /// for add/delete, or the post-state's sorted, space-joined
    /// `objectclass` for modify.
    pub fn objectclass(&self) -> Option<String> {
        match self.changetype {
            ChangeType::Add | ChangeType::Delete => {
                let mut names = self.changes.attr_values("objectclass");
                if names.is_empty() {
                    return None;
                }
                names.sort();
                Some(names.join(" "))
            }
            ChangeType::Modify => self.entry.as_ref().and_then(|e| {
                let classes = e.get("objectclass")?.as_array()?;
                let mut names: Vec<String> = classes
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_owned()))
                    .collect();
                names.sort();
                Some(names.join(" "))
            }),
        }
    }

    /// Read a single-valued string attribute from `entry` (the modify
    /// post-state) or, failing that, from `changes` (add/delete).
    pub fn attr(&self, name: &str) -> Option<String> {
        if let Some(entry) = &self.entry {
            if let Some(v) = entry.get(name) {
                if let Some(s) = v.as_str() {
                    return Some(s.to_owned());
                }
                if let Some(arr) = v.as_array() {
                    return arr.first().and_then(|v| v.as_str()).map(|s| s.to_owned());
                }
            }
        }
        self.changes.attr(name).map(|s| s.to_owned())
    }

    pub fn attr_values(&self, name: &str) -> Vec<String> {
        if let Some(entry) = &self.entry {
            if let Some(v) = entry.get(name) {
                if let Some(arr) = v.as_array() {
                    return arr
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_owned()))
                        .collect();
                }
                if let Some(s) = v.as_str() {
                    return vec![s.to_owned()];
                }
            }
        }
        self.changes.attr_values(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_accepts_well_shaped_value() {
        assert!(Uuid::parse("123e4567-e89b-12d3-a456-426614174000").is_ok());
    }

    #[test]
    fn uuid_rejects_wrong_length_and_case() {
        assert!(Uuid::parse("not-a-uuid").is_err());
        assert!(Uuid::parse("123E4567-E89B-12D3-A456-426614174000").is_err());
    }

    #[test]
    fn role_policies_detects_uuid_shape() {
        let inline = RolePolicies::from_strings(vec!["Version: 2012-10-17".into()]);
        assert!(matches!(inline, RolePolicies::Inline(_)));

        let by_uuid =
            RolePolicies::from_strings(vec!["123e4567-e89b-12d3-a456-426614174000".into()]);
        assert!(matches!(by_uuid, RolePolicies::ByUuid(_)));
    }

    #[test]
    fn record_tag_round_trips() {
        let acct = Record::Account(AccountRecord {
            uuid: Uuid::new_unchecked("123e4567-e89b-12d3-a456-426614174000"),
            login: "admin".into(),
            approved_for_provisioning: true,
            groups: HashMap::new(),
            keys: HashMap::new(),
            accesskeys: HashMap::new(),
        });
        let json = serde_json::to_string(&acct).unwrap();
        assert!(json.contains("\"type\":\"account\""));
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, acct);
    }

    #[test]
    fn changelog_objectclass_modify_is_sorted_and_joined() {
        let entry = ChangelogEntry {
            targetdn: "uuid=x, ou=users, o=smartdc".into(),
            changetype: ChangeType::Modify,
            changes: ChangesPayload::Mods(vec![]),
            entry: Some(serde_json::json!({ "objectclass": ["sdcperson", "sdcaccountuser"] })),
            changenumber: 42,
            changetime: None,
        };
        assert_eq!(
            entry.objectclass().as_deref(),
            Some("sdcaccountuser sdcperson")
        );
    }
}

//! Store key layout (§3): lowercase, `/`-separated keys.

use crate::model::Uuid;

pub fn uuid_key(u: &Uuid) -> String {
    format!("/uuid/{u}")
}

pub fn account_login_key(login: &str) -> String {
    format!("/account/{login}")
}

pub fn user_login_key(account: &Uuid, login: &str) -> String {
    format!("/user/{account}/{login}")
}

pub fn role_name_key(account: &Uuid, name: &str) -> String {
    format!("/role/{account}/{name}")
}

pub fn policy_name_key(account: &Uuid, name: &str) -> String {
    format!("/policy/{account}/{name}")
}

pub fn group_name_key(account: &Uuid, name: &str) -> String {
    format!("/group/{account}/{name}")
}

pub fn accesskey_key(access_key_id: &str) -> String {
    format!("/accesskey/{access_key_id}")
}

pub fn set_accounts_key() -> String {
    "/set/accounts".to_owned()
}

pub fn set_users_key(account: &Uuid) -> String {
    format!("/set/users/{account}")
}

pub fn set_roles_key(account: &Uuid) -> String {
    format!("/set/roles/{account}")
}

pub fn set_policies_key(account: &Uuid) -> String {
    format!("/set/policies/{account}")
}

pub fn set_groups_key(account: &Uuid) -> String {
    format!("/set/groups/{account}")
}

pub const CHANGENUMBER_KEY: &str = "changenumber";
pub const VIRGIN_KEY: &str = "virgin";

/// `true` iff `access_key_id` identifies a temporary credential (§3, §4.6).
pub fn is_temporary_access_key(access_key_id: &str) -> bool {
    access_key_id.starts_with("MSTS") || access_key_id.starts_with("MSAR")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_prefixes_recognized() {
        assert!(is_temporary_access_key("MSTS0123456789ABCD"));
        assert!(is_temporary_access_key("MSAR0123456789ABCD"));
        assert!(!is_temporary_access_key("AKIA0123456789ABCD"));
    }

    #[test]
    fn keys_are_lowercase_and_slash_separated() {
        let u = Uuid::new_unchecked("123e4567-e89b-12d3-a456-426614174000");
        assert_eq!(uuid_key(&u), "/uuid/123e4567-e89b-12d3-a456-426614174000");
        assert_eq!(set_roles_key(&u), "/set/roles/123e4567-e89b-12d3-a456-426614174000");
    }
}

//! The entry transformer (component C, §4.3) — pure per-entry translation
//! from a changelog entry into store commands appended to a batch.
//!
//! Routines here never write the store directly; every mutation goes
//! through the batch passed in, so `Transform` itself stays side-effect
//! free beyond the reads it needs for read-modify-write. Correctness
//! depends on the driver invoking transforms strictly serially (§5).

use idg_core::error::TransformError;
use idg_core::keys::{
    account_login_key, group_name_key, role_name_key, set_accounts_key, set_groups_key,
    set_roles_key, set_users_key, uuid_key,
};
use idg_core::model::{
    AccountRecord, ChangeType, ChangelogEntry, GroupRecord, ModOp, Record, RolePolicies,
    RoleRecord, Uuid,
};
use idg_store::{Batch, Store};

/// Translate one changelog entry into batch ops that bring the cache from
/// its pre-entry state to its post-entry state (§4.3).
pub async fn transform(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let Some(objectclass) = entry.objectclass() else {
        tracing::warn!(
            changenumber = entry.changenumber,
            targetdn = %entry.targetdn,
            "changelog entry carries no recognizable objectclass; ignoring"
        );
        return Ok(());
    };

    match objectclass.as_str() {
        "sdcperson" => dispatch_account(store, batch, entry).await,
        "sdckey" => dispatch_key(store, batch, entry).await,
        "groupofuniquenames" => dispatch_directory_group(store, batch, entry).await,
        "sdcaccountuser sdcperson" => dispatch_subuser(store, batch, entry).await,
        "sdcaccountrole" => dispatch_role(store, batch, entry).await,
        "sdcaccountgroup" => dispatch_account_group(store, batch, entry).await,
        other => {
            tracing::warn!(
                changenumber = entry.changenumber,
                objectclass = other,
                "unrecognized objectclass; ignoring"
            );
            Ok(())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_record(
    store: &dyn Store,
    uuid: &Uuid,
    entry: &ChangelogEntry,
) -> Result<Option<Record>, TransformError> {
    match store.get(&uuid_key(uuid)).await? {
        Some(raw) => {
            let record: Record = serde_json::from_str(&raw)
                .map_err(|e| corrupt(entry, format!("corrupt record at {}: {e}", uuid_key(uuid))))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

fn write_record(batch: &mut Batch, record: &Record) {
    let key = uuid_key(record.uuid());
    let json = serde_json::to_string(record).expect("Record serialization cannot fail");
    batch.set(key, json);
}

fn unsupported(entry: &ChangelogEntry, objectclass: &str) -> TransformError {
    TransformError::UnsupportedOperation {
        objectclass: objectclass.to_owned(),
        changetype: entry.changetype.to_string(),
    }
}

fn corrupt(entry: &ChangelogEntry, message: impl Into<String>) -> TransformError {
    TransformError::CorruptEntry {
        changenumber: entry.changenumber,
        message: message.into(),
    }
}

/// The value of the first RDN component of a DN, e.g. `uuid=X` from
/// `uuid=X, ou=users, o=smartdc` yields `"X"`.
fn dn_first_value(dn: &str) -> Option<&str> {
    let first = dn.split(',').next()?.trim();
    first.split('=').nth(1).map(|s| s.trim())
}

fn uuid_from_dn(dn: &str, entry: &ChangelogEntry) -> Result<Uuid, TransformError> {
    let raw = dn_first_value(dn).ok_or_else(|| corrupt(entry, format!("unparseable DN: {dn}")))?;
    Uuid::parse(raw).map_err(|_| corrupt(entry, format!("DN component is not a uuid: {raw}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sdcperson — account (§4.3 "put/mod/del account")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_account(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    match entry.changetype {
        ChangeType::Add => put_account(batch, entry),
        ChangeType::Modify => mod_account(store, batch, entry).await,
        ChangeType::Delete => del_account(batch, entry),
    }
}

fn put_account(batch: &mut Batch, entry: &ChangelogEntry) -> Result<(), TransformError> {
    let uuid = Uuid::parse(
        entry
            .attr("uuid")
            .ok_or_else(|| corrupt(entry, "add account missing uuid"))?,
    )
    .map_err(|_| corrupt(entry, "add account uuid is not a valid uuid"))?;
    let login = entry
        .attr("login")
        .ok_or_else(|| corrupt(entry, "add account missing login"))?;
    let approved = entry.attr("approvedforprovisioning").as_deref() == Some("true");

    let record = Record::Account(AccountRecord {
        uuid: uuid.clone(),
        login: login.clone(),
        approved_for_provisioning: approved,
        groups: Default::default(),
        keys: Default::default(),
        accesskeys: Default::default(),
    });
    write_record(batch, &record);
    batch.set(account_login_key(&login), uuid.as_str());
    batch.set_add(set_accounts_key(), uuid.as_str());
    Ok(())
}

fn del_account(batch: &mut Batch, entry: &ChangelogEntry) -> Result<(), TransformError> {
    let uuid = Uuid::parse(
        entry
            .attr("uuid")
            .ok_or_else(|| corrupt(entry, "delete account missing uuid"))?,
    )
    .map_err(|_| corrupt(entry, "delete account uuid is not a valid uuid"))?;
    let login = entry
        .attr("login")
        .ok_or_else(|| corrupt(entry, "delete account missing login"))?;

    batch.del(uuid_key(&uuid));
    batch.del(account_login_key(&login));
    batch.set_remove(set_accounts_key(), uuid.as_str());
    batch.del(set_users_key(&uuid));
    batch.del(set_roles_key(&uuid));
    batch.del(set_groups_key(&uuid));
    Ok(())
}

async fn mod_account(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let Some(mods) = entry.changes.as_mods() else {
        return Err(corrupt(entry, "modify account without a modification list"));
    };

    let uuid = uuid_from_dn(&entry.targetdn, entry)?;
    let Some(Record::Account(mut account)) = read_record(store, &uuid, entry).await? else {
        return Err(corrupt(entry, format!("modify account {uuid}: no such record")));
    };

    for m in mods {
        match m.attr.as_str() {
            "approvedforprovisioning" => match m.op {
                ModOp::Delete => account.approved_for_provisioning = false,
                ModOp::Add | ModOp::Replace => {
                    account.approved_for_provisioning =
                        m.values.first().map(|v| v == "true").unwrap_or(false);
                }
            },
            "login" => {
                if m.op == ModOp::Replace {
                    let new_login = m
                        .values
                        .first()
                        .ok_or_else(|| corrupt(entry, "login replace without a value"))?
                        .clone();
                    batch.del(account_login_key(&account.login));
                    batch.set(account_login_key(&new_login), uuid.as_str());
                    account.login = new_login;
                } else {
                    tracing::warn!(attr = "login", op = ?m.op, "unsupported account login op; ignoring");
                }
            }
            other => {
                tracing::warn!(attr = other, "unrecognized account modification; ignoring");
            }
        }
    }

    write_record(batch, &Record::Account(account));
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sdckey — SSH/GPG key (§4.3 "add key/del key", fingerprint is part of DN)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_key(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    match entry.changetype {
        ChangeType::Add => add_key(store, batch, entry).await,
        ChangeType::Delete => del_key(store, batch, entry).await,
        // Fingerprint is part of the DN, hence immutable; a modify of an
        // existing key entry carries nothing we need to apply.
        ChangeType::Modify => Ok(()),
    }
}

async fn add_key(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let owner = Uuid::parse(
        entry
            .attr("_owner")
            .ok_or_else(|| corrupt(entry, "add key missing _owner"))?,
    )
    .map_err(|_| corrupt(entry, "_owner is not a valid uuid"))?;
    let fingerprint = entry
        .attr("fingerprint")
        .ok_or_else(|| corrupt(entry, "add key missing fingerprint"))?;
    let pkcs = entry
        .attr("pkcs")
        .ok_or_else(|| corrupt(entry, "add key missing pkcs"))?;

    // If the owner record doesn't exist yet, store the fingerprint in an
    // otherwise-empty account record; the owner's own `add` entry (already
    // processed or yet to come) read-modify-writes the same key and merges.
    let mut record = match read_record(store, &owner, entry).await? {
        Some(r) => r,
        None => Record::Account(AccountRecord {
            uuid: owner.clone(),
            login: String::new(),
            approved_for_provisioning: false,
            groups: Default::default(),
            keys: Default::default(),
            accesskeys: Default::default(),
        }),
    };
    match &mut record {
        Record::Account(a) => {
            a.keys.insert(fingerprint, pkcs);
        }
        Record::User(u) => {
            u.keys.insert(fingerprint, pkcs);
        }
        _ => return Err(corrupt(entry, format!("key owner {owner} is not an account/user"))),
    }
    write_record(batch, &record);
    Ok(())
}

async fn del_key(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let owner = Uuid::parse(
        entry
            .attr("_owner")
            .ok_or_else(|| corrupt(entry, "delete key missing _owner"))?,
    )
    .map_err(|_| corrupt(entry, "_owner is not a valid uuid"))?;
    let fingerprint = entry
        .attr("fingerprint")
        .ok_or_else(|| corrupt(entry, "delete key missing fingerprint"))?;

    let Some(mut record) = read_record(store, &owner, entry).await? else {
        tracing::warn!(%owner, "delete key for unknown owner; ignoring");
        return Ok(());
    };
    match &mut record {
        Record::Account(a) => {
            a.keys.remove(&fingerprint);
        }
        Record::User(u) => {
            u.keys.remove(&fingerprint);
        }
        _ => return Err(corrupt(entry, format!("key owner {owner} is not an account/user"))),
    }
    write_record(batch, &record);
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// groupofuniquenames — directory-level group (denormalized onto accounts)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_directory_group(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let group_name = dn_first_value(&entry.targetdn)
        .ok_or_else(|| corrupt(entry, "directory group DN has no name component"))?
        .to_owned();

    match entry.changetype {
        ChangeType::Add => {
            let members = entry.attr_values("uniquemember");
            set_directory_group_membership(store, batch, entry, &group_name, &members, true).await
        }
        ChangeType::Delete => {
            let members = entry.attr_values("uniquemember");
            set_directory_group_membership(store, batch, entry, &group_name, &members, false)
                .await
        }
        ChangeType::Modify => {
            let Some(mods) = entry.changes.as_mods() else {
                return Err(corrupt(entry, "modify directory group without modification list"));
            };
            for m in mods {
                if m.attr != "uniquemember" {
                    tracing::warn!(attr = %m.attr, "unrecognized directory-group modification; ignoring");
                    continue;
                }
                let present = match m.op {
                    ModOp::Add => true,
                    ModOp::Delete => false,
                    ModOp::Replace => {
                        tracing::warn!("directory-group membership replace unsupported; ignoring");
                        continue;
                    }
                };
                set_directory_group_membership(store, batch, entry, &group_name, &m.values, present)
                    .await?;
            }
            Ok(())
        }
    }
}

async fn set_directory_group_membership(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
    group_name: &str,
    member_dns: &[String],
    present: bool,
) -> Result<(), TransformError> {
    for dn in member_dns {
        let account_uuid = uuid_from_dn(dn, entry)?;
        let Some(Record::Account(mut account)) = read_record(store, &account_uuid, entry).await? else {
            tracing::warn!(%account_uuid, "directory-group member is not a known account; ignoring");
            continue;
        };
        if present {
            account.groups.insert(group_name.to_owned(), true);
        } else {
            account.groups.remove(group_name);
        }
        write_record(batch, &Record::Account(account));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sdcaccountuser sdcperson — sub-user
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_subuser(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    match entry.changetype {
        ChangeType::Add => put_subuser(batch, entry),
        ChangeType::Modify => mod_subuser(store, batch, entry).await,
        ChangeType::Delete => del_subuser(batch, entry),
    }
}

fn put_subuser(batch: &mut Batch, entry: &ChangelogEntry) -> Result<(), TransformError> {
    let uuid = Uuid::parse(
        entry.attr("uuid").ok_or_else(|| corrupt(entry, "add sub-user missing uuid"))?,
    )
    .map_err(|_| corrupt(entry, "add sub-user uuid invalid"))?;
    let account = Uuid::parse(
        entry
            .attr("account")
            .ok_or_else(|| corrupt(entry, "add sub-user missing account"))?,
    )
    .map_err(|_| corrupt(entry, "add sub-user account invalid"))?;
    let login = entry
        .attr("login")
        .ok_or_else(|| corrupt(entry, "add sub-user missing login"))?;

    let record = Record::User(idg_core::model::UserRecord {
        uuid: uuid.clone(),
        account: account.clone(),
        login: login.clone(),
        roles: Vec::new(),
        groups: Vec::new(),
        keys: Default::default(),
        accesskeys: Default::default(),
    });
    write_record(batch, &record);
    batch.set(
        idg_core::keys::user_login_key(&account, &login),
        uuid.as_str(),
    );
    batch.set_add(set_users_key(&account), uuid.as_str());
    Ok(())
}

fn del_subuser(batch: &mut Batch, entry: &ChangelogEntry) -> Result<(), TransformError> {
    let uuid = Uuid::parse(
        entry.attr("uuid").ok_or_else(|| corrupt(entry, "delete sub-user missing uuid"))?,
    )
    .map_err(|_| corrupt(entry, "delete sub-user uuid invalid"))?;
    let account = Uuid::parse(
        entry
            .attr("account")
            .ok_or_else(|| corrupt(entry, "delete sub-user missing account"))?,
    )
    .map_err(|_| corrupt(entry, "delete sub-user account invalid"))?;
    let login = entry
        .attr("login")
        .ok_or_else(|| corrupt(entry, "delete sub-user missing login"))?;

    batch.del(uuid_key(&uuid));
    batch.del(idg_core::keys::user_login_key(&account, &login));
    batch.set_remove(set_users_key(&account), uuid.as_str());
    Ok(())
}

async fn mod_subuser(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let Some(mods) = entry.changes.as_mods() else {
        return Err(corrupt(entry, "modify sub-user without modification list"));
    };
    let uuid = uuid_from_dn(&entry.targetdn, entry)?;
    let Some(Record::User(mut user)) = read_record(store, &uuid, entry).await? else {
        return Err(corrupt(entry, format!("modify sub-user {uuid}: no such record")));
    };

    for m in mods {
        match m.attr.as_str() {
            "login" if m.op == ModOp::Replace => {
                let new_login = m
                    .values
                    .first()
                    .ok_or_else(|| corrupt(entry, "sub-user login replace without a value"))?
                    .clone();
                batch.del(idg_core::keys::user_login_key(&user.account, &user.login));
                batch.set(
                    idg_core::keys::user_login_key(&user.account, &new_login),
                    uuid.as_str(),
                );
                user.login = new_login;
            }
            other => {
                tracing::warn!(attr = other, "unrecognized sub-user modification; ignoring");
            }
        }
    }

    write_record(batch, &Record::User(user));
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sdcaccountrole — role
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_role(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    match entry.changetype {
        ChangeType::Add => put_role(store, batch, entry).await,
        ChangeType::Modify => mod_role(store, batch, entry).await,
        ChangeType::Delete => del_role(store, batch, entry).await,
    }
}

async fn put_role(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let uuid = Uuid::parse(entry.attr("uuid").ok_or_else(|| corrupt(entry, "add role missing uuid"))?)
        .map_err(|_| corrupt(entry, "add role uuid invalid"))?;
    let account = Uuid::parse(
        entry
            .attr("account")
            .ok_or_else(|| corrupt(entry, "add role missing account"))?,
    )
    .map_err(|_| corrupt(entry, "add role account invalid"))?;
    let name = entry
        .attr("role")
        .ok_or_else(|| corrupt(entry, "add role missing name"))?;
    let policies = RolePolicies::from_strings(entry.attr_values("policydocument"));

    let record = Record::Role(RoleRecord {
        uuid: uuid.clone(),
        name: name.clone(),
        account: account.clone(),
        policies,
    });
    write_record(batch, &record);
    batch.set(role_name_key(&account, &name), uuid.as_str());
    batch.set_add(set_roles_key(&account), uuid.as_str());

    for member_dn in entry
        .attr_values("uniquemember")
        .into_iter()
        .chain(entry.attr_values("membergroup"))
    {
        let member_uuid = uuid_from_dn(&member_dn, entry)?;
        add_role_to_member(store, batch, &member_uuid, &uuid, entry).await?;
    }
    Ok(())
}

async fn del_role(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let uuid = Uuid::parse(
        entry.attr("uuid").ok_or_else(|| corrupt(entry, "delete role missing uuid"))?,
    )
    .map_err(|_| corrupt(entry, "delete role uuid invalid"))?;
    let account = Uuid::parse(
        entry
            .attr("account")
            .ok_or_else(|| corrupt(entry, "delete role missing account"))?,
    )
    .map_err(|_| corrupt(entry, "delete role account invalid"))?;
    let name = entry
        .attr("role")
        .ok_or_else(|| corrupt(entry, "delete role missing name"))?;

    batch.del(uuid_key(&uuid));
    batch.del(role_name_key(&account, &name));
    batch.set_remove(set_roles_key(&account), uuid.as_str());

    for member_dn in entry
        .attr_values("uniquemember")
        .into_iter()
        .chain(entry.attr_values("membergroup"))
    {
        let member_uuid = uuid_from_dn(&member_dn, entry)?;
        remove_role_from_member(store, batch, &member_uuid, &uuid, entry).await?;
    }
    Ok(())
}

async fn mod_role(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let Some(mods) = entry.changes.as_mods() else {
        return Err(corrupt(entry, "modify role without modification list"));
    };
    let uuid = uuid_from_dn(&entry.targetdn, entry)?;
    let Some(Record::Role(mut role)) = read_record(store, &uuid, entry).await? else {
        return Err(corrupt(entry, format!("modify role {uuid}: no such record")));
    };

    for m in mods {
        match m.attr.as_str() {
            "role" if m.op == ModOp::Replace => {
                let new_name = m
                    .values
                    .first()
                    .ok_or_else(|| corrupt(entry, "role rename without a value"))?
                    .clone();
                batch.del(role_name_key(&role.account, &role.name));
                batch.set(role_name_key(&role.account, &new_name), uuid.as_str());
                role.name = new_name;
            }
            "policydocument" => {
                let mut values = role.policies.values();
                match m.op {
                    ModOp::Add => values.extend(m.values.iter().cloned()),
                    ModOp::Delete => values.retain(|v| !m.values.contains(v)),
                    ModOp::Replace => {
                        values = m.values.clone();
                    }
                }
                role.policies = RolePolicies::from_strings(values);
            }
            "uniquemember" | "membergroup" => {
                let present = match m.op {
                    ModOp::Add => true,
                    ModOp::Delete => false,
                    ModOp::Replace => {
                        tracing::warn!("role membership replace unsupported; ignoring");
                        continue;
                    }
                };
                for member_dn in &m.values {
                    let member_uuid = uuid_from_dn(member_dn, entry)?;
                    if present {
                        add_role_to_member(store, batch, &member_uuid, &uuid, entry).await?;
                    } else {
                        remove_role_from_member(store, batch, &member_uuid, &uuid, entry).await?;
                    }
                }
            }
            other => {
                tracing::warn!(attr = other, "unrecognized role modification; ignoring");
            }
        }
    }

    write_record(batch, &Record::Role(role));
    Ok(())
}

async fn add_role_to_member(
    store: &dyn Store,
    batch: &mut Batch,
    member_uuid: &Uuid,
    role_uuid: &Uuid,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    match read_record(store, member_uuid, entry).await? {
        Some(Record::User(mut u)) => {
            if !u.roles.contains(role_uuid) {
                u.roles.push(role_uuid.clone());
            }
            write_record(batch, &Record::User(u));
            Ok(())
        }
        Some(Record::Group(mut g)) => {
            if !g.roles.contains(role_uuid) {
                g.roles.push(role_uuid.clone());
            }
            write_record(batch, &Record::Group(g));
            Ok(())
        }
        Some(_) => Err(corrupt(entry, format!("role member {member_uuid} is not a user/group"))),
        None => {
            tracing::warn!(%member_uuid, "role member does not exist yet; ignoring");
            Ok(())
        }
    }
}

async fn remove_role_from_member(
    store: &dyn Store,
    batch: &mut Batch,
    member_uuid: &Uuid,
    role_uuid: &Uuid,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    match read_record(store, member_uuid, entry).await? {
        Some(Record::User(mut u)) => {
            u.roles.retain(|r| r != role_uuid);
            write_record(batch, &Record::User(u));
            Ok(())
        }
        Some(Record::Group(mut g)) => {
            g.roles.retain(|r| r != role_uuid);
            write_record(batch, &Record::Group(g));
            Ok(())
        }
        Some(_) => Err(corrupt(entry, format!("role member {member_uuid} is not a user/group"))),
        None => Ok(()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sdcaccountgroup — account-group (analogous to role; §4.3)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_account_group(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    match entry.changetype {
        ChangeType::Add => put_account_group(store, batch, entry).await,
        ChangeType::Modify => mod_account_group(store, batch, entry).await,
        ChangeType::Delete => del_account_group(store, batch, entry).await,
    }
}

async fn put_account_group(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let uuid = Uuid::parse(
        entry.attr("uuid").ok_or_else(|| corrupt(entry, "add group missing uuid"))?,
    )
    .map_err(|_| corrupt(entry, "add group uuid invalid"))?;
    let account = Uuid::parse(
        entry
            .attr("account")
            .ok_or_else(|| corrupt(entry, "add group missing account"))?,
    )
    .map_err(|_| corrupt(entry, "add group account invalid"))?;
    let name = entry
        .attr("group")
        .ok_or_else(|| corrupt(entry, "add group missing name"))?;
    let roles = entry
        .attr_values("memberrole")
        .into_iter()
        .map(Uuid::new_unchecked)
        .collect::<Vec<_>>();

    let record = Record::Group(GroupRecord {
        uuid: uuid.clone(),
        name: name.clone(),
        account: account.clone(),
        roles,
    });
    write_record(batch, &record);
    batch.set(group_name_key(&account, &name), uuid.as_str());
    batch.set_add(set_groups_key(&account), uuid.as_str());

    for member_dn in entry.attr_values("uniquemember") {
        let member_uuid = uuid_from_dn(&member_dn, entry)?;
        add_group_to_member(store, batch, &member_uuid, &uuid, entry).await?;
    }
    Ok(())
}

async fn del_account_group(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let uuid = Uuid::parse(
        entry.attr("uuid").ok_or_else(|| corrupt(entry, "delete group missing uuid"))?,
    )
    .map_err(|_| corrupt(entry, "delete group uuid invalid"))?;
    let account = Uuid::parse(
        entry
            .attr("account")
            .ok_or_else(|| corrupt(entry, "delete group missing account"))?,
    )
    .map_err(|_| corrupt(entry, "delete group account invalid"))?;
    let name = entry
        .attr("group")
        .ok_or_else(|| corrupt(entry, "delete group missing name"))?;

    batch.del(uuid_key(&uuid));
    batch.del(group_name_key(&account, &name));
    batch.set_remove(set_groups_key(&account), uuid.as_str());

    for member_dn in entry.attr_values("uniquemember") {
        let member_uuid = uuid_from_dn(&member_dn, entry)?;
        remove_group_from_member(store, batch, &member_uuid, &uuid, entry).await?;
    }
    Ok(())
}

async fn mod_account_group(
    store: &dyn Store,
    batch: &mut Batch,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let Some(mods) = entry.changes.as_mods() else {
        return Err(corrupt(entry, "modify group without modification list"));
    };
    let uuid = uuid_from_dn(&entry.targetdn, entry)?;
    let Some(Record::Group(mut group)) = read_record(store, &uuid, entry).await? else {
        return Err(corrupt(entry, format!("modify group {uuid}: no such record")));
    };

    for m in mods {
        match m.attr.as_str() {
            "group" if m.op == ModOp::Replace => {
                let new_name = m
                    .values
                    .first()
                    .ok_or_else(|| corrupt(entry, "group rename without a value"))?
                    .clone();
                batch.del(group_name_key(&group.account, &group.name));
                batch.set(group_name_key(&group.account, &new_name), uuid.as_str());
                group.name = new_name;
            }
            "memberrole" => {
                let role_uuids: Vec<Uuid> = m
                    .values
                    .iter()
                    .cloned()
                    .map(Uuid::new_unchecked)
                    .collect();
                match m.op {
                    ModOp::Add => {
                        for r in role_uuids {
                            if !group.roles.contains(&r) {
                                group.roles.push(r);
                            }
                        }
                    }
                    ModOp::Delete => group.roles.retain(|r| !role_uuids.contains(r)),
                    ModOp::Replace => group.roles = role_uuids,
                }
            }
            "uniquemember" => {
                let present = match m.op {
                    ModOp::Add => true,
                    ModOp::Delete => false,
                    ModOp::Replace => {
                        tracing::warn!("group membership replace unsupported; ignoring");
                        continue;
                    }
                };
                for member_dn in &m.values {
                    let member_uuid = uuid_from_dn(member_dn, entry)?;
                    if present {
                        add_group_to_member(store, batch, &member_uuid, &uuid, entry).await?;
                    } else {
                        remove_group_from_member(store, batch, &member_uuid, &uuid, entry).await?;
                    }
                }
            }
            other => {
                tracing::warn!(attr = other, "unrecognized group modification; ignoring");
            }
        }
    }

    write_record(batch, &Record::Group(group));
    Ok(())
}

async fn add_group_to_member(
    store: &dyn Store,
    batch: &mut Batch,
    member_uuid: &Uuid,
    group_uuid: &Uuid,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    let Some(Record::User(mut user)) = read_record(store, member_uuid, entry).await? else {
        return Err(unsupported(entry, "sdcaccountgroup"));
    };
    if !user.groups.contains(group_uuid) {
        user.groups.push(group_uuid.clone());
    }
    write_record(batch, &Record::User(user));
    Ok(())
}

async fn remove_group_from_member(
    store: &dyn Store,
    batch: &mut Batch,
    member_uuid: &Uuid,
    group_uuid: &Uuid,
    entry: &ChangelogEntry,
) -> Result<(), TransformError> {
    if let Some(Record::User(mut user)) = read_record(store, member_uuid, entry).await? {
        user.groups.retain(|g| g != group_uuid);
        write_record(batch, &Record::User(user));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use idg_core::model::{ChangesPayload, Modification};
    use idg_store::MemoryStore;
    use std::collections::HashMap;

    fn attrs(pairs: &[(&str, &str)]) -> ChangesPayload {
        let mut map = HashMap::new();
        for (k, v) in pairs {
            map.insert((*k).to_owned(), vec![(*v).to_owned()]);
        }
        ChangesPayload::Attrs(map)
    }

    const U: &str = "123e4567-e89b-12d3-a456-426614174000";

    fn add_account_entry(cn: u64) -> ChangelogEntry {
        ChangelogEntry {
            targetdn: format!("uuid={U}, ou=users, o=smartdc"),
            changetype: ChangeType::Add,
            changes: attrs(&[
                ("objectclass", "sdcperson"),
                ("uuid", U),
                ("login", "admin"),
                ("approvedforprovisioning", "false"),
            ]),
            entry: None,
            changenumber: cn,
            changetime: None,
        }
    }

    fn del_account_entry(cn: u64) -> ChangelogEntry {
        ChangelogEntry {
            targetdn: format!("uuid={U}, ou=users, o=smartdc"),
            changetype: ChangeType::Delete,
            changes: attrs(&[("objectclass", "sdcperson"), ("uuid", U), ("login", "admin")]),
            entry: None,
            changenumber: cn,
            changetime: None,
        }
    }

    #[tokio::test]
    async fn scenario_1_add_then_delete_account() {
        let store = MemoryStore::new();

        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_account_entry(1)).await.unwrap();
        store.commit(batch).await.unwrap();

        let u = Uuid::new_unchecked(U);
        assert!(store.get(&uuid_key(&u)).await.unwrap().is_some());
        assert_eq!(
            store.get(&account_login_key("admin")).await.unwrap().as_deref(),
            Some(U)
        );
        assert!(store.set_is_member(&set_accounts_key(), U).await.unwrap());

        let mut batch = Batch::new();
        transform(&store, &mut batch, &del_account_entry(2)).await.unwrap();
        store.commit(batch).await.unwrap();

        assert!(store.get(&uuid_key(&u)).await.unwrap().is_none());
        assert!(store.get(&account_login_key("admin")).await.unwrap().is_none());
        assert!(!store.set_is_member(&set_accounts_key(), U).await.unwrap());
        assert!(store.get(&set_users_key(&u)).await.unwrap().is_none());
        assert_eq!(store.set_members(&set_roles_key(&u)).await.unwrap().len(), 0);
        assert_eq!(store.set_members(&set_groups_key(&u)).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn scenario_2_directory_group_membership_round_trip() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_account_entry(1)).await.unwrap();
        store.commit(batch).await.unwrap();

        let add_group = ChangelogEntry {
            targetdn: "cn=operators, ou=groups, o=smartdc".into(),
            changetype: ChangeType::Add,
            changes: {
                let mut m = HashMap::new();
                m.insert("objectclass".into(), vec!["groupofuniquenames".into()]);
                m.insert(
                    "uniquemember".into(),
                    vec![format!("uuid={U}, ou=users, o=smartdc")],
                );
                ChangesPayload::Attrs(m)
            },
            entry: None,
            changenumber: 2,
            changetime: None,
        };
        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_group).await.unwrap();
        store.commit(batch).await.unwrap();

        let u = Uuid::new_unchecked(U);
        let raw = store.get(&uuid_key(&u)).await.unwrap().unwrap();
        let record: Record = serde_json::from_str(&raw).unwrap();
        let Record::Account(account) = record else { panic!("expected account") };
        assert_eq!(account.groups.get("operators"), Some(&true));

        let del_member = ChangelogEntry {
            targetdn: "cn=operators, ou=groups, o=smartdc".into(),
            changetype: ChangeType::Modify,
            changes: ChangesPayload::Mods(vec![Modification {
                op: ModOp::Delete,
                attr: "uniquemember".into(),
                values: vec![format!("uuid={U}, ou=users, o=smartdc")],
            }]),
            entry: None,
            changenumber: 3,
            changetime: None,
        };
        let mut batch = Batch::new();
        transform(&store, &mut batch, &del_member).await.unwrap();
        store.commit(batch).await.unwrap();

        let raw = store.get(&uuid_key(&u)).await.unwrap().unwrap();
        let record: Record = serde_json::from_str(&raw).unwrap();
        let Record::Account(account) = record else { panic!("expected account") };
        assert!(!account.groups.contains_key("operators"));
    }

    #[tokio::test]
    async fn scenario_3_role_rename() {
        let store = MemoryStore::new();
        let account: &str = U;
        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_account_entry(1)).await.unwrap();
        store.commit(batch).await.unwrap();

        const R: &str = "223e4567-e89b-12d3-a456-426614174000";
        let add_role = ChangelogEntry {
            targetdn: format!("uuid={R}, uuid={account}, ou=users, o=smartdc"),
            changetype: ChangeType::Add,
            changes: attrs(&[
                ("objectclass", "sdcaccountrole"),
                ("uuid", R),
                ("account", account),
                ("role", "developer_read"),
            ]),
            entry: None,
            changenumber: 2,
            changetime: None,
        };
        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_role).await.unwrap();
        store.commit(batch).await.unwrap();

        let a = Uuid::new_unchecked(account);
        assert_eq!(
            store.get(&role_name_key(&a, "developer_read")).await.unwrap().as_deref(),
            Some(R)
        );

        let rename = ChangelogEntry {
            targetdn: format!("uuid={R}, uuid={account}, ou=users, o=smartdc"),
            changetype: ChangeType::Modify,
            changes: ChangesPayload::Mods(vec![Modification {
                op: ModOp::Replace,
                attr: "role".into(),
                values: vec!["roletoreplace".into()],
            }]),
            entry: None,
            changenumber: 3,
            changetime: None,
        };
        let mut batch = Batch::new();
        transform(&store, &mut batch, &rename).await.unwrap();
        store.commit(batch).await.unwrap();

        assert!(store
            .get(&role_name_key(&a, "developer_read"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.get(&role_name_key(&a, "roletoreplace")).await.unwrap().as_deref(),
            Some(R)
        );
        let r = Uuid::new_unchecked(R);
        let raw = store.get(&uuid_key(&r)).await.unwrap().unwrap();
        let Record::Role(role) = serde_json::from_str(&raw).unwrap() else {
            panic!("expected role")
        };
        assert_eq!(role.name, "roletoreplace");
    }

    #[tokio::test]
    async fn property_p1_name_uuid_consistency_for_role() {
        let store = MemoryStore::new();
        let account: &str = U;
        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_account_entry(1)).await.unwrap();
        store.commit(batch).await.unwrap();

        const R: &str = "323e4567-e89b-12d3-a456-426614174000";
        let add_role = ChangelogEntry {
            targetdn: format!("uuid={R}, uuid={account}, ou=users, o=smartdc"),
            changetype: ChangeType::Add,
            changes: attrs(&[
                ("objectclass", "sdcaccountrole"),
                ("uuid", R),
                ("account", account),
                ("role", "billing_read"),
            ]),
            entry: None,
            changenumber: 2,
            changetime: None,
        };
        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_role).await.unwrap();
        store.commit(batch).await.unwrap();

        let a = Uuid::new_unchecked(account);
        let uuid_raw = store
            .get(&role_name_key(&a, "billing_read"))
            .await
            .unwrap()
            .expect("name key resolves to a uuid");
        assert_eq!(uuid_raw, R);

        let raw = store.get(&uuid_key(&Uuid::new_unchecked(R))).await.unwrap().unwrap();
        let Record::Role(role) = serde_json::from_str(&raw).unwrap() else {
            panic!("expected role")
        };
        assert_eq!(role.name, "billing_read");
        assert_eq!(role.account, a);
    }

    #[tokio::test]
    async fn property_p2_set_consistency_for_roles() {
        let store = MemoryStore::new();
        let account: &str = U;
        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_account_entry(1)).await.unwrap();
        store.commit(batch).await.unwrap();

        const R: &str = "423e4567-e89b-12d3-a456-426614174000";
        let add_role = ChangelogEntry {
            targetdn: format!("uuid={R}, uuid={account}, ou=users, o=smartdc"),
            changetype: ChangeType::Add,
            changes: attrs(&[
                ("objectclass", "sdcaccountrole"),
                ("uuid", R),
                ("account", account),
                ("role", "developer_write"),
            ]),
            entry: None,
            changenumber: 2,
            changetime: None,
        };
        let mut batch = Batch::new();
        transform(&store, &mut batch, &add_role).await.unwrap();
        store.commit(batch).await.unwrap();

        let a = Uuid::new_unchecked(account);
        assert!(store.set_is_member(&set_roles_key(&a), R).await.unwrap());
        let raw = store.get(&uuid_key(&Uuid::new_unchecked(R))).await.unwrap().unwrap();
        let Record::Role(role) = serde_json::from_str(&raw).unwrap() else {
            panic!("expected role")
        };
        assert_eq!(role.account, a);

        let del_role = ChangelogEntry {
            targetdn: format!("uuid={R}, uuid={account}, ou=users, o=smartdc"),
            changetype: ChangeType::Delete,
            changes: attrs(&[
                ("objectclass", "sdcaccountrole"),
                ("uuid", R),
                ("account", account),
                ("role", "developer_write"),
            ]),
            entry: None,
            changenumber: 3,
            changetime: None,
        };
        let mut batch = Batch::new();
        transform(&store, &mut batch, &del_role).await.unwrap();
        store.commit(batch).await.unwrap();

        assert!(!store.set_is_member(&set_roles_key(&a), R).await.unwrap());
        assert!(store.get(&uuid_key(&Uuid::new_unchecked(R))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrecognized_objectclass_is_ignored_not_fatal() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        let entry = ChangelogEntry {
            targetdn: "uuid=x, ou=users, o=smartdc".into(),
            changetype: ChangeType::Add,
            changes: attrs(&[("objectclass", "sdcsomethingunknown")]),
            entry: None,
            changenumber: 1,
            changetime: None,
        };
        transform(&store, &mut batch, &entry).await.unwrap();
        assert!(batch.is_empty());
    }
}

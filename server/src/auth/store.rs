//! Credential store.
//!
//! Account records live in the hierarchical database itself, under the
//! reserved `__auth__` namespace that the rule engine denies to non-admin
//! clients. Username/email uniqueness is enforced check-then-write; the
//! narrow race window this leaves is accepted, and duplicates are detected
//! and logged at sign-in time.

use serde_json::{Value, json};

use crate::auth::account::{ADMIN_UID, UserAccount};
use crate::auth::password::generate_password_hash;
use crate::prelude::*;
use canopy_types::audit_adapter::AuditAdapter;
use canopy_types::db_adapter::{DbAdapter, FilterOp, QueryOptions};
use canopy_types::utils::random_secret;

pub const AUTH_NS: &str = "__auth__";
pub const ACCOUNTS_PATH: &str = "__auth__/accounts";
const SECURITY_PATH: &str = "__auth__/security";

const SALT_BYTES: usize = 32;

pub fn account_path(uid: &str) -> String {
	format!("{}/{}", ACCOUNTS_PATH, uid)
}

fn write_context() -> Value {
	json!({ "origin": "auth" })
}

pub async fn get_account(db: &dyn DbAdapter, uid: &str) -> CnResult<Option<UserAccount>> {
	match db.get(&account_path(uid)).await? {
		Some(value) => Ok(Some(serde_json::from_value(value)?)),
		None => Ok(None),
	}
}

/// Find accounts with `field == value`. More than one result is a
/// data-integrity condition the caller must handle.
pub async fn find_accounts_by(
	db: &dyn DbAdapter,
	field: &str,
	value: &str,
) -> CnResult<Vec<UserAccount>> {
	let opts = QueryOptions::new().with_filter(field, FilterOp::Eq, Value::String(value.into()));
	let results = db.query(ACCOUNTS_PATH, opts).await?;

	let mut accounts = Vec::with_capacity(results.len());
	for (_path, value) in results {
		accounts.push(serde_json::from_value(value)?);
	}
	Ok(accounts)
}

pub async fn save_account(db: &dyn DbAdapter, account: &UserAccount) -> CnResult<()> {
	let value = serde_json::to_value(account)?;
	db.set(&account_path(&account.uid), value, write_context()).await
}

/// Create a new account, enforcing username/email uniqueness
/// (check-then-write)
pub async fn create_account(db: &dyn DbAdapter, account: &UserAccount) -> CnResult<()> {
	if let Some(username) = &account.username {
		if !find_accounts_by(db, "username", username).await?.is_empty() {
			return Err(Error::Conflict("username is taken".into()));
		}
	}
	if let Some(email) = &account.email {
		if !find_accounts_by(db, "email", email).await?.is_empty() {
			return Err(Error::Conflict("email is already registered".into()));
		}
	}
	if db.exists(&account_path(&account.uid)).await? {
		return Err(Error::Conflict("account already exists".into()));
	}
	save_account(db, account).await
}

pub async fn delete_account(db: &dyn DbAdapter, uid: &str) -> CnResult<()> {
	if uid == ADMIN_UID {
		return Err(Error::access_denied("not_allowed", "the admin account cannot be deleted"));
	}
	db.remove(&account_path(uid), write_context()).await
}

/// Load the server-wide token salt, generating and persisting it on first
/// boot. Failure here is fatal: no token operation may run without it.
pub async fn ensure_server_salt(db: &dyn DbAdapter) -> CnResult<Box<str>> {
	if let Some(value) = db.get(SECURITY_PATH).await? {
		if let Some(salt) = value.get("salt").and_then(Value::as_str) {
			return Ok(salt.into());
		}
		return Err(Error::ConfigError("security document is malformed".into()));
	}

	let salt = random_secret(SALT_BYTES);
	let doc = json!({ "salt": salt, "created": Timestamp::now() });
	db.set(SECURITY_PATH, doc, write_context()).await?;
	info!("Generated new server salt");
	Ok(salt.into())
}

/// Create the admin account on first boot.
///
/// Without a configured bootstrap password the account exists but cannot
/// sign in with a password (token/OAuth only after an admin sets one).
pub async fn ensure_admin_account(
	db: &dyn DbAdapter,
	audit: &dyn AuditAdapter,
	admin_password: Option<&str>,
) -> CnResult<()> {
	if get_account(db, ADMIN_UID).await?.is_some() {
		return Ok(());
	}

	let (password, password_salt) = match admin_password {
		Some(password) => {
			let hashed = generate_password_hash(password);
			(Some(hashed.hash), Some(hashed.salt))
		}
		None => (None, None),
	};

	let account = UserAccount {
		uid: ADMIN_UID.into(),
		username: Some(ADMIN_UID.into()),
		email: None,
		password,
		password_salt,
		access_token: None,
		access_token_created: None,
		display_name: "Database administrator".into(),
		picture: None,
		settings: std::collections::BTreeMap::new(),
		is_disabled: false,
		email_verified: false,
		password_reset_code: None,
		created: Timestamp::now(),
		created_ip: None,
		last_signin: None,
		last_signin_ip: None,
		prev_signin: None,
		prev_signin_ip: None,
	};
	save_account(db, &account).await?;
	audit.event("bootstrap", json!({ "uid": ADMIN_UID })).await;
	info!("Created admin account");
	Ok(())
}

// vim: ts=4

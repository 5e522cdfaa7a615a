//! Sign-in flow.
//!
//! Resolves a unique account from one of the four credential kinds, runs
//! the credential checks in a fixed order (disabled before anything else,
//! so a disabled account never learns whether its password was right),
//! performs success bookkeeping, and audits every attempt.

use serde_json::json;

use crate::auth::account::UserAccount;
use crate::auth::password::{check_password, generate_password_hash};
use crate::auth::store;
use crate::auth::token::{create_private_token, create_public_token, decode_public_token};
use crate::core::app::AppState;
use crate::prelude::*;

/// Credential kinds accepted by [`sign_in`].
///
/// `PrivateToken` is used only by the bearer middleware rehydrating a
/// public token it already decoded.
#[derive(Debug)]
pub enum Credentials<'a> {
	PublicToken { token: &'a str },
	Email { email: &'a str, password: &'a str },
	Username { username: &'a str, password: &'a str },
	PrivateToken { token: &'a str },
}

impl Credentials<'_> {
	pub fn method(&self) -> &'static str {
		match self {
			Credentials::PublicToken { .. } => "token",
			Credentials::Email { .. } => "email",
			Credentials::Username { .. } => "account",
			Credentials::PrivateToken { .. } => "internal",
		}
	}
}

/// Sign in and return the refreshed account record.
///
/// Every attempt is appended to the audit log with the method, ip, and
/// outcome code. Credential failures never mutate the account record.
pub async fn sign_in(
	app: &AppState,
	credentials: Credentials<'_>,
	ip: &str,
) -> CnResult<UserAccount> {
	let method = credentials.method();
	match sign_in_inner(app, &credentials, ip).await {
		Ok(account) => {
			app.audit_adapter
				.event(
					"signin",
					json!({ "method": method, "uid": account.uid.as_ref(), "ip": ip }),
				)
				.await;
			Ok(account)
		}
		Err(err) => {
			app.audit_adapter
				.warning("signin", err.code(), json!({ "method": method, "ip": ip }))
				.await;
			Err(err)
		}
	}
}

async fn sign_in_inner(
	app: &AppState,
	credentials: &Credentials<'_>,
	ip: &str,
) -> CnResult<UserAccount> {
	// 1. Resolve a unique account via the credential's discriminant field
	let (mut account, password, token_uid) = match credentials {
		Credentials::PublicToken { token } => {
			let payload = decode_public_token(token, &app.server_salt)?;
			let account = resolve_unique(app, "access_token", &payload.token).await?;
			(account, None, Some(payload.uid))
		}
		Credentials::Email { email, password } => {
			(resolve_unique(app, "email", email).await?, Some(*password), None)
		}
		Credentials::Username { username, password } => {
			(resolve_unique(app, "username", username).await?, Some(*password), None)
		}
		Credentials::PrivateToken { token } => {
			(resolve_unique(app, "access_token", token).await?, None, None)
		}
	};

	// 2. Disabled accounts fail regardless of credential correctness
	if account.is_disabled {
		return Err(Error::unauthenticated("account_disabled", "account is disabled"));
	}

	// 3. A public token must embed the uid of the account it resolved
	if let Some(token_uid) = token_uid {
		if token_uid != account.uid {
			return Err(Error::unauthenticated("token_mismatch", "token does not match account"));
		}
	}

	// 4. Password check (salted, or legacy unsalted)
	if let Some(password) = password {
		let Some(stored_hash) = account.password.clone() else {
			return Err(Error::unauthenticated("wrong_password", "wrong password"));
		};
		if !check_password(password, account.password_salt.as_deref(), &stored_hash) {
			return Err(Error::unauthenticated("wrong_password", "wrong password"));
		}

		// Legacy hash verified: upgrade to the salted scheme now
		if account.password_salt.is_none() {
			let hashed = generate_password_hash(password);
			account.password = Some(hashed.hash);
			account.password_salt = Some(hashed.salt);
			info!("Upgraded legacy password hash for {}", account.uid);
		}
	}

	// 5. Success bookkeeping
	finalize_sign_in(app, &mut account, ip).await?;

	Ok(account)
}

/// Record the successful sign-in on the account, issue a private token if
/// none exists, persist, and populate the session cache.
async fn finalize_sign_in(app: &AppState, account: &mut UserAccount, ip: &str) -> CnResult<()> {
	account.prev_signin = account.last_signin;
	account.prev_signin_ip = account.last_signin_ip.take();
	account.last_signin = Some(Timestamp::now());
	account.last_signin_ip = Some(ip.into());
	if account.access_token.is_none() {
		account.access_token = Some(create_private_token());
		account.access_token_created = Some(Timestamp::now());
	}
	store::save_account(app.db_adapter.as_ref(), account).await?;
	app.session_cache.put(account.clone());
	Ok(())
}

/// Complete a sign-in for an account resolved outside the credential flow
/// (OAuth provider-mediated identities). Runs the disabled check, the
/// success bookkeeping, and the audit entry.
pub async fn sign_in_resolved(
	app: &AppState,
	mut account: UserAccount,
	ip: &str,
	method: &str,
) -> CnResult<UserAccount> {
	if account.is_disabled {
		app.audit_adapter
			.warning("signin", "account_disabled", json!({ "method": method, "ip": ip }))
			.await;
		return Err(Error::unauthenticated("account_disabled", "account is disabled"));
	}

	finalize_sign_in(app, &mut account, ip).await?;
	app.audit_adapter
		.event("signin", json!({ "method": method, "uid": account.uid.as_ref(), "ip": ip }))
		.await;
	Ok(account)
}

/// Resolve exactly one account with `field == value`.
///
/// More than one match means uniqueness enforcement failed at write time;
/// it is logged with the match count and fails the sign-in.
async fn resolve_unique(app: &AppState, field: &str, value: &str) -> CnResult<UserAccount> {
	let mut matches = store::find_accounts_by(app.db_adapter.as_ref(), field, value).await?;
	match matches.len() {
		0 => Err(Error::unauthenticated("not_found", "account not found")),
		1 => Ok(matches.remove(0)),
		count => {
			error!("{} accounts match {} lookup; uniqueness is broken", count, field);
			app.audit_adapter
				.error("signin", "duplicate", json!({ "field": field, "count": count }))
				.await;
			Err(Error::unauthenticated("duplicate", "multiple accounts matched"))
		}
	}
}

/// Issue a public access token for a signed-in account
pub fn issue_public_token(app: &AppState, account: &UserAccount, ip: &str) -> CnResult<Box<str>> {
	let private = account
		.access_token
		.as_deref()
		.ok_or_else(|| Error::Internal("account has no access token after sign-in".into()))?;
	create_public_token(&account.uid, ip, private, &app.server_salt)
}

// vim: ts=4

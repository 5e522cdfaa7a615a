//! User account record and validation rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

use crate::prelude::*;

/// Reserved uid with unconditional access; cannot be deleted
pub const ADMIN_UID: &str = "admin";

/// Upper bound on the number of entries in an account's settings map
pub const MAX_SETTINGS: usize = 100;

/// Account record as persisted under the auth namespace
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
	pub uid: Box<str>,
	pub username: Option<Box<str>>,
	pub email: Option<Box<str>>,
	/// Hex SHA-512 of salt + password; absent for OAuth-only accounts
	pub password: Option<Box<str>>,
	/// Absent on legacy accounts until their first successful sign-in
	pub password_salt: Option<Box<str>>,
	/// Server-internal bearer secret; embedded into public tokens
	pub access_token: Option<Box<str>>,
	pub access_token_created: Option<Timestamp>,
	pub display_name: Box<str>,
	pub picture: Option<Box<str>>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub settings: BTreeMap<String, Value>,
	#[serde(default)]
	pub is_disabled: bool,
	#[serde(default)]
	pub email_verified: bool,
	/// Single-use code for the pending password reset, if any
	pub password_reset_code: Option<Box<str>>,
	pub created: Timestamp,
	pub created_ip: Option<Box<str>>,
	pub last_signin: Option<Timestamp>,
	pub last_signin_ip: Option<Box<str>>,
	pub prev_signin: Option<Timestamp>,
	pub prev_signin_ip: Option<Box<str>>,
}

impl UserAccount {
	pub fn is_admin(&self) -> bool {
		self.uid.as_ref() == ADMIN_UID
	}

	pub fn auth_ctx(&self) -> AuthCtx {
		AuthCtx {
			uid: self.uid.clone(),
			username: self.username.clone(),
			email: self.email.clone(),
		}
	}

	/// Account view safe to hand to the account owner (no secrets)
	pub fn public_profile(&self) -> PublicProfile {
		PublicProfile {
			uid: self.uid.clone(),
			username: self.username.clone(),
			email: self.email.clone(),
			display_name: self.display_name.clone(),
			picture: self.picture.clone(),
			email_verified: self.email_verified,
			settings: self.settings.clone(),
			created: self.created,
			last_signin: self.last_signin,
			prev_signin: self.prev_signin,
		}
	}
}

/// Identity attached to a request or connection after authentication
#[derive(Debug, Clone)]
pub struct AuthCtx {
	pub uid: Box<str>,
	pub username: Option<Box<str>>,
	pub email: Option<Box<str>>,
}

impl AuthCtx {
	pub fn is_admin(&self) -> bool {
		self.uid.as_ref() == ADMIN_UID
	}
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
	pub uid: Box<str>,
	pub username: Option<Box<str>>,
	pub email: Option<Box<str>>,
	pub display_name: Box<str>,
	pub picture: Option<Box<str>>,
	pub email_verified: bool,
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub settings: BTreeMap<String, Value>,
	pub created: Timestamp,
	pub last_signin: Option<Timestamp>,
	pub prev_signin: Option<Timestamp>,
}

// Validation //
//************//

pub fn validate_username(username: &str) -> CnResult<()> {
	if username.len() < 4 {
		return Err(Error::ValidationError("username must be at least 4 characters".into()));
	}
	if username == ADMIN_UID {
		return Err(Error::ValidationError("username not available".into()));
	}
	if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
		return Err(Error::ValidationError(
			"username may only contain letters, digits, '_', '-' and '.'".into(),
		));
	}
	Ok(())
}

pub fn validate_email(email: &str) -> CnResult<()> {
	let valid = match email.split_once('@') {
		Some((local, domain)) => {
			!local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
		}
		None => false,
	};
	if valid { Ok(()) } else { Err(Error::ValidationError("invalid email address".into())) }
}

pub fn validate_password(password: &str) -> CnResult<()> {
	if password.len() < 8 {
		return Err(Error::ValidationError("password must be at least 8 characters".into()));
	}
	if password.chars().any(char::is_control) {
		return Err(Error::ValidationError("password contains invalid characters".into()));
	}
	Ok(())
}

pub fn validate_display_name(name: &str) -> CnResult<()> {
	if name.trim().is_empty() {
		return Err(Error::ValidationError("display name cannot be empty".into()));
	}
	if name.len() > 100 {
		return Err(Error::ValidationError("display name too long".into()));
	}
	Ok(())
}

/// Settings hold a bounded number of scalar values only
pub fn validate_settings(settings: &BTreeMap<String, Value>) -> CnResult<()> {
	if settings.len() > MAX_SETTINGS {
		return Err(Error::ValidationError(format!(
			"too many settings (max {})",
			MAX_SETTINGS
		)));
	}
	for (key, value) in settings {
		if !matches!(value, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)) {
			return Err(Error::ValidationError(format!(
				"setting '{}' must be a scalar value",
				key
			)));
		}
	}
	Ok(())
}


// vim: ts=4

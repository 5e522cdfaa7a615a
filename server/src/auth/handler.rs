//! Account management HTTP surface under `/auth/{db}`.

use axum::{
	Json,
	extract::{ConnectInfo, Path, State},
	http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::auth::account::{
	PublicProfile, UserAccount, validate_display_name, validate_email, validate_password,
	validate_settings, validate_username,
};
use crate::auth::password::{check_password, generate_password_hash};
use crate::auth::signin::{Credentials, issue_public_token, sign_in};
use crate::auth::store;
use crate::auth::token::{create_signed_code, parse_signed_code};
use crate::core::{Auth, OptionalAuth};
use crate::prelude::*;
use canopy_types::utils::random_id;

/// Validity of password-reset and email-verification codes
const SIGNED_CODE_TTL_SECS: i64 = 24 * 3600;

/// Purpose marker distinguishing verification codes from reset codes
const VERIFY_EMAIL_CODE: &str = "verify_email";

pub fn check_db(app: &App, db: &str) -> CnResult<()> {
	if db == app.opts.db_name.as_ref() { Ok(()) } else { Err(Error::NotFound) }
}

// # POST /auth/{db}/signin //
//**************************//
#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SignInReq {
	Token { access_token: Box<str> },
	Email { email: Box<str>, password: Box<str> },
	Account { username: Box<str>, password: Box<str> },
}

#[skip_serializing_none]
#[derive(Serialize)]
pub struct SignInRes {
	pub access_token: Box<str>,
	pub user: PublicProfile,
}

pub async fn post_signin(
	State(app): State<App>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Path(db): Path<String>,
	Json(req): Json<SignInReq>,
) -> CnResult<(StatusCode, Json<SignInRes>)> {
	check_db(&app, &db)?;
	let ip = addr.ip().to_string();

	let credentials = match &req {
		SignInReq::Token { access_token } => Credentials::PublicToken { token: access_token },
		SignInReq::Email { email, password } => Credentials::Email { email, password },
		SignInReq::Account { username, password } => Credentials::Username { username, password },
	};
	let account = sign_in(&app, credentials, &ip).await?;
	let access_token = issue_public_token(&app, &account, &ip)?;

	Ok((StatusCode::OK, Json(SignInRes { access_token, user: account.public_profile() })))
}

// # POST /auth/{db}/signup //
//**************************//
#[derive(Debug, Deserialize)]
pub struct SignUpReq {
	pub username: Option<Box<str>>,
	pub email: Option<Box<str>>,
	pub password: Box<str>,
	pub display_name: Box<str>,
}

pub async fn post_signup(
	State(app): State<App>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Path(db): Path<String>,
	Json(req): Json<SignUpReq>,
) -> CnResult<(StatusCode, Json<SignInRes>)> {
	check_db(&app, &db)?;
	if !app.opts.registration_enabled {
		return Err(Error::access_denied("registration_disabled", "registration is disabled"));
	}
	let ip = addr.ip().to_string();

	if req.username.is_none() && req.email.is_none() {
		return Err(Error::ValidationError("a username or email address is required".into()));
	}
	if let Some(username) = &req.username {
		validate_username(username)?;
	}
	if let Some(email) = &req.email {
		validate_email(email)?;
	}
	validate_password(&req.password)?;
	validate_display_name(&req.display_name)?;

	let hashed = generate_password_hash(&req.password);
	let account = UserAccount {
		uid: random_id().into(),
		username: req.username.clone(),
		email: req.email.clone(),
		password: Some(hashed.hash),
		password_salt: Some(hashed.salt),
		access_token: None,
		access_token_created: None,
		display_name: req.display_name.clone(),
		picture: None,
		settings: BTreeMap::new(),
		is_disabled: false,
		email_verified: false,
		password_reset_code: None,
		created: Timestamp::now(),
		created_ip: Some(ip.clone().into()),
		last_signin: None,
		last_signin_ip: None,
		prev_signin: None,
		prev_signin_ip: None,
	};
	store::create_account(app.db_adapter.as_ref(), &account).await?;
	app.audit_adapter
		.event("signup", json!({ "uid": account.uid.as_ref(), "ip": ip }))
		.await;

	// Verification-code delivery is the email collaborator's job; it picks
	// the signed code up from the audit stream
	if let Some(email) = &req.email {
		let code = create_signed_code(
			&account.uid,
			VERIFY_EMAIL_CODE,
			SIGNED_CODE_TTL_SECS,
			&app.server_salt,
		)?;
		app.audit_adapter
			.event(
				"verify_email_request",
				json!({ "uid": account.uid.as_ref(), "email": email.as_ref(), "code": code.as_ref() }),
			)
			.await;
	}

	// Run the regular sign-in for token issuance and bookkeeping
	let credentials = match (&req.username, &req.email) {
		(Some(username), _) => Credentials::Username { username, password: &req.password },
		(None, Some(email)) => Credentials::Email { email, password: &req.password },
		(None, None) => unreachable!("validated above"),
	};
	let account = sign_in(&app, credentials, &ip).await?;
	let access_token = issue_public_token(&app, &account, &ip)?;

	Ok((StatusCode::CREATED, Json(SignInRes { access_token, user: account.public_profile() })))
}

// # POST /auth/{db}/signout //
//***************************//
#[derive(Debug, Default, Deserialize)]
pub struct SignOutReq {
	/// Also rotate the private token, killing all outstanding public tokens
	#[serde(default)]
	pub everywhere: bool,
}

pub async fn post_signout(
	State(app): State<App>,
	Path(db): Path<String>,
	Auth(user): Auth,
	body: Option<Json<SignOutReq>>,
) -> CnResult<(StatusCode, Json<Value>)> {
	check_db(&app, &db)?;
	let everywhere = body.map(|Json(req)| req.everywhere).unwrap_or_default();

	if everywhere {
		let mut account = user.clone();
		account.access_token = None;
		account.access_token_created = None;
		store::save_account(app.db_adapter.as_ref(), &account).await?;
	}
	app.session_cache.remove(&user.uid);
	app.audit_adapter
		.event("signout", json!({ "uid": user.uid.as_ref(), "everywhere": everywhere }))
		.await;

	Ok((StatusCode::OK, Json(json!({}))))
}

// # POST /auth/{db}/change_password //
//***********************************//
#[derive(Debug, Deserialize)]
pub struct ChangePasswordReq {
	pub password: Box<str>,
	pub new_password: Box<str>,
}

pub async fn post_change_password(
	State(app): State<App>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Path(db): Path<String>,
	Auth(user): Auth,
	Json(req): Json<ChangePasswordReq>,
) -> CnResult<(StatusCode, Json<SignInRes>)> {
	check_db(&app, &db)?;
	validate_password(&req.new_password)?;
	if req.new_password == req.password {
		return Err(Error::ValidationError(
			"new password must be different from the current password".into(),
		));
	}

	let mut account = store::get_account(app.db_adapter.as_ref(), &user.uid)
		.await?
		.ok_or(Error::NotFound)?;
	let verified = account
		.password
		.as_deref()
		.is_some_and(|hash| check_password(&req.password, account.password_salt.as_deref(), hash));
	if !verified {
		return Err(Error::unauthenticated("wrong_password", "wrong password"));
	}

	let hashed = generate_password_hash(&req.new_password);
	account.password = Some(hashed.hash);
	account.password_salt = Some(hashed.salt);
	store::save_account(app.db_adapter.as_ref(), &account).await?;
	app.session_cache.put(account.clone());
	app.audit_adapter
		.event("change_password", json!({ "uid": account.uid.as_ref() }))
		.await;

	let ip = addr.ip().to_string();
	let access_token = issue_public_token(&app, &account, &ip)?;
	Ok((StatusCode::OK, Json(SignInRes { access_token, user: account.public_profile() })))
}

// # POST /auth/{db}/update //
//**************************//
#[derive(Debug, Deserialize)]
pub struct UpdateReq {
	/// Admins may target another account
	pub uid: Option<Box<str>>,
	pub display_name: Option<Box<str>>,
	pub picture: Option<Box<str>>,
	pub settings: Option<BTreeMap<String, Value>>,
}

#[derive(Serialize)]
pub struct UserRes {
	pub user: PublicProfile,
}

pub async fn post_update(
	State(app): State<App>,
	Path(db): Path<String>,
	Auth(user): Auth,
	Json(req): Json<UpdateReq>,
) -> CnResult<(StatusCode, Json<UserRes>)> {
	check_db(&app, &db)?;

	let target_uid = req.uid.as_deref().unwrap_or(&user.uid);
	if target_uid != user.uid.as_ref() && !user.is_admin() {
		return Err(Error::access_denied("not_allowed", "cannot update another user's account"));
	}

	let mut account = store::get_account(app.db_adapter.as_ref(), target_uid)
		.await?
		.ok_or(Error::NotFound)?;

	if let Some(display_name) = req.display_name {
		validate_display_name(&display_name)?;
		account.display_name = display_name;
	}
	if let Some(picture) = req.picture {
		account.picture = Some(picture);
	}
	if let Some(settings) = req.settings {
		validate_settings(&settings)?;
		account.settings = settings;
	}

	store::save_account(app.db_adapter.as_ref(), &account).await?;
	if app.session_cache.get(target_uid).is_some() {
		app.session_cache.put(account.clone());
	}

	Ok((StatusCode::OK, Json(UserRes { user: account.public_profile() })))
}

// # POST /auth/{db}/delete //
//**************************//
#[derive(Debug, Default, Deserialize)]
pub struct DeleteReq {
	pub uid: Option<Box<str>>,
}

pub async fn post_delete(
	State(app): State<App>,
	Path(db): Path<String>,
	Auth(user): Auth,
	body: Option<Json<DeleteReq>>,
) -> CnResult<(StatusCode, Json<Value>)> {
	check_db(&app, &db)?;
	let req = body.map(|Json(req)| req).unwrap_or_default();

	let target_uid = req.uid.as_deref().unwrap_or(&user.uid).to_string();
	if target_uid != user.uid.as_ref() && !user.is_admin() {
		return Err(Error::access_denied("not_allowed", "cannot delete another user's account"));
	}

	store::delete_account(app.db_adapter.as_ref(), &target_uid).await?;
	app.session_cache.remove(&target_uid);
	app.audit_adapter
		.event("delete_account", json!({ "uid": target_uid, "by": user.uid.as_ref() }))
		.await;

	Ok((StatusCode::OK, Json(json!({}))))
}

// # POST /auth/{db}/reset_password //
//**********************************//
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ResetPasswordReq {
	Execute { code: Box<str>, password: Box<str> },
	Request { email: Box<str> },
}

pub async fn post_reset_password(
	State(app): State<App>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Path(db): Path<String>,
	Json(req): Json<ResetPasswordReq>,
) -> CnResult<(StatusCode, Json<Value>)> {
	check_db(&app, &db)?;
	let ip = addr.ip().to_string();

	match req {
		ResetPasswordReq::Request { email } => {
			let mut matches =
				store::find_accounts_by(app.db_adapter.as_ref(), "email", &email).await?;
			if matches.len() == 1 {
				let mut account = matches.remove(0);
				let code = random_id();
				account.password_reset_code = Some(code.clone().into());
				store::save_account(app.db_adapter.as_ref(), &account).await?;

				// Delivery is the email collaborator's job; the signed code
				// reaches it through the audit stream
				let signed =
					create_signed_code(&account.uid, &code, SIGNED_CODE_TTL_SECS, &app.server_salt)?;
				app.audit_adapter
					.event(
						"reset_password_request",
						json!({ "uid": account.uid.as_ref(), "email": email.as_ref(), "code": signed.as_ref(), "ip": ip }),
					)
					.await;
			} else {
				// Same response either way; existence is not leaked
				app.audit_adapter
					.warning(
						"reset_password_request",
						"not_found",
						json!({ "email": email.as_ref(), "ip": ip }),
					)
					.await;
			}
			Ok((StatusCode::OK, Json(json!({}))))
		}
		ResetPasswordReq::Execute { code, password } => {
			validate_password(&password)?;
			let signed = parse_signed_code(&code, &app.server_salt)?;
			let mut account = store::get_account(app.db_adapter.as_ref(), &signed.uid)
				.await?
				.ok_or(Error::Gone)?;

			// Single use: the stored code is cleared on success
			if account.password_reset_code.as_deref() != Some(signed.code.as_ref()) {
				return Err(Error::Gone);
			}

			let hashed = generate_password_hash(&password);
			account.password = Some(hashed.hash);
			account.password_salt = Some(hashed.salt);
			account.password_reset_code = None;
			// Outstanding public tokens die with the private token
			account.access_token = None;
			account.access_token_created = None;
			store::save_account(app.db_adapter.as_ref(), &account).await?;
			app.session_cache.remove(&account.uid);
			app.audit_adapter
				.event("reset_password", json!({ "uid": account.uid.as_ref(), "ip": ip }))
				.await;

			Ok((StatusCode::OK, Json(json!({}))))
		}
	}
}

// # POST /auth/{db}/verify_email //
//********************************//
#[derive(Debug, Deserialize)]
pub struct VerifyEmailReq {
	pub code: Box<str>,
}

pub async fn post_verify_email(
	State(app): State<App>,
	Path(db): Path<String>,
	Json(req): Json<VerifyEmailReq>,
) -> CnResult<(StatusCode, Json<Value>)> {
	check_db(&app, &db)?;

	let signed = parse_signed_code(&req.code, &app.server_salt)?;
	if signed.code.as_ref() != VERIFY_EMAIL_CODE {
		return Err(Error::unauthenticated("invalid_token", "invalid verification code"));
	}
	let mut account = store::get_account(app.db_adapter.as_ref(), &signed.uid)
		.await?
		.ok_or(Error::Gone)?;
	account.email_verified = true;
	store::save_account(app.db_adapter.as_ref(), &account).await?;
	if app.session_cache.get(&account.uid).is_some() {
		app.session_cache.put(account.clone());
	}
	app.audit_adapter
		.event("verify_email", json!({ "uid": account.uid.as_ref() }))
		.await;

	Ok((StatusCode::OK, Json(json!({}))))
}

// # GET /auth/{db}/state //
//************************//
#[skip_serializing_none]
#[derive(Serialize)]
pub struct StateRes {
	pub signed_in: bool,
	pub user: Option<PublicProfile>,
}

pub async fn get_state(
	State(app): State<App>,
	Path(db): Path<String>,
	OptionalAuth(user): OptionalAuth,
) -> CnResult<(StatusCode, Json<StateRes>)> {
	check_db(&app, &db)?;
	let res = StateRes {
		signed_in: user.is_some(),
		user: user.map(|account| account.public_profile()),
	};
	Ok((StatusCode::OK, Json(res)))
}

// vim: ts=4

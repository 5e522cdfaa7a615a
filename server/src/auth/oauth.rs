//! OAuth provider-mediated sign-in.
//!
//! Thin endpoints over the [`OAuthProvider`] boundary: `init` hands back
//! the provider's authorization URL, `signin` exchanges the callback code,
//! fetches the profile, and finds-or-creates the local account keyed by the
//! provider-verified email address.

use axum::{
	Json,
	extract::{ConnectInfo, Path, Query, State},
	http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::account::UserAccount;
use crate::auth::handler::{SignInRes, check_db};
use crate::auth::signin::{issue_public_token, sign_in_resolved};
use crate::auth::store;
use crate::prelude::*;
use canopy_types::oauth_adapter::OAuthProvider;
use canopy_types::utils::random_id;

fn lookup_provider(app: &App, name: &str) -> CnResult<Arc<dyn OAuthProvider>> {
	app.oauth_providers.get(name).cloned().ok_or(Error::NotFound)
}

// # GET /auth/{db}/oauth/{provider}/init //
//****************************************//
#[derive(Debug, Deserialize)]
pub struct OAuthInitQuery {
	pub redirect_url: Box<str>,
}

pub async fn get_oauth_init(
	State(app): State<App>,
	Path((db, provider)): Path<(String, String)>,
	Query(query): Query<OAuthInitQuery>,
) -> CnResult<(StatusCode, Json<serde_json::Value>)> {
	check_db(&app, &db)?;
	let provider = lookup_provider(&app, &provider)?;

	let state = random_id();
	let auth_url = provider.init(&query.redirect_url, &state).await?;
	Ok((StatusCode::OK, Json(json!({ "auth_url": auth_url.as_ref() }))))
}

// # GET /auth/{db}/oauth/{provider}/signin //
//******************************************//
#[derive(Debug, Deserialize)]
pub struct OAuthSignInQuery {
	pub code: Box<str>,
}

pub async fn get_oauth_signin(
	State(app): State<App>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Path((db, provider_name)): Path<(String, String)>,
	Query(query): Query<OAuthSignInQuery>,
) -> CnResult<(StatusCode, Json<SignInRes>)> {
	check_db(&app, &db)?;
	let provider = lookup_provider(&app, &provider_name)?;
	let ip = addr.ip().to_string();

	let provider_token = provider.get_access_token(&query.code).await?;
	let info = provider.get_user_info(&provider_token).await?;
	let Some(email) = info.email.clone() else {
		return Err(Error::ValidationError("provider did not return an email address".into()));
	};

	let mut matches = store::find_accounts_by(app.db_adapter.as_ref(), "email", &email).await?;
	let account = match matches.len() {
		1 => matches.remove(0),
		0 => {
			if !app.opts.registration_enabled {
				return Err(Error::access_denied(
					"registration_disabled",
					"registration is disabled",
				));
			}
			let account = UserAccount {
				uid: random_id().into(),
				username: None,
				email: Some(email.clone()),
				password: None,
				password_salt: None,
				access_token: None,
				access_token_created: None,
				display_name: info.name.clone().unwrap_or_else(|| email.clone()),
				picture: info.picture.clone(),
				settings: BTreeMap::new(),
				is_disabled: false,
				email_verified: info.email_verified,
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
				.event(
					"signup",
					json!({ "uid": account.uid.as_ref(), "provider": provider_name, "ip": ip }),
				)
				.await;
			account
		}
		count => {
			error!("{} accounts match email lookup; uniqueness is broken", count);
			return Err(Error::unauthenticated("duplicate", "multiple accounts matched"));
		}
	};

	let method = format!("oauth:{}", provider_name);
	let account = sign_in_resolved(&app, account, &ip, &method).await?;
	let access_token = issue_public_token(&app, &account, &ip)?;

	Ok((StatusCode::OK, Json(SignInRes { access_token, user: account.public_profile() })))
}

// vim: ts=4

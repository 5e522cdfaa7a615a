//! Custom middlewares

use axum::{
	body::Body,
	extract::{ConnectInfo, State},
	http::{Request, header, response::Response},
	middleware::Next,
};
use std::net::SocketAddr;

use crate::auth::account::UserAccount;
use crate::auth::signin::{Credentials, sign_in};
use crate::auth::token::decode_public_token;
use crate::core::Auth;
use crate::prelude::*;

/// Path prefixes allowed to carry the bearer token as a query parameter
/// (contexts where setting headers is impractical, e.g. file downloads)
const QUERY_TOKEN_PREFIXES: [&str; 2] = ["/export/", "/logs/"];

const QUERY_TOKEN_PARAM: &str = "auth_token";

/// Extract a bearer token from the Authorization header, or from the
/// `auth_token` query parameter on allow-listed paths.
fn bearer_token(req: &Request<Body>) -> Option<String> {
	if let Some(header) = req.headers().get(header::AUTHORIZATION).and_then(|h| h.to_str().ok()) {
		if let Some(token) = header.strip_prefix("Bearer ") {
			return Some(token.trim().to_string());
		}
	}

	let path = req.uri().path();
	if QUERY_TOKEN_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
		if let Some(query) = req.uri().query() {
			for pair in query.split('&') {
				if let Some(token) = pair.strip_prefix(QUERY_TOKEN_PARAM) {
					if let Some(token) = token.strip_prefix('=') {
						if !token.is_empty() {
							return Some(token.to_string());
						}
					}
				}
			}
		}
	}

	None
}

fn client_ip(req: &Request<Body>) -> String {
	req.extensions()
		.get::<ConnectInfo<SocketAddr>>()
		.map(|info| info.0.ip().to_string())
		.unwrap_or_else(|| "0.0.0.0".to_string())
}

/// Authenticate a bearer token: decode without I/O, then resolve the
/// account through the session cache, falling back to a full internal
/// sign-in on a cache miss.
async fn authenticate(app: &App, token: &str, ip: &str) -> CnResult<UserAccount> {
	let payload = decode_public_token(token, &app.server_salt)?;

	let account = match app.session_cache.get(&payload.uid) {
		Some(account) => account,
		None => sign_in(app, Credentials::PrivateToken { token: &payload.token }, ip).await?,
	};

	// The token may verify while the account has since been disabled
	if account.is_disabled {
		return Err(Error::unauthenticated("account_disabled", "account is disabled"));
	}
	Ok(account)
}

/// Attach the identity when a bearer token is present. A present but
/// invalid token fails the request; an absent one passes through
/// anonymously.
pub async fn optional_auth(
	State(app): State<App>,
	mut req: Request<Body>,
	next: Next,
) -> CnResult<Response<Body>> {
	if app.opts.auth_enabled {
		if let Some(token) = bearer_token(&req) {
			let ip = client_ip(&req);
			let account = authenticate(&app, &token, &ip).await?;
			req.extensions_mut().insert(Auth(account));
		}
	}

	Ok(next.run(req).await)
}

/// Like [`optional_auth`], but rejects anonymous requests
pub async fn require_auth(
	State(app): State<App>,
	mut req: Request<Body>,
	next: Next,
) -> CnResult<Response<Body>> {
	if app.opts.auth_enabled {
		let token = bearer_token(&req)
			.ok_or_else(|| Error::unauthenticated("not_authenticated", "not signed in"))?;
		let ip = client_ip(&req);
		let account = authenticate(&app, &token, &ip).await?;
		req.extensions_mut().insert(Auth(account));
	}

	Ok(next.run(req).await)
}


// vim: ts=4

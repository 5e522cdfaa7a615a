use axum::{extract::FromRequestParts, http::request::Parts};

use crate::auth::account::UserAccount;
use crate::prelude::*;

// Extractors //
//************//

// Auth //
//******//
#[derive(Debug, Clone)]
pub struct Auth(pub UserAccount);

impl<S> FromRequestParts<S> for Auth
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		if let Some(auth) = parts.extensions.get::<Auth>().cloned() {
			Ok(auth)
		} else {
			Err(Error::unauthenticated("not_authenticated", "not signed in"))
		}
	}
}

// OptionalAuth //
//**************//
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<UserAccount>);

impl<S> FromRequestParts<S> for OptionalAuth
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		Ok(OptionalAuth(parts.extensions.get::<Auth>().map(|auth| auth.0.clone())))
	}
}

// vim: ts=4

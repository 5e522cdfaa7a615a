//! Bulk export endpoint.
//!
//! Returns the subtree at a path as JSON. Reached with the bearer token in
//! a query parameter as well as the header, for download contexts that
//! cannot set headers.

use axum::{
	Json,
	extract::{Path, State},
	http::StatusCode,
};
use serde_json::Value;

use crate::auth::account::UserAccount;
use crate::core::OptionalAuth;
use crate::prelude::*;

pub async fn get_export(
	State(app): State<App>,
	Path((db, path)): Path<(String, String)>,
	OptionalAuth(user): OptionalAuth,
) -> CnResult<(StatusCode, Json<Value>)> {
	if db != app.opts.db_name.as_ref() {
		return Err(Error::NotFound);
	}

	let auth = user.as_ref().map(UserAccount::auth_ctx);
	let access = app.rules.user_has_access(auth.as_ref(), &path, false);
	if !access.allow {
		return Err(access.into_error());
	}

	let value = app.db_adapter.get(&path).await?;
	Ok((StatusCode::OK, Json(value.unwrap_or(Value::Null))))
}

// vim: ts=4

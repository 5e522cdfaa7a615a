//! OAuth provider adapter boundary.
//!
//! Third-party providers are a pluggable capability: the gateway only
//! needs the three-step dance below. Provider bodies (HTTP clients, scope
//! handling, refresh) live in adapter crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;

use crate::prelude::*;

/// Profile information returned by a provider after authentication
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthUserInfo {
	/// Provider-scoped stable user id
	pub id: Box<str>,
	pub email: Option<Box<str>>,
	#[serde(default)]
	pub email_verified: bool,
	pub name: Option<Box<str>>,
	pub picture: Option<Box<str>>,
}

#[async_trait]
pub trait OAuthProvider: Debug + Send + Sync {
	/// Provider name used in routes (`google`, `github`, …)
	fn name(&self) -> &str;

	/// Start the flow; returns the provider URL to redirect the user to
	async fn init(&self, redirect_url: &str, state: &str) -> CnResult<Box<str>>;

	/// Exchange the callback code for an access token
	async fn get_access_token(&self, code: &str) -> CnResult<Box<str>>;

	/// Fetch the user's profile with the access token
	async fn get_user_info(&self, access_token: &str) -> CnResult<OAuthUserInfo>;
}

// vim: ts=4

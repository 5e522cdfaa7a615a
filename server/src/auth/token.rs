//! Token codec.
//!
//! Two token families, both keyed by the process-wide server salt:
//!
//! - **Public access tokens** handed to clients. A public token embeds
//!   `{uid, private token, ip, created}` as base64url JSON followed by an
//!   HMAC-SHA256 signature. The server can decode and verify one without
//!   any I/O; whether the embedded private token still matches the stored
//!   one is confirmed by the sign-in flow.
//! - **Signed one-time codes** (password reset, email verification):
//!   HS256 JWTs with `{uid, code, exp}` claims. Any mutation of the
//!   payload fails parsing; expiry surfaces distinctly from tampering.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::prelude::*;
use canopy_types::utils::random_secret;

type HmacSha256 = Hmac<Sha256>;

const PRIVATE_TOKEN_BYTES: usize = 32;

/// Generate a fresh private access token (server-side bearer secret)
pub fn create_private_token() -> Box<str> {
	random_secret(PRIVATE_TOKEN_BYTES).into()
}

/// Payload recovered from a public access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicTokenPayload {
	pub uid: Box<str>,
	/// Private-token equivalent; must match the stored one to be valid
	pub token: Box<str>,
	/// IP the token was issued to
	pub ip: Box<str>,
	/// Issue time, epoch millis
	pub created: i64,
}

fn invalid_token() -> Error {
	Error::unauthenticated("invalid_token", "invalid access token")
}

fn hmac_sign(salt: &str, data: &[u8]) -> CnResult<Vec<u8>> {
	let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
		.map_err(|_| Error::Internal("invalid hmac key length".into()))?;
	mac.update(data);
	Ok(mac.finalize().into_bytes().to_vec())
}

/// Combine uid, client IP and the private token into an opaque signed string
pub fn create_public_token(
	uid: &str,
	ip: &str,
	private_token: &str,
	salt: &str,
) -> CnResult<Box<str>> {
	let payload = PublicTokenPayload {
		uid: uid.into(),
		token: private_token.into(),
		ip: ip.into(),
		created: Timestamp::now().0,
	};
	let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);
	let sig = URL_SAFE_NO_PAD.encode(hmac_sign(salt, body.as_bytes())?);
	Ok(format!("{}.{}", body, sig).into())
}

/// Decode and verify a public access token. Performs no I/O.
pub fn decode_public_token(token: &str, salt: &str) -> CnResult<PublicTokenPayload> {
	let (body, sig) = token.split_once('.').ok_or_else(invalid_token)?;
	let sig = URL_SAFE_NO_PAD.decode(sig.as_bytes()).map_err(|_| invalid_token())?;

	let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
		.map_err(|_| Error::Internal("invalid hmac key length".into()))?;
	mac.update(body.as_bytes());
	mac.verify_slice(&sig).map_err(|_| invalid_token())?;

	let payload = URL_SAFE_NO_PAD.decode(body.as_bytes()).map_err(|_| invalid_token())?;
	serde_json::from_slice(&payload).map_err(|_| invalid_token())
}

/// Claims of a signed one-time code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedCode {
	pub uid: Box<str>,
	pub code: Box<str>,
	/// Expiry, epoch seconds (JWT convention)
	pub exp: i64,
}

/// Sign a `{uid, code}` pair valid for `ttl_secs` seconds
pub fn create_signed_code(uid: &str, code: &str, ttl_secs: i64, salt: &str) -> CnResult<Box<str>> {
	let claims = SignedCode {
		uid: uid.into(),
		code: code.into(),
		exp: Timestamp::now().0 / 1000 + ttl_secs,
	};
	let token = jsonwebtoken::encode(
		&Header::new(Algorithm::HS256),
		&claims,
		&EncodingKey::from_secret(salt.as_bytes()),
	)
	.map_err(|_| Error::Internal("failed to sign code".into()))?;
	Ok(token.into())
}

/// Parse a signed one-time code; tampering fails with `invalid_token`,
/// expiry with [`Error::Gone`]
pub fn parse_signed_code(token: &str, salt: &str) -> CnResult<SignedCode> {
	let decoded = jsonwebtoken::decode::<SignedCode>(
		token,
		&DecodingKey::from_secret(salt.as_bytes()),
		&Validation::new(Algorithm::HS256),
	);
	match decoded {
		Ok(data) => Ok(data.claims),
		Err(err) => match err.kind() {
			jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(Error::Gone),
			_ => Err(invalid_token()),
		},
	}
}


// vim: ts=4

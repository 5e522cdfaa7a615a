//! Password hashing.
//!
//! Current scheme: hex SHA-512 over salt + password with a random
//! per-account salt. Legacy accounts carry an unsalted hex SHA-512 hash;
//! those verify until the first successful sign-in, which re-hashes with a
//! fresh salt and persists the upgrade (one-way migration).

use sha2::{Digest, Sha512};

use canopy_types::utils::random_secret;

const SALT_BYTES: usize = 16;

#[derive(Debug, Clone)]
pub struct PasswordHash {
	pub hash: Box<str>,
	pub salt: Box<str>,
}

fn to_hex(bytes: &[u8]) -> String {
	let mut out = String::with_capacity(bytes.len() * 2);
	for byte in bytes {
		out.push_str(&format!("{:02x}", byte));
	}
	out
}

fn sha512_hex(input: &str) -> String {
	let mut hasher = Sha512::new();
	hasher.update(input.as_bytes());
	to_hex(&hasher.finalize())
}

/// Hash a password with a fresh random salt
pub fn generate_password_hash(password: &str) -> PasswordHash {
	let salt = random_secret(SALT_BYTES);
	let hash = sha512_hex(&format!("{}{}", salt, password));
	PasswordHash { hash: hash.into(), salt: salt.into() }
}

/// Verify a password against a stored hash.
///
/// `salt = None` selects the legacy unsalted scheme.
pub fn check_password(password: &str, salt: Option<&str>, expected_hash: &str) -> bool {
	let computed = match salt {
		Some(salt) => sha512_hex(&format!("{}{}", salt, password)),
		None => sha512_hex(password),
	};
	computed == expected_hash
}

/// Hash in the legacy unsalted scheme (used to seed legacy-upgrade tests)
pub fn legacy_password_hash(password: &str) -> Box<str> {
	sha512_hex(password).into()
}


// vim: ts=4

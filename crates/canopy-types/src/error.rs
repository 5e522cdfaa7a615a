//! Error type shared by the server and all adapters.

pub type CnResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	NotFound,
	/// A one-time code that used to be valid (expired reset/verify codes)
	Gone,
	/// Unique-field collision on signup/update (username, email)
	Conflict(String),
	/// Authentication failure; `code` is one of the sign-in failure codes
	Unauthenticated { code: Box<str>, message: Box<str> },
	/// Authorization failure; `code` is one of the rule-denial codes
	AccessDenied { code: Box<str>, message: Box<str> },
	ValidationError(String),
	ConfigError(String),
	DbError,
	Timeout,
	Parse,
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl Error {
	pub fn unauthenticated(code: &str, message: impl Into<Box<str>>) -> Self {
		Self::Unauthenticated { code: Box::from(code), message: message.into() }
	}

	pub fn access_denied(code: &str, message: impl Into<Box<str>>) -> Self {
		Self::AccessDenied { code: Box::from(code), message: message.into() }
	}

	/// Stable error code included in JSON error responses
	pub fn code(&self) -> &str {
		match self {
			Error::NotFound => "not_found",
			Error::Gone => "expired",
			Error::Conflict(_) => "conflict",
			Error::Unauthenticated { code, .. } => code,
			Error::AccessDenied { code, .. } => code,
			Error::ValidationError(_) => "invalid_request",
			Error::ConfigError(_) => "config",
			Error::DbError => "storage",
			Error::Timeout => "timeout",
			Error::Parse => "parse",
			Error::Internal(_) | Error::Io(_) => "unexpected",
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(_err: serde_json::Error) -> Self {
		Self::Parse
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::NotFound => write!(f, "not found"),
			Error::Gone => write!(f, "expired"),
			Error::Conflict(msg) => write!(f, "conflict: {}", msg),
			Error::Unauthenticated { code, message } => {
				write!(f, "not authenticated ({}): {}", code, message)
			}
			Error::AccessDenied { code, message } => {
				write!(f, "access denied ({}): {}", code, message)
			}
			Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
			Error::ConfigError(msg) => write!(f, "config error: {}", msg),
			Error::DbError => write!(f, "storage error"),
			Error::Timeout => write!(f, "timed out"),
			Error::Parse => write!(f, "parse error"),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

#[cfg(feature = "server")]
impl axum::response::IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		use axum::{Json, http::StatusCode};

		let status = match &self {
			Error::NotFound => StatusCode::NOT_FOUND,
			Error::Gone => StatusCode::GONE,
			Error::Conflict(_) => StatusCode::CONFLICT,
			Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
			Error::AccessDenied { .. } => StatusCode::FORBIDDEN,
			Error::ValidationError(_) | Error::Parse => StatusCode::UNPROCESSABLE_ENTITY,
			Error::Timeout => StatusCode::REQUEST_TIMEOUT,
			Error::ConfigError(_) | Error::DbError | Error::Internal(_) | Error::Io(_) => {
				StatusCode::INTERNAL_SERVER_ERROR
			}
		};

		// Internal details stay server-side; clients get a generic message.
		let message = match &self {
			Error::ConfigError(_) | Error::DbError | Error::Internal(_) | Error::Io(_) => {
				tracing::error!("internal error: {}", self);
				"unexpected error".to_string()
			}
			Error::Unauthenticated { message, .. } | Error::AccessDenied { message, .. } => {
				message.to_string()
			}
			err => err.to_string(),
		};

		let body = serde_json::json!({ "code": self.code(), "message": message });
		(status, Json(body)).into_response()
	}
}


// vim: ts=4

//! Request-level error taxonomy and its HTTP mapping.

use axum::{
	Json,
	http::StatusCode,
	response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuizError {
	/// Missing, mistyped or malformed request fields.
	#[error("invalid request: {0}")]
	Validation(String),

	/// Presented secret does not match the configured one.
	#[error("invalid secret")]
	Auth,

	/// A page failed to load or render within its step.
	#[error("navigation to {url} failed: {reason}")]
	Navigation { url: String, reason: String },

	/// Both the POST and the GET fallback failed.
	#[error("submission to {url} failed: {reason}")]
	Submission { url: String, reason: String },

	/// Browser launch failure or anything else unexpected.
	#[error("internal error: {0}")]
	Internal(String),
}

impl QuizError {
	pub fn status_code(&self) -> StatusCode {
		match self {
			QuizError::Validation(_) => StatusCode::BAD_REQUEST,
			QuizError::Auth => StatusCode::FORBIDDEN,
			QuizError::Navigation { .. } | QuizError::Submission { .. } | QuizError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for QuizError {
	fn into_response(self) -> Response {
		let status = self.status_code();
		if status.is_server_error() {
			tracing::error!("{}", self);
		} else {
			tracing::warn!("{}", self);
		}
		(status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
	}
}

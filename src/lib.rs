use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub mod artifacts;
pub mod browser;
pub mod config;
pub mod error;
pub mod extract;
pub mod server;
pub mod solver;
pub mod submit;

/// URL value that short-circuits the solver without launching a browser
pub const TEST_SENTINEL_URL: &str = "TEST_NO_BROWSER";

/// Inbound body of `POST /api/quiz`
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QuizRequest {
	pub email: String,
	pub secret: String,
	pub url: String,
}

impl QuizRequest {
	/// Returns true if this request asks for the canned, browser-less response
	pub fn is_sentinel(&self) -> bool {
		self.url == TEST_SENTINEL_URL
	}
}

/// One rendered page, captured right after navigation settled
#[derive(Clone, Debug)]
pub struct PageSnapshot {
	/// The URL that was navigated to
	pub url: String,
	/// Serialized DOM after rendering
	pub html: String,
	/// Full-page PNG, if screenshots are enabled and the capture worked
	pub screenshot: Option<Vec<u8>>,
	pub timestamp: DateTime<Utc>,
}

/// HTTP method a submission ended up using
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmitMethod {
	Post,
	Get,
}

impl fmt::Display for SubmitMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SubmitMethod::Post => write!(f, "POST"),
			SubmitMethod::Get => write!(f, "GET"),
		}
	}
}

/// Outcome of a single `submit_with_fallback` call
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubmissionRecord {
	pub url: String,
	pub payload: serde_json::Value,
	pub method: SubmitMethod,
	/// `None` when the request never produced a response (connect error, timeout)
	pub status: Option<u16>,
	pub body: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub timestamp: DateTime<Utc>,
}

impl SubmissionRecord {
	pub fn succeeded(&self) -> bool {
		self.status.is_some_and(|s| (200..300).contains(&s))
	}

	/// Follow-up URL announced by the response body, resolved against `base`
	pub fn next_url(&self, base: &Url) -> Option<Url> {
		let parsed: serde_json::Value = serde_json::from_str(&self.body).ok()?;
		let next = parsed.get("url")?.as_str()?.trim();
		if next.is_empty() {
			return None;
		}
		base.join(next).ok()
	}
}

/// Aggregated outcome of one solve, returned as the endpoint's JSON body
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SolveResult {
	/// Every chained URL that rendered, in visiting order
	pub visited: Vec<String>,
	/// Status of the final submission, 0 if none completed
	pub status: u16,
	/// Body of the final submission response
	pub body: String,
	/// Why the loop stopped before the chain ended on its own
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl SolveResult {
	/// Canned result for [`TEST_SENTINEL_URL`]
	pub fn sentinel() -> Self {
		Self {
			visited: Vec::new(),
			status: 0,
			body: "test mode - no browser launched".to_string(),
			reason: Some("test mode".to_string()),
		}
	}

	pub fn record_submission(&mut self, record: &SubmissionRecord) {
		self.status = record.status.unwrap_or(0);
		self.body = match &record.error {
			Some(e) if record.body.is_empty() => e.clone(),
			_ => record.body.clone(),
		};
	}

	pub fn stop(&mut self, reason: impl Into<String>) {
		self.reason = Some(reason.into());
	}
}

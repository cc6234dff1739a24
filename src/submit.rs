//! Answer submission with a single POST -> GET fallback.

use std::{path::PathBuf, time::Duration};

use chrono::Utc;
use color_eyre::{Result, eyre::eyre};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::Value;
use v_utils::elog;

use crate::{SubmissionRecord, SubmitMethod, artifacts::write_atomic};

/// HTTP side of the solver: submissions, plus plain fetches for scrape and PDF fallbacks
#[derive(Clone, Debug)]
pub struct Submitter {
	client: reqwest::Client,
	last_submit_path: PathBuf,
}

struct Attempt {
	status: Option<u16>,
	body: String,
	error: Option<String>,
}

impl Attempt {
	fn succeeded(&self) -> bool {
		self.status.is_some_and(|s| (200..300).contains(&s))
	}

	fn failed(e: reqwest::Error) -> Self {
		Self {
			status: None,
			body: String::new(),
			error: Some(e.to_string()),
		}
	}
}

impl Submitter {
	pub fn new(user_agent: &str, timeout: Duration, last_submit_path: impl Into<PathBuf>) -> Result<Self> {
		let mut headers = HeaderMap::new();
		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
		let client = reqwest::Client::builder()
			.user_agent(user_agent)
			.default_headers(headers)
			.timeout(timeout)
			.build()
			.map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
		Ok(Self {
			client,
			last_submit_path: last_submit_path.into(),
		})
	}

	pub fn last_submit_path(&self) -> &std::path::Path {
		&self.last_submit_path
	}

	/// POST `payload` as JSON; if that errors or answers non-2xx, GET with `payload` in the query string.
	/// The returned record is whichever attempt succeeded, or the GET if both failed.
	/// The last-submission file is overwritten either way.
	pub async fn submit_with_fallback(&self, url: &str, payload: &Value) -> SubmissionRecord {
		tracing::info!("Submitting to {} payload={}", url, payload);

		let post = self.post(url, payload).await;
		let (method, attempt) = if post.succeeded() {
			(SubmitMethod::Post, post)
		} else {
			tracing::warn!(
				"POST {} failed ({}); trying GET fallback",
				url,
				post.error.clone().unwrap_or_else(|| format!("status {}", post.status.unwrap_or(0)))
			);
			(SubmitMethod::Get, self.get(url, payload).await)
		};

		let record = SubmissionRecord {
			url: url.to_string(),
			payload: payload.clone(),
			method,
			status: attempt.status,
			body: attempt.body,
			error: attempt.error,
			timestamp: Utc::now(),
		};
		self.persist(&record).await;
		record
	}

	async fn post(&self, url: &str, payload: &Value) -> Attempt {
		match self.client.post(url).json(payload).send().await {
			Ok(resp) => {
				let status = resp.status().as_u16();
				tracing::info!("POST {} -> {}", url, status);
				read_body(resp, status).await
			}
			Err(e) => Attempt::failed(e),
		}
	}

	async fn get(&self, url: &str, payload: &Value) -> Attempt {
		match self.client.get(url).query(&query_pairs(payload)).send().await {
			Ok(resp) => {
				let status = resp.status().as_u16();
				tracing::info!("GET {} -> {}", url, status);
				read_body(resp, status).await
			}
			Err(e) => {
				elog!("GET fallback to {} failed: {}", url, e);
				Attempt::failed(e)
			}
		}
	}

	async fn persist(&self, record: &SubmissionRecord) {
		let json = match serde_json::to_vec_pretty(record) {
			Ok(json) => json,
			Err(e) => {
				elog!("Failed to serialize submission record: {}", e);
				return;
			}
		};
		match write_atomic(&self.last_submit_path, json).await {
			Ok(()) => tracing::debug!("Wrote last submission to {}", self.last_submit_path.display()),
			Err(e) => {
				elog!("Failed to write last submission record: {}", e);
			}
		}
	}

	/// Plain GET returning the body as text; errors on non-2xx.
	pub async fn fetch_text(&self, url: &str) -> Result<String> {
		let resp = self.client.get(url).send().await.map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;
		let resp = resp.error_for_status().map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;
		resp.text().await.map_err(|e| eyre!("Failed to read body of {}: {}", url, e))
	}

	/// Plain GET returning raw bytes; errors on non-2xx.
	pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
		let resp = self.client.get(url).send().await.map_err(|e| eyre!("Failed to download {}: {}", url, e))?;
		let resp = resp.error_for_status().map_err(|e| eyre!("Failed to download {}: {}", url, e))?;
		let bytes = resp.bytes().await.map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;
		Ok(bytes.to_vec())
	}
}

async fn read_body(resp: reqwest::Response, status: u16) -> Attempt {
	match resp.text().await {
		Ok(body) => Attempt {
			status: Some(status),
			body,
			error: None,
		},
		Err(e) => Attempt {
			status: Some(status),
			body: String::new(),
			error: Some(format!("Failed to read response body: {e}")),
		},
	}
}

/// Flatten a JSON payload into query parameters. Strings go verbatim, everything else as JSON text.
fn query_pairs(payload: &Value) -> Vec<(String, String)> {
	match payload {
		Value::Object(map) => map
			.iter()
			.map(|(k, v)| {
				let v = match v {
					Value::String(s) => s.clone(),
					other => other.to_string(),
				};
				(k.clone(), v)
			})
			.collect(),
		Value::Null => Vec::new(),
		other => vec![("payload".to_string(), other.to_string())],
	}
}

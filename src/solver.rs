//! The chained-page loop: render, snapshot, extract, submit, follow.

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use chrono::Utc;
use color_eyre::Result;
use derive_new::new;
use reqwest::Url;
use serde_json::Value;
use tracing::Instrument;
use v_utils::{elog, log};

use crate::{
	PageSnapshot, QuizRequest, SolveResult,
	artifacts::{self, ArtifactStore, ArtifactWriter, Retention},
	browser::{Browse, BrowserLauncher},
	config::AppConfig,
	error::QuizError,
	extract::{self, Affordance, pdf},
	submit::Submitter,
};

/// Safety nets for one solve
#[derive(Clone, Copy, Debug)]
pub struct SolveLimits {
	/// Chained pages rendered at most
	pub max_steps: usize,
	/// Wall-clock budget; checked before each page
	pub time_budget: Duration,
}

#[derive(new)]
pub struct Solver {
	launcher: Arc<dyn BrowserLauncher>,
	submitter: Submitter,
	artifacts: ArtifactStore,
	limits: SolveLimits,
}

impl Solver {
	pub fn from_config(config: &AppConfig, launcher: Arc<dyn BrowserLauncher>) -> Result<Self> {
		let artifacts = ArtifactStore::new(
			config.debug_dir(),
			Retention {
				max_requests: config.artifact_max_requests,
				max_age: config.artifact_max_age(),
			},
		);
		let submitter = Submitter::new(&config.user_agent, config.submit_timeout(), artifacts.last_submit_path())?;
		let limits = SolveLimits {
			max_steps: config.max_steps,
			time_budget: config.solve_timeout(),
		};
		Ok(Self::new(launcher, submitter, artifacts, limits))
	}

	pub fn artifacts(&self) -> &ArtifactStore {
		&self.artifacts
	}

	/// Run one request through its page chain.
	///
	/// Only a failure to start the browser is an `Err`; anything that goes wrong mid-chain ends the loop early and
	/// comes back as a partial [`SolveResult`] with `reason` set.
	pub async fn solve(&self, request: &QuizRequest) -> Result<SolveResult, QuizError> {
		let start = Url::parse(&request.url).map_err(|e| QuizError::Validation(format!("url: {e}")))?;
		let request_id = artifacts::new_request_id();
		let span = tracing::info_span!("solve", request_id = %request_id);

		async move {
			if let Err(e) = self.artifacts.prune().await {
				elog!("Failed to prune artifacts: {}", e);
			}
			let writer = self.artifacts.scope(&request_id);

			log!("Solving {} for {}", start, request.email);
			let mut browser = self.launcher.launch().await.map_err(|e| QuizError::Internal(format!("browser launch failed: {e}")))?;

			let result = self.drive(browser.as_mut(), request, start, &writer).await;

			if let Err(e) = browser.close().await {
				elog!("Failed to close browser: {}", e);
			}

			match &result.reason {
				Some(reason) => {
					log!("Stopped after {} page(s): {}", result.visited.len(), reason);
				}
				None => {
					log!("Chain finished after {} page(s), final status {}", result.visited.len(), result.status);
				}
			}
			Ok::<_, QuizError>(result)
		}
		.instrument(span)
		.await
	}

	async fn drive(&self, browser: &mut dyn Browse, request: &QuizRequest, start: Url, writer: &ArtifactWriter) -> SolveResult {
		let started = Instant::now();
		let mut result = SolveResult::default();
		let mut current = Some(start);
		let mut step = 0;

		while let Some(url) = current.take() {
			if step >= self.limits.max_steps {
				result.stop(format!("iteration cap of {} page(s) reached", self.limits.max_steps));
				break;
			}
			if started.elapsed() >= self.limits.time_budget {
				result.stop(format!("time budget of {}s exceeded", self.limits.time_budget.as_secs()));
				break;
			}
			step += 1;
			if result.visited.iter().any(|v| v == url.as_str()) {
				tracing::warn!("Revisiting {url}");
			}

			let page = match browser.render(url.as_str()).await {
				Ok(page) => page,
				Err(e) => {
					let err = QuizError::Navigation {
						url: url.to_string(),
						reason: e.to_string(),
					};
					elog!("{}", err);
					result.stop(err.to_string());
					break;
				}
			};
			if page.final_url != url.as_str() {
				tracing::debug!("{url} redirected to {}", page.final_url);
			}
			result.visited.push(url.to_string());

			let affordance = extract::find_affordance(&page.html, &page.text, &url);

			let snapshot = PageSnapshot {
				url: url.to_string(),
				html: page.html,
				screenshot: page.screenshot,
				timestamp: Utc::now(),
			};
			if let Err(e) = writer.save_snapshot(step, &snapshot).await {
				elog!("Failed to save page snapshot: {}", e);
			}

			let affordance = match affordance {
				Ok(affordance) => affordance,
				Err(e) => {
					result.stop(e.to_string());
					break;
				}
			};
			tracing::info!("Step {step}: {affordance:?}");

			let (submit_url, payload) = match self.prepare(browser, affordance, request, &url, step, writer).await {
				Ok(prepared) => prepared,
				Err(reason) => {
					elog!("{}", reason);
					result.stop(reason);
					break;
				}
			};

			let record = self.submitter.submit_with_fallback(submit_url.as_str(), &payload).await;
			if let Err(e) = writer.save_json(&format!("submit_{step:03}.json"), &record).await {
				elog!("Failed to save submission record: {}", e);
			}
			result.record_submission(&record);

			if !record.succeeded() {
				let err = QuizError::Submission {
					url: record.url.clone(),
					reason: record.error.clone().unwrap_or_else(|| format!("status {}", record.status.unwrap_or(0))),
				};
				elog!("{}", err);
				result.stop(err.to_string());
				break;
			}

			current = record.next_url(&url);
			if let Some(next) = &current {
				log!("Step {}: {} {} -> {}, next {}", step, record.method, record.url, result.status, next);
			}
		}
		result
	}

	/// Resolve an affordance into the submit target and payload.
	/// `Err` carries the reason the chain has to stop here.
	async fn prepare(
		&self,
		browser: &mut dyn Browse,
		affordance: Affordance,
		request: &QuizRequest,
		page_url: &Url,
		step: usize,
		writer: &ArtifactWriter,
	) -> Result<(Url, Value), String> {
		match affordance {
			Affordance::JsonTemplate { submit, template } => Ok((submit, extract::template_payload(template, request, page_url))),
			Affordance::Numeric { value, submit } => Ok((submit, extract::answer_payload(request, page_url, extract::number_value(value)))),
			Affordance::PdfTable { document, submit } => {
				let bytes = self.submitter.fetch_bytes(document.as_str()).await.map_err(|e| {
					QuizError::Navigation {
						url: document.to_string(),
						reason: e.to_string(),
					}
					.to_string()
				})?;
				if let Err(e) = writer.save_artifact(&format!("document_{step:03}.pdf"), &bytes).await {
					elog!("Failed to save PDF: {}", e);
				}
				let sum = pdf::sum_value_column(&bytes).map_err(|e| format!("could not read PDF table at {document}: {e}"))?;
				Ok((submit, extract::answer_payload(request, page_url, extract::number_value(sum))))
			}
			Affordance::Scrape { source, submit } => {
				let text = self.scrape_text(browser, &source, step, writer).await?;
				let code = extract::extract_secret_code(&text).ok_or_else(|| format!("could not find secret on scrape page {source}"))?;
				Ok((submit, extract::answer_payload(request, page_url, Value::String(code))))
			}
		}
	}

	/// Text of a scrape target: rendered in the browser, or fetched plainly if rendering fails
	async fn scrape_text(&self, browser: &mut dyn Browse, source: &Url, step: usize, writer: &ArtifactWriter) -> Result<String, String> {
		match browser.render(source.as_str()).await {
			Ok(page) => {
				if let Err(e) = writer.save_artifact(&format!("scrape_{step:03}.html"), &page.html).await {
					elog!("Failed to save scrape page: {}", e);
				}
				Ok(page.text)
			}
			Err(e) => {
				tracing::warn!("Browser could not render scrape page {source}: {e}; falling back to plain GET");
				self.submitter.fetch_text(source.as_str()).await.map_err(|e| {
					QuizError::Navigation {
						url: source.to_string(),
						reason: e.to_string(),
					}
					.to_string()
				})
			}
		}
	}
}

//! HTTP surface: `POST /api/quiz` and `GET /health`.

use std::sync::Arc;

use axum::{
	Json, Router,
	extract::{State, rejection::JsonRejection},
	routing::{get, post},
};
use reqwest::Url;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use v_utils::log;

use crate::{QuizRequest, SolveResult, config::SharedSecret, error::QuizError, solver::Solver};

#[derive(Clone)]
pub struct AppState {
	secret: Arc<SharedSecret>,
	solver: Arc<Solver>,
}

impl AppState {
	pub fn new(secret: SharedSecret, solver: Solver) -> Self {
		Self {
			secret: Arc::new(secret),
			solver: Arc::new(solver),
		}
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/api/quiz", post(solve_quiz))
		.route("/health", get(health))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}

/// Validation, then the secret, then either the canned test answer or a real solve.
async fn solve_quiz(State(state): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Result<Json<SolveResult>, QuizError> {
	let Json(body) = body.map_err(|e| QuizError::Validation(e.body_text()))?;
	let request = parse_request(body)?;

	if !state.secret.matches(&request.secret) {
		return Err(QuizError::Auth);
	}

	if request.is_sentinel() {
		log!("Test request from {}, not launching a browser", request.email);
		return Ok(Json(SolveResult::sentinel()));
	}

	let result = state.solver.solve(&request).await?;
	Ok(Json(result))
}

fn parse_request(body: Value) -> Result<QuizRequest, QuizError> {
	let request: QuizRequest = serde_json::from_value(body).map_err(|e| QuizError::Validation(e.to_string()))?;
	if request.is_sentinel() {
		return Ok(request);
	}
	let url = Url::parse(&request.url).map_err(|e| QuizError::Validation(format!("url: {e}")))?;
	if !matches!(url.scheme(), "http" | "https") {
		return Err(QuizError::Validation(format!("url: unsupported scheme `{}`", url.scheme())));
	}
	Ok(request)
}

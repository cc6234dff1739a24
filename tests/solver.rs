mod common;

use std::{sync::Arc, time::Duration};

use common::{FakeLauncher, files_with_prefix, limits, quiz_server, request_dir, solver, table_pdf};
use quiz_headless::{QuizRequest, SubmissionRecord, SubmitMethod, error::QuizError, solver::SolveLimits};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{any, body_partial_json, method, path},
};

fn request(url: &str) -> QuizRequest {
	QuizRequest {
		email: "student@example.com".to_string(),
		secret: "s3cret".to_string(),
		url: url.to_string(),
	}
}

#[tokio::test]
async fn follows_the_chain_to_its_end() {
	let server = quiz_server().await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/start")).await.unwrap();

	assert_eq!(result.visited, vec!["http://quiz.test/start", "http://quiz.test/start/n", "http://quiz.test/start/n/n"]);
	assert_eq!(result.status, 200);
	assert!(result.body.contains("correct"));
	assert_eq!(result.reason, None);
	assert_eq!(launcher.log.launches(), 1);
	assert_eq!(launcher.log.closes(), 1);
}

#[tokio::test]
async fn artifacts_match_visited_pages() {
	let server = quiz_server().await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher, dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/start")).await.unwrap();

	let request_dir = request_dir(dir.path());
	assert_eq!(files_with_prefix(&request_dir, "page_", ".html"), vec!["page_001.html", "page_002.html", "page_003.html"]);
	assert_eq!(files_with_prefix(&request_dir, "submit_", ".json").len(), 3);
	for (i, url) in result.visited.iter().enumerate() {
		let meta: serde_json::Value = serde_json::from_slice(&std::fs::read(request_dir.join(format!("page_{:03}.json", i + 1))).unwrap()).unwrap();
		assert_eq!(meta["url"], url.as_str());
	}

	let last: SubmissionRecord = serde_json::from_slice(&std::fs::read(solver.artifacts().last_submit_path()).unwrap()).unwrap();
	assert_eq!(last.payload["url"], "http://quiz.test/start/n/n");
	assert_eq!(last.payload["email"], "student@example.com");
	assert_eq!(last.payload["answer"], 1);
}

#[tokio::test]
async fn stops_exactly_at_the_step_cap() {
	let server = quiz_server().await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(2));

	let result = solver.solve(&request("http://quiz.test/start")).await.unwrap();

	assert_eq!(result.visited.len(), 2);
	assert_eq!(launcher.log.renders().len(), 2);
	assert_eq!(result.status, 200);
	assert!(result.reason.unwrap().contains("iteration cap"));
	assert_eq!(launcher.log.closes(), 1);
}

#[tokio::test]
async fn page_without_cue_ends_with_partial_result() {
	let server = quiz_server().await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/blank")).await.unwrap();

	assert_eq!(result.visited, vec!["http://quiz.test/blank"]);
	assert_eq!(result.status, 0);
	assert!(result.reason.is_some());
	assert!(server.received_requests().await.unwrap().is_empty());
	assert_eq!(files_with_prefix(&request_dir(dir.path()), "page_", ".html").len(), 1);
	assert_eq!(launcher.log.closes(), 1);
}

#[tokio::test]
async fn navigation_failure_keeps_earlier_progress() {
	let server = quiz_server().await;
	let mut launcher = FakeLauncher::new(format!("{}/submit", server.uri()));
	launcher.fail_at = Some(2);
	let launcher = Arc::new(launcher);
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/start")).await.unwrap();

	assert_eq!(result.visited, vec!["http://quiz.test/start"]);
	assert_eq!(result.status, 200);
	let reason = result.reason.unwrap();
	assert!(reason.contains("http://quiz.test/start/n"), "{reason}");
	assert!(reason.contains("ERR_CONNECTION_REFUSED"), "{reason}");
	assert_eq!(launcher.log.closes(), 1);
}

#[tokio::test]
async fn rejected_submission_stops_the_loop() {
	let server = wiremock::MockServer::start().await;
	Mock::given(any()).respond_with(ResponseTemplate::new(500).set_body_string("boom")).mount(&server).await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/start")).await.unwrap();

	assert_eq!(result.visited.len(), 1);
	assert_eq!(result.status, 500);
	assert_eq!(result.body, "boom");
	assert!(result.reason.unwrap().contains("submission"));
	// POST then the GET fallback
	assert_eq!(server.received_requests().await.unwrap().len(), 2);
	assert_eq!(launcher.log.closes(), 1);
}

#[tokio::test]
async fn exhausted_time_budget_renders_nothing() {
	let server = quiz_server().await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let limits = SolveLimits {
		max_steps: 25,
		time_budget: Duration::ZERO,
	};
	let solver = solver(launcher.clone(), dir.path(), limits);

	let result = solver.solve(&request("http://quiz.test/start")).await.unwrap();

	assert!(result.visited.is_empty());
	assert!(result.reason.unwrap().contains("time budget"));
	assert_eq!(launcher.log.closes(), 1);
}

#[tokio::test]
async fn launch_failure_is_an_internal_error() {
	let mut launcher = FakeLauncher::new("http://quiz.test/submit");
	launcher.fail_launch = true;
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(Arc::new(launcher), dir.path(), limits(25));

	let err = solver.solve(&request("http://quiz.test/start")).await.unwrap_err();
	assert!(matches!(err, QuizError::Internal(_)));
}

/// Submissions carrying `answer` end the chain; anything else falls through to wiremock's 404
async fn expect_answer(server: &MockServer, answer: serde_json::Value) {
	Mock::given(method("POST"))
		.and(path("/submit"))
		.and(body_partial_json(json!({"answer": answer})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"correct": true})))
		.expect(1)
		.mount(server)
		.await;
}

#[tokio::test]
async fn scrape_page_is_rendered_in_the_browser() {
	let server = MockServer::start().await;
	expect_answer(&server, json!("BROWSER42")).await;
	Mock::given(method("GET")).and(path("/data")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/scrape-quiz")).await.unwrap();

	assert_eq!(result.visited, vec!["http://quiz.test/scrape-quiz"]);
	assert_eq!(result.status, 200);
	assert_eq!(result.reason, None);
	assert_eq!(launcher.log.renders(), vec!["http://quiz.test/scrape-quiz".to_string(), format!("{}/data", server.uri())]);

	let request_dir = request_dir(dir.path());
	assert_eq!(files_with_prefix(&request_dir, "scrape_", ".html"), vec!["scrape_001.html"]);
	let last: SubmissionRecord = serde_json::from_slice(&std::fs::read(solver.artifacts().last_submit_path()).unwrap()).unwrap();
	assert_eq!(last.method, SubmitMethod::Post);
	assert_eq!(last.payload["answer"], "BROWSER42");
	assert_eq!(last.payload["url"], "http://quiz.test/scrape-quiz");
}

#[tokio::test]
async fn scrape_falls_back_to_plain_get_when_rendering_fails() {
	let server = MockServer::start().await;
	expect_answer(&server, json!("FETCHED7")).await;
	Mock::given(method("GET"))
		.and(path("/data"))
		.respond_with(ResponseTemplate::new(200).set_body_string("Secret code is FETCHED7"))
		.expect(1)
		.mount(&server)
		.await;
	let mut launcher = FakeLauncher::new(format!("{}/submit", server.uri()));
	launcher.fail_at = Some(2);
	let launcher = Arc::new(launcher);
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/scrape-quiz")).await.unwrap();

	assert_eq!(result.visited, vec!["http://quiz.test/scrape-quiz"]);
	assert_eq!(result.status, 200);
	assert_eq!(result.reason, None);
	assert_eq!(launcher.log.renders().len(), 2);
	assert!(files_with_prefix(&request_dir(dir.path()), "scrape_", ".html").is_empty());
	assert_eq!(launcher.log.closes(), 1);
}

#[tokio::test]
async fn pdf_table_is_summed_and_submitted() {
	let server = MockServer::start().await;
	expect_answer(&server, json!(60)).await;
	let pdf = table_pdf(&[&["id", "name", "value"], &["1", "alpha", "10"], &["2", "beta", "20"], &["3", "gamma", "30"]]);
	Mock::given(method("GET"))
		.and(path("/table.pdf"))
		.respond_with(ResponseTemplate::new(200).insert_header("content-type", "application/pdf").set_body_bytes(pdf.clone()))
		.expect(1)
		.mount(&server)
		.await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/pdf-quiz")).await.unwrap();

	assert_eq!(result.visited, vec!["http://quiz.test/pdf-quiz"]);
	assert_eq!(result.status, 200);
	assert_eq!(result.reason, None);
	// the document is downloaded, never rendered
	assert_eq!(launcher.log.renders().len(), 1);

	let request_dir = request_dir(dir.path());
	assert_eq!(std::fs::read(request_dir.join("document_001.pdf")).unwrap(), pdf);
	let last: SubmissionRecord = serde_json::from_slice(&std::fs::read(solver.artifacts().last_submit_path()).unwrap()).unwrap();
	assert_eq!(last.payload["answer"], 60);
}

#[tokio::test]
async fn missing_pdf_stops_with_navigation_reason() {
	let server = MockServer::start().await;
	Mock::given(method("GET")).and(path("/table.pdf")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
	let launcher = Arc::new(FakeLauncher::new(format!("{}/submit", server.uri())));
	let dir = tempfile::tempdir().unwrap();
	let solver = solver(launcher.clone(), dir.path(), limits(25));

	let result = solver.solve(&request("http://quiz.test/pdf-quiz")).await.unwrap();

	assert_eq!(result.visited.len(), 1);
	assert_eq!(result.status, 0);
	assert!(result.reason.unwrap().contains("table.pdf"));
	assert_eq!(launcher.log.closes(), 1);
}

#![allow(dead_code)]

use std::{
	path::{Path, PathBuf},
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use async_trait::async_trait;
use color_eyre::{Result, eyre::eyre};
use lopdf::{
	Document, Object, Stream,
	content::{Content, Operation},
	dictionary,
};
use quiz_headless::{
	artifacts::{ArtifactStore, Retention},
	browser::{Browse, BrowserLauncher, RenderedPage},
	extract::strip_tags,
	solver::{SolveLimits, Solver},
	submit::Submitter,
};
use serde_json::{Value, json};
use wiremock::{Mock, MockServer, Request, ResponseTemplate, matchers::method};

/// What the fake browser did, shared between the launcher, its sessions and the test
#[derive(Default)]
pub struct BrowserLog {
	pub launches: AtomicUsize,
	pub closes: AtomicUsize,
	pub renders: Mutex<Vec<String>>,
}

impl BrowserLog {
	pub fn launches(&self) -> usize {
		self.launches.load(Ordering::SeqCst)
	}

	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}

	pub fn renders(&self) -> Vec<String> {
		self.renders.lock().unwrap().clone()
	}
}

/// Serves every URL as a page asking for `{"answer": 1}` to be POSTed to `submit_url`, except:
/// `/blank` (no cue at all), `/scrape-quiz` (scrape `<origin>/data`), `/data` (the scrape target itself),
/// `/pdf-quiz` (sum `<origin>/table.pdf`) and the `fail_at`-th render.
/// `<origin>` is `submit_url` without its `/submit` suffix.
pub struct FakeLauncher {
	pub log: Arc<BrowserLog>,
	pub submit_url: String,
	pub fail_launch: bool,
	pub fail_at: Option<usize>,
}

impl FakeLauncher {
	pub fn new(submit_url: impl Into<String>) -> Self {
		Self {
			log: Arc::default(),
			submit_url: submit_url.into(),
			fail_launch: false,
			fail_at: None,
		}
	}
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
	async fn launch(&self) -> Result<Box<dyn Browse>> {
		self.log.launches.fetch_add(1, Ordering::SeqCst);
		if self.fail_launch {
			return Err(eyre!("no chromium here"));
		}
		Ok(Box::new(FakeBrowser {
			log: self.log.clone(),
			submit_url: self.submit_url.clone(),
			fail_at: self.fail_at,
		}))
	}
}

struct FakeBrowser {
	log: Arc<BrowserLog>,
	submit_url: String,
	fail_at: Option<usize>,
}

#[async_trait]
impl Browse for FakeBrowser {
	async fn render(&mut self, url: &str) -> Result<RenderedPage> {
		let count = {
			let mut renders = self.log.renders.lock().unwrap();
			renders.push(url.to_string());
			renders.len()
		};
		if self.fail_at == Some(count) {
			return Err(eyre!("net::ERR_CONNECTION_REFUSED"));
		}
		let origin = self.submit_url.trim_end_matches("/submit");
		let html = if url.contains("/blank") {
			"<html><body><p>Nothing to see here.</p></body></html>".to_string()
		} else if url.contains("/data") {
			"<html><body><div>Secret code is BROWSER42</div></body></html>".to_string()
		} else if url.contains("/scrape-quiz") {
			format!("<html><body><p>Scrape {origin}/data (get the secret code)</p><p>Submit it to {}</p></body></html>", self.submit_url)
		} else if url.contains("/pdf-quiz") {
			format!(
				r#"<html><body><p>Add up the value column of <a href="{origin}/table.pdf">this table</a> and submit to {}</p></body></html>"#,
				self.submit_url
			)
		} else {
			format!(r#"<html><body><p>POST this JSON to {} {{"answer": 1}}</p></body></html>"#, self.submit_url)
		};
		Ok(RenderedPage {
			final_url: url.to_string(),
			text: strip_tags(&html),
			html,
			screenshot: None,
		})
	}

	async fn close(&mut self) -> Result<()> {
		self.log.closes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Quiz backend: every submission for page `X` announces `X/n`, until `X` already ends in `/n/n`.
pub async fn quiz_server() -> MockServer {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(|req: &Request| {
			let body: Value = req.body_json().unwrap_or(Value::Null);
			let page = body["url"].as_str().unwrap_or_default();
			if page.ends_with("/n/n") {
				ResponseTemplate::new(200).set_body_json(json!({"correct": true}))
			} else {
				ResponseTemplate::new(200).set_body_json(json!({"correct": true, "url": format!("{page}/n")}))
			}
		})
		.mount(&server)
		.await;
	server
}

/// One-page PDF drawing every table cell in its own text object
pub fn table_pdf(rows: &[&[&str]]) -> Vec<u8> {
	let mut doc = Document::with_version("1.5");
	let pages_id = doc.new_object_id();
	let font_id = doc.add_object(dictionary! {
		"Type" => "Font",
		"Subtype" => "Type1",
		"BaseFont" => "Courier",
	});
	let resources_id = doc.add_object(dictionary! {
		"Font" => dictionary! { "F1" => font_id },
	});

	let mut operations = Vec::new();
	for (r, row) in rows.iter().enumerate() {
		for (c, cell) in row.iter().enumerate() {
			operations.push(Operation::new("BT", vec![]));
			operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
			operations.push(Operation::new("Td", vec![(50 + 120 * c as i64).into(), (750 - 18 * r as i64).into()]));
			operations.push(Operation::new("Tj", vec![Object::string_literal(*cell)]));
			operations.push(Operation::new("ET", vec![]));
		}
	}
	let content_id = doc.add_object(Stream::new(dictionary! {}, Content { operations }.encode().unwrap()));
	let page_id = doc.add_object(dictionary! {
		"Type" => "Page",
		"Parent" => pages_id,
		"Contents" => content_id,
	});
	doc.objects.insert(
		pages_id,
		Object::Dictionary(dictionary! {
			"Type" => "Pages",
			"Kids" => vec![page_id.into()],
			"Count" => 1,
			"Resources" => resources_id,
			"MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
		}),
	);
	let catalog_id = doc.add_object(dictionary! {
		"Type" => "Catalog",
		"Pages" => pages_id,
	});
	doc.trailer.set("Root", catalog_id);

	let mut bytes = Vec::new();
	doc.save_to(&mut bytes).unwrap();
	bytes
}

pub fn solver(launcher: Arc<dyn BrowserLauncher>, root: &Path, limits: SolveLimits) -> Solver {
	let artifacts = ArtifactStore::new(root, Retention::default());
	let submitter = Submitter::new("quiz-test", Duration::from_secs(5), artifacts.last_submit_path()).unwrap();
	Solver::new(launcher, submitter, artifacts, limits)
}

pub fn limits(max_steps: usize) -> SolveLimits {
	SolveLimits {
		max_steps,
		time_budget: Duration::from_secs(60),
	}
}

/// The single per-request directory under `root`
pub fn request_dir(root: &Path) -> PathBuf {
	let dirs: Vec<PathBuf> = std::fs::read_dir(root).unwrap().map(|e| e.unwrap().path()).filter(|p| p.is_dir()).collect();
	assert_eq!(dirs.len(), 1, "expected one request dir, got {dirs:?}");
	dirs.into_iter().next().unwrap()
}

pub fn files_with_prefix(dir: &Path, prefix: &str, ext: &str) -> Vec<String> {
	let mut names: Vec<String> = std::fs::read_dir(dir)
		.unwrap()
		.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
		.filter(|n| n.starts_with(prefix) && n.ends_with(ext))
		.collect();
	names.sort();
	names
}

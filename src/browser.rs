//! Browser sessions. The solver only sees [`Browse`]; Chromium is driven through chromiumoxide.

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use chromiumoxide::{
	Page,
	browser::{Browser, BrowserConfig},
	cdp::browser_protocol::page::CaptureScreenshotFormat,
	page::ScreenshotParams,
};
use color_eyre::{Result, eyre::eyre};
use futures::StreamExt;
use tokio::task::JoinHandle;
use v_utils::{elog, log};

use crate::{config::AppConfig, extract::strip_tags};

/// A page after navigation settled
#[derive(Clone, Debug)]
pub struct RenderedPage {
	/// Where the browser ended up, which may differ from the requested URL after redirects
	pub final_url: String,
	pub html: String,
	/// `document.body.innerText`
	pub text: String,
	pub screenshot: Option<Vec<u8>>,
}

/// One browser session, owned by a single solve
#[async_trait]
pub trait Browse: Send {
	/// Navigate to `url`, wait for it to render, and read it back.
	async fn render(&mut self, url: &str) -> Result<RenderedPage>;

	/// Release the session. Called exactly once, on every exit path of a solve.
	async fn close(&mut self) -> Result<()>;
}

/// Starts browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
	async fn launch(&self) -> Result<Box<dyn Browse>>;
}

/// Knobs for launching Chromium
#[derive(Clone, Debug)]
pub struct ChromeOptions {
	pub visible: bool,
	pub no_sandbox: bool,
	pub chrome_path: Option<PathBuf>,
	pub user_agent: String,
	pub nav_timeout: Duration,
	pub settle: Duration,
	pub screenshots: bool,
}

impl From<&AppConfig> for ChromeOptions {
	fn from(config: &AppConfig) -> Self {
		Self {
			visible: config.visible,
			no_sandbox: config.no_sandbox,
			chrome_path: config.chrome_path.clone(),
			user_agent: config.user_agent.clone(),
			nav_timeout: config.nav_timeout(),
			settle: config.settle(),
			screenshots: config.screenshots,
		}
	}
}

/// Launches a fresh Chromium per solve
#[derive(Clone, Debug)]
pub struct ChromeLauncher {
	options: ChromeOptions,
}

impl ChromeLauncher {
	pub fn new(options: ChromeOptions) -> Self {
		Self { options }
	}
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
	async fn launch(&self) -> Result<Box<dyn Browse>> {
		let session = ChromeSession::launch(&self.options).await?;
		Ok(Box::new(session))
	}
}

pub struct ChromeSession {
	browser: Browser,
	page: Page,
	handler: JoinHandle<()>,
	options: ChromeOptions,
	closed: bool,
}

impl ChromeSession {
	pub async fn launch(options: &ChromeOptions) -> Result<Self> {
		let mut builder = BrowserConfig::builder().request_timeout(options.nav_timeout).arg(format!("--user-agent={}", options.user_agent));
		if options.visible {
			builder = builder.with_head();
		}
		if options.no_sandbox {
			builder = builder.no_sandbox();
		}
		if let Some(path) = &options.chrome_path {
			builder = builder.chrome_executable(path);
		}
		let config = builder.build().map_err(|e| eyre!("Failed to build browser config: {}", e))?;

		let (mut browser, mut handler) = Browser::launch(config).await.map_err(|e| eyre!("Failed to launch browser: {}", e))?;

		// The handler must be polled or every CDP call hangs
		let handler = tokio::spawn(async move { while let Some(_event) = handler.next().await {} });

		let page = match browser.new_page("about:blank").await {
			Ok(page) => page,
			Err(e) => {
				let _ = browser.close().await;
				handler.abort();
				return Err(eyre!("Failed to create new page: {}", e));
			}
		};
		log!("Browser launched (visible: {})", options.visible);

		Ok(Self {
			browser,
			page,
			handler,
			options: options.clone(),
			closed: false,
		})
	}
}

async fn navigate(page: &Page, url: &str) -> Result<()> {
	page.goto(url).await.map_err(|e| eyre!("Failed to navigate: {}", e))?;
	page.wait_for_navigation().await.map_err(|e| eyre!("Failed waiting for navigation: {}", e))?;
	Ok(())
}

async fn body_text(page: &Page, html: &str) -> String {
	let result = page.evaluate("document.body ? document.body.innerText : ''").await;
	match result.as_ref().ok().and_then(|r| r.value()).and_then(|v| v.as_str()) {
		Some(text) => text.to_string(),
		None => strip_tags(html),
	}
}

async fn full_page_png(page: &Page) -> Option<Vec<u8>> {
	let params = ScreenshotParams::builder().format(CaptureScreenshotFormat::Png).full_page(true).build();
	match page.screenshot(params).await {
		Ok(png) => Some(png),
		Err(e) => {
			elog!("Failed to capture screenshot: {}", e);
			None
		}
	}
}

#[async_trait]
impl Browse for ChromeSession {
	async fn render(&mut self, url: &str) -> Result<RenderedPage> {
		let page = &self.page;
		let nav_timeout = self.options.nav_timeout;
		tokio::time::timeout(nav_timeout, navigate(page, url))
			.await
			.map_err(|_| eyre!("Timed out after {:?}", nav_timeout))??;

		tokio::time::sleep(self.options.settle).await;

		let html = page.content().await.map_err(|e| eyre!("Failed to get page HTML: {}", e))?;
		let text = body_text(page, &html).await;
		let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());
		let screenshot = if self.options.screenshots { full_page_png(page).await } else { None };

		Ok(RenderedPage { final_url, html, text, screenshot })
	}

	async fn close(&mut self) -> Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		let result = self.browser.close().await;
		let _ = self.browser.wait().await;
		self.handler.abort();
		result.map(|_| ()).map_err(|e| eyre!("Failed to close browser: {}", e))
	}
}

impl Drop for ChromeSession {
	fn drop(&mut self) {
		// covers panics and cancelled solves, where close() never ran
		self.handler.abort();
	}
}

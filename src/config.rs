use std::{fmt, path::PathBuf, time::Duration};

use clap::{ArgAction, Parser};

/// Process-wide settings, read once at start-up from flags or the environment
#[derive(Clone, Debug, Parser)]
#[command(name = "quiz_headless")]
#[command(about = "HTTP endpoint that walks chained quiz pages in a headless browser", long_about = None)]
pub struct AppConfig {
	/// Shared secret every request must present
	#[arg(long, env = "QUIZ_SECRET", hide_env_values = true)]
	pub secret: SharedSecret,
	/// Address to bind
	#[arg(long, env = "QUIZ_HOST", default_value = "0.0.0.0")]
	pub host: String,
	/// Port to listen on
	#[arg(short, long, env = "PORT", default_value_t = default_port())]
	pub port: u16,
	/// Directory for rendered pages and submission records
	#[arg(long, env = "QUIZ_DEBUG_DIR")]
	pub debug_dir: Option<PathBuf>,
	/// Upper bound on chained pages rendered per request
	#[arg(long, env = "QUIZ_MAX_STEPS", default_value_t = default_max_steps())]
	pub max_steps: usize,
	/// Wall-clock budget for a whole solve, in seconds
	#[arg(long, env = "QUIZ_SOLVE_TIMEOUT_SECS", default_value_t = default_solve_timeout_secs())]
	pub solve_timeout_secs: u64,
	/// Per-navigation timeout, in seconds
	#[arg(long, env = "QUIZ_NAV_TIMEOUT_SECS", default_value_t = default_nav_timeout_secs())]
	pub nav_timeout_secs: u64,
	/// Per-request timeout for submissions and downloads, in seconds
	#[arg(long, env = "QUIZ_SUBMIT_TIMEOUT_SECS", default_value_t = default_submit_timeout_secs())]
	pub submit_timeout_secs: u64,
	/// Pause after navigation before reading the DOM, in milliseconds
	#[arg(long, env = "QUIZ_SETTLE_MS", default_value_t = default_settle_ms())]
	pub settle_ms: u64,
	/// Capture a full-page screenshot of every visited page
	#[arg(long, env = "QUIZ_SCREENSHOTS", default_value_t = true, action = ArgAction::Set)]
	pub screenshots: bool,
	/// User-Agent sent by the browser and by submissions
	#[arg(long, env = "QUIZ_USER_AGENT", default_value_t = default_user_agent())]
	pub user_agent: String,
	/// Run with visible browser window (non-headless mode)
	#[arg(long, env = "QUIZ_VISIBLE")]
	pub visible: bool,
	/// Disable the Chromium sandbox (needed when running as root in containers)
	#[arg(long, env = "QUIZ_NO_SANDBOX")]
	pub no_sandbox: bool,
	/// Path to the Chromium/Chrome executable; autodetected if unset
	#[arg(long, env = "CHROME")]
	pub chrome_path: Option<PathBuf>,
	/// Keep at most this many per-request artifact directories
	#[arg(long, env = "QUIZ_ARTIFACT_MAX_REQUESTS", default_value_t = default_artifact_max_requests())]
	pub artifact_max_requests: usize,
	/// Drop artifact directories older than this many hours
	#[arg(long, env = "QUIZ_ARTIFACT_MAX_AGE_HOURS", default_value_t = default_artifact_max_age_hours())]
	pub artifact_max_age_hours: u64,
}

fn default_port() -> u16 {
	8000
}

fn default_max_steps() -> usize {
	25
}

fn default_solve_timeout_secs() -> u64 {
	180
}

fn default_nav_timeout_secs() -> u64 {
	60
}

fn default_submit_timeout_secs() -> u64 {
	60
}

fn default_settle_ms() -> u64 {
	1000
}

fn default_user_agent() -> String {
	format!("quiz_headless/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(feature = "xdg")]
fn default_debug_dir() -> PathBuf {
	v_utils::xdg_state_dir!("debug_artifacts")
}

#[cfg(not(feature = "xdg"))]
fn default_debug_dir() -> PathBuf {
	PathBuf::from("debug_artifacts")
}

fn default_artifact_max_requests() -> usize {
	50
}

fn default_artifact_max_age_hours() -> u64 {
	72
}

impl AppConfig {
	/// Resolved artifact root
	pub fn debug_dir(&self) -> PathBuf {
		self.debug_dir.clone().unwrap_or_else(default_debug_dir)
	}

	pub fn bind_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	pub fn solve_timeout(&self) -> Duration {
		Duration::from_secs(self.solve_timeout_secs)
	}

	pub fn nav_timeout(&self) -> Duration {
		Duration::from_secs(self.nav_timeout_secs)
	}

	pub fn submit_timeout(&self) -> Duration {
		Duration::from_secs(self.submit_timeout_secs)
	}

	pub fn settle(&self) -> Duration {
		Duration::from_millis(self.settle_ms)
	}

	pub fn artifact_max_age(&self) -> Duration {
		Duration::from_secs(self.artifact_max_age_hours * 3600)
	}
}

/// The configured shared secret. Never printed.
#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
	pub fn new(secret: impl Into<String>) -> Self {
		Self(secret.into())
	}

	/// Constant-time with respect to the content of both strings.
	pub fn matches(&self, candidate: &str) -> bool {
		let expected = self.0.as_bytes();
		let given = candidate.as_bytes();
		let len = expected.len().max(given.len());
		let mut diff = u8::from(expected.len() != given.len());
		for i in 0..len {
			let a = expected.get(i).copied().unwrap_or(0);
			let b = given.get(i).copied().unwrap_or(0);
			diff |= a ^ b;
		}
		std::hint::black_box(diff) == 0
	}
}

impl From<String> for SharedSecret {
	fn from(s: String) -> Self {
		Self(s)
	}
}

impl fmt::Debug for SharedSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SharedSecret(***)")
	}
}

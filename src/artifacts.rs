//! Debug artifacts: rendered pages, screenshots and submission records, one directory per request.

use std::{
	path::{Path, PathBuf},
	time::{Duration, SystemTime},
};

use chrono::Utc;
use color_eyre::{Result, eyre::eyre};
use regex::Regex;
use serde::Serialize;
use v_utils::log;

use crate::PageSnapshot;

/// How much of the artifact root survives between requests
#[derive(Clone, Copy, Debug)]
pub struct Retention {
	/// Newest request directories to keep
	pub max_requests: usize,
	/// Request directories older than this are dropped regardless of count
	pub max_age: Duration,
}

impl Default for Retention {
	fn default() -> Self {
		Self {
			max_requests: 50,
			max_age: Duration::from_secs(72 * 3600),
		}
	}
}

/// Fresh id for a request's artifact directory: `%Y%m%dT%H%M%S_<8 hex>`
pub fn new_request_id() -> String {
	let suffix = uuid::Uuid::new_v4().simple().to_string();
	format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%S"), &suffix[..8])
}

/// Returns true if `name` has the shape [`new_request_id`] produces
pub fn is_request_id(name: &str) -> bool {
	Regex::new(r"^\d{8}T\d{6}_[0-9a-f]{8}$").is_ok_and(|re| re.is_match(name))
}

/// The artifact root shared by all requests
#[derive(Clone, Debug)]
pub struct ArtifactStore {
	root: PathBuf,
	retention: Retention,
}

impl ArtifactStore {
	pub fn new(root: impl Into<PathBuf>, retention: Retention) -> Self {
		Self { root: root.into(), retention }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Fixed location of the most recent submission outcome
	pub fn last_submit_path(&self) -> PathBuf {
		self.root.join("last_submit.json")
	}

	/// Writer for a single request's directory. Nothing touches disk until the first save.
	pub fn scope(&self, request_id: &str) -> ArtifactWriter {
		ArtifactWriter {
			dir: self.root.join(safe_name(request_id)),
		}
	}

	/// Apply the retention policy to existing request directories.
	/// Only directories named by [`new_request_id`] are considered; anything else under the root is left alone.
	/// Returns how many directories were removed.
	pub async fn prune(&self) -> Result<usize> {
		let mut entries = match tokio::fs::read_dir(&self.root).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
			Err(e) => return Err(eyre!("Failed to list artifact dir {}: {}", self.root.display(), e)),
		};

		let mut dirs: Vec<(PathBuf, SystemTime)> = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(|e| eyre!("Failed to read artifact dir entry: {}", e))? {
			if !entry.file_name().to_str().is_some_and(is_request_id) {
				continue;
			}
			let meta = match entry.metadata().await {
				Ok(meta) if meta.is_dir() => meta,
				_ => continue,
			};
			let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
			dirs.push((entry.path(), modified));
		}

		// newest first
		dirs.sort_by(|a, b| b.1.cmp(&a.1));

		let mut removed = 0;
		for (i, (path, modified)) in dirs.iter().enumerate() {
			let expired = modified.elapsed().unwrap_or_default() >= self.retention.max_age;
			if i < self.retention.max_requests && !expired {
				continue;
			}
			match tokio::fs::remove_dir_all(path).await {
				Ok(()) => removed += 1,
				Err(e) => tracing::warn!("Failed to remove stale artifacts {}: {}", path.display(), e),
			}
		}
		if removed > 0 {
			tracing::debug!("Pruned {removed} artifact dir(s) under {}", self.root.display());
		}
		Ok(removed)
	}
}

/// Saves artifacts for one request. Same name means overwrite.
#[derive(Clone, Debug)]
pub struct ArtifactWriter {
	dir: PathBuf,
}

impl ArtifactWriter {
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub async fn save_artifact(&self, name: &str, content: impl AsRef<[u8]>) -> Result<PathBuf> {
		tokio::fs::create_dir_all(&self.dir)
			.await
			.map_err(|e| eyre!("Failed to create artifact dir {}: {}", self.dir.display(), e))?;
		let path = self.dir.join(safe_name(name));
		tokio::fs::write(&path, content).await.map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
		tracing::debug!("Saved artifact {}", path.display());
		Ok(path)
	}

	pub async fn save_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
		let json = serde_json::to_vec_pretty(value)?;
		self.save_artifact(name, json).await
	}

	/// Write `page_NNN.html`, `page_NNN.png` (if captured) and `page_NNN.json` metadata.
	/// Returns the HTML path.
	pub async fn save_snapshot(&self, step: usize, snapshot: &PageSnapshot) -> Result<PathBuf> {
		let stem = format!("page_{step:03}");
		let html_path = self.save_artifact(&format!("{stem}.html"), &snapshot.html).await?;

		let screenshot_file = match &snapshot.screenshot {
			Some(png) => {
				let name = format!("{stem}.png");
				self.save_artifact(&name, png).await?;
				Some(name)
			}
			None => None,
		};

		let meta = SnapshotMeta {
			step,
			url: &snapshot.url,
			timestamp: snapshot.timestamp,
			html: format!("{stem}.html"),
			screenshot: screenshot_file,
		};
		self.save_json(&format!("{stem}.json"), &meta).await?;

		log!("Saved page {} ({}) to: {}", step, snapshot.url, html_path.display());
		Ok(html_path)
	}
}

#[derive(Serialize)]
struct SnapshotMeta<'a> {
	step: usize,
	url: &'a str,
	timestamp: chrono::DateTime<chrono::Utc>,
	html: String,
	screenshot: Option<String>,
}

/// Replace `path` in one step, so a concurrent reader sees either the old or the new file.
pub async fn write_atomic(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await.map_err(|e| eyre!("Failed to create {}: {}", parent.display(), e))?;
	}
	let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact");
	let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));
	tokio::fs::write(&tmp, content).await.map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
	if let Err(e) = tokio::fs::rename(&tmp, path).await {
		let _ = tokio::fs::remove_file(&tmp).await;
		return Err(eyre!("Failed to move {} into place: {}", path.display(), e));
	}
	Ok(())
}

fn safe_name(name: &str) -> String {
	let safe: String = name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' }).collect();
	if safe.is_empty() || safe.starts_with('.') { format!("_{safe}") } else { safe }
}

//! Heuristics that turn a rendered quiz page into something to submit.
//!
//! Cues are tried in a fixed order: a "Scrape <path>" instruction, a "POST this JSON to <url>" template,
//! a linked PDF, and finally any number in the page text.

use regex::Regex;
use reqwest::Url;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::QuizRequest;

pub mod pdf;

/// Answer used when a JSON template carries none
const DEFAULT_TEMPLATE_ANSWER: &str = "I solved it";

/// What a page asks the solver to do
#[derive(Clone, Debug, PartialEq)]
pub enum Affordance {
	/// Fetch `source`, pull a secret code out of it, submit that to `submit`
	Scrape { source: Url, submit: Url },
	/// Submit the page-provided JSON template (identity fields filled in) to `submit`
	JsonTemplate { submit: Url, template: Map<String, Value> },
	/// Download the PDF, sum its table's value column, submit the sum
	PdfTable { document: Url, submit: Url },
	/// Submit a number read from the page text
	Numeric { value: f64, submit: Url },
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Unsolvable {
	#[error("could not auto-solve: no recognizable cue on page")]
	NoCue,
	#[error("no submit URL found on page")]
	NoSubmitUrl,
}

/// Pick the affordance for a page. `html` is the serialized DOM, `text` its rendered body text.
pub fn find_affordance(html: &str, text: &str, page_url: &Url) -> Result<Affordance, Unsolvable> {
	if let Some(path) = find_scrape_instruction(text) {
		if let Ok(source) = page_url.join(&path) {
			let submit = find_submit_url(html)
				.and_then(|u| Url::parse(&u).ok())
				.or_else(|| page_url.join("/submit").ok())
				.ok_or(Unsolvable::NoSubmitUrl)?;
			return Ok(Affordance::Scrape { source, submit });
		}
	}

	if let Some((submit, template)) = find_json_template(text) {
		if let Ok(submit) = Url::parse(&submit) {
			return Ok(Affordance::JsonTemplate { submit, template });
		}
	}

	let submit = find_submit_url(html).and_then(|u| Url::parse(&u).ok());

	if let Some(document) = find_pdf_link(html, page_url) {
		let submit = submit.ok_or(Unsolvable::NoSubmitUrl)?;
		return Ok(Affordance::PdfTable { document, submit });
	}

	let value = extract_numeric_answer(text).ok_or(Unsolvable::NoCue)?;
	let submit = submit.ok_or(Unsolvable::NoSubmitUrl)?;
	Ok(Affordance::Numeric { value, submit })
}

/// Standard answer payload
pub fn answer_payload(request: &QuizRequest, page_url: &Url, answer: Value) -> Value {
	json!({
		"email": request.email,
		"secret": request.secret,
		"url": page_url.as_str(),
		"answer": answer,
	})
}

/// Page-provided template with identity fields overwritten and an answer guaranteed
pub fn template_payload(mut template: Map<String, Value>, request: &QuizRequest, page_url: &Url) -> Value {
	template.insert("email".to_string(), Value::String(request.email.clone()));
	template.insert("secret".to_string(), Value::String(request.secret.clone()));
	template.insert("url".to_string(), Value::String(page_url.to_string()));
	template.entry("answer").or_insert_with(|| Value::String(DEFAULT_TEMPLATE_ANSWER.to_string()));
	Value::Object(template)
}

/// Number as a JSON value, integral floats as integers
pub fn number_value(n: f64) -> Value {
	if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
		json!(n as i64)
	} else {
		json!(n)
	}
}

/// Path or URL following a "Scrape" instruction
pub fn find_scrape_instruction(text: &str) -> Option<String> {
	let re = Regex::new(r"(?i)\bScrape\s+([^\s(]+)").ok()?;
	let path = re.captures(text)?.get(1)?.as_str();
	let path = trim_trailing_punctuation(path);
	(!path.is_empty()).then(|| path.to_string())
}

/// `(submit_url, template)` from "POST this JSON to <url>" followed by a JSON object.
/// A missing or unparsable object yields an empty template.
pub fn find_json_template(text: &str) -> Option<(String, Map<String, Value>)> {
	let re = Regex::new(r"(?i)POST\s+this\s+JSON\s+to\s+(https?://\S+)").ok()?;
	let caps = re.captures(text)?;
	let whole = caps.get(0)?;
	let submit = trim_trailing_punctuation(caps.get(1)?.as_str()).to_string();

	let template = balanced_object(&text[whole.end()..]).and_then(parse_lenient_object).unwrap_or_default();
	Some((submit, template))
}

/// First `{...}` in `s` with balanced braces, ignoring braces inside string literals
fn balanced_object(s: &str) -> Option<&str> {
	let start = s.find('{')?;
	let mut depth = 0usize;
	let mut in_string = false;
	let mut escaped = false;
	for (i, c) in s[start..].char_indices() {
		if in_string {
			match c {
				_ if escaped => escaped = false,
				'\\' => escaped = true,
				'"' => in_string = false,
				_ => {}
			}
			continue;
		}
		match c {
			'"' => in_string = true,
			'{' => depth += 1,
			'}' => {
				depth -= 1;
				if depth == 0 {
					return Some(&s[start..start + i + 1]);
				}
			}
			_ => {}
		}
	}
	None
}

/// Parse a JSON object, retrying once with trailing commas removed
fn parse_lenient_object(raw: &str) -> Option<Map<String, Value>> {
	if let Ok(Value::Object(map)) = serde_json::from_str(raw) {
		return Some(map);
	}
	let trailing = Regex::new(r",\s*([}\]])").ok()?;
	let cleaned = trailing.replace_all(raw, "$1");
	match serde_json::from_str(&cleaned) {
		Ok(Value::Object(map)) => Some(map),
		_ => None,
	}
}

/// Secret code on a scrape page, from most to least specific pattern
pub fn extract_secret_code(text: &str) -> Option<String> {
	let patterns = [
		r#"(?i)["']secret["']\s*:\s*["']([^"']+)["']"#,
		r"(?i)secret(?:\s+code)?(?:\s+is)?[^A-Za-z0-9]*([A-Za-z0-9_\-]{3,})",
		r#"["']([A-Za-z0-9_\-]{3,})["']"#,
		r"\b([A-Za-z0-9]{4,})\b",
	];
	for pattern in patterns {
		let Ok(re) = Regex::new(pattern) else { continue };
		if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
			let code = m.as_str().trim();
			if !code.is_empty() {
				return Some(code.to_string());
			}
		}
	}
	None
}

/// Absolute URL of the submit endpoint: one containing `/submit`, else the first absolute URL at all
pub fn find_submit_url(html: &str) -> Option<String> {
	let submit = Regex::new(r"https?://[\w./:\-?=&%]+/submit[\w/\-?=&%]*").ok()?;
	if let Some(m) = submit.find(html) {
		return Some(m.as_str().to_string());
	}
	let any = Regex::new(r"https?://[\w./:\-?=&%]+").ok()?;
	any.find(html).map(|m| m.as_str().to_string())
}

/// First `href` ending in `.pdf`, resolved against the page
pub fn find_pdf_link(html: &str, page_url: &Url) -> Option<Url> {
	let re = Regex::new(r#"(?i)href=["']([^"']+\.pdf)["']"#).ok()?;
	let link = re.captures(html)?.get(1)?.as_str();
	page_url.join(link).ok()
}

/// A number next to "sum", else the first number of two or more digits
pub fn extract_numeric_answer(text: &str) -> Option<f64> {
	let patterns = [r"(?i)sum[^\d\n]*([0-9,]+(?:\.[0-9]+)?)", r"([0-9]{2,}[0-9,]*)"];
	for pattern in patterns {
		let Ok(re) = Regex::new(pattern) else { continue };
		if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
			if let Ok(n) = m.as_str().replace(',', "").parse::<f64>() {
				return Some(n);
			}
		}
	}
	None
}

/// Crude tag stripper for when the browser cannot give us `innerText`
pub fn strip_tags(html: &str) -> String {
	match Regex::new(r"<[^>]+>") {
		Ok(re) => re.replace_all(html, " ").into_owned(),
		Err(_) => html.to_string(),
	}
}

fn trim_trailing_punctuation(s: &str) -> &str {
	s.trim_end_matches(['.', ',', ';', ':', ')', '"', '\''])
}

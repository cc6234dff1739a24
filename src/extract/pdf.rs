//! Sum the "value" column of a table inside a PDF.

use color_eyre::{Result, eyre::eyre};
use lopdf::{
	Document, Object, ObjectId,
	content::{Content, Operation},
};

/// Text runs whose baselines differ by less than this belong to one row
const ROW_TOLERANCE: f64 = 2.0;

/// Reads the table on page 2 if there is one, else page 1.
///
/// Rows are rebuilt from where the text is drawn, so tables that put every cell in its own text object still come
/// out as rows. Pages without usable positioned text fall back to lopdf's plain text extraction.
pub fn sum_value_column(bytes: &[u8]) -> Result<f64> {
	let document = Document::load_mem(bytes).map_err(|e| eyre!("Failed to load PDF: {}", e))?;
	let pages = document.get_pages();
	let page_no = if pages.len() >= 2 { 2 } else { 1 };
	let page_id = *pages.get(&page_no).ok_or_else(|| eyre!("PDF has no page {}", page_no))?;

	match positioned_rows(&document, page_id) {
		Ok(rows) => {
			if let Some(sum) = sum_table(rows) {
				return Ok(sum);
			}
		}
		Err(e) => tracing::debug!("No positioned text on page {page_no}: {e}"),
	}

	let text = document.extract_text(&[page_no]).map_err(|e| eyre!("Failed to extract text from page {}: {}", page_no, e))?;
	sum_value_column_text(&text).ok_or_else(|| eyre!("No numeric table found on page {}", page_no))
}

/// Table heuristics over extracted text, one row per line.
pub fn sum_value_column_text(text: &str) -> Option<f64> {
	let rows = text.lines().map(str::trim).filter(|l| !l.is_empty()).map(|l| vec![l.to_string()]).collect();
	sum_table(rows)
}

/// The header is the first row mentioning "value" (or the first row at all); the summed column is the one whose
/// header mentions "value", else the last. Rows with a different cell count fall back to their last cell.
fn sum_table(rows: Vec<Vec<String>>) -> Option<f64> {
	let rows: Vec<Vec<String>> = rows.into_iter().filter(|r| !r.is_empty()).collect();
	// whole lines drawn as single strings
	let rows: Vec<Vec<String>> = if rows.iter().all(|r| r.len() == 1) {
		rows.iter().map(|r| r.join(" ").split_whitespace().map(str::to_string).collect()).collect()
	} else {
		rows
	};
	let rows = regroup_single_cells(rows);

	let header_idx = rows.iter().position(|r| r.iter().any(|c| c.to_lowercase().contains("value"))).unwrap_or(0);
	let header = rows.get(header_idx)?;
	if header.is_empty() {
		return None;
	}
	let col = header.iter().position(|h| h.to_lowercase().contains("value")).unwrap_or(header.len() - 1);

	let mut sum = 0.0;
	let mut seen = 0;
	for row in &rows[header_idx + 1..] {
		let cell = if row.len() == header.len() { row.get(col) } else { row.last() };
		if let Some(n) = cell.and_then(|c| cell_number(c)) {
			sum += n;
			seen += 1;
		}
	}
	(seen > 0).then_some(sum)
}

/// One cell per row: the leading non-numeric cells are taken as the header and the rest is chunked to its width.
fn regroup_single_cells(rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
	if rows.len() < 2 || !rows.iter().all(|r| r.len() == 1) {
		return rows;
	}
	let cells: Vec<String> = rows.into_iter().flatten().collect();
	let width = cells.iter().take_while(|c| cell_number(c).is_none()).count();
	if width < 2 || width >= cells.len() {
		return cells.into_iter().map(|c| vec![c]).collect();
	}
	cells.chunks(width).map(<[String]>::to_vec).collect()
}

fn cell_number(cell: &str) -> Option<f64> {
	let cleaned: String = cell.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
	cleaned.parse::<f64>().ok()
}

/// A piece of text and the position of the line it was drawn on
struct TextRun {
	x: f64,
	y: f64,
	seq: usize,
	text: String,
}

fn positioned_rows(document: &Document, page_id: ObjectId) -> Result<Vec<Vec<String>>> {
	let data = document.get_page_content(page_id).map_err(|e| eyre!("Failed to read page content: {}", e))?;
	let content = Content::decode(&data).map_err(|e| eyre!("Failed to decode page content: {}", e))?;
	Ok(rows_from_runs(text_runs(&content.operations)))
}

/// Walk the text operators, tracking the line origin set by `BT`, `Td`/`TD`, `Tm` and `T*`.
fn text_runs(operations: &[Operation]) -> Vec<TextRun> {
	let mut runs = Vec::new();
	let (mut x, mut y, mut leading) = (0.0, 0.0, 0.0);
	for op in operations {
		let nums: Vec<f64> = op.operands.iter().filter_map(number).collect();
		match op.operator.as_str() {
			"BT" => (x, y) = (0.0, 0.0),
			"Td" | "TD" if nums.len() == 2 => {
				x += nums[0];
				y += nums[1];
				if op.operator == "TD" {
					leading = -nums[1];
				}
			}
			"Tm" if nums.len() == 6 => (x, y) = (nums[4], nums[5]),
			"TL" if nums.len() == 1 => leading = nums[0],
			"T*" => y -= leading,
			"Tj" | "TJ" | "'" | "\"" => {
				if matches!(op.operator.as_str(), "'" | "\"") {
					y -= leading;
				}
				let text: String = op.operands.iter().map(string_operand).collect();
				if !text.trim().is_empty() {
					runs.push(TextRun { x, y, seq: runs.len(), text });
				}
			}
			_ => {}
		}
	}
	runs
}

/// Group runs by baseline, top of the page first, each row ordered left to right.
/// Runs drawn at the same origin are joined into one cell.
fn rows_from_runs(mut runs: Vec<TextRun>) -> Vec<Vec<String>> {
	runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)).then(a.seq.cmp(&b.seq)));

	let mut lines: Vec<(f64, Vec<TextRun>)> = Vec::new();
	for run in runs {
		match lines.last_mut() {
			Some((y, line)) if (*y - run.y).abs() < ROW_TOLERANCE => line.push(run),
			_ => lines.push((run.y, vec![run])),
		}
	}

	lines
		.into_iter()
		.map(|(_, mut line)| {
			line.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.seq.cmp(&b.seq)));
			let mut cells: Vec<(f64, String)> = Vec::new();
			for run in line {
				match cells.last_mut() {
					Some((x, cell)) if (*x - run.x).abs() < f64::EPSILON => cell.push_str(&run.text),
					_ => cells.push((run.x, run.text)),
				}
			}
			cells.into_iter().map(|(_, c)| c.trim().to_string()).filter(|c| !c.is_empty()).collect()
		})
		.collect()
}

fn number(obj: &Object) -> Option<f64> {
	match obj {
		Object::Integer(i) => Some(*i as f64),
		Object::Real(r) => Some(*r as f64),
		_ => None,
	}
}

/// Text of a `Tj` string or `TJ` array. Single-byte encodings are read as Latin-1, UTF-16BE when marked.
fn string_operand(obj: &Object) -> String {
	match obj {
		Object::String(bytes, _) => match bytes.strip_prefix(&[0xFE, 0xFF]) {
			Some(utf16) => {
				let units: Vec<u16> = utf16.chunks_exact(2).map(|p| u16::from_be_bytes([p[0], p[1]])).collect();
				String::from_utf16_lossy(&units)
			}
			None => bytes.iter().map(|&b| b as char).collect(),
		},
		Object::Array(items) => items.iter().map(string_operand).collect(),
		_ => String::new(),
	}
}

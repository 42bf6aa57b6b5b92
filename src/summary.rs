use std::fmt::Write;

use chrono::SecondsFormat;

use crate::{
    search::{truncate_snippet, SearchResult},
    types::{FileMetadata, DOCUMENT_MIME, FOLDER_MIME, PDF_MIME, PRESENTATION_MIME, SPREADSHEET_MIME},
};

pub const NO_RESULTS: &str =
    "I couldn't find any relevant content in your Google Drive for that query.";

/// Number of results described in a summary.
const SUMMARY_RESULTS: usize = 3;
const SUMMARY_SNIPPET_CHARS: usize = 200;
const DETAIL_PREVIEW_CHARS: usize = 300;

/// Checked in order; the first substring found in the MIME type wins.
const GLYPHS: &[(&str, &str)] = &[
    (FOLDER_MIME, "📁"),
    (DOCUMENT_MIME, "📄"),
    (SPREADSHEET_MIME, "📊"),
    (PRESENTATION_MIME, "📈"),
    (PDF_MIME, "📕"),
    ("image/", "🖼"),
    ("video/", "🎥"),
];
const DEFAULT_GLYPH: &str = "📎";

pub fn glyph(mime_type: &str) -> &'static str {
    GLYPHS
        .iter()
        .find(|(key, _)| mime_type.contains(key))
        .map(|(_, glyph)| *glyph)
        .unwrap_or(DEFAULT_GLYPH)
}

fn modified(file: &FileMetadata) -> String {
    file.modified_time
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "Unknown".to_owned())
}

/// First `max_chars` characters of `s`, without a truncation mark.
fn prefix(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Render the short textual answer for a search.
pub fn render(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS.to_owned();
    }

    let mut out = format!(
        "Based on your search for '{}', I found {} relevant files:\n\n",
        query,
        results.len()
    );

    for (i, result) in results.iter().take(SUMMARY_RESULTS).enumerate() {
        let file = &result.file;
        let _ = writeln!(out, "{}. *{}* ({})", i + 1, file.name, glyph(&file.mime_type));
        let _ = writeln!(out, "   - Modified: {}", modified(file));
        let _ = writeln!(
            out,
            "   - Content snippet: {}...\n",
            prefix(&result.content_snippet, SUMMARY_SNIPPET_CHARS)
        );
    }

    if results.len() > SUMMARY_RESULTS {
        let _ = write!(out, "... and {} more files.", results.len() - SUMMARY_RESULTS);
    }

    out
}

/// Render every result with its metadata and a content preview.
pub fn render_details(results: &[SearchResult]) -> String {
    let mut out = String::new();

    for result in results {
        let file = &result.file;
        let _ = writeln!(out, "{} {}", glyph(&file.mime_type), file.name);
        let _ = writeln!(out, "   Type: {}", file.mime_type);
        let _ = writeln!(out, "   Modified: {}", modified(file));
        if let Some(size) = file.size {
            let _ = writeln!(out, "   Size: {} bytes", group_thousands(size));
        }
        let _ = writeln!(
            out,
            "   Preview: {}",
            truncate_snippet(&result.content_snippet, DETAIL_PREVIEW_CHARS)
        );
        if let Some(link) = &file.web_view_link {
            let _ = writeln!(out, "   Open in Drive: {link}");
        }
        out.push('\n');
    }

    out
}

/// Render the short list shown for the previous search.
pub fn render_previous(results: &[SearchResult]) -> String {
    results
        .iter()
        .take(SUMMARY_RESULTS)
        .map(|r| format!("- {} *{}*\n", glyph(&r.file.mime_type), r.file.name))
        .collect()
}

/// `1234567` -> `1,234,567`
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

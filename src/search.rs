//! Term-frequency search over the content of Drive files.
//!
//! A search asks Drive for a handful of candidates, fetches each one's text,
//! counts case-insensitive occurrences of the term, and keeps the files that
//! mention it, best first. Images have no searchable content, so they only
//! match on their file name.

use tracing::{debug, debug_span, info, warn};
use tracing_futures::Instrument;

use crate::{
    config::SearchConfig,
    drive::{list_files, DriveError, DriveProvider, FileQuery},
    extract::{extract, ExtractionError},
    types::{Category, FileMetadata},
};

pub const IMAGE_PLACEHOLDER: &str = "[Image file: content not searchable]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub term: String,
    pub category: Category,
}

impl SearchFilter {
    pub fn new(term: &str, category: Category) -> SearchFilter {
        SearchFilter {
            term: term.to_owned(),
            category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub file: FileMetadata,
    pub content_snippet: String,
    pub relevance: u64,
}

/// A candidate that could not be searched.
#[derive(Debug)]
pub struct SkippedFile {
    pub file: FileMetadata,
    pub reason: ExtractionError,
}

#[derive(Debug, Default)]
pub struct SearchReport {
    /// Matches, most relevant first.
    pub results: Vec<SearchResult>,
    pub skipped: Vec<SkippedFile>,
    /// Set when the candidate listing itself failed.
    pub listing_error: Option<DriveError>,
}

/// Search `provider` for files mentioning `filter.term`.
///
/// A term that is blank after trimming matches nothing, and Drive is not
/// contacted at all.
pub async fn search(
    provider: &dyn DriveProvider,
    filter: &SearchFilter,
    settings: &SearchConfig,
) -> SearchReport {
    let span = debug_span!("search", term = %filter.term, category = %filter.category);
    search_inner(provider, filter, settings).instrument(span).await
}

async fn search_inner(
    provider: &dyn DriveProvider,
    filter: &SearchFilter,
    settings: &SearchConfig,
) -> SearchReport {
    if filter.term.trim().is_empty() {
        debug!("empty search term, nothing to do");
        return SearchReport::default();
    }

    // Anything else is used exactly as typed, surrounding spaces included.
    let term = filter.term.as_str();
    let query = FileQuery::search(term, filter.category, settings.max_candidates);
    let listing = list_files(provider, &query).await;
    if let Some(e) = listing.error {
        return SearchReport {
            listing_error: Some(e),
            ..SearchReport::default()
        };
    }

    let needle = term.to_lowercase();
    let mut report = SearchReport::default();

    for file in listing.files {
        if file.is_image() {
            if image_matches(&file.name, &needle) {
                report.results.push(SearchResult {
                    file,
                    content_snippet: IMAGE_PLACEHOLDER.to_owned(),
                    relevance: 1,
                });
            }
            continue;
        }

        let content = match extract(provider, &file, settings.max_file_size).await {
            Ok(content) => content,
            Err(reason) => {
                warn!("skipping {} ({}): {reason}", file.name, file.id);
                report.skipped.push(SkippedFile { file, reason });
                continue;
            }
        };

        let relevance = count_occurrences(&content, &needle);
        if relevance > 0 {
            report.results.push(SearchResult {
                file,
                content_snippet: truncate_snippet(&content, settings.snippet_chars),
                relevance,
            });
        }
    }

    rank(&mut report.results, settings.max_results);
    info!(
        "{} match(es), {} skipped",
        report.results.len(),
        report.skipped.len()
    );
    report
}

/// Sort by descending relevance, keeping candidate order among equals, and
/// keep the best `max_results`.
pub fn rank(results: &mut Vec<SearchResult>, max_results: usize) {
    // sort_by is stable
    results.sort_by(|a, b| b.relevance.cmp(&a.relevance));
    results.truncate(max_results);
}

/// Number of non-overlapping occurrences of `needle` in `haystack`, ignoring
/// case. `needle` must already be lowercase.
pub fn count_occurrences(haystack: &str, needle: &str) -> u64 {
    if needle.is_empty() {
        return 0;
    }
    haystack.to_lowercase().matches(needle).count() as u64
}

/// Whether an image's name, without its extension, contains `needle`.
/// `needle` must already be lowercase.
pub fn image_matches(file_name: &str, needle: &str) -> bool {
    strip_extension(file_name).to_lowercase().contains(needle)
}

/// Drop the last `.ext` from a file name. Leading dots do not start an
/// extension, so `.bashrc` is kept whole.
pub fn strip_extension(file_name: &str) -> &str {
    let leading_dots = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name[leading_dots..].rfind('.') {
        Some(idx) => &file_name[..leading_dots + idx],
        None => file_name,
    }
}

/// Keep the first `max_chars` characters, marking a cut with `...`.
pub fn truncate_snippet(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_owned(),
    }
}

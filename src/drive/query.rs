use itertools::Itertools;
use tracing::{debug, warn};

use super::{DriveError, DriveProvider};
use crate::types::{Category, FileMetadata, DOCUMENT_MIME, PDF_MIME, SPREADSHEET_MIME};

/// Structured inputs for a `files.list` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQuery {
    pub text: Option<String>,
    pub parent_id: Option<String>,
    pub max_results: u32,
    pub category: Category,
}

impl FileQuery {
    pub fn search(text: &str, category: Category, max_results: u32) -> FileQuery {
        FileQuery {
            text: Some(text.to_owned()),
            parent_id: None,
            max_results,
            category,
        }
    }

    /// Build the Drive `q` expression. Clauses whose input is absent are left out.
    pub fn to_drive_query(&self) -> String {
        let mut clauses = Vec::new();

        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            clauses.push(format!("fullText contains '{}'", escape_literal(text)));
        }

        match self.parent_id.as_deref().filter(|p| !p.is_empty()) {
            Some(parent) => clauses.push(format!("'{}' in parents", escape_literal(parent))),
            None => clauses.push("trashed = false".to_owned()),
        }

        match self.category {
            Category::All => (),
            Category::Images => clauses.push("mimeType contains 'image/'".to_owned()),
            Category::Documents => clauses.push(format!(
                "(mimeType = '{DOCUMENT_MIME}' or mimeType = '{PDF_MIME}')"
            )),
            Category::Spreadsheets => clauses.push(format!("mimeType = '{SPREADSHEET_MIME}'")),
        }

        clauses.iter().join(" and ")
    }
}

/// Escape a value for use inside a single-quoted Drive query literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Files returned by a listing, plus the error that cut it short, if any.
#[derive(Debug, Default)]
pub struct ListOutcome {
    pub files: Vec<FileMetadata>,
    pub error: Option<DriveError>,
}

/// List files through `provider`. A failed listing is not an error for the
/// caller: it comes back as an empty file list carrying the error.
pub async fn list_files(provider: &dyn DriveProvider, query: &FileQuery) -> ListOutcome {
    match provider.list_files(query).await {
        Ok(files) => {
            debug!("listed {} file(s) from {}", files.len(), provider.get_provider_type());
            ListOutcome { files, error: None }
        }
        Err(e) => {
            warn!("error listing files: {e}");
            ListOutcome {
                files: Vec::new(),
                error: Some(e),
            }
        }
    }
}

use std::string::FromUtf8Error;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    drive::DriveProvider,
    types::{FileMetadata, DOCUMENT_MIME, PDF_MIME, SPREADSHEET_MIME},
};

pub const UNABLE_TO_EXTRACT: &str = "[Content - Unable to extract]";
pub const PDF_UNAVAILABLE: &str =
    "[PDF text extraction unavailable: PDF support not compiled in]";

/// Failures that make a file unsearchable. Anything softer than this comes
/// back as a marker string in place of the content.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("exported content is not valid UTF-8")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("file is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
}

/// Fetch the text content of `file`.
///
/// Provider failures do not produce an `Err`; they produce one of the bracketed
/// marker strings, which downstream code treats as ordinary text.
pub async fn extract(
    provider: &dyn DriveProvider,
    file: &FileMetadata,
    max_file_size: u64,
) -> Result<String, ExtractionError> {
    let mime_type = file.mime_type.as_str();

    if mime_type.contains(DOCUMENT_MIME) {
        return export_text(provider, &file.id, "text/plain").await;
    }
    if mime_type.contains(SPREADSHEET_MIME) {
        return export_text(provider, &file.id, "text/csv").await;
    }

    if let Some(size) = file.size {
        if size > max_file_size {
            return Err(ExtractionError::TooLarge {
                size,
                limit: max_file_size,
            });
        }
    }

    if mime_type.contains(PDF_MIME) {
        match provider.download_file(&file.id).await {
            Ok(bytes) => Ok(pdf_text(bytes).await),
            Err(e) => {
                warn!("could not download PDF {}: {e}", file.id);
                Ok(format!("[PDF Content - Unable to extract: {e}]"))
            }
        }
    } else {
        match provider.download_file(&file.id).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("could not download {}: {e}", file.id);
                Ok(UNABLE_TO_EXTRACT.to_owned())
            }
        }
    }
}

async fn export_text(
    provider: &dyn DriveProvider,
    file_id: &str,
    mime_type: &str,
) -> Result<String, ExtractionError> {
    match provider.export_file(file_id, mime_type).await {
        Ok(bytes) => {
            debug!("exported {file_id} as {mime_type}, {} bytes", bytes.len());
            Ok(String::from_utf8(bytes.to_vec())?)
        }
        Err(e) => {
            warn!("could not export {file_id}: {e}");
            Ok(format!("[Error extracting content: {e}]"))
        }
    }
}

/// Run the PDF text extractor on the blocking pool. A panic inside the
/// extractor is reported like any other extraction error.
#[cfg(feature = "pdf")]
async fn pdf_text(bytes: Bytes) -> String {
    match tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => format!("[PDF text extraction error: {e}]"),
        Err(e) => format!("[PDF text extraction error: {e}]"),
    }
}

#[cfg(not(feature = "pdf"))]
async fn pdf_text(_bytes: Bytes) -> String {
    PDF_UNAVAILABLE.to_owned()
}

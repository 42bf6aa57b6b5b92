use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::{auth::AuthError, types::FileMetadata};

pub mod gdrive;
#[cfg(test)]
pub mod memory;
pub mod query;

pub use query::{list_files, FileQuery};

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Drive API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// The three Drive operations the search needs.
#[async_trait]
pub trait DriveProvider: Send + Sync {
    fn get_provider_type(&self) -> &'static str;

    /// List files matching `query`, at most `query.max_results` of them.
    async fn list_files(&self, query: &FileQuery) -> Result<Vec<FileMetadata>, DriveError>;

    /// Export a native Google document to `mime_type`.
    async fn export_file(&self, file_id: &str, mime_type: &str) -> Result<Bytes, DriveError>;

    /// Download the raw bytes of a stored file.
    async fn download_file(&self, file_id: &str) -> Result<Bytes, DriveError>;
}

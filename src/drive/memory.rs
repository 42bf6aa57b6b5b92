use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{DriveError, DriveProvider, FileQuery};
use crate::types::{Category, FileMetadata, DOCUMENT_MIME, SPREADSHEET_MIME};

/// A drive held in memory, for exercising the search without Google.
///
/// Listing honours the category and the result limit, but not the full-text
/// clause, since Drive's full-text matching is only a pre-filter anyway.
#[derive(Default)]
pub struct MemoryDrive {
    files: Vec<MemoryFile>,
    list_error: Option<(u16, String)>,
    last_query: Mutex<Option<FileQuery>>,
}

struct MemoryFile {
    meta: FileMetadata,
    /// `None` makes every export or download of this file fail.
    content: Option<Vec<u8>>,
}

impl MemoryDrive {
    pub fn new() -> MemoryDrive {
        MemoryDrive::default()
    }

    pub fn with_file(mut self, meta: FileMetadata, content: &[u8]) -> MemoryDrive {
        self.files.push(MemoryFile {
            meta,
            content: Some(content.to_vec()),
        });
        self
    }

    /// Add a file that is listed, but whose content cannot be fetched.
    pub fn with_broken_file(mut self, meta: FileMetadata) -> MemoryDrive {
        self.files.push(MemoryFile {
            meta,
            content: None,
        });
        self
    }

    pub fn with_text_file(self, id: &str, name: &str, content: &str) -> MemoryDrive {
        self.with_file(
            FileMetadata::new(id, name, "text/plain"),
            content.as_bytes(),
        )
    }

    pub fn with_image(self, id: &str, name: &str) -> MemoryDrive {
        self.with_file(FileMetadata::new(id, name, "image/jpeg"), &[0xff, 0xd8])
    }

    pub fn failing_list(mut self, status: u16, message: &str) -> MemoryDrive {
        self.list_error = Some((status, message.to_owned()));
        self
    }

    pub fn last_query(&self) -> Option<FileQuery> {
        self.last_query.lock().unwrap().clone()
    }

    fn content(&self, file_id: &str) -> Result<(&FileMetadata, Bytes), DriveError> {
        self.files
            .iter()
            .find(|f| f.meta.id == file_id)
            .and_then(|f| f.content.as_ref().map(|c| (&f.meta, Bytes::from(c.clone()))))
            .ok_or_else(|| DriveError::Api {
                status: 404,
                message: format!("File not found: {file_id}."),
            })
    }
}

fn in_category(meta: &FileMetadata, category: Category) -> bool {
    match category {
        Category::All => true,
        Category::Images => meta.is_image(),
        Category::Documents => meta.is_document(),
        Category::Spreadsheets => meta.is_spreadsheet(),
    }
}

#[async_trait]
impl DriveProvider for MemoryDrive {
    fn get_provider_type(&self) -> &'static str {
        "memory"
    }

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<FileMetadata>, DriveError> {
        *self.last_query.lock().unwrap() = Some(query.clone());

        if let Some((status, message)) = &self.list_error {
            return Err(DriveError::Api {
                status: *status,
                message: message.clone(),
            });
        }

        Ok(self
            .files
            .iter()
            .map(|f| &f.meta)
            .filter(|meta| in_category(meta, query.category))
            .take(query.max_results as usize)
            .cloned()
            .collect())
    }

    async fn export_file(&self, file_id: &str, mime_type: &str) -> Result<Bytes, DriveError> {
        let (meta, content) = self.content(file_id)?;
        let exportable = match meta.mime_type.as_str() {
            DOCUMENT_MIME => mime_type == "text/plain",
            SPREADSHEET_MIME => mime_type == "text/csv",
            _ => false,
        };
        if exportable {
            Ok(content)
        } else {
            Err(DriveError::Api {
                status: 400,
                message: "Export only supports Docs Editors files.".to_owned(),
            })
        }
    }

    async fn download_file(&self, file_id: &str) -> Result<Bytes, DriveError> {
        let (meta, content) = self.content(file_id)?;
        if meta.mime_type.starts_with("application/vnd.google-apps.") {
            return Err(DriveError::Api {
                status: 403,
                message: "Only files with binary content can be downloaded.".to_owned(),
            });
        }
        Ok(content)
    }
}

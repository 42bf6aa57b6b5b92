use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";
pub const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
pub const PRESENTATION_MIME: &str = "application/vnd.google-apps.presentation";
pub const PDF_MIME: &str = "application/pdf";

/// A file as reported by the Drive `files.list` endpoint.
///
/// This is a snapshot of a single response, and is never cached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    /// Drive sends sizes as decimal strings.
    #[serde(default, deserialize_with = "de_opt_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub thumbnail_link: Option<String>,
    #[serde(default)]
    pub icon_link: Option<String>,
}

impl FileMetadata {
    /// Minimal metadata, mostly useful for building test fixtures.
    pub fn new(id: &str, name: &str, mime_type: &str) -> FileMetadata {
        FileMetadata {
            id: id.to_owned(),
            name: name.to_owned(),
            mime_type: mime_type.to_owned(),
            modified_time: None,
            size: None,
            parents: Vec::new(),
            web_view_link: None,
            thumbnail_link: None,
            icon_link: None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_document(&self) -> bool {
        self.mime_type == DOCUMENT_MIME || self.mime_type == PDF_MIME
    }

    pub fn is_spreadsheet(&self) -> bool {
        self.mime_type == SPREADSHEET_MIME
    }
}

fn de_opt_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Str(String),
        Num(u64),
    }

    match Option::<Size>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Size::Num(n)) => Ok(Some(n)),
        Some(Size::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// File category used to narrow a search on the Drive side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Category {
    #[default]
    All,
    Images,
    Documents,
    Spreadsheets,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::All => "All",
            Category::Images => "Images",
            Category::Documents => "Documents",
            Category::Spreadsheets => "Spreadsheets",
        };
        f.write_str(s)
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Category::All),
            "images" | "image" => Ok(Category::Images),
            "documents" | "document" | "docs" => Ok(Category::Documents),
            "spreadsheets" | "spreadsheet" | "sheets" => Ok(Category::Spreadsheets),
            other => Err(format!(
                "unknown category '{other}' (expected all, images, documents or spreadsheets)"
            )),
        }
    }
}

/// Top-level shape of a `files.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<FileMetadata>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GErrorTop {
    pub error: GErrorInner,
}

#[derive(Debug, Deserialize)]
pub struct GErrorInner {
    #[serde(default)]
    pub errors: Vec<GError>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct GError {
    pub reason: String,
}

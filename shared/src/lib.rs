//! Curator shared (e.g. protocol) code
//!
//! This crate contains code shared between the Curator server and its web UI. It consists of the
//! [serde](https://crates.io/crates/serde)-enabled structs and enums which define the client/server protocol,
//! plus a few small pure helpers used on both sides of that boundary.

#![deny(warnings)]

use {
    serde_derive::{Deserialize, Serialize},
    std::fmt::{self, Display},
};

/// Represents the filter fields of a `GET /` query string or `POST /` form
///
/// Every field is optional; `year` and `type` accept either a single value or a comma-separated list (e.g.
/// "2023,2024"). The server echoes this struct back in [SearchResponse] so the UI can refill its form.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct SearchRequest {
    /// Case-insensitive filename substring to match
    pub filename: Option<String>,

    /// Year or comma-separated list of years to match exactly
    pub year: Option<String>,

    /// File-type category or comma-separated list of categories to match exactly
    #[serde(rename = "type")]
    pub file_type: Option<String>,

    /// Comma-separated keywords, each of which must appear somewhere in the record
    pub keywords: Option<String>,
}

/// One row of search or browse metadata from the file index
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileHit {
    /// Absolute path of the indexed file, as recorded by the indexer
    pub path: String,

    pub filename: String,

    pub category_type: Option<String>,

    pub category_year: Option<i64>,

    /// Free-text summary produced by the indexer, if any
    pub summary: Option<String>,

    /// Comma-joined keyword list produced by the indexer, if any
    pub keywords: Option<String>,
}

/// A tag-cloud entry: a keyword, its corpus-wide frequency, and a visual weight
///
/// `font_scale` is a logarithmic scaling of `weight` into roughly the 1..=4 range; see the server's keyword
/// aggregation for the exact formula and its degenerate-case guards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeywordEntry {
    pub text: String,

    pub weight: u32,

    pub font_scale: f64,
}

/// Response to `GET /` and `POST /`
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct SearchResponse {
    /// Records matching the conjunction of all active filters, newest first; empty when no filter was active
    pub results: Vec<FileHit>,

    /// The criteria this response was produced from
    pub search: SearchRequest,

    /// Distinct non-empty file-type categories present in the index, for the type dropdown
    pub distinct_types: Vec<String>,

    /// Distinct years present in the index, descending, for the year dropdown
    pub distinct_years: Vec<i64>,

    /// Tag cloud over the whole corpus
    pub keywords: Vec<KeywordEntry>,

    pub notices: Vec<Notice>,
}

/// One segment of the browse-page breadcrumb trail
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub name: String,

    /// Archive-root-relative path this crumb links to (empty for the root itself)
    pub path: String,

    /// Whether this crumb is the page currently shown (rendered as text, not a link)
    pub is_last: bool,
}

/// A subdirectory listed on the browse page
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,

    /// Archive-root-relative path, suitable for a further `/browse/` link
    pub path: String,
}

/// A file listed on the browse page, with its index metadata when the path is indexed
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,

    /// Absolute path, matching the index's `path` column
    pub path: String,

    /// Index metadata, or `None` if the indexer has not seen this file
    pub info: Option<FileInfo>,
}

/// The subset of index metadata shown per file on the browse page
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub filename: String,

    pub category_type: Option<String>,

    pub category_year: Option<i64>,

    pub keywords: Option<String>,
}

/// Response to `GET /browse/` and `GET /browse/<path>`
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct BrowseResponse {
    /// The archive-root-relative path being listed ("/" for the root)
    pub current_path: String,

    pub breadcrumbs: Vec<Breadcrumb>,

    pub directories: Vec<DirectoryEntry>,

    pub files: Vec<FileEntry>,
}

/// One commit in the `GET /history` view, correlated with on-disk backup artifacts
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    /// Abbreviated hash, used for display and for backup-artifact correlation
    pub hash: String,

    pub full_hash: String,

    /// Commit date formatted as "YYYY-MM-DD HH:MM:SS"
    pub date: String,

    pub subject: String,

    pub author: String,

    /// Tag names pointing at this commit, extracted from the ref decorations
    pub tags: Vec<String>,

    /// "X.Y.Z" parsed from the first version-shaped tag (e.g. "v1.2.3"), if any
    pub version: Option<String>,

    /// Whether a `commit_<hash>.db` backup exists in the backup directory
    pub has_db_backup: bool,

    /// Whether a `commit_<hash>.zip` code snapshot exists in the backup directory
    pub has_code_backup: bool,

    /// Rendered HTML of this version's changelog section, when `version` is set and a section was found
    pub release_notes: Option<String>,
}

/// One version tag in the `GET /history` view
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub name: String,

    /// Abbreviated hash of the tagged commit
    pub hash: String,

    /// Tag creation date, date part only ("YYYY-MM-DD")
    pub date: String,

    pub subject: String,

    /// Rendered HTML of this version's changelog section, if any
    pub release_notes: Option<String>,
}

/// Response to `GET /history`
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct HistoryResponse {
    /// Recent commits, newest first; empty when git is unavailable
    pub commits: Vec<CommitEntry>,

    /// Version tags, newest first; empty when git is unavailable
    pub tags: Vec<TagEntry>,

    /// Manual backup filenames, newest first
    pub manual_backups: Vec<String>,

    /// Rendered HTML of the workflow-notes document (placeholder HTML when missing)
    pub workflow_notes: String,

    pub notices: Vec<Notice>,
}

/// One editable markdown document in the `GET /notes` view
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NoteDocument {
    pub filename: String,

    /// HTML-id-safe form of the filename; see [sanitize_id]
    pub id: String,

    pub content: String,

    /// True when the file exists but could not be read; `content` then holds a placeholder
    pub error: bool,
}

/// Response to `GET /notes`
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct NotesResponse {
    pub documents: Vec<NoteDocument>,

    pub notices: Vec<Notice>,
}

/// Form body of `POST /notes`
#[derive(Serialize, Deserialize, Debug)]
pub struct NoteUpdate {
    /// Must name one of the documents listed by `GET /notes`
    pub filename: String,

    pub content: String,
}

/// Severity of a [Notice]
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

impl Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A transient flash-style notice produced by a mutating request and shown on the next page load
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,

    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Convert a markdown filename into a string safe to use as an HTML element id
///
/// Strips a `.md` suffix, maps every character outside `[a-zA-Z0-9-]` to `-`, and trims leading/trailing
/// hyphens, falling back to "md-file" when nothing survives.
pub fn sanitize_id(filename: &str) -> String {
    let base = filename.strip_suffix(".md").unwrap_or(filename);

    let sanitized = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect::<String>();

    let sanitized = sanitized.trim_matches('-');

    if sanitized.is_empty() {
        "md-file".to_owned()
    } else {
        sanitized.to_owned()
    }
}

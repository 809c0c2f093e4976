//! Data model for the remote catalog: media items, albums and the
//! collection tree.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Kind of a media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// A single photo or video as reported by the remote catalog.
///
/// The `metadata` blob is preserved verbatim; the mirror snapshots it to
/// disk without owning its field set.
#[derive(Debug, Clone)]
pub struct MediaItem {
    /// Opaque remote id, stable and unique.
    pub id: String,
    pub kind: MediaKind,
    /// Upload time, the ascending pagination key and checkpoint cursor.
    pub uploaded_at: DateTime<Utc>,
    /// Capture time when the remote knows it.
    pub taken_at: Option<DateTime<Utc>>,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Original file format for photos (e.g. "jpg"). Unknown for videos
    /// until the download URL resolves.
    pub format: Option<String>,
    /// Full remote metadata blob, passed through untouched.
    pub metadata: Value,
}

impl MediaItem {
    /// Content file name in the photostream directory, derived solely from
    /// the id so album membership churn never renames it. `None` for videos,
    /// whose extension is only known once the download URL resolves.
    pub fn content_basename(&self) -> Option<String> {
        match self.kind {
            MediaKind::Photo => self
                .format
                .as_deref()
                .map(|fmt| format!("{}.{}", self.id, fmt)),
            MediaKind::Video => None,
        }
    }

    /// Timestamp used for mtime stamping: capture time when known,
    /// upload time otherwise.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.taken_at.unwrap_or(self.uploaded_at)
    }
}

/// An album: an ordered, named grouping of media items. The ordered
/// membership list is fetched separately via
/// [`super::RemoteCatalog::album_items`].
#[derive(Debug, Clone)]
pub struct Album {
    pub id: String,
    pub title: String,
    /// Remote-reported member count, used to size pagination.
    pub item_count: u64,
}

/// A collection: a named grouping of albums and nested collections.
#[derive(Debug, Clone)]
pub struct Collection {
    pub id: String,
    pub title: String,
    pub children: Vec<CollectionChild>,
}

#[derive(Debug, Clone)]
pub enum CollectionChild {
    Album { id: String, title: String },
    Collection(Collection),
}

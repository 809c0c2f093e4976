//! Remote catalog collaborator.
//!
//! The sync engine talks to the remote service exclusively through the
//! [`RemoteCatalog`] trait: paginated item listings ordered ascending by
//! upload time, per-album ordered membership, the collection tree, and
//! content byte streams. The concrete Flickr REST client lives in
//! [`flickr`]; tests substitute an in-memory implementation.

pub mod error;
pub mod flickr;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;

pub use error::CatalogError;
pub use types::{Album, Collection, CollectionChild, MediaItem};

/// Lazy, paginated item listing. Items arrive in ascending upload-time
/// order; an `Err` element means the listing is incomplete from that point.
pub type ItemStream<'a> = BoxStream<'a, Result<MediaItem, CatalogError>>;

/// Byte stream for a single content download.
pub type ContentStream = BoxStream<'static, Result<Bytes, CatalogError>>;

/// An opened content download: the file name the remote reports for the
/// original, plus its byte stream.
pub struct ContentDownload {
    pub basename: String,
    pub body: ContentStream,
}

#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Stream items uploaded at or after `since` (the entire catalog when
    /// `None`), ascending by upload time.
    fn items_since(&self, since: Option<DateTime<Utc>>) -> ItemStream<'_>;

    /// Total number of items `items_since` would yield. Used only to size
    /// progress reporting; a failure here is non-fatal.
    async fn item_total(&self, since: Option<DateTime<Utc>>) -> Result<u64, CatalogError>;

    /// All albums, without membership lists.
    async fn albums(&self) -> Result<Vec<Album>, CatalogError>;

    /// Ordered member item ids of one album. Order is display order and is
    /// preserved in the filesystem projection.
    async fn album_items(&self, album: &Album) -> Result<Vec<String>, CatalogError>;

    /// The collection tree (top-level collections with nested children).
    async fn collections(&self) -> Result<Vec<Collection>, CatalogError>;

    /// Open the original content for download.
    ///
    /// Returns `Ok(None)` for a video whose original the remote will not
    /// serve to API clients; such items become pending manual downloads.
    async fn open_content(&self, item: &MediaItem)
        -> Result<Option<ContentDownload>, CatalogError>;

    /// Manual-download URL shown to the operator for videos the API will
    /// not serve.
    fn manual_download_url(&self, item: &MediaItem) -> String;
}

//! Flickr REST implementation of [`RemoteCatalog`].
//!
//! Thin client over the `flickr.people.getPhotos` / `flickr.photosets.*` /
//! `flickr.collections.getTree` endpoints. Assumes a pre-authorized read
//! token supplied by the caller; the OAuth handshake is outside this
//! client's responsibility.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::debug;

use super::error::CatalogError;
use super::types::{Album, Collection, CollectionChild, MediaItem, MediaKind};
use super::{ContentDownload, ItemStream, RemoteCatalog};

const REST_ENDPOINT: &str = "https://api.flickr.com/services/rest/";

/// Page size for listing requests.
const ITEMS_PER_PAGE: u32 = 500;

/// Metadata fields requested with each item listing. The full per-item
/// response blob becomes the on-disk metadata snapshot.
const METADATA_EXTRAS: &str = "description,license,date_upload,date_taken,owner_name,\
     icon_server,original_format,last_update,geo,tags,machine_tags,o_dims,media,views";

pub struct FlickrCatalog {
    client: reqwest::Client,
    api_key: String,
    auth_token: Option<String>,
    /// NSID of the mirrored account, used in video download URLs.
    user_id: String,
}

impl FlickrCatalog {
    pub fn new(api_key: String, auth_token: Option<String>, user_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            auth_token,
            user_id,
        }
    }

    /// Issue one REST call and validate the envelope (`stat == "ok"`).
    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, CatalogError> {
        let mut query: Vec<(&str, String)> = vec![
            ("method", method.to_string()),
            ("api_key", self.api_key.clone()),
            ("format", "json".to_string()),
            ("nojsoncallback", "1".to_string()),
        ];
        if let Some(token) = &self.auth_token {
            query.push(("auth_token", token.clone()));
        }
        query.extend(params.iter().map(|(k, v)| (*k, v.clone())));

        let response = self
            .client
            .get(REST_ENDPOINT)
            .query(&query)
            .send()
            .await
            .map_err(|e| CatalogError::Http {
                source: e,
                context: format!("calling {}", method),
            })?;

        if !response.status().is_success() {
            return Err(CatalogError::HttpStatus {
                status: response.status().as_u16(),
                url: response.url().to_string(),
            });
        }

        let body: Value = response.json().await.map_err(|e| CatalogError::Http {
            source: e,
            context: format!("decoding {} response", method),
        })?;

        if body["stat"].as_str() != Some("ok") {
            return Err(CatalogError::Api {
                code: body["code"].as_i64().unwrap_or(-1),
                message: body["message"].as_str().unwrap_or("unknown").to_string(),
            });
        }

        Ok(body)
    }

    /// Fetch one photostream page. Returns the parsed items plus the total
    /// page count so the stream knows when to stop.
    async fn items_page(
        &self,
        since: Option<DateTime<Utc>>,
        page: u32,
    ) -> Result<(Vec<MediaItem>, u32), CatalogError> {
        let mut params = vec![
            ("user_id", "me".to_string()),
            ("extras", METADATA_EXTRAS.to_string()),
            ("per_page", ITEMS_PER_PAGE.to_string()),
            ("page", page.to_string()),
            ("sort", "date-posted-asc".to_string()),
        ];
        if let Some(ts) = since {
            params.push(("min_upload_date", ts.timestamp().to_string()));
        }

        let rsp = self
            .call("flickr.people.getPhotos", &params)
            .await
            .map_err(|e| CatalogError::listing("photostream", e))?;

        let pages = rsp["photos"]["pages"].as_u64().unwrap_or(0) as u32;
        let photos = rsp["photos"]["photo"]
            .as_array()
            .ok_or_else(|| CatalogError::Decode("listing photostream page".into()))?;

        let mut items = Vec::with_capacity(photos.len());
        for photo in photos {
            items.push(parse_item(photo)?);
        }
        debug!(page, pages, count = items.len(), "fetched photostream page");
        Ok((items, pages))
    }
}

#[async_trait]
impl RemoteCatalog for FlickrCatalog {
    fn items_since(&self, since: Option<DateTime<Utc>>) -> ItemStream<'_> {
        // Page-by-page unfold; each page is fetched lazily as the consumer
        // drains the previous one.
        stream::try_unfold((1u32, false), move |(page, done)| async move {
            if done {
                return Ok(None);
            }
            let (items, pages) = self.items_page(since, page).await?;
            if items.is_empty() {
                return Ok(None);
            }
            let finished = page >= pages;
            Ok(Some((items, (page + 1, finished))))
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<MediaItem, CatalogError>)))
        .try_flatten()
        .boxed()
    }

    async fn item_total(&self, since: Option<DateTime<Utc>>) -> Result<u64, CatalogError> {
        let mut params = vec![
            ("user_id", "me".to_string()),
            ("per_page", "1".to_string()),
        ];
        if let Some(ts) = since {
            params.push(("min_upload_date", ts.timestamp().to_string()));
        }
        let rsp = self.call("flickr.people.getPhotos", &params).await?;
        // Older API versions report `total` as a string.
        let total = match &rsp["photos"]["total"] {
            Value::Number(n) => n.as_u64().unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        };
        Ok(total)
    }

    async fn albums(&self) -> Result<Vec<Album>, CatalogError> {
        let rsp = self
            .call("flickr.photosets.getList", &[])
            .await
            .map_err(|e| CatalogError::listing("albums", e))?;

        let mut albums = Vec::new();
        if let Some(sets) = rsp["photosets"]["photoset"].as_array() {
            for set in sets {
                let id = set["id"]
                    .as_str()
                    .ok_or_else(|| CatalogError::Decode("listing albums".into()))?
                    .to_string();
                let title = json_content(&set["title"]);
                let photos = json_count(&set["photos"]);
                let videos = json_count(&set["videos"]);
                albums.push(Album {
                    id,
                    title,
                    item_count: photos + videos,
                });
            }
        }
        Ok(albums)
    }

    async fn album_items(&self, album: &Album) -> Result<Vec<String>, CatalogError> {
        let mut ids = Vec::with_capacity(album.item_count as usize);
        let mut page = 1u32;
        loop {
            let rsp = self
                .call(
                    "flickr.photosets.getPhotos",
                    &[
                        ("photoset_id", album.id.clone()),
                        ("extras", "media".to_string()),
                        ("per_page", ITEMS_PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await
                .map_err(|e| CatalogError::listing(format!("album {}", album.id), e))?;

            let pages = rsp["photoset"]["pages"].as_u64().unwrap_or(0) as u32;
            let photos = rsp["photoset"]["photo"].as_array().ok_or_else(|| {
                CatalogError::Decode(format!("listing album {} members", album.id))
            })?;
            for photo in photos {
                if let Some(id) = photo["id"].as_str() {
                    ids.push(id.to_string());
                }
            }
            if photos.is_empty() || page >= pages {
                return Ok(ids);
            }
            page += 1;
        }
    }

    async fn collections(&self) -> Result<Vec<Collection>, CatalogError> {
        let rsp = self
            .call("flickr.collections.getTree", &[])
            .await
            .map_err(|e| CatalogError::listing("collections", e))?;

        let mut tree = Vec::new();
        if let Some(collections) = rsp["collections"]["collection"].as_array() {
            for node in collections {
                tree.push(parse_collection(node)?);
            }
        }
        Ok(tree)
    }

    async fn open_content(
        &self,
        item: &MediaItem,
    ) -> Result<Option<ContentDownload>, CatalogError> {
        let (url, basename) = match item.kind {
            MediaKind::Photo => {
                let url = photo_original_url(&item.metadata)
                    .ok_or_else(|| CatalogError::Decode(format!("photo {} has no original URL fields", item.id)))?;
                let basename = item.content_basename().ok_or_else(|| {
                    CatalogError::Decode(format!("photo {} has no original format", item.id))
                })?;
                (url, basename)
            }
            MediaKind::Video => {
                let url = self.video_play_url(item);
                // The play URL redirects to the CDN; the final URL carries
                // the video's actual file name. A non-success answer means
                // the original cannot be fetched automatically.
                let head = self
                    .client
                    .head(&url)
                    .send()
                    .await
                    .map_err(|e| CatalogError::Http {
                        source: e,
                        context: format!("resolving video {}", item.id),
                    })?;
                if !head.status().is_success() {
                    return Ok(None);
                }
                let basename = head
                    .url()
                    .path_segments()
                    .and_then(|segments| segments.last())
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| format!("{}.mov", item.id));
                (url, basename)
            }
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogError::Http {
                source: e,
                context: format!("fetching {}", basename),
            })?;
        if !response.status().is_success() {
            return Err(CatalogError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let context = format!("streaming {}", basename);
        let body = response
            .bytes_stream()
            .map_err(move |e| CatalogError::Http {
                source: e,
                context: context.clone(),
            })
            .boxed();
        Ok(Some(ContentDownload { basename, body }))
    }

    fn manual_download_url(&self, item: &MediaItem) -> String {
        format!("https://www.flickr.com/video_download.gne?id={}", item.id)
    }
}

impl FlickrCatalog {
    fn video_play_url(&self, item: &MediaItem) -> String {
        let secret = item.metadata["originalsecret"].as_str().unwrap_or_default();
        format!(
            "https://www.flickr.com/photos/{}/{}/play/orig/{}/",
            self.user_id, item.id, secret
        )
    }
}

/// Original-size photo URL built from the listing fields.
fn photo_original_url(metadata: &Value) -> Option<String> {
    let farm = json_id(&metadata["farm"])?;
    let server = metadata["server"].as_str()?;
    let id = metadata["id"].as_str()?;
    let secret = metadata["originalsecret"].as_str()?;
    let format = metadata["originalformat"].as_str()?;
    Some(format!(
        "https://farm{}.staticflickr.com/{}/{}_{}_o.{}",
        farm, server, id, secret, format
    ))
}

/// Parse one photostream listing entry into a [`MediaItem`]. The raw entry
/// is preserved as the metadata blob.
fn parse_item(photo: &Value) -> Result<MediaItem, CatalogError> {
    let id = photo["id"]
        .as_str()
        .ok_or_else(|| CatalogError::Decode("item without id".into()))?
        .to_string();

    let kind = photo["media"]
        .as_str()
        .and_then(MediaKind::from_str)
        .ok_or_else(|| CatalogError::Decode(format!("item {} has unknown media type", id)))?;

    let uploaded_at = photo["dateupload"]
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .or_else(|| photo["dateupload"].as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| CatalogError::Decode(format!("item {} has no upload date", id)))?;

    let title = photo["title"].as_str().unwrap_or_default().to_string();
    let taken_at = parse_taken(photo, &title);

    let description = json_content(&photo["description"]);
    let tags = photo["tags"]
        .as_str()
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default();
    let format = photo["originalformat"].as_str().map(String::from);

    Ok(MediaItem {
        id,
        kind,
        uploaded_at,
        taken_at,
        title,
        description,
        tags,
        format,
        metadata: photo.clone(),
    })
}

/// Capture time resolution: `datetaken` unless the remote flags it unknown,
/// then a `YYYYMMDD_HHMMSS` title parse when plausible, then `datetaken`
/// anyway (the remote invents one even when unknown).
fn parse_taken(photo: &Value, title: &str) -> Option<DateTime<Utc>> {
    let datetaken = photo["datetaken"]
        .as_str()
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        .map(|naive| Utc.from_utc_datetime(&naive));

    if photo["datetakenunknown"].as_str() == Some("0") {
        return datetaken;
    }

    if let Ok(parsed) = NaiveDateTime::parse_from_str(title, "%Y%m%d_%H%M%S") {
        let parsed = Utc.from_utc_datetime(&parsed);
        if parsed.timestamp() > 946_684_800 && parsed < Utc::now() {
            return Some(parsed);
        }
    }

    datetaken
}

fn parse_collection(node: &Value) -> Result<Collection, CatalogError> {
    let id = node["id"]
        .as_str()
        .ok_or_else(|| CatalogError::Decode("collection without id".into()))?
        .to_string();
    let title = node["title"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| json_content(&node["title"]));

    let mut children = Vec::new();
    if let Some(sets) = node["set"].as_array() {
        for set in sets {
            let album_id = set["id"]
                .as_str()
                .ok_or_else(|| CatalogError::Decode(format!("collection {} album child without id", id)))?
                .to_string();
            let album_title = set["title"].as_str().unwrap_or_default().to_string();
            children.push(CollectionChild::Album {
                id: album_id,
                title: album_title,
            });
        }
    }
    if let Some(nested) = node["collection"].as_array() {
        for child in nested {
            children.push(CollectionChild::Collection(parse_collection(child)?));
        }
    }

    Ok(Collection {
        id,
        title,
        children,
    })
}

/// Extract a `{"_content": "..."}` wrapped string, tolerating plain strings.
fn json_content(value: &Value) -> String {
    value["_content"]
        .as_str()
        .or_else(|| value.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Numeric field that may arrive as a number or a string.
fn json_count(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

/// Numeric id field that may arrive as a number or a string.
fn json_id(value: &Value) -> Option<String> {
    value
        .as_u64()
        .map(|n| n.to_string())
        .or_else(|| value.as_str().map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing_photo() -> Value {
        json!({
            "id": "53001",
            "media": "photo",
            "dateupload": "1714557600",
            "datetaken": "2024-04-30 09:15:00",
            "datetakenunknown": "0",
            "title": "Harbour at dawn",
            "description": {"_content": "Early ferry"},
            "tags": "harbour dawn ferry",
            "originalformat": "jpg",
            "originalsecret": "abcdef",
            "farm": 66,
            "server": "65535",
            "views": "12"
        })
    }

    #[test]
    fn parse_item_basic_fields() {
        let item = parse_item(&listing_photo()).unwrap();
        assert_eq!(item.id, "53001");
        assert_eq!(item.kind, MediaKind::Photo);
        assert_eq!(item.uploaded_at.timestamp(), 1_714_557_600);
        assert_eq!(item.title, "Harbour at dawn");
        assert_eq!(item.description, "Early ferry");
        assert_eq!(item.tags, vec!["harbour", "dawn", "ferry"]);
        assert_eq!(item.format.as_deref(), Some("jpg"));
        // The metadata blob is the raw listing entry.
        assert_eq!(item.metadata["views"], json!("12"));
    }

    #[test]
    fn parse_item_taken_known() {
        let item = parse_item(&listing_photo()).unwrap();
        let taken = item.taken_at.unwrap();
        assert_eq!(
            taken,
            Utc.with_ymd_and_hms(2024, 4, 30, 9, 15, 0).unwrap()
        );
    }

    #[test]
    fn parse_item_taken_unknown_falls_back_to_title() {
        let mut photo = listing_photo();
        photo["datetakenunknown"] = json!("1");
        photo["title"] = json!("20230817_142530");
        let item = parse_item(&photo).unwrap();
        assert_eq!(
            item.taken_at.unwrap(),
            Utc.with_ymd_and_hms(2023, 8, 17, 14, 25, 30).unwrap()
        );
    }

    #[test]
    fn parse_item_taken_unknown_unparseable_title_uses_datetaken() {
        let mut photo = listing_photo();
        photo["datetakenunknown"] = json!("1");
        let item = parse_item(&photo).unwrap();
        assert_eq!(
            item.taken_at.unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 30, 9, 15, 0).unwrap()
        );
    }

    #[test]
    fn parse_item_rejects_missing_id() {
        let photo = json!({"media": "photo", "dateupload": "1"});
        assert!(parse_item(&photo).is_err());
    }

    #[test]
    fn parse_item_video() {
        let mut photo = listing_photo();
        photo["media"] = json!("video");
        let item = parse_item(&photo).unwrap();
        assert_eq!(item.kind, MediaKind::Video);
        assert_eq!(item.content_basename(), None);
    }

    #[test]
    fn photo_url_construction() {
        let url = photo_original_url(&listing_photo()).unwrap();
        assert_eq!(
            url,
            "https://farm66.staticflickr.com/65535/53001_abcdef_o.jpg"
        );
    }

    #[test]
    fn photo_url_missing_secret() {
        let mut photo = listing_photo();
        photo.as_object_mut().unwrap().remove("originalsecret");
        assert!(photo_original_url(&photo).is_none());
    }

    #[test]
    fn parse_collection_tree() {
        let node = json!({
            "id": "c1",
            "title": "Travel",
            "set": [
                {"id": "a1", "title": "Norway"},
                {"id": "a2", "title": "Japan"}
            ],
            "collection": [
                {"id": "c2", "title": "Old trips", "set": [{"id": "a3", "title": "2009"}]}
            ]
        });
        let col = parse_collection(&node).unwrap();
        assert_eq!(col.id, "c1");
        assert_eq!(col.title, "Travel");
        assert_eq!(col.children.len(), 3);
        match &col.children[2] {
            CollectionChild::Collection(nested) => {
                assert_eq!(nested.id, "c2");
                assert_eq!(nested.children.len(), 1);
            }
            other => panic!("expected nested collection, got {:?}", other),
        }
    }

    #[test]
    fn empty_collection_parses() {
        let col = parse_collection(&json!({"id": "c9", "title": "Empty"})).unwrap();
        assert!(col.children.is_empty());
    }

    #[test]
    fn json_helpers_tolerate_both_shapes() {
        assert_eq!(json_count(&json!(7)), 7);
        assert_eq!(json_count(&json!("7")), 7);
        assert_eq!(json_count(&json!(null)), 0);
        assert_eq!(json_content(&json!({"_content": "x"})), "x");
        assert_eq!(json_content(&json!("y")), "y");
        assert_eq!(json_id(&json!(66)).as_deref(), Some("66"));
        assert_eq!(json_id(&json!("66")).as_deref(), Some("66"));
    }
}

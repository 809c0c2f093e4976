//! Photostream materializer — ensures every planned item has a content
//! file and a metadata snapshot under the flat `photostream/` directory.
//!
//! Streaming pipeline in the download engine's shape: planned items are
//! piped into bounded-concurrency per-item futures as they arrive from the
//! API, so the first fetch starts before the listing finishes. Each item's
//! file operations are independent; a failure is counted and the pass
//! continues.

use std::collections::HashMap;
use std::fs::FileTimes;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures_util::stream::StreamExt;
use indicatif::ProgressBar;
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::catalog::types::MediaKind;
use crate::catalog::{ItemStream, MediaItem, RemoteCatalog};
use crate::mirror::error::FetchError;
use crate::mirror::paths;
use crate::mirror::{MirrorLayout, RunStats};
use crate::retry::{self, RetryAction, RetryConfig};
use crate::state::PendingStore;

/// Collaborators and knobs for one materialization pass.
pub struct MaterializeContext<'a> {
    pub catalog: &'a dyn RemoteCatalog,
    pub pending: &'a dyn PendingStore,
    pub layout: &'a MirrorLayout,
    pub include_views: bool,
    pub retry: RetryConfig,
}

/// How the pass ended, beyond the per-item counts in [`RunStats`].
#[derive(Debug, Default)]
pub struct MaterializeSummary {
    /// The item listing failed partway; the plan was incomplete.
    pub listing_failed: bool,
    /// The operator interrupted the pass.
    pub interrupted: bool,
}

/// Per-item result, aggregated into [`RunStats`] by the driver.
#[derive(Debug)]
enum ItemOutcome {
    New,
    Updated,
    /// Content and metadata already fresh on disk.
    Skipped,
    /// Video newly flagged for manual download.
    PendingNew { manual_url: String },
    /// Video already flagged on a previous run; not re-prompted.
    PendingKnown,
}

enum WorkResult {
    Item {
        id: String,
        result: Result<ItemOutcome, FetchError>,
    },
    ListingError(crate::catalog::CatalogError),
}

/// Drive the plan stream to completion, materializing items with bounded
/// concurrency.
pub async fn materialize_pass(
    ctx: &MaterializeContext<'_>,
    plan: ItemStream<'_>,
    existing: &HashMap<String, String>,
    pending: &HashMap<String, String>,
    concurrency: usize,
    progress: &ProgressBar,
    shutdown: &CancellationToken,
    stats: &mut RunStats,
) -> MaterializeSummary {
    let mut summary = MaterializeSummary::default();

    let mut work = plan
        .map(|result| async move {
            match result {
                Ok(item) => {
                    let id = item.id.clone();
                    let result = materialize_item(ctx, existing, pending, &item).await;
                    WorkResult::Item { id, result }
                }
                Err(e) => WorkResult::ListingError(e),
            }
        })
        .buffer_unordered(concurrency.max(1));

    while let Some(done) = work.next().await {
        if shutdown.is_cancelled() {
            progress.suspend(|| tracing::info!("shutdown requested, abandoning in-flight items"));
            summary.interrupted = true;
            break;
        }
        match done {
            WorkResult::ListingError(e) => {
                summary.listing_failed = true;
                progress.suspend(|| tracing::error!("item listing failed: {}", e));
            }
            WorkResult::Item { id, result } => {
                progress.set_message(id.clone());
                match result {
                    Ok(ItemOutcome::New) => stats.new_items += 1,
                    Ok(ItemOutcome::Updated) => stats.updated_items += 1,
                    Ok(ItemOutcome::Skipped) | Ok(ItemOutcome::PendingKnown) => {
                        stats.skipped_items += 1
                    }
                    Ok(ItemOutcome::PendingNew { manual_url }) => {
                        stats.pending_videos += 1;
                        progress.suspend(|| {
                            tracing::warn!("manual download required: {}", manual_url)
                        });
                    }
                    Err(e) => {
                        stats.errors += 1;
                        progress.suspend(|| tracing::error!("failed to mirror {}: {}", id, e));
                    }
                }
                progress.inc(1);
            }
        }
    }

    summary
}

/// Materialize one item: fetch content when stale or absent, keep the
/// metadata snapshot in step with the remote, stamp mtimes.
async fn materialize_item(
    ctx: &MaterializeContext<'_>,
    existing: &HashMap<String, String>,
    pending: &HashMap<String, String>,
    item: &MediaItem,
) -> Result<ItemOutcome, FetchError> {
    let snapshot = prepare_snapshot(item.metadata.clone(), ctx.include_views);

    // Resolve the on-disk basename without touching the network: a file
    // already in the photostream wins (covers manually downloaded videos),
    // then the pending registry's expected name, then the id+format rule.
    let known_basename = existing
        .get(&item.id)
        .or_else(|| pending.get(&item.id))
        .cloned()
        .or_else(|| item.content_basename());

    let (content_fresh, metadata_fresh) = match &known_basename {
        Some(name) => {
            let content = ctx.layout.photostream.join(name);
            let metadata = ctx.layout.photostream.join(paths::metadata_basename(name));
            (
                content.is_file(),
                metadata_matches(&metadata, &snapshot).await?,
            )
        }
        None => (false, false),
    };

    if content_fresh && metadata_fresh {
        let name = known_basename.expect("fresh files imply a known basename");
        stamp_mtimes(ctx.layout, &name, item.timestamp()).await?;
        if pending.contains_key(&item.id) {
            // The operator completed the manual download; stop tracking it.
            ctx.pending.remove(&item.id).await?;
        }
        return Ok(ItemOutcome::Skipped);
    }

    // A pending video with a fresh snapshot and no content yet: nothing to
    // do until the operator downloads it. Crucially, no re-prompt.
    if metadata_fresh && item.kind == MediaKind::Video && pending.contains_key(&item.id) {
        return Ok(ItemOutcome::PendingKnown);
    }

    let fetched = retry::retry_with_backoff(
        &ctx.retry,
        |e: &FetchError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || fetch_content(ctx, item),
    )
    .await?;

    let outcome = match fetched {
        Some(FetchedContent { basename, existed }) => {
            write_snapshot_if_different(ctx.layout, &basename, &snapshot).await?;
            stamp_mtimes(ctx.layout, &basename, item.timestamp()).await?;
            if pending.contains_key(&item.id) {
                ctx.pending.remove(&item.id).await?;
            }
            if existed {
                ItemOutcome::Updated
            } else {
                ItemOutcome::New
            }
        }
        None => {
            // Video original not obtainable: snapshot the metadata under the
            // expected future basename and flag it once.
            let basename = pending
                .get(&item.id)
                .cloned()
                .unwrap_or_else(|| format!("{}.mov", item.id));
            write_snapshot_if_different(ctx.layout, &basename, &snapshot).await?;
            if ctx.pending.insert(&item.id, &basename).await? {
                ItemOutcome::PendingNew {
                    manual_url: ctx.catalog.manual_download_url(item),
                }
            } else {
                ItemOutcome::PendingKnown
            }
        }
    };

    Ok(outcome)
}

struct FetchedContent {
    basename: String,
    /// Whether a previous version of the file was overwritten.
    existed: bool,
}

/// One fetch attempt: open the remote content and stream it through a
/// `.part` file into place. `None` means the original is not obtainable
/// (pending video), which is not a retryable condition.
async fn fetch_content(
    ctx: &MaterializeContext<'_>,
    item: &MediaItem,
) -> Result<Option<FetchedContent>, FetchError> {
    let download = match ctx.catalog.open_content(item).await? {
        Some(d) => d,
        None => return Ok(None),
    };

    let final_path = ctx.layout.photostream.join(&download.basename);
    let part_path = ctx.layout.photostream.join(format!("{}.part", download.basename));
    let existed = final_path.is_file();

    // Always start fresh so an aborted previous attempt can't leave a
    // truncated prefix in the file.
    let _ = fs::remove_file(&part_path).await;

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&part_path)
        .await?;

    let mut body = download.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    fs::rename(&part_path, &final_path).await?;
    tracing::debug!("fetched {}", final_path.display());

    Ok(Some(FetchedContent {
        basename: download.basename,
        existed,
    }))
}

/// The metadata snapshot with volatile fields the operator opted out of
/// removed.
fn prepare_snapshot(mut metadata: Value, include_views: bool) -> Value {
    if !include_views {
        if let Some(obj) = metadata.as_object_mut() {
            obj.remove("views");
        }
    }
    metadata
}

/// Whether the stored snapshot equals the remote blob. Compares parsed
/// values, not bytes, so formatting differences don't force rewrites.
async fn metadata_matches(path: &Path, snapshot: &Value) -> Result<bool, FetchError> {
    let contents = match fs::read(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<Value>(&contents) {
        Ok(stored) => Ok(&stored == snapshot),
        // A corrupt snapshot is simply rewritten.
        Err(_) => Ok(false),
    }
}

/// Write the metadata snapshot through a temp file, but only when it
/// differs from what is already stored, to avoid churning mtimes.
async fn write_snapshot_if_different(
    layout: &MirrorLayout,
    basename: &str,
    snapshot: &Value,
) -> Result<bool, FetchError> {
    let path = layout.photostream.join(paths::metadata_basename(basename));
    if metadata_matches(&path, snapshot).await? {
        return Ok(false);
    }
    let part = layout
        .photostream
        .join(format!("{}.part", paths::metadata_basename(basename)));
    let serialized =
        serde_json::to_vec(snapshot).map_err(|e| FetchError::Disk(std::io::Error::other(e)))?;
    fs::write(&part, serialized).await?;
    fs::rename(&part, &path).await?;
    tracing::debug!("updated metadata for {}", basename);
    Ok(true)
}

/// Set content and metadata mtimes to the item timestamp when they differ,
/// so the mirror carries capture dates instead of download dates.
async fn stamp_mtimes(
    layout: &MirrorLayout,
    basename: &str,
    timestamp: DateTime<Utc>,
) -> Result<(), FetchError> {
    for name in [basename.to_string(), paths::metadata_basename(basename)] {
        let path = layout.photostream.join(name);
        let ts = timestamp.timestamp();
        let result =
            tokio::task::spawn_blocking(move || set_mtime_if_different(&path, ts)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(join) => {
                return Err(FetchError::Disk(std::io::Error::other(join)));
            }
        }
    }
    Ok(())
}

/// Set a file's modification and access times to the given Unix timestamp
/// unless they already match. Pre-epoch timestamps clamp to the epoch.
fn set_mtime_if_different(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let desired = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
    };

    let metadata = std::fs::metadata(path)?;
    if let Ok(current) = metadata.modified() {
        if current == desired {
            return Ok(());
        }
    }

    let times = FileTimes::new().set_modified(desired).set_accessed(desired);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}

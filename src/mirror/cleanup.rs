//! Cleanup engine — opt-in removal of local entries whose remote entity no
//! longer exists.
//!
//! Runs strictly after projection so nothing is deleted before its
//! replacement was confirmed present. Every scope requires a *complete*
//! listing: the photostream scope takes its own fresh full id sweep, and
//! the album/collection scopes only act when this run's listings were
//! complete. A scope with a partial listing is skipped and reported.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use futures_util::stream::StreamExt;

use crate::catalog::RemoteCatalog;
use crate::mirror::paths;
use crate::mirror::{MirrorLayout, RunStats};
use crate::state::PendingStore;

/// Which scopes could not be cleaned because their listing was incomplete.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub items_skipped: bool,
    pub albums_skipped: bool,
    pub collections_skipped: bool,
}

impl CleanupReport {
    pub fn any_skipped(&self) -> bool {
        self.items_skipped || self.albums_skipped || self.collections_skipped
    }
}

/// Remove local entries absent from the remote.
///
/// `album_dirnames` / `collection_dirnames` are the directory names the
/// projector derived from complete listings this run; `None` means the
/// corresponding listing was partial and that scope must be skipped.
pub async fn run_cleanup(
    catalog: &dyn RemoteCatalog,
    layout: &MirrorLayout,
    pending: &dyn PendingStore,
    album_dirnames: Option<&HashSet<String>>,
    collection_dirnames: Option<&HashSet<String>>,
    stats: &mut RunStats,
) -> anyhow::Result<CleanupReport> {
    let mut report = CleanupReport::default();

    // Photostream scope: a fresh, full id sweep. Deleting from an
    // incremental or failed listing would remove items that merely predate
    // the checkpoint.
    match full_remote_id_sweep(catalog).await {
        Ok(remote_ids) => {
            cleanup_photostream(layout, pending, &remote_ids, stats).await?;
        }
        Err(e) => {
            tracing::error!("full item listing failed, skipping photostream cleanup: {}", e);
            report.items_skipped = true;
        }
    }

    match album_dirnames {
        Some(expected) => {
            cleanup_entity_dir(&layout.albums, expected, "album", stats)?;
        }
        None => {
            tracing::warn!("album listings were incomplete, skipping album cleanup");
            report.albums_skipped = true;
        }
    }

    match collection_dirnames {
        Some(expected) => {
            cleanup_entity_dir(&layout.collections, expected, "collection", stats)?;
        }
        None => {
            tracing::warn!("collection listing was incomplete, skipping collection cleanup");
            report.collections_skipped = true;
        }
    }

    Ok(report)
}

async fn full_remote_id_sweep(
    catalog: &dyn RemoteCatalog,
) -> Result<HashSet<String>, crate::catalog::CatalogError> {
    let mut ids = HashSet::new();
    let mut items = catalog.items_since(None);
    while let Some(result) = items.next().await {
        ids.insert(result?.id);
    }
    Ok(ids)
}

/// Remove orphaned content+metadata pairs, their unassigned symlinks, and
/// stale pending-video records.
async fn cleanup_photostream(
    layout: &MirrorLayout,
    pending: &dyn PendingStore,
    remote_ids: &HashSet<String>,
    stats: &mut RunStats,
) -> anyhow::Result<()> {
    if layout.photostream.is_dir() {
        for entry in fs::read_dir(&layout.photostream)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };

            // Temp residue from an interrupted run is always garbage.
            if name.ends_with(".part") {
                let _ = fs::remove_file(entry.path());
                continue;
            }

            let id = paths::item_id_from_basename(&name);
            if remote_ids.contains(id) {
                continue;
            }

            tracing::info!("deleting unknown file: {}", name);
            fs::remove_file(entry.path())?;
            if !paths::is_metadata_name(&name) {
                stats.deleted_items += 1;
                // The unassigned projection linked it by basename.
                let link = layout.unassigned.join(&name);
                if fs::symlink_metadata(&link).is_ok() {
                    fs::remove_file(&link)?;
                }
            }
        }
    }

    for (id, _) in pending.all().await? {
        if !remote_ids.contains(&id) {
            tracing::info!("dropping pending video {} no longer on the remote", id);
            pending.remove(&id).await?;
        }
    }

    Ok(())
}

/// Remove subtrees under `dir` whose name the projector no longer expects.
fn cleanup_entity_dir(
    dir: &Path,
    expected: &HashSet<String>,
    kind: &str,
    stats: &mut RunStats,
) -> anyhow::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if expected.contains(&name) {
            continue;
        }
        match paths::entity_id_from_dirname(&name) {
            Some(id) => tracing::info!("deleting {} {} ({})", kind, name, id),
            None => tracing::info!("deleting unknown entry under {}: {}", dir.display(), name),
        }
        let meta = fs::symlink_metadata(entry.path())?;
        if meta.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
        stats.deleted_items += 1;
    }
    Ok(())
}

//! Sync engine — plans, materializes, projects and cleans up the mirror.
//!
//! One invocation is one logical pass: Sync Planner → Photostream
//! Materializer → Filesystem Projector → Cleanup Engine, with the
//! checkpoint committed only after a pass that saw no errors. Interrupts
//! abandon in-flight work, still report statistics, and leave the
//! checkpoint untouched so the next run resumes completely.

pub mod cleanup;
pub mod error;
pub mod paths;
pub mod photostream;
pub mod plan;
pub mod project;

use std::collections::HashMap;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::catalog::RemoteCatalog;
use crate::checkpoint::CheckpointStore;
use crate::retry::RetryConfig;
use crate::state::PendingStore;

use photostream::MaterializeContext;
use plan::{KindFilter, SyncPlanner};

/// The mirror directory tree, per the authoritative layout.
#[derive(Debug, Clone)]
pub struct MirrorLayout {
    pub dest: PathBuf,
    pub photostream: PathBuf,
    pub albums: PathBuf,
    pub collections: PathBuf,
    pub unassigned: PathBuf,
}

impl MirrorLayout {
    pub fn new(dest: PathBuf) -> Self {
        Self {
            photostream: dest.join("photostream"),
            albums: dest.join("Albums"),
            collections: dest.join("Collections"),
            unassigned: dest.join("Not in any album"),
            dest,
        }
    }
}

/// Counts reported at the end of every run, interrupted or not.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub new_items: u64,
    pub updated_items: u64,
    pub skipped_items: u64,
    pub deleted_items: u64,
    pub pending_videos: u64,
    pub albums_updated: u64,
    pub collections_updated: u64,
    pub errors: u64,
}

impl RunStats {
    pub fn print_summary(&self) {
        println!("── Summary ──");
        println!("  new:                 {}", self.new_items);
        println!("  updated:             {}", self.updated_items);
        println!("  unchanged:           {}", self.skipped_items);
        println!("  deleted:             {}", self.deleted_items);
        println!("  pending videos:      {}", self.pending_videos);
        println!("  albums updated:      {}", self.albums_updated);
        println!("  collections updated: {}", self.collections_updated);
        println!("  errors:              {}", self.errors);
    }
}

/// Knobs for one pass, supplied by the CLI layer.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub ignore_photos: bool,
    pub ignore_videos: bool,
    pub delete_unknown: bool,
    pub include_views: bool,
    pub concurrency: usize,
    pub no_progress_bar: bool,
    pub retry: RetryConfig,
}

/// How the run ended, mapped to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunVerdict {
    Clean,
    ItemErrors,
    /// Cleanup was requested but a listing was partial, so it was skipped.
    CleanupSkipped,
    Interrupted,
}

impl RunVerdict {
    pub fn exit_code(self) -> i32 {
        match self {
            RunVerdict::Clean => 0,
            RunVerdict::ItemErrors => 1,
            RunVerdict::CleanupSkipped => 2,
            RunVerdict::Interrupted => 130,
        }
    }
}

/// Map every content file in the photostream to its item id.
/// Metadata snapshots and temp files are not content.
pub(crate) fn scan_photostream(dir: &Path) -> io::Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(map),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if paths::is_metadata_name(&name) || name.ends_with(".part") {
            continue;
        }
        map.insert(paths::item_id_from_basename(&name).to_string(), name);
    }
    Ok(map)
}

/// Progress bar for the materialization pass. Hidden when the operator
/// asked for quiet output or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

/// Run one full mirror pass. Always returns accumulated statistics; `Err`
/// is reserved for failures that invalidate the whole run (destination not
/// writable, checkpoint store broken).
pub async fn run_mirror(
    catalog: &dyn RemoteCatalog,
    checkpoints: &CheckpointStore,
    pending: &dyn PendingStore,
    layout: &MirrorLayout,
    opts: &MirrorOptions,
    shutdown: CancellationToken,
) -> anyhow::Result<(RunStats, RunVerdict)> {
    let mut stats = RunStats::default();

    if opts.ignore_photos && opts.ignore_videos {
        println!(
            "There is nothing to do because photos and videos are both ignored. \
             Mirror at least one of them."
        );
        return Ok((stats, RunVerdict::Clean));
    }

    println!("Mirroring into {}", layout.dest.display());
    let previous = checkpoints.load().context("loading checkpoint")?;
    match previous {
        Some(ts) => println!("Processing items uploaded at or after {}", ts),
        None => println!("No checkpoint found; performing a full sync"),
    }

    fs::create_dir_all(&layout.photostream)
        .with_context(|| format!("creating {}", layout.photostream.display()))?;

    // ── Plan and materialize ──

    let planner = SyncPlanner::new(
        previous,
        KindFilter {
            ignore_photos: opts.ignore_photos,
            ignore_videos: opts.ignore_videos,
        },
    );

    let total = match catalog.item_total(previous).await {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("item count unavailable: {}", e);
            0
        }
    };
    let progress = create_progress_bar(opts.no_progress_bar, total);

    let existing = scan_photostream(&layout.photostream)?;
    let pending_map = pending.all().await?;
    let ctx = MaterializeContext {
        catalog,
        pending,
        layout,
        include_views: opts.include_views,
        retry: opts.retry.clone(),
    };
    let summary = photostream::materialize_pass(
        &ctx,
        planner.plan(catalog),
        &existing,
        &pending_map,
        opts.concurrency,
        &progress,
        &shutdown,
        &mut stats,
    )
    .await;
    progress.finish_and_clear();

    let items_partial = summary.listing_failed;
    let mut interrupted = summary.interrupted || shutdown.is_cancelled();

    // ── Project the album/collection topology ──

    let mut album_projection = project::AlbumProjection {
        partial: true,
        ..Default::default()
    };
    let mut collection_projection = project::CollectionProjection {
        partial: true,
        ..Default::default()
    };

    if !interrupted {
        // Re-scan: materialization just added content. Pending videos are
        // linkable by their expected basename.
        let mut content_names = scan_photostream(&layout.photostream)?;
        for (id, basename) in pending.all().await? {
            content_names.entry(id).or_insert(basename);
        }

        album_projection = project::project_albums(
            catalog,
            layout,
            &content_names,
            opts.delete_unknown,
            opts.concurrency,
            &shutdown,
            &mut stats,
        )
        .await?;

        if album_projection.partial {
            tracing::warn!("album listings incomplete; skipping unassigned-items projection");
        } else {
            match project::project_unassigned(
                layout,
                &content_names,
                &album_projection.member_union,
                opts.delete_unknown,
            ) {
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("failed to project unassigned items: {}", e);
                    stats.errors += 1;
                }
            }
        }

        collection_projection =
            project::project_collections(catalog, layout, opts.delete_unknown, &mut stats).await?;

        interrupted = shutdown.is_cancelled();
    }

    // ── Cleanup (opt-in) ──

    let mut cleanup_skipped = false;
    if opts.delete_unknown {
        if interrupted {
            tracing::warn!("run interrupted; skipping cleanup");
        } else {
            let album_dirnames = (!album_projection.partial)
                .then_some(&album_projection.album_dirnames);
            let collection_dirnames = (!collection_projection.partial)
                .then_some(&collection_projection.collection_dirnames);
            let report = cleanup::run_cleanup(
                catalog,
                layout,
                pending,
                album_dirnames,
                collection_dirnames,
                &mut stats,
            )
            .await?;
            cleanup_skipped = report.any_skipped();
        }
    }

    // ── Report and commit ──

    stats.print_summary();

    if interrupted {
        tracing::warn!("interrupted; checkpoint left untouched");
        return Ok((stats, RunVerdict::Interrupted));
    }

    if items_partial || stats.errors > 0 {
        tracing::warn!(
            "{} errors this run; checkpoint left untouched so affected items are retried",
            stats.errors.max(1)
        );
        let verdict = if cleanup_skipped {
            RunVerdict::CleanupSkipped
        } else {
            RunVerdict::ItemErrors
        };
        return Ok((stats, verdict));
    }

    let commit = planner
        .cursor()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .commit_value(previous);
    if let Some(ts) = commit {
        checkpoints.commit(ts).context("committing checkpoint")?;
        println!("Next run will start from upload time {}", ts);
    }

    let verdict = if cleanup_skipped {
        RunVerdict::CleanupSkipped
    } else {
        RunVerdict::Clean
    };
    Ok((stats, verdict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::MockCatalog;
    use crate::catalog::types::{MediaItem, MediaKind};
    use crate::catalog::Album;
    use crate::state::SqlitePendingStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashSet;

    fn photo(id: &str, ts_secs: i64) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            kind: MediaKind::Photo,
            uploaded_at: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            taken_at: None,
            title: format!("photo {}", id),
            description: String::new(),
            tags: Vec::new(),
            format: Some("jpg".to_string()),
            metadata: json!({"id": id}),
        }
    }

    fn content(ids: &[&str]) -> HashMap<String, (String, Vec<u8>)> {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    (format!("{}.jpg", id), format!("bytes-{}", id).into_bytes()),
                )
            })
            .collect()
    }

    fn options() -> MirrorOptions {
        MirrorOptions {
            ignore_photos: false,
            ignore_videos: false,
            delete_unknown: false,
            include_views: true,
            concurrency: 2,
            no_progress_bar: true,
            retry: RetryConfig {
                max_retries: 0,
                base_delay_secs: 0,
                max_delay_secs: 0,
            },
        }
    }

    struct Fixture {
        _dest: tempfile::TempDir,
        _state: tempfile::TempDir,
        layout: MirrorLayout,
        checkpoints: CheckpointStore,
        pending: SqlitePendingStore,
    }

    fn fixture() -> Fixture {
        let dest = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        Fixture {
            layout: MirrorLayout::new(dest.path().to_path_buf()),
            checkpoints: CheckpointStore::new(state.path()),
            pending: SqlitePendingStore::open_in_memory().unwrap(),
            _dest: dest,
            _state: state,
        }
    }

    async fn run(fx: &Fixture, catalog: &MockCatalog, opts: &MirrorOptions) -> (RunStats, RunVerdict) {
        run_mirror(
            catalog,
            &fx.checkpoints,
            &fx.pending,
            &fx.layout,
            opts,
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn full_pass_mirrors_and_commits_checkpoint() {
        let fx = fixture();
        let catalog = MockCatalog {
            items: vec![photo("1", 100), photo("2", 200)],
            content: content(&["1", "2"]),
            albums: vec![Album {
                id: "al1".to_string(),
                title: "Trip".to_string(),
                item_count: 1,
            }],
            album_members: HashMap::from([("al1".to_string(), vec!["1".to_string()])]),
            ..Default::default()
        };

        let (stats, verdict) = run(&fx, &catalog, &options()).await;
        assert_eq!(verdict, RunVerdict::Clean);
        assert_eq!(stats.new_items, 2);
        assert_eq!(stats.errors, 0);

        assert!(fx.layout.photostream.join("1.jpg").is_file());
        assert!(fx.layout.photostream.join("2.jpg.metadata").is_file());
        assert!(fx.layout.albums.join("Trip - al1").join("1_1.jpg").exists());
        // Item 2 is in no album.
        assert!(fx.layout.unassigned.join("2.jpg").exists());

        assert_eq!(
            fx.checkpoints.load().unwrap(),
            Some(Utc.timestamp_opt(200, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn second_pass_is_incremental_and_quiet() {
        let fx = fixture();
        let catalog = MockCatalog {
            items: vec![photo("1", 100)],
            content: content(&["1"]),
            ..Default::default()
        };
        run(&fx, &catalog, &options()).await;

        // Same remote state: the boundary item is re-listed (inclusive
        // checkpoint) and skips; nothing changes.
        let (stats, verdict) = run(&fx, &catalog, &options()).await;
        assert_eq!(verdict, RunVerdict::Clean);
        assert_eq!(stats.new_items, 0);
        assert_eq!(stats.skipped_items, 1);
        assert_eq!(
            fx.checkpoints.load().unwrap(),
            Some(Utc.timestamp_opt(100, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn item_failure_blocks_checkpoint_and_sets_exit() {
        let fx = fixture();
        let catalog = MockCatalog {
            items: vec![photo("1", 100), photo("2", 200)],
            content: content(&["1"]), // item 2 404s
            ..Default::default()
        };
        let (stats, verdict) = run(&fx, &catalog, &options()).await;
        assert_eq!(verdict, RunVerdict::ItemErrors);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.new_items, 1);
        // The whole range is retried next run.
        assert_eq!(fx.checkpoints.load().unwrap(), None);
    }

    #[tokio::test]
    async fn nothing_removed_without_delete_unknown() {
        let fx = fixture();
        fs::create_dir_all(&fx.layout.photostream).unwrap();
        fs::write(fx.layout.photostream.join("ghost.jpg"), b"old").unwrap();
        fs::write(fx.layout.photostream.join("ghost.jpg.metadata"), b"{}").unwrap();

        let catalog = MockCatalog {
            items: vec![photo("1", 100)],
            content: content(&["1"]),
            ..Default::default()
        };
        let (stats, verdict) = run(&fx, &catalog, &options()).await;
        assert_eq!(verdict, RunVerdict::Clean);
        assert_eq!(stats.deleted_items, 0);
        assert!(fx.layout.photostream.join("ghost.jpg").exists());
        // It is not remote, but it is local, so it shows up as unassigned.
        assert!(fx.layout.unassigned.join("ghost.jpg").exists());
    }

    #[tokio::test]
    async fn delete_unknown_removes_orphans() {
        let fx = fixture();
        fs::create_dir_all(&fx.layout.photostream).unwrap();
        fs::write(fx.layout.photostream.join("ghost.jpg"), b"old").unwrap();
        fs::write(fx.layout.photostream.join("ghost.jpg.metadata"), b"{}").unwrap();
        fs::create_dir_all(fx.layout.albums.join("Gone - al9")).unwrap();

        let catalog = MockCatalog {
            items: vec![photo("1", 100)],
            content: content(&["1"]),
            ..Default::default()
        };
        let mut opts = options();
        opts.delete_unknown = true;
        let (stats, verdict) = run(&fx, &catalog, &opts).await;
        assert_eq!(verdict, RunVerdict::Clean);
        assert!(stats.deleted_items >= 1);
        assert!(!fx.layout.photostream.join("ghost.jpg").exists());
        assert!(!fx.layout.photostream.join("ghost.jpg.metadata").exists());
        assert!(!fx.layout.albums.join("Gone - al9").exists());
        assert!(fx.layout.photostream.join("1.jpg").exists());
    }

    #[tokio::test]
    async fn listing_failure_skips_cleanup_with_distinct_verdict() {
        let fx = fixture();
        fs::create_dir_all(&fx.layout.photostream).unwrap();
        fs::write(fx.layout.photostream.join("ghost.jpg"), b"old").unwrap();

        let catalog = MockCatalog {
            fail_item_listing: true,
            ..Default::default()
        };
        let mut opts = options();
        opts.delete_unknown = true;
        let (_, verdict) = run(&fx, &catalog, &opts).await;
        assert_eq!(verdict, RunVerdict::CleanupSkipped);
        assert!(fx.layout.photostream.join("ghost.jpg").exists());
        assert_eq!(fx.checkpoints.load().unwrap(), None);
    }

    #[tokio::test]
    async fn ignoring_both_kinds_is_a_noop() {
        let fx = fixture();
        let catalog = MockCatalog {
            items: vec![photo("1", 100)],
            content: content(&["1"]),
            ..Default::default()
        };
        let mut opts = options();
        opts.ignore_photos = true;
        opts.ignore_videos = true;
        let (stats, verdict) = run(&fx, &catalog, &opts).await;
        assert_eq!(verdict, RunVerdict::Clean);
        assert_eq!(stats.new_items, 0);
        assert!(!fx.layout.photostream.exists());
        assert_eq!(fx.checkpoints.load().unwrap(), None);
    }

    #[tokio::test]
    async fn kind_skip_keeps_checkpoint_reachable() {
        let fx = fixture();
        let video = MediaItem {
            kind: MediaKind::Video,
            format: None,
            ..photo("v1", 150)
        };
        let catalog = MockCatalog {
            items: vec![photo("1", 100), video, photo("2", 200)],
            content: content(&["1", "2"]),
            ..Default::default()
        };
        let mut opts = options();
        opts.ignore_videos = true;
        let (_, verdict) = run(&fx, &catalog, &opts).await;
        assert_eq!(verdict, RunVerdict::Clean);
        // The checkpoint stops at the skipped video so re-enabling videos
        // later still sees it.
        assert_eq!(
            fx.checkpoints.load().unwrap(),
            Some(Utc.timestamp_opt(150, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn interrupt_reports_stats_and_preserves_checkpoint() {
        let fx = fixture();
        let catalog = MockCatalog {
            items: vec![photo("1", 100)],
            content: content(&["1"]),
            ..Default::default()
        };
        let token = CancellationToken::new();
        token.cancel();
        let (_, verdict) = run_mirror(
            &catalog,
            &fx.checkpoints,
            &fx.pending,
            &fx.layout,
            &options(),
            token,
        )
        .await
        .unwrap();
        assert_eq!(verdict, RunVerdict::Interrupted);
        assert_eq!(fx.checkpoints.load().unwrap(), None);
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            RunVerdict::Clean.exit_code(),
            RunVerdict::ItemErrors.exit_code(),
            RunVerdict::CleanupSkipped.exit_code(),
            RunVerdict::Interrupted.exit_code(),
        ];
        let unique: HashSet<i32> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
        assert_eq!(RunVerdict::Clean.exit_code(), 0);
    }

    #[test]
    fn scan_ignores_metadata_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.jpg"), b"x").unwrap();
        fs::write(dir.path().join("1.jpg.metadata"), b"{}").unwrap();
        fs::write(dir.path().join("2.mov.part"), b"x").unwrap();
        let map = scan_photostream(dir.path()).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("1").map(String::as_str), Some("1.jpg"));
    }

    #[test]
    fn scan_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = scan_photostream(&dir.path().join("nope")).unwrap();
        assert!(map.is_empty());
    }
}

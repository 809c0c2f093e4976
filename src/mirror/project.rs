//! Filesystem projector — makes the on-disk album/collection tree
//! structurally equal to the remote topology.
//!
//! The only file-bearing leaves are symlinks into `photostream/`. Album
//! member entries encode `(position, id)` in their names, so reconciling a
//! directory is a set-difference between the parsed existing entries and
//! the desired set: stale entries are removed, missing ones created,
//! matching ones left untouched. A run against an unchanged topology
//! therefore mutates nothing.
//!
//! Planning (pure data) is separated from mutation so the diff logic is
//! testable without a filesystem.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::catalog::{Collection, CollectionChild, RemoteCatalog};
use crate::mirror::error::ProjectError;
use crate::mirror::paths;
use crate::mirror::{MirrorLayout, RunStats};

/// What a directory entry should be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredEntry {
    /// Relative symlink with the given target.
    Symlink(PathBuf),
    /// Real subdirectory (nested collection).
    Dir,
}

/// What a directory entry currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistingEntry {
    Symlink(PathBuf),
    Dir,
    File,
}

/// Pure reconciliation plan for one directory.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DirPlan {
    /// Entry names to remove (stale, repositioned or wrong target).
    pub remove: Vec<String>,
    /// Entries to create, in name order.
    pub create: Vec<(String, DesiredEntry)>,
    /// Entries already correct.
    pub kept: usize,
    /// Entries that are not part of the projection and were left alone.
    pub foreign: Vec<String>,
}

impl DirPlan {
    pub fn changes_anything(&self) -> bool {
        !self.remove.is_empty() || !self.create.is_empty()
    }
}

/// Counters from applying a [`DirPlan`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirMutations {
    pub created: usize,
    pub removed: usize,
    pub kept: usize,
}

impl DirMutations {
    pub fn changed(&self) -> bool {
        self.created + self.removed > 0
    }
}

/// Compute the set-difference between existing and desired entries.
///
/// `owned` decides, from the name convention, whether an entry belongs to
/// the projection. Owned symlinks are always reconciled (removed when
/// stale); anything else — directories, plain files, symlinks the
/// projection never wrote — is only scheduled for removal under
/// `remove_foreign` (the operator's `delete_unknown` opt-in).
pub fn plan_dir_changes(
    existing: &BTreeMap<String, ExistingEntry>,
    desired: &BTreeMap<String, DesiredEntry>,
    owned: impl Fn(&str) -> bool,
    remove_foreign: bool,
) -> DirPlan {
    let mut plan = DirPlan::default();

    for (name, current) in existing {
        match (current, desired.get(name)) {
            (ExistingEntry::Symlink(target), Some(DesiredEntry::Symlink(want)))
                if target == want =>
            {
                plan.kept += 1;
            }
            (ExistingEntry::Symlink(_), Some(want)) => {
                // Wrong target, or a symlink where a directory belongs; it
                // occupies a desired name either way.
                plan.remove.push(name.clone());
                plan.create.push((name.clone(), want.clone()));
            }
            (ExistingEntry::Symlink(_), None) if owned(name) => {
                plan.remove.push(name.clone());
            }
            (ExistingEntry::Dir, Some(DesiredEntry::Dir)) => {
                plan.kept += 1;
            }
            (_, desired_entry) => {
                // Foreign: a non-conforming symlink, a directory where the
                // projection wants none, or a plain file.
                if remove_foreign {
                    plan.remove.push(name.clone());
                    if let Some(want) = desired_entry {
                        plan.create.push((name.clone(), want.clone()));
                    }
                } else {
                    plan.foreign.push(name.clone());
                }
            }
        }
    }

    for (name, want) in desired {
        if !existing.contains_key(name) {
            plan.create.push((name.clone(), want.clone()));
        }
    }
    plan.create.sort_by(|a, b| a.0.cmp(&b.0));
    plan.create.dedup();

    plan
}

/// Classify the current entries of a directory by name.
pub fn read_dir_entries(dir: &Path) -> io::Result<BTreeMap<String, ExistingEntry>> {
    let mut entries = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(raw) => {
                tracing::warn!("ignoring non-UTF-8 entry {:?} in {}", raw, dir.display());
                continue;
            }
        };
        let meta = fs::symlink_metadata(entry.path())?;
        let existing = if meta.file_type().is_symlink() {
            ExistingEntry::Symlink(fs::read_link(entry.path())?)
        } else if meta.is_dir() {
            ExistingEntry::Dir
        } else {
            ExistingEntry::File
        };
        entries.insert(name, existing);
    }
    Ok(entries)
}

fn apply_dir_plan(dir: &Path, plan: &DirPlan) -> io::Result<DirMutations> {
    for name in &plan.remove {
        let path = dir.join(name);
        let meta = fs::symlink_metadata(&path)?;
        if meta.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        tracing::debug!("removed stale entry {}", path.display());
    }
    for (name, want) in &plan.create {
        let path = dir.join(name);
        match want {
            DesiredEntry::Symlink(target) => symlink(target, &path)?,
            DesiredEntry::Dir => fs::create_dir_all(&path)?,
        }
    }
    for name in &plan.foreign {
        tracing::warn!(
            "leaving unexpected entry {} alone (enable --delete-unknown to remove it)",
            dir.join(name).display()
        );
    }
    Ok(DirMutations {
        created: plan.create.len(),
        removed: plan.remove.len(),
        kept: plan.kept,
    })
}

/// Create `dir` if needed and make its entries match `desired`.
pub fn reconcile_dir(
    dir: &Path,
    desired: &BTreeMap<String, DesiredEntry>,
    owned: impl Fn(&str) -> bool,
    remove_foreign: bool,
) -> io::Result<DirMutations> {
    fs::create_dir_all(dir)?;
    let existing = read_dir_entries(dir)?;
    let plan = plan_dir_changes(&existing, desired, owned, remove_foreign);
    if plan.changes_anything() {
        tracing::debug!(
            "reconciling {}: {} stale, {} missing",
            dir.display(),
            plan.remove.len(),
            plan.create.len()
        );
    }
    apply_dir_plan(dir, &plan)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::other("symlinks are not supported on this platform"))
}

/// Result of projecting the albums tree.
#[derive(Debug, Default)]
pub struct AlbumProjection {
    /// Expected `Albums/` directory names, for cleanup.
    pub album_dirnames: HashSet<String>,
    /// Union of member ids across successfully listed albums.
    pub member_union: HashSet<String>,
    /// An album list or membership listing failed; the union is unreliable
    /// and cleanup must not trust this run's view.
    pub partial: bool,
}

/// Project every remote album as a directory of position-numbered symlinks.
pub async fn project_albums(
    catalog: &dyn RemoteCatalog,
    layout: &MirrorLayout,
    content_names: &HashMap<String, String>,
    delete_unknown: bool,
    concurrency: usize,
    shutdown: &CancellationToken,
    stats: &mut RunStats,
) -> Result<AlbumProjection, ProjectError> {
    let mut projection = AlbumProjection::default();

    let albums = match catalog.albums().await {
        Ok(albums) => albums,
        Err(e) => {
            tracing::error!("album listing failed, skipping album projection: {}", e);
            projection.partial = true;
            stats.errors += 1;
            return Ok(projection);
        }
    };

    fs::create_dir_all(&layout.albums)?;

    struct AlbumResult {
        dirname: String,
        members: Result<Vec<String>, ()>,
        changed: bool,
        io_failed: bool,
    }

    let results: Vec<AlbumResult> = stream::iter(albums.iter())
        .take_while(|_| std::future::ready(!shutdown.is_cancelled()))
        .map(|album| async move {
            let dirname = paths::entity_dirname(&album.title, &album.id);
            let members = match catalog.album_items(album).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!("skipping album {:?}: {}", album.title, e);
                    return AlbumResult {
                        dirname,
                        members: Err(()),
                        changed: false,
                        io_failed: false,
                    };
                }
            };

            let width = paths::position_width(members.len());
            let mut desired = BTreeMap::new();
            for (index, id) in members.iter().enumerate() {
                match content_names.get(id) {
                    Some(basename) => {
                        desired.insert(
                            paths::album_entry_name(index + 1, width, basename),
                            DesiredEntry::Symlink(paths::photostream_target(2, basename)),
                        );
                    }
                    None => {
                        tracing::warn!(
                            "album {:?}: item {} has no local content yet, not linking",
                            album.title,
                            id
                        );
                    }
                }
            }

            let dir = layout.albums.join(&dirname);
            // Only entries parsing back to (position, id) by the name
            // convention are ours to reposition or drop.
            let owned = |name: &str| paths::parse_album_entry(name).is_some();
            match reconcile_dir(&dir, &desired, owned, delete_unknown) {
                Ok(mutations) => {
                    if mutations.changed() {
                        tracing::info!("updated album {:?}", album.title);
                    }
                    AlbumResult {
                        dirname,
                        members: Ok(members),
                        changed: mutations.changed(),
                        io_failed: false,
                    }
                }
                Err(e) => {
                    tracing::error!("failed to reconcile album {:?}: {}", album.title, e);
                    AlbumResult {
                        dirname,
                        members: Ok(members),
                        changed: false,
                        io_failed: true,
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    if results.len() < albums.len() {
        // Interrupted before every album was visited.
        projection.partial = true;
    }

    for result in results {
        projection.album_dirnames.insert(result.dirname);
        match result.members {
            Ok(members) => projection.member_union.extend(members),
            Err(()) => {
                projection.partial = true;
                stats.errors += 1;
            }
        }
        if result.changed {
            stats.albums_updated += 1;
        }
        if result.io_failed {
            stats.errors += 1;
        }
    }

    Ok(projection)
}

/// Project items that belong to no album into the synthetic
/// `Not in any album/` directory. Entries carry no position prefix; the
/// layout dictates bare `<id>.<ext>` names.
pub fn project_unassigned(
    layout: &MirrorLayout,
    content_names: &HashMap<String, String>,
    member_union: &HashSet<String>,
    delete_unknown: bool,
) -> io::Result<DirMutations> {
    let mut desired = BTreeMap::new();
    for (id, basename) in content_names {
        if !member_union.contains(id) {
            desired.insert(
                basename.clone(),
                DesiredEntry::Symlink(paths::photostream_target(1, basename)),
            );
        }
    }
    // Every symlink in this directory is projection-derived.
    reconcile_dir(&layout.unassigned, &desired, |_| true, delete_unknown)
}

/// Result of projecting the collections tree.
#[derive(Debug, Default)]
pub struct CollectionProjection {
    /// Expected top-level `Collections/` directory names, for cleanup.
    pub collection_dirnames: HashSet<String>,
    pub partial: bool,
}

/// Project the collection tree: real directories for collections, relative
/// symlinks to `Albums/` for member albums, recursively.
pub async fn project_collections(
    catalog: &dyn RemoteCatalog,
    layout: &MirrorLayout,
    delete_unknown: bool,
    stats: &mut RunStats,
) -> Result<CollectionProjection, ProjectError> {
    let mut projection = CollectionProjection::default();

    let tree = match catalog.collections().await {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("collection listing failed, skipping collections: {}", e);
            projection.partial = true;
            stats.errors += 1;
            return Ok(projection);
        }
    };

    fs::create_dir_all(&layout.collections)?;

    let mut ancestors = Vec::new();
    for collection in &tree {
        projection
            .collection_dirnames
            .insert(paths::entity_dirname(&collection.title, &collection.id));
        // Top-level collection directories sit two levels below the mirror
        // root (dest/Collections/<name>).
        if let Err(e) =
            project_collection(&layout.collections, 2, collection, &mut ancestors, delete_unknown, stats)
        {
            tracing::error!("failed to project collection {:?}: {}", collection.title, e);
            stats.errors += 1;
        }
        debug_assert!(ancestors.is_empty());
    }

    Ok(projection)
}

fn project_collection(
    parent: &Path,
    depth: usize,
    collection: &Collection,
    ancestors: &mut Vec<String>,
    delete_unknown: bool,
    stats: &mut RunStats,
) -> Result<(), ProjectError> {
    if ancestors.iter().any(|id| id == &collection.id) {
        return Err(ProjectError::CollectionCycle {
            id: collection.id.clone(),
        });
    }

    let dir = parent.join(paths::entity_dirname(&collection.title, &collection.id));

    let mut desired = BTreeMap::new();
    for child in &collection.children {
        match child {
            CollectionChild::Album { id, title } => {
                let album_dirname = paths::entity_dirname(title, id);
                desired.insert(
                    album_dirname.clone(),
                    DesiredEntry::Symlink(paths::album_target(depth, &album_dirname)),
                );
            }
            CollectionChild::Collection(nested) => {
                desired.insert(
                    paths::entity_dirname(&nested.title, &nested.id),
                    DesiredEntry::Dir,
                );
            }
        }
    }

    let owned = |name: &str| paths::entity_id_from_dirname(name).is_some();
    let mutations = reconcile_dir(&dir, &desired, owned, delete_unknown)?;
    if mutations.changed() {
        tracing::info!("updated collection {:?}", collection.title);
        stats.collections_updated += 1;
    }

    ancestors.push(collection.id.clone());
    let result = collection
        .children
        .iter()
        .filter_map(|child| match child {
            CollectionChild::Collection(nested) => Some(nested),
            CollectionChild::Album { .. } => None,
        })
        .try_for_each(|nested| {
            project_collection(&dir, depth + 1, nested, ancestors, delete_unknown, stats)
        });
    ancestors.pop();
    result
}

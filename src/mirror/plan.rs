//! Sync planner — decides which items need a fetch/update pass this run.
//!
//! Wraps the catalog's ascending item stream with the checkpoint boundary
//! (inclusive, so items sharing the boundary timestamp are re-listed and
//! deduplicated by id), and the operator's kind selection. The plan is a
//! lazy stream; memory stays bounded however large the photostream is.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::stream::StreamExt;

use crate::catalog::types::MediaKind;
use crate::catalog::{ItemStream, RemoteCatalog};

/// Which item kinds the operator asked to mirror.
#[derive(Debug, Clone, Copy, Default)]
pub struct KindFilter {
    pub ignore_photos: bool,
    pub ignore_videos: bool,
}

impl KindFilter {
    pub fn allows(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Photo => !self.ignore_photos,
            MediaKind::Video => !self.ignore_videos,
        }
    }
}

/// Checkpoint-advancement bookkeeping collected while the plan is consumed.
///
/// The committed cursor must never move past an item that was skipped only
/// because its kind is disabled; otherwise re-enabling that kind later would
/// silently miss it.
#[derive(Debug, Default)]
pub struct PlanCursor {
    max_planned: Option<DateTime<Utc>>,
    min_kind_skipped: Option<DateTime<Utc>>,
}

impl PlanCursor {
    fn note_planned(&mut self, ts: DateTime<Utc>) {
        self.max_planned = Some(self.max_planned.map_or(ts, |m| m.max(ts)));
    }

    fn note_kind_skipped(&mut self, ts: DateTime<Utc>) {
        self.min_kind_skipped = Some(self.min_kind_skipped.map_or(ts, |m| m.min(ts)));
    }

    /// The value to commit after a clean pass, given the previous
    /// checkpoint. Clamped to the earliest kind-skipped item; never moves
    /// backwards; `None` only when there is nothing to commit at all.
    pub fn commit_value(&self, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let advanced = match (self.max_planned, self.min_kind_skipped) {
            (Some(planned), Some(skipped)) => Some(planned.min(skipped)),
            (Some(planned), None) => Some(planned),
            (None, Some(skipped)) => Some(skipped),
            (None, None) => None,
        };
        match (advanced, previous) {
            (Some(a), Some(prev)) => Some(a.max(prev)),
            (Some(a), None) => Some(a),
            (None, prev) => prev,
        }
    }
}

/// Plans one sync pass. Not resumable mid-pass; resumability lives in the
/// checkpoint, and restarting means replanning from scratch.
pub struct SyncPlanner {
    checkpoint: Option<DateTime<Utc>>,
    filter: KindFilter,
    cursor: Arc<Mutex<PlanCursor>>,
}

impl SyncPlanner {
    pub fn new(checkpoint: Option<DateTime<Utc>>, filter: KindFilter) -> Self {
        Self {
            checkpoint,
            filter,
            cursor: Arc::new(Mutex::new(PlanCursor::default())),
        }
    }

    /// Shared handle to the cursor bookkeeping, consulted after the pass.
    pub fn cursor(&self) -> Arc<Mutex<PlanCursor>> {
        Arc::clone(&self.cursor)
    }

    /// The lazy item plan. Listing errors pass through so the consumer can
    /// mark the run's listings as partial.
    pub fn plan<'a>(&self, catalog: &'a dyn RemoteCatalog) -> ItemStream<'a> {
        let checkpoint = self.checkpoint;
        let filter = self.filter;
        let cursor = Arc::clone(&self.cursor);
        let mut seen: HashSet<String> = HashSet::new();

        catalog
            .items_since(checkpoint)
            .filter_map(move |result| {
                let out = match result {
                    Err(e) => Some(Err(e)),
                    Ok(item) => {
                        if checkpoint.is_some_and(|cp| item.uploaded_at < cp) {
                            // The catalog should already honour the boundary;
                            // enforce it anyway.
                            None
                        } else if !seen.insert(item.id.clone()) {
                            // Boundary items shared with the previous run, or
                            // pagination overlap.
                            None
                        } else if !filter.allows(item.kind) {
                            tracing::debug!("{} {} ignored by kind filter", item.kind.as_str(), item.id);
                            let mut cursor = cursor.lock().unwrap_or_else(|e| e.into_inner());
                            cursor.note_kind_skipped(item.uploaded_at);
                            None
                        } else {
                            let mut cursor = cursor.lock().unwrap_or_else(|e| e.into_inner());
                            cursor.note_planned(item.uploaded_at);
                            Some(Ok(item))
                        }
                    }
                };
                futures_util::future::ready(out)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::MockCatalog;
    use crate::catalog::MediaItem;
    use chrono::TimeZone;
    use serde_json::json;

    fn item(id: &str, kind: MediaKind, ts_secs: i64) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            kind,
            uploaded_at: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            taken_at: None,
            title: String::new(),
            description: String::new(),
            tags: Vec::new(),
            format: Some("jpg".to_string()),
            metadata: json!({}),
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn collect_ids(planner: &SyncPlanner, catalog: &MockCatalog) -> Vec<String> {
        planner
            .plan(catalog)
            .map(|r| r.unwrap().id)
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn resume_plans_only_at_or_after_checkpoint() {
        let catalog = MockCatalog {
            items: vec![
                item("old", MediaKind::Photo, 99),
                item("boundary", MediaKind::Photo, 100),
                item("new", MediaKind::Photo, 101),
            ],
            ..Default::default()
        };
        let planner = SyncPlanner::new(Some(ts(100)), KindFilter::default());
        let ids = collect_ids(&planner, &catalog).await;
        assert_eq!(ids, vec!["boundary", "new"]);
    }

    #[tokio::test]
    async fn cold_sync_plans_everything() {
        let catalog = MockCatalog {
            items: vec![
                item("a", MediaKind::Photo, 1),
                item("b", MediaKind::Video, 2),
            ],
            ..Default::default()
        };
        let planner = SyncPlanner::new(None, KindFilter::default());
        let ids = collect_ids(&planner, &catalog).await;
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_ids_are_filtered() {
        let catalog = MockCatalog {
            items: vec![
                item("a", MediaKind::Photo, 100),
                item("a", MediaKind::Photo, 100),
                item("b", MediaKind::Photo, 100),
            ],
            ..Default::default()
        };
        let planner = SyncPlanner::new(Some(ts(100)), KindFilter::default());
        let ids = collect_ids(&planner, &catalog).await;
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn kind_filter_drops_disabled_kinds() {
        let catalog = MockCatalog {
            items: vec![
                item("p", MediaKind::Photo, 1),
                item("v", MediaKind::Video, 2),
            ],
            ..Default::default()
        };
        let planner = SyncPlanner::new(
            None,
            KindFilter {
                ignore_videos: true,
                ..Default::default()
            },
        );
        let ids = collect_ids(&planner, &catalog).await;
        assert_eq!(ids, vec!["p"]);
    }

    #[tokio::test]
    async fn kind_skip_clamps_checkpoint_advancement() {
        // A skipped video sits between two processed photos; the commit
        // value must not move past the video.
        let catalog = MockCatalog {
            items: vec![
                item("p1", MediaKind::Photo, 10),
                item("v1", MediaKind::Video, 20),
                item("p2", MediaKind::Photo, 30),
            ],
            ..Default::default()
        };
        let planner = SyncPlanner::new(
            None,
            KindFilter {
                ignore_videos: true,
                ..Default::default()
            },
        );
        let _ = collect_ids(&planner, &catalog).await;
        let cursor = planner.cursor();
        let commit = cursor.lock().unwrap().commit_value(None);
        assert_eq!(commit, Some(ts(20)));
    }

    #[tokio::test]
    async fn no_kind_skips_commits_max_planned() {
        let catalog = MockCatalog {
            items: vec![
                item("p1", MediaKind::Photo, 10),
                item("p2", MediaKind::Photo, 30),
            ],
            ..Default::default()
        };
        let planner = SyncPlanner::new(None, KindFilter::default());
        let _ = collect_ids(&planner, &catalog).await;
        let commit = planner.cursor().lock().unwrap().commit_value(None);
        assert_eq!(commit, Some(ts(30)));
    }

    #[test]
    fn commit_value_never_regresses() {
        let mut cursor = PlanCursor::default();
        cursor.note_planned(ts(50));
        assert_eq!(cursor.commit_value(Some(ts(100))), Some(ts(100)));
    }

    #[test]
    fn commit_value_empty_plan_keeps_previous() {
        let cursor = PlanCursor::default();
        assert_eq!(cursor.commit_value(Some(ts(100))), Some(ts(100)));
        assert_eq!(cursor.commit_value(None), None);
    }

    #[tokio::test]
    async fn listing_errors_pass_through() {
        let catalog = MockCatalog {
            fail_item_listing: true,
            ..Default::default()
        };
        let planner = SyncPlanner::new(None, KindFilter::default());
        let results: Vec<_> = planner.plan(&catalog).collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}

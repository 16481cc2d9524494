//! In-process backend emulating a shared database: conditional writes are atomic under a
//! single lock and every committed change is pushed on a broadcast feed.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{
    StreamExt,
    future::{BoxFuture, ready},
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::warn;

use super::{ChangeEvent, ChangeFeed, ChangeKind, ClaimBackend, GameRow};
use crate::dao::{
    models::{Claim, GameId},
    storage::StorageResult,
};

const FEED_CAPACITY: usize = 64;

/// Clones share the same rows and feed, like several clients of one database.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    rows: Mutex<BTreeMap<GameId, GameRow>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty database with no watchers.
    pub fn new() -> Self {
        let (changes, _receiver) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                rows: Mutex::new(BTreeMap::new()),
                changes,
            }),
        }
    }

    /// Write a row directly, bypassing the claim rules, and publish the change.
    ///
    /// Stands in for another client (or a manual edit) modifying the database.
    pub fn put_row(&self, row: GameRow) {
        let mut rows = self.rows();
        let id = row.id.clone();
        let kind = if rows.insert(id.clone(), row).is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Inserted
        };
        self.publish(kind, id);
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<GameId, GameRow>> {
        self.inner.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called with the rows lock held so feed order matches commit order.
    fn publish(&self, kind: ChangeKind, id: GameId) {
        // No receiver simply means no store is watching yet.
        let _ = self.inner.changes.send(ChangeEvent::new(kind, Some(id)));
    }

    fn claim(&self, id: GameId, claim: Claim) -> Option<GameRow> {
        let mut rows = self.rows();
        let row = rows.get_mut(&id).filter(|row| !row.is_claimed())?;
        row.set_claim(claim);
        let row = row.clone();
        self.publish(ChangeKind::Updated, id);
        Some(row)
    }

    fn release(&self, id: GameId) -> Option<GameRow> {
        let mut rows = self.rows();
        let row = rows.get_mut(&id)?;
        // Half-populated rows are unclaimed but still get cleaned up.
        if row.volunteer_parent.is_none() && row.volunteer_children.is_none() {
            return Some(row.clone());
        }
        row.clear_claim();
        let row = row.clone();
        self.publish(ChangeKind::Updated, id);
        Some(row)
    }
}

impl ClaimBackend for MemoryBackend {
    fn fetch_rows(&self) -> BoxFuture<'static, StorageResult<Vec<GameRow>>> {
        let mut rows: Vec<GameRow> = self.rows().values().cloned().collect();
        rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Box::pin(ready(Ok(rows)))
    }

    fn find_row(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
        let row = self.rows().get(&id).cloned();
        Box::pin(ready(Ok(row)))
    }

    fn insert_row(&self, row: GameRow) -> BoxFuture<'static, StorageResult<GameRow>> {
        self.put_row(row.clone());
        Box::pin(ready(Ok(row)))
    }

    fn claim_row_if_unclaimed(
        &self,
        id: GameId,
        claim: Claim,
    ) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
        Box::pin(ready(Ok(self.claim(id, claim))))
    }

    fn release_row(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
        Box::pin(ready(Ok(self.release(id))))
    }

    fn watch(&self) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
        let feed = BroadcastStream::new(self.inner.changes.subscribe())
            .map(|item| match item {
                Ok(event) => Ok(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "memory change feed lagged");
                    Ok(ChangeEvent::new(ChangeKind::Other, None))
                }
            })
            .boxed();
        Box::pin(ready(Ok(feed)))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn row(id: &str, date: time::OffsetDateTime) -> GameRow {
        GameRow {
            id: GameId::new(id),
            date,
            opponent: format!("Team {id}"),
            is_home: false,
            volunteer_parent: None,
            volunteer_children: None,
        }
    }

    #[tokio::test]
    async fn rows_are_ordered_by_date_then_id() {
        let backend = MemoryBackend::new();
        backend.put_row(row("b", datetime!(2025-06-02 10:00 UTC)));
        backend.put_row(row("c", datetime!(2025-06-01 10:00 UTC)));
        backend.put_row(row("a", datetime!(2025-06-02 10:00 UTC)));

        let ids: Vec<String> = backend
            .fetch_rows()
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.id.to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn conditional_claim_only_matches_unclaimed_rows() {
        let backend = MemoryBackend::new();
        backend.put_row(row("g", datetime!(2025-06-01 10:00 UTC)));

        let first = backend
            .claim_row_if_unclaimed(GameId::new("g"), Claim::new("Florent", "Léa"))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = backend
            .claim_row_if_unclaimed(GameId::new("g"), Claim::new("John", "Tom"))
            .await
            .unwrap();
        assert_eq!(second, None);

        let missing = backend
            .claim_row_if_unclaimed(GameId::new("nope"), Claim::new("John", "Tom"))
            .await
            .unwrap();
        assert_eq!(missing, None);

        let stored = backend.find_row(GameId::new("g")).await.unwrap().unwrap();
        assert_eq!(stored.claim(), Some(Claim::new("Florent", "Léa")));
    }

    #[tokio::test]
    async fn feed_reports_commits_but_not_noop_releases() {
        let backend = MemoryBackend::new();
        let mut feed = backend.watch().await.unwrap();

        backend.put_row(row("g", datetime!(2025-06-01 10:00 UTC)));
        backend.release_row(GameId::new("g")).await.unwrap();
        backend
            .claim_row_if_unclaimed(GameId::new("g"), Claim::new("Florent", "Léa"))
            .await
            .unwrap();

        let inserted = feed.next().await.unwrap().unwrap();
        assert_eq!(inserted.kind, ChangeKind::Inserted);
        assert_eq!(inserted.game_id, Some(GameId::new("g")));
        let updated = feed.next().await.unwrap().unwrap();
        assert_eq!(updated.kind, ChangeKind::Updated);

        let quiet =
            tokio::time::timeout(std::time::Duration::from_millis(20), feed.next()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn half_populated_row_is_claimable_and_releasable() {
        let backend = MemoryBackend::new();
        let mut broken = row("g", datetime!(2025-06-01 10:00 UTC));
        broken.volunteer_parent = Some("orphan".into());
        backend.put_row(broken);

        let released = backend.release_row(GameId::new("g")).await.unwrap().unwrap();
        assert_eq!(released.volunteer_parent, None);

        backend.put_row({
            let mut broken = row("h", datetime!(2025-06-01 10:00 UTC));
            broken.volunteer_children = Some("orphan".into());
            broken
        });
        let claimed = backend
            .claim_row_if_unclaimed(GameId::new("h"), Claim::new("Florent", "Léa"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.claim(), Some(Claim::new("Florent", "Léa")));
    }
}

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, future::BoxFuture};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use super::{ClaimStore, Listener, ListenerRegistry, Subscription};
use crate::dao::{
    backend::{ChangeFeed, ClaimBackend, GameRow},
    models::{Claim, GameEntity, GameId, NewGame},
    storage::{ClaimError, ClaimResult, StorageResult},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Store whose games live in a database shared with other processes.
///
/// Claims go through the backend's conditional write, so concurrent claimers in
/// different processes cannot both win. Subscribers are fed exclusively from the
/// backend change feed: local and foreign writes reach them the same way, once per
/// committed change.
pub struct SyncedClaimStore<B: ClaimBackend> {
    backend: Arc<B>,
    listeners: ListenerRegistry,
    feed_task: JoinHandle<()>,
}

impl<B: ClaimBackend> SyncedClaimStore<B> {
    /// Open the backend change feed and start relaying it to subscribers.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(backend: B) -> StorageResult<Self> {
        let backend = Arc::new(backend);
        let listeners = ListenerRegistry::new();
        let feed = backend.watch().await?;
        let feed_task = tokio::spawn(relay_changes(backend.clone(), listeners.clone(), feed));
        info!("change feed established");

        Ok(Self {
            backend,
            listeners,
            feed_task,
        })
    }

    /// Backend the store writes to.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: ClaimBackend> Drop for SyncedClaimStore<B> {
    fn drop(&mut self) {
        self.feed_task.abort();
    }
}

impl<B: ClaimBackend> ClaimStore for SyncedClaimStore<B> {
    fn list_games(&self) -> BoxFuture<'static, ClaimResult<Vec<GameEntity>>> {
        let backend = self.backend.clone();
        Box::pin(async move { Ok(fetch_games(backend.as_ref()).await?) })
    }

    fn add_game(&self, game: NewGame) -> BoxFuture<'static, ClaimResult<GameEntity>> {
        let backend = self.backend.clone();
        Box::pin(async move {
            let row: GameRow = game.into_entity(GameId::random()).into();
            let stored = backend.insert_row(row).await?;
            debug!(game_id = %stored.id, opponent = %stored.opponent, "game added");
            Ok(stored.into())
        })
    }

    fn claim_game(
        &self,
        id: GameId,
        claim: Claim,
    ) -> BoxFuture<'static, ClaimResult<GameEntity>> {
        let backend = self.backend.clone();
        Box::pin(async move {
            // Half-filled columns read back as unclaimed, so such a write would not hold.
            if !claim.is_complete() {
                return Err(ClaimError::IncompleteClaim);
            }
            if let Some(row) = backend
                .claim_row_if_unclaimed(id.clone(), claim)
                .await?
            {
                debug!(game_id = %id, "game claimed");
                return Ok(row.into());
            }

            // The conditional write matched nothing: tell a missing game apart from one
            // somebody else holds.
            match backend.find_row(id.clone()).await? {
                Some(_) => {
                    debug!(game_id = %id, "claim rejected; game already claimed");
                    Err(ClaimError::AlreadyClaimed(id))
                }
                None => Err(ClaimError::NotFound(id)),
            }
        })
    }

    fn release_game(&self, id: GameId) -> BoxFuture<'static, ClaimResult<GameEntity>> {
        let backend = self.backend.clone();
        Box::pin(async move {
            match backend.release_row(id.clone()).await? {
                Some(row) => {
                    debug!(game_id = %id, "game released");
                    Ok(row.into())
                }
                None => Err(ClaimError::NotFound(id)),
            }
        })
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    fn health_check(&self) -> BoxFuture<'static, ClaimResult<()>> {
        let backend = self.backend.clone();
        Box::pin(async move { Ok(backend.health_check().await?) })
    }
}

async fn fetch_games<B: ClaimBackend>(backend: &B) -> StorageResult<Vec<GameEntity>> {
    let rows = backend.fetch_rows().await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// Refetch the canonical list and hand it to every subscriber.
async fn refresh<B: ClaimBackend>(backend: &B, listeners: &ListenerRegistry) {
    match fetch_games(backend).await {
        Ok(games) => listeners.notify(&games),
        Err(err) => warn!(error = %err, "failed to refetch games after change"),
    }
}

/// Relay backend changes for the lifetime of the store, reopening the feed with
/// exponential backoff whenever it fails or ends.
async fn relay_changes<B: ClaimBackend>(
    backend: Arc<B>,
    listeners: ListenerRegistry,
    mut feed: ChangeFeed,
) {
    loop {
        while let Some(item) = feed.next().await {
            match item {
                Ok(event) => {
                    debug!(kind = ?event.kind, game_id = ?event.game_id, "backend change received");
                    refresh(backend.as_ref(), &listeners).await;
                }
                Err(err) => {
                    warn!(error = %err, "change feed failed");
                    break;
                }
            }
        }

        warn!("change feed interrupted; reconnecting");
        feed = reopen_feed(backend.as_ref()).await;
        info!("change feed re-established");
        // Changes committed while the feed was down produced no event.
        refresh(backend.as_ref(), &listeners).await;
    }
}

async fn reopen_feed<B: ClaimBackend>(backend: &B) -> ChangeFeed {
    let mut delay = INITIAL_DELAY;
    loop {
        sleep(delay).await;
        match backend.watch().await {
            Ok(feed) => return feed,
            Err(err) => {
                warn!(error = %err, "change feed reconnect attempt failed");
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use futures::{future::ready, stream};
    use time::macros::datetime;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::dao::{
        backend::{ChangeEvent, ChangeKind, MemoryBackend},
        storage::StorageError,
    };

    const WAIT: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(100);

    fn team(opponent: &str, date: time::OffsetDateTime) -> NewGame {
        NewGame {
            date,
            opponent: opponent.into(),
            is_home: true,
        }
    }

    fn channel_listener() -> (Listener, mpsc::UnboundedReceiver<Vec<GameEntity>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Listener = Box::new(move |games: Vec<GameEntity>| {
            let _ = tx.send(games);
        });
        (listener, rx)
    }

    async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<Vec<GameEntity>>) -> Vec<GameEntity> {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a snapshot")
            .expect("listener channel closed")
    }

    /// A closed channel counts as quiet: unsubscribing drops the listener and its sender.
    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Vec<GameEntity>>) {
        let received = timeout(QUIET, rx.recv()).await;
        assert!(
            matches!(received, Err(_) | Ok(None)),
            "unexpected snapshot"
        );
    }

    #[tokio::test]
    async fn scenario_add_claim_conflict_release() {
        let store = SyncedClaimStore::start(MemoryBackend::new()).await.unwrap();
        assert!(store.list_games().await.unwrap().is_empty());

        let date = datetime!(2025-04-12 14:30 UTC);
        let game = store.add_game(team("Team C", date)).await.unwrap();
        assert_eq!(game.opponent, "Team C");
        assert_eq!(game.date, date);
        assert_eq!(game.claim, None);
        assert_eq!(store.list_games().await.unwrap(), vec![game.clone()]);

        let claimed = store
            .claim_game(game.id.clone(), Claim::new("Florent", "Léa"))
            .await
            .unwrap();
        assert_eq!(claimed.claim, Some(Claim::new("Florent", "Léa")));

        let err = store
            .claim_game(game.id.clone(), Claim::new("John", "Tom"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimed(_)));

        let released = store.release_game(game.id.clone()).await.unwrap();
        assert_eq!(released.claim, None);
        assert_eq!(store.list_games().await.unwrap()[0].claim, None);
    }

    #[tokio::test]
    async fn incomplete_claims_are_rejected_before_writing() {
        let store = SyncedClaimStore::start(MemoryBackend::new()).await.unwrap();
        let game = store
            .add_game(team("Team F", datetime!(2025-04-12 14:30 UTC)))
            .await
            .unwrap();

        let err = store
            .claim_game(game.id.clone(), Claim::new("Florent", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::IncompleteClaim));
        let row = store.backend().find_row(game.id.clone()).await.unwrap().unwrap();
        assert_eq!(row.volunteer_parent, None);

        store
            .claim_game(game.id.clone(), Claim::new("John", "Tom"))
            .await
            .unwrap();
        let err = store
            .claim_game(game.id.clone(), Claim::new("Florent", "Léa"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimed(_)));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = SyncedClaimStore::start(MemoryBackend::new()).await.unwrap();

        let err = store
            .claim_game("does-not-exist".into(), Claim::new("Florent", "Léa"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::NotFound(_)));

        let err = store
            .release_game("does-not-exist".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::NotFound(_)));
    }

    #[tokio::test]
    async fn every_mutation_yields_exactly_one_snapshot() {
        let store = SyncedClaimStore::start(MemoryBackend::new()).await.unwrap();
        let (listener, mut rx) = channel_listener();
        let subscription = store.subscribe(listener);

        let game = store
            .add_game(team("Team G", datetime!(2025-04-12 14:30 UTC)))
            .await
            .unwrap();
        assert_eq!(next_snapshot(&mut rx).await, vec![game.clone()]);
        assert_quiet(&mut rx).await;

        store
            .claim_game(game.id.clone(), Claim::new("Florent", "Léa"))
            .await
            .unwrap();
        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot[0].claim, Some(Claim::new("Florent", "Léa")));
        assert_quiet(&mut rx).await;

        store.release_game(game.id.clone()).await.unwrap();
        assert_eq!(next_snapshot(&mut rx).await[0].claim, None);
        assert_quiet(&mut rx).await;

        // Nothing to commit: no snapshot.
        store.release_game(game.id.clone()).await.unwrap();
        assert_quiet(&mut rx).await;

        subscription.unsubscribe();
        store
            .add_game(team("Team H", datetime!(2025-04-13 14:30 UTC)))
            .await
            .unwrap();
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn foreign_writes_reach_local_subscribers() {
        let backend = MemoryBackend::new();
        let ours = SyncedClaimStore::start(backend.clone()).await.unwrap();
        let theirs = SyncedClaimStore::start(backend).await.unwrap();
        let (listener, mut rx) = channel_listener();
        let _subscription = ours.subscribe(listener);

        let game = theirs
            .add_game(team("Team X", datetime!(2025-04-12 14:30 UTC)))
            .await
            .unwrap();
        assert_eq!(next_snapshot(&mut rx).await, vec![game.clone()]);

        theirs
            .claim_game(game.id.clone(), Claim::new("John", "Tom"))
            .await
            .unwrap();
        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot[0].claim, Some(Claim::new("John", "Tom")));

        let err = ours
            .claim_game(game.id.clone(), Claim::new("Florent", "Léa"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimed(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_processes_never_both_win() {
        let backend = MemoryBackend::new();
        let first = Arc::new(SyncedClaimStore::start(backend.clone()).await.unwrap());
        let second = Arc::new(SyncedClaimStore::start(backend).await.unwrap());

        for round in 0..20 {
            let game = first
                .add_game(team(&format!("Team {round}"), datetime!(2025-04-12 14:30 UTC)))
                .await
                .unwrap();

            let a = tokio::spawn({
                let store = first.clone();
                let id = game.id.clone();
                async move { store.claim_game(id, Claim::new("Florent", "Léa")).await }
            });
            let b = tokio::spawn({
                let store = second.clone();
                let id = game.id.clone();
                async move { store.claim_game(id, Claim::new("John", "Tom")).await }
            });

            let outcomes = [a.await.unwrap(), b.await.unwrap()];
            let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
            assert_eq!(winners, 1, "round {round}: {outcomes:?}");
            assert!(
                outcomes
                    .iter()
                    .any(|outcome| matches!(outcome, Err(ClaimError::AlreadyClaimed(_))))
            );
        }
    }

    #[tokio::test]
    async fn listing_is_ordered_by_date() {
        let store = SyncedClaimStore::start(MemoryBackend::new()).await.unwrap();
        store
            .add_game(team("Later", datetime!(2025-05-02 10:00 UTC)))
            .await
            .unwrap();
        store
            .add_game(team("Sooner", datetime!(2025-05-01 10:00 UTC)))
            .await
            .unwrap();

        let first = store.list_games().await.unwrap();
        let opponents: Vec<_> = first.iter().map(|game| game.opponent.as_str()).collect();
        assert_eq!(opponents, vec!["Sooner", "Later"]);
        assert_eq!(store.list_games().await.unwrap(), first);
    }

    #[tokio::test]
    async fn half_populated_rows_read_as_unclaimed() {
        let backend = MemoryBackend::new();
        let store = SyncedClaimStore::start(backend.clone()).await.unwrap();
        backend.put_row(GameRow {
            id: GameId::new("legacy"),
            date: datetime!(2025-05-01 10:00 UTC),
            opponent: "Team Legacy".into(),
            is_home: false,
            volunteer_parent: Some("ghost".into()),
            volunteer_children: None,
        });

        let games = store.list_games().await.unwrap();
        assert_eq!(games[0].claim, None);

        let claimed = store
            .claim_game(GameId::new("legacy"), Claim::new("Florent", "Léa"))
            .await
            .unwrap();
        assert_eq!(claimed.claim, Some(Claim::new("Florent", "Léa")));
    }

    /// Backend whose feed ends after one event and whose reads can be switched off.
    #[derive(Clone)]
    struct FlakyBackend {
        inner: MemoryBackend,
        watches: Arc<AtomicUsize>,
    }

    impl ClaimBackend for FlakyBackend {
        fn fetch_rows(&self) -> BoxFuture<'static, StorageResult<Vec<GameRow>>> {
            self.inner.fetch_rows()
        }

        fn find_row(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
            self.inner.find_row(id)
        }

        fn insert_row(&self, row: GameRow) -> BoxFuture<'static, StorageResult<GameRow>> {
            self.inner.insert_row(row)
        }

        fn claim_row_if_unclaimed(
            &self,
            id: GameId,
            claim: Claim,
        ) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
            self.inner.claim_row_if_unclaimed(id, claim)
        }

        fn release_row(
            &self,
            id: GameId,
        ) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
            self.inner.release_row(id)
        }

        fn watch(&self) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
            let attempt = self.watches.fetch_add(1, Ordering::SeqCst);
            let feed: ChangeFeed = if attempt == 0 {
                // The first feed is already dead.
                stream::empty().boxed()
            } else {
                stream::pending().boxed()
            };
            Box::pin(ready(Ok(feed)))
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(ready(Err(StorageError::unavailable(
                "backend offline".into(),
                std::io::Error::other("offline"),
            ))))
        }
    }

    #[tokio::test]
    async fn reopened_feed_refreshes_subscribers() {
        let backend = FlakyBackend {
            inner: MemoryBackend::new(),
            watches: Arc::new(AtomicUsize::new(0)),
        };
        let store = SyncedClaimStore::start(backend.clone()).await.unwrap();
        let (listener, mut rx) = channel_listener();
        let _subscription = store.subscribe(listener);

        // Written while the feed is down: only the catch-up refresh can report it.
        backend.inner.put_row(
            NewGame {
                date: datetime!(2025-05-01 10:00 UTC),
                opponent: "Team Missed".into(),
                is_home: true,
            }
            .into_entity(GameId::new("missed"))
            .into(),
        );

        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot[0].opponent, "Team Missed");
        assert_eq!(backend.watches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn backend_failures_surface_as_backend_errors() {
        let backend = FlakyBackend {
            inner: MemoryBackend::new(),
            watches: Arc::new(AtomicUsize::new(1)),
        };
        let store = SyncedClaimStore::start(backend).await.unwrap();

        let err = store.health_check().await.unwrap_err();
        assert!(matches!(err, ClaimError::Backend(_)));
        assert!(err.to_string().contains("backend offline"));
    }

    #[tokio::test]
    async fn change_events_carry_kind_and_id() {
        let backend = MemoryBackend::new();
        let mut feed = backend.watch().await.unwrap();
        let store = SyncedClaimStore::start(backend).await.unwrap();
        let game = store
            .add_game(team("Team Z", datetime!(2025-05-01 10:00 UTC)))
            .await
            .unwrap();

        let event = timeout(WAIT, feed.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(event, ChangeEvent::new(ChangeKind::Inserted, Some(game.id)));
    }
}

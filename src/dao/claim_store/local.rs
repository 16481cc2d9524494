use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, ready};
use tracing::debug;

use super::{ClaimStore, Listener, ListenerRegistry, Subscription};
use crate::dao::{
    models::{Claim, GameEntity, GameId, NewGame},
    storage::{ClaimError, ClaimResult},
};

/// In-process store keeping the games in memory, in insertion order.
///
/// Every operation completes synchronously: by the time the returned future is
/// created the change is committed and every listener has been notified.
#[derive(Clone, Default)]
pub struct LocalClaimStore {
    state: Arc<Mutex<LocalState>>,
    listeners: ListenerRegistry,
}

struct LocalState {
    games: Vec<GameEntity>,
    next_id: u64,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            games: Vec::new(),
            next_id: 1,
        }
    }
}

impl LocalClaimStore {
    /// Empty store; identifiers start at `1`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions still registered.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<GameEntity> {
        self.lock().games.clone()
    }

    fn add(&self, game: NewGame) -> GameEntity {
        let (added, snapshot) = {
            let mut state = self.lock();
            let id = GameId::new(state.next_id.to_string());
            state.next_id += 1;
            let added = game.into_entity(id);
            state.games.push(added.clone());
            (added, state.games.clone())
        };

        debug!(game_id = %added.id, opponent = %added.opponent, "game added");
        self.listeners.notify(&snapshot);
        added
    }

    /// Run `update` on the game under the lock; a returned snapshot means the change was
    /// committed and listeners must hear about it.
    fn modify<F>(&self, id: &GameId, update: F) -> ClaimResult<GameEntity>
    where
        F: FnOnce(&mut GameEntity) -> ClaimResult<bool>,
    {
        let (game, snapshot) = {
            let mut state = self.lock();
            let game = state
                .games
                .iter_mut()
                .find(|game| &game.id == id)
                .ok_or_else(|| ClaimError::NotFound(id.clone()))?;
            let changed = update(game)?;
            let game = game.clone();
            let snapshot = changed.then(|| state.games.clone());
            (game, snapshot)
        };

        if let Some(snapshot) = snapshot {
            self.listeners.notify(&snapshot);
        }
        Ok(game)
    }

    fn claim(&self, id: GameId, claim: Claim) -> ClaimResult<GameEntity> {
        if !claim.is_complete() {
            return Err(ClaimError::IncompleteClaim);
        }
        let game = self.modify(&id, |game| {
            if game.is_claimed() {
                return Err(ClaimError::AlreadyClaimed(game.id.clone()));
            }
            game.claim = Some(claim);
            Ok(true)
        })?;
        debug!(game_id = %id, "game claimed");
        Ok(game)
    }

    fn release(&self, id: GameId) -> ClaimResult<GameEntity> {
        let game = self.modify(&id, |game| Ok(game.claim.take().is_some()))?;
        debug!(game_id = %id, "game released");
        Ok(game)
    }
}

impl ClaimStore for LocalClaimStore {
    fn list_games(&self) -> BoxFuture<'static, ClaimResult<Vec<GameEntity>>> {
        Box::pin(ready(Ok(self.snapshot())))
    }

    fn add_game(&self, game: NewGame) -> BoxFuture<'static, ClaimResult<GameEntity>> {
        Box::pin(ready(Ok(self.add(game))))
    }

    fn claim_game(
        &self,
        id: GameId,
        claim: Claim,
    ) -> BoxFuture<'static, ClaimResult<GameEntity>> {
        Box::pin(ready(self.claim(id, claim)))
    }

    fn release_game(&self, id: GameId) -> BoxFuture<'static, ClaimResult<GameEntity>> {
        Box::pin(ready(self.release(id)))
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    fn health_check(&self) -> BoxFuture<'static, ClaimResult<()>> {
        Box::pin(ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use time::macros::datetime;

    use super::*;

    fn team(opponent: &str) -> NewGame {
        NewGame {
            date: datetime!(2025-03-01 10:00 UTC),
            opponent: opponent.into(),
            is_home: false,
        }
    }

    fn record(store: &LocalClaimStore) -> (Arc<Mutex<Vec<Vec<GameEntity>>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = store.subscribe(Box::new(move |games: Vec<GameEntity>| {
            sink.lock().unwrap().push(games);
        }));
        (seen, subscription)
    }

    #[tokio::test]
    async fn starts_empty() {
        let store = LocalClaimStore::new();
        assert!(store.list_games().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_game_assigns_sequential_ids_and_stores_unclaimed() {
        let store = LocalClaimStore::new();
        let date = datetime!(2025-04-12 14:30 UTC);

        let added = store
            .add_game(NewGame {
                date,
                opponent: "Team C".into(),
                is_home: false,
            })
            .await
            .unwrap();

        assert_eq!(added.id, GameId::new("1"));
        assert_eq!(added.opponent, "Team C");
        assert_eq!(added.date, date);
        assert!(!added.is_home);
        assert_eq!(added.claim, None);
        assert_eq!(store.list_games().await.unwrap(), vec![added]);

        let second = store.add_game(team("Team D")).await.unwrap();
        assert_eq!(second.id, GameId::new("2"));
    }

    #[tokio::test]
    async fn claim_then_second_claim_conflicts_then_release_clears() {
        let store = LocalClaimStore::new();
        let game = store.add_game(team("Team D")).await.unwrap();

        let claimed = store
            .claim_game(game.id.clone(), Claim::new("Florent", "Léa"))
            .await
            .unwrap();
        assert_eq!(claimed.claim, Some(Claim::new("Florent", "Léa")));

        let err = store
            .claim_game(game.id.clone(), Claim::new("John", "Tom"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimed(id) if id == game.id));
        assert_eq!(
            store.list_games().await.unwrap()[0].claim,
            Some(Claim::new("Florent", "Léa"))
        );

        let released = store.release_game(game.id.clone()).await.unwrap();
        assert_eq!(released.claim, None);
        assert_eq!(store.list_games().await.unwrap()[0].claim, None);
    }

    #[tokio::test]
    async fn incomplete_claims_are_rejected_without_notifying() {
        let store = LocalClaimStore::new();
        let game = store.add_game(team("Team F")).await.unwrap();
        let notified = Arc::new(Mutex::new(0));
        let counter = notified.clone();
        let _subscription = store.subscribe(Box::new(move |_games: Vec<GameEntity>| {
            *counter.lock().unwrap() += 1;
        }));

        let err = store
            .claim_game(game.id.clone(), Claim::new("Florent", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::IncompleteClaim));
        assert_eq!(store.list_games().await.unwrap()[0].claim, None);
        assert_eq!(*notified.lock().unwrap(), 0);

        store
            .claim_game(game.id.clone(), Claim::new("John", "Tom"))
            .await
            .unwrap();
        assert_eq!(*notified.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = LocalClaimStore::new();
        store.add_game(team("Team E")).await.unwrap();

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
    async fn each_mutation_notifies_once_with_matching_snapshot() {
        let store = LocalClaimStore::new();
        let (seen, _subscription) = record(&store);

        let game = store.add_game(team("Team G")).await.unwrap();
        store
            .claim_game(game.id.clone(), Claim::new("Florent", "Léa"))
            .await
            .unwrap();
        store.release_game(game.id.clone()).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], vec![game.clone()]);
        assert_eq!(seen[1][0].claim, Some(Claim::new("Florent", "Léa")));
        assert_eq!(seen[2][0].claim, None);
    }

    #[tokio::test]
    async fn failed_operations_and_noop_release_do_not_notify() {
        let store = LocalClaimStore::new();
        let game = store.add_game(team("Team H")).await.unwrap();
        store
            .claim_game(game.id.clone(), Claim::new("Florent", "Léa"))
            .await
            .unwrap();
        store.release_game(game.id.clone()).await.unwrap();

        let (seen, _subscription) = record(&store);
        let unchanged = store.release_game(game.id.clone()).await.unwrap();
        assert_eq!(unchanged, game);
        let _ = store
            .claim_game("missing".into(), Claim::new("John", "Tom"))
            .await;
        store
            .claim_game(game.id.clone(), Claim::new("John", "Tom"))
            .await
            .unwrap();
        let _ = store
            .claim_game(game.id.clone(), Claim::new("Florent", "Léa"))
            .await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_notifications() {
        let store = LocalClaimStore::new();
        let (seen, subscription) = record(&store);

        store.add_game(team("Team H")).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);

        subscription.unsubscribe();
        store.add_game(team("Team I")).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn returned_values_are_detached_from_the_store() {
        let store = LocalClaimStore::new();
        let _mutator = store.subscribe(Box::new(|mut games: Vec<GameEntity>| {
            for game in &mut games {
                game.claim = Some(Claim::new("Mallory", "Eve"));
            }
        }));

        let mut added = store.add_game(team("Team J")).await.unwrap();
        added.opponent = "tampered".into();
        let mut listed = store.list_games().await.unwrap();
        listed[0].claim = Some(Claim::new("Mallory", "Eve"));
        listed.clear();

        let games = store.list_games().await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].opponent, "Team J");
        assert_eq!(games[0].claim, None);
    }

    #[tokio::test]
    async fn ids_survive_claim_release_cycles() {
        let store = LocalClaimStore::new();
        let game = store.add_game(team("Team K")).await.unwrap();

        for round in 0..10 {
            let claimed = store
                .claim_game(game.id.clone(), Claim::new(format!("parent {round}"), "kid"))
                .await
                .unwrap();
            assert_eq!(claimed.id, game.id);
            let released = store.release_game(game.id.clone()).await.unwrap();
            assert_eq!(released.id, game.id);
        }
        assert_eq!(store.list_games().await.unwrap()[0].id, game.id);
    }

    #[tokio::test]
    async fn listeners_may_read_the_store_while_notified() {
        let store = LocalClaimStore::new();
        let reader = store.clone();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        let _subscription = store.subscribe(Box::new(move |_games: Vec<GameEntity>| {
            sink.lock().unwrap().push(reader.snapshot().len());
        }));

        store.add_game(team("Team L")).await.unwrap();
        store.add_game(team("Team M")).await.unwrap();

        assert_eq!(*counts.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_a_single_winner() {
        let store = LocalClaimStore::new();
        let game = store.add_game(team("Team N")).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let store = store.clone();
                let id = game.id.clone();
                tokio::spawn(async move {
                    store
                        .claim_game(id, Claim::new(format!("parent {n}"), "kid"))
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(ClaimError::AlreadyClaimed(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners, 1);
    }
}

pub mod listeners;
pub mod local;
pub mod synced;

use futures::future::BoxFuture;

use crate::dao::{
    models::{Claim, GameEntity, GameId, NewGame},
    storage::ClaimResult,
};

pub use listeners::{Listener, ListenerRegistry, Subscription};
pub use local::LocalClaimStore;
pub use synced::SyncedClaimStore;

/// Contract shared by every store holding the canonical list of games and claims.
///
/// Values handed out (return values and listener snapshots) are owned copies; changing
/// them never affects the store.
pub trait ClaimStore: Send + Sync {
    /// Fresh snapshot of every known game.
    fn list_games(&self) -> BoxFuture<'static, ClaimResult<Vec<GameEntity>>>;

    /// Store a new, unclaimed game under a freshly assigned identifier.
    fn add_game(&self, game: NewGame) -> BoxFuture<'static, ClaimResult<GameEntity>>;

    /// Record `claim` on the game, failing with `AlreadyClaimed` when somebody else holds
    /// it. At most one of several concurrent claims for the same game succeeds.
    fn claim_game(&self, id: GameId, claim: Claim)
    -> BoxFuture<'static, ClaimResult<GameEntity>>;

    /// Clear the claim of the game. Releasing an unclaimed game is a no-op that returns
    /// the game unchanged and notifies nobody.
    fn release_game(&self, id: GameId) -> BoxFuture<'static, ClaimResult<GameEntity>>;

    /// Register a listener called with a full snapshot after every committed change.
    fn subscribe(&self, listener: Listener) -> Subscription;

    /// Probe the underlying storage.
    fn health_check(&self) -> BoxFuture<'static, ClaimResult<()>>;
}

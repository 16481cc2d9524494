#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::{future::BoxFuture, stream::BoxStream};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::dao::{
    models::{Claim, GameEntity, GameId},
    storage::StorageResult,
};

pub use memory::MemoryBackend;

/// Row-level primitives a shared database must offer to back a
/// [`SyncedClaimStore`](crate::dao::claim_store::SyncedClaimStore).
///
/// Claiming is a conditional write: implementations must apply it as one indivisible
/// operation on the database, never as a read followed by a separate write.
pub trait ClaimBackend: Send + Sync + 'static {
    /// Every row, ordered by date then identifier.
    fn fetch_rows(&self) -> BoxFuture<'static, StorageResult<Vec<GameRow>>>;

    /// Point lookup of a single row.
    fn find_row(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameRow>>>;

    /// Persist a new row and return it as stored.
    fn insert_row(&self, row: GameRow) -> BoxFuture<'static, StorageResult<GameRow>>;

    /// Set the claim columns where the row exists and is unclaimed.
    ///
    /// `None` means no row matched the condition: either the row does not exist or it
    /// is already claimed.
    fn claim_row_if_unclaimed(
        &self,
        id: GameId,
        claim: Claim,
    ) -> BoxFuture<'static, StorageResult<Option<GameRow>>>;

    /// Clear the claim columns of the row. `None` means the row does not exist.
    ///
    /// Releasing an unclaimed row must not produce a change event.
    fn release_row(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameRow>>>;

    /// Open a feed of every change made to the rows, whoever made it.
    fn watch(&self) -> BoxFuture<'static, StorageResult<ChangeFeed>>;

    /// Probe the database.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Stream of row changes pushed by a backend.
pub type ChangeFeed = BoxStream<'static, StorageResult<ChangeEvent>>;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new row was written.
    Inserted,
    /// An existing row changed.
    Updated,
    /// The row is gone.
    Deleted,
    /// Anything else the backend reports (lag, rename, drop, ...).
    Other,
}

/// A single notification from a backend change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Row concerned, when the backend reports one.
    pub game_id: Option<GameId>,
}

impl ChangeEvent {
    /// Event of `kind` about `game_id`.
    pub fn new(kind: ChangeKind, game_id: Option<GameId>) -> Self {
        Self { kind, game_id }
    }
}

/// Persisted shape of a game: the claim is split into two nullable columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRow {
    /// Primary key.
    pub id: GameId,
    /// Kick-off date and time.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// Opposing team.
    pub opponent: String,
    /// Whether the game is played at home.
    pub is_home: bool,
    /// Claim column holding the parent's name.
    pub volunteer_parent: Option<String>,
    /// Claim column holding the children's names.
    pub volunteer_children: Option<String>,
}

impl GameRow {
    /// The claim stored in the row. Only rows with both columns populated count as
    /// claimed; any other combination reads back as unclaimed.
    pub fn claim(&self) -> Option<Claim> {
        match (
            self.volunteer_parent.as_deref(),
            self.volunteer_children.as_deref(),
        ) {
            (Some(parent), Some(children)) if !parent.is_empty() && !children.is_empty() => {
                Some(Claim::new(parent, children))
            }
            _ => None,
        }
    }

    /// Shorthand for `self.claim().is_some()`.
    pub fn is_claimed(&self) -> bool {
        self.claim().is_some()
    }

    /// Fill both claim columns.
    pub fn set_claim(&mut self, claim: Claim) {
        self.volunteer_parent = Some(claim.parent);
        self.volunteer_children = Some(claim.children);
    }

    /// Empty both claim columns.
    pub fn clear_claim(&mut self) {
        self.volunteer_parent = None;
        self.volunteer_children = None;
    }

    /// Ordering key used by [`ClaimBackend::fetch_rows`].
    pub fn sort_key(&self) -> (OffsetDateTime, &GameId) {
        (self.date, &self.id)
    }
}

impl From<GameEntity> for GameRow {
    fn from(entity: GameEntity) -> Self {
        let (volunteer_parent, volunteer_children) = match entity.claim {
            Some(Claim { parent, children }) => (Some(parent), Some(children)),
            None => (None, None),
        };
        Self {
            id: entity.id,
            date: entity.date,
            opponent: entity.opponent,
            is_home: entity.is_home,
            volunteer_parent,
            volunteer_children,
        }
    }
}

impl From<GameRow> for GameEntity {
    fn from(row: GameRow) -> Self {
        let claim = row.claim();
        Self {
            id: row.id,
            date: row.date,
            opponent: row.opponent,
            is_home: row.is_home,
            claim,
        }
    }
}

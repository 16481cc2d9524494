use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque identifier of a game, assigned by the store that created it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// Wrap an existing identifier (for example one received over the API).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier for stores shared between processes.
    pub fn random() -> Self {
        Uuid::new_v4().into()
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for GameId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for GameId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Payload recorded when somebody volunteers for a game.
///
/// Stores keep it verbatim. They only check that both names are filled in, since a
/// claim with a blank name would read back as no claim at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claim {
    /// Name of the volunteering parent.
    pub parent: String,
    /// Child or children coming along with the parent.
    pub children: String,
}

impl Claim {
    /// Build a claim payload from the volunteer's names.
    pub fn new(parent: impl Into<String>, children: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            children: children.into(),
        }
    }

    /// Whether both the parent and the children are named.
    pub fn is_complete(&self) -> bool {
        !self.parent.trim().is_empty() && !self.children.trim().is_empty()
    }
}

/// A scheduled game as seen by consumers of a claim store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Stable identifier, never changed by claim or release.
    pub id: GameId,
    /// Kick-off date and time.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// Free-text name of the opposing team.
    pub opponent: String,
    /// Whether the game is played at home.
    pub is_home: bool,
    /// Current volunteer, if any.
    pub claim: Option<Claim>,
}

impl GameEntity {
    /// Whether somebody already volunteered for this game.
    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }
}

/// Caller-supplied data for a new game. Contents are not validated by stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewGame {
    /// Kick-off date and time.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// Free-text name of the opposing team.
    pub opponent: String,
    /// Whether the game is played at home.
    pub is_home: bool,
}

impl NewGame {
    /// Turn the input into an unclaimed game carrying `id`.
    pub fn into_entity(self, id: GameId) -> GameEntity {
        GameEntity {
            id,
            date: self.date,
            opponent: self.opponent,
            is_home: self.is_home,
            claim: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_needs_both_names() {
        assert!(Claim::new("Florent", "Léa").is_complete());
        assert!(!Claim::new("Florent", "").is_complete());
        assert!(!Claim::new("  ", "Léa").is_complete());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::error::CouchDaoError;
use crate::dao::{
    backend::{ChangeEvent, ChangeKind, GameRow},
    models::GameId,
};

pub const GAME_PREFIX: &str = "game::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchGameDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub game: GameBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameBody {
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub opponent: String,
    pub is_home: bool,
    #[serde(default)]
    pub volunteer_parent: Option<String>,
    #[serde(default)]
    pub volunteer_children: Option<String>,
}

impl From<(GameRow, Option<String>)> for CouchGameDocument {
    fn from((row, rev): (GameRow, Option<String>)) -> Self {
        Self {
            id: game_doc_id(&row.id),
            rev,
            game: GameBody {
                date: row.date,
                opponent: row.opponent,
                is_home: row.is_home,
                volunteer_parent: row.volunteer_parent,
                volunteer_children: row.volunteer_children,
            },
        }
    }
}

impl CouchGameDocument {
    /// Split the document into its row and current revision.
    pub fn into_row(self) -> Result<(GameRow, Option<String>), CouchDaoError> {
        let id = extract_game_id(&self.id)?;
        let row = GameRow {
            id,
            date: self.game.date,
            opponent: self.game.opponent,
            is_home: self.game.is_home,
            volunteer_parent: self.game.volunteer_parent,
            volunteer_children: self.game.volunteer_children,
        };
        Ok((row, self.rev))
    }
}

/// One line of the continuous `_changes` feed.
#[derive(Debug, Deserialize)]
pub struct ChangesLine {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub changes: Vec<ChangeRev>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

impl ChangesLine {
    /// Game change carried by the line, if any. Heartbeats, the closing `last_seq` line
    /// and non-game documents yield nothing.
    pub fn into_event(self) -> Option<ChangeEvent> {
        let id = self.id?;
        let game_id = id.strip_prefix(GAME_PREFIX).map(GameId::from)?;
        let kind = if self.deleted {
            ChangeKind::Deleted
        } else if self
            .changes
            .first()
            .is_some_and(|change| change.rev.starts_with("1-"))
        {
            ChangeKind::Inserted
        } else {
            ChangeKind::Updated
        };
        Some(ChangeEvent::new(kind, Some(game_id)))
    }
}

pub fn game_doc_id(id: &GameId) -> String {
    format!("{}{}", GAME_PREFIX, id)
}

pub fn extract_game_id(doc_id: &str) -> Result<GameId, CouchDaoError> {
    let id = doc_id
        .strip_prefix(GAME_PREFIX)
        .ok_or_else(|| CouchDaoError::InvalidDocId {
            doc_id: doc_id.to_string(),
            kind: "missing game prefix",
        })?;
    if id.is_empty() {
        return Err(CouchDaoError::InvalidDocId {
            doc_id: doc_id.to_string(),
            kind: "empty game id",
        });
    }
    Ok(GameId::from(id))
}

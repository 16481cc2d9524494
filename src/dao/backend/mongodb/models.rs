use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::dao::{backend::GameRow, models::GameId};

/// Document stored in the `games` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: GameId,
    date: DateTime,
    opponent: String,
    is_home: bool,
    #[serde(default)]
    volunteer_parent: Option<String>,
    #[serde(default)]
    volunteer_children: Option<String>,
}

impl From<GameRow> for MongoGameDocument {
    fn from(value: GameRow) -> Self {
        Self {
            id: value.id,
            date: DateTime::from_system_time(value.date.into()),
            opponent: value.opponent,
            is_home: value.is_home,
            volunteer_parent: value.volunteer_parent,
            volunteer_children: value.volunteer_children,
        }
    }
}

impl From<MongoGameDocument> for GameRow {
    fn from(value: MongoGameDocument) -> Self {
        Self {
            id: value.id,
            date: OffsetDateTime::from(value.date.to_system_time()),
            opponent: value.opponent,
            is_home: value.is_home,
            volunteer_parent: value.volunteer_parent,
            volunteer_children: value.volunteer_children,
        }
    }
}

pub fn doc_id(id: &GameId) -> Document {
    doc! { "_id": id.as_str() }
}

/// Filter matching the game only while it is unclaimed, i.e. while at least one of the
/// claim columns is missing, null or empty.
pub fn unclaimed_filter(id: &GameId) -> Document {
    doc! {
        "_id": id.as_str(),
        "$or": [
            { "volunteer_parent": { "$in": [null, ""] } },
            { "volunteer_children": { "$in": [null, ""] } },
        ],
    }
}

/// Filter matching the game while any claim column still holds a value.
pub fn any_claim_column_filter(id: &GameId) -> Document {
    doc! {
        "_id": id.as_str(),
        "$or": [
            { "volunteer_parent": { "$ne": null } },
            { "volunteer_children": { "$ne": null } },
        ],
    }
}

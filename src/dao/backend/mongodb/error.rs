use mongodb::error::Error as MongoError;
use thiserror::Error;

use crate::dao::models::GameId;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to list games")]
    ListGames {
        #[source]
        source: MongoError,
    },
    #[error("failed to load game `{id}`")]
    LoadGame {
        id: GameId,
        #[source]
        source: MongoError,
    },
    #[error("failed to insert game `{id}`")]
    InsertGame {
        id: GameId,
        #[source]
        source: MongoError,
    },
    #[error("failed to update claim of game `{id}`")]
    UpdateClaim {
        id: GameId,
        #[source]
        source: MongoError,
    },
    #[error("failed to open MongoDB change stream on `{collection}`")]
    Watch {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB change stream failed")]
    ChangeStream {
        #[source]
        source: MongoError,
    },
}

use mongodb::options::ClientOptions;

use super::{
    connection::ConnectRetry,
    error::{MongoDaoError, MongoResult},
};

const DEFAULT_DB: &str = "snack_roster";

/// Runtime configuration describing how to reach MongoDB.
#[derive(Clone)]
pub struct MongoConfig {
    /// Driver options parsed from the connection string.
    pub options: ClientOptions,
    /// Database holding the `games` collection.
    pub database_name: String,
    /// Startup ping schedule.
    pub retry: ConnectRetry,
}

impl MongoConfig {
    /// Parse `uri`; the database defaults to `snack_roster`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let database_name = db_name.unwrap_or(DEFAULT_DB).to_owned();
        let options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;

        Ok(Self {
            options,
            database_name,
            retry: ConnectRetry::default(),
        })
    }

    /// Read `MONGO_URI` (required) and `MONGO_DB` (optional).
    pub async fn from_env() -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let db = std::env::var("MONGO_DB").ok();
        Self::from_uri(&uri, db.as_deref()).await
    }
}

use std::env;

use super::error::{CouchDaoError, CouchResult};

const BASE_URL_ENV: &str = "COUCH_BASE_URL";
const DATABASE_ENV: &str = "COUCH_DB";
const USERNAME_ENV: &str = "COUCH_USERNAME";
const PASSWORD_ENV: &str = "COUCH_PASSWORD";
/// Database used when `COUCH_DB` is unset or empty.
const DEFAULT_DATABASE: &str = "snack_roster";

/// Where the CouchDB games database lives and how to log into it.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server root, e.g. `http://127.0.0.1:5984`.
    pub base_url: String,
    /// Database holding the `game::` documents.
    pub database: String,
    /// Basic-auth user, if the server requires one.
    pub username: Option<String>,
    /// Basic-auth password paired with `username`.
    pub password: Option<String>,
}

impl CouchConfig {
    /// Point at `database` on the server at `base_url`, without credentials.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            username: None,
            password: None,
        }
    }

    /// Log in with basic auth.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Read `COUCH_BASE_URL` (required), `COUCH_DB` (defaults to `snack_roster`) and the
    /// optional `COUCH_USERNAME` / `COUCH_PASSWORD` pair.
    pub fn from_env() -> CouchResult<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CouchResult<Self> {
        let non_empty = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let base_url = non_empty(BASE_URL_ENV)
            .ok_or(CouchDaoError::MissingEnvVar { var: BASE_URL_ENV })?;
        let database = non_empty(DATABASE_ENV).unwrap_or_else(|| DEFAULT_DATABASE.to_owned());

        let config = Self::new(base_url, database);
        Ok(
            match (non_empty(USERNAME_ENV), non_empty(PASSWORD_ENV)) {
                (Some(username), Some(password)) => config.with_credentials(username, password),
                _ => config,
            },
        )
    }
}

use std::sync::Arc;

use futures::{StreamExt, future::BoxFuture};
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::{debug, info};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangesLine, CouchGameDocument, END_SUFFIX, GAME_PREFIX, game_doc_id,
    },
};
use crate::dao::{
    backend::{ChangeEvent, ChangeFeed, ClaimBackend, GameRow},
    models::{Claim, GameId},
    storage::{StorageError, StorageResult},
};

const CHANGES: &str = "_changes";
const HEARTBEAT_MS: &str = "30000";
const MAX_RELEASE_ATTEMPTS: u32 = 3;

/// Result of a revision-guarded write.
enum PutOutcome {
    Written,
    Conflict,
}

/// Games stored as `game::<id>` documents in a CouchDB database.
///
/// Conditional writes rely on the `_rev` check CouchDB performs on every update.
#[derive(Clone)]
pub struct CouchBackend {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchBackend {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let backend = Self {
            client,
            base_url,
            database,
            auth,
        };

        backend.ensure_database().await?;
        info!(database = %backend.database, "connected to CouchDB");
        Ok(backend)
    }

    fn database_request(&self, method: Method) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, self.database);
        self.authorize(self.client.request(method, url))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .database_request(Method::GET)
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .database_request(Method::PUT)
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                let status = create.status();
                // 412 means another instance created it first.
                if status.is_success() || status == StatusCode::PRECONDITION_FAILED {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus { database, status })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn ping(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .database_request(Method::GET)
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::DatabaseStatus {
                database,
                status: response.status(),
            })
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT a document; CouchDB answers 409 when `_rev` is stale or the id is taken.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<PutOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => Ok(PutOutcome::Written),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: row.id,
                    source,
                })?;
                documents.push(parsed);
            }
        }

        Ok(documents)
    }

    async fn fetch_rows(&self) -> CouchResult<Vec<GameRow>> {
        let documents = self
            .list_documents::<CouchGameDocument>(GAME_PREFIX)
            .await?;
        let mut rows = documents
            .into_iter()
            .map(|doc| doc.into_row().map(|(row, _)| row))
            .collect::<CouchResult<Vec<_>>>()?;
        rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(rows)
    }

    async fn load(&self, id: &GameId) -> CouchResult<Option<(GameRow, Option<String>)>> {
        self.get_document::<CouchGameDocument>(&game_doc_id(id))
            .await?
            .map(CouchGameDocument::into_row)
            .transpose()
    }

    async fn insert_row(&self, row: GameRow) -> CouchResult<GameRow> {
        let doc_id = game_doc_id(&row.id);
        let document = CouchGameDocument::from((row.clone(), None));
        match self.put_document(&doc_id, &document).await? {
            PutOutcome::Written => Ok(row),
            PutOutcome::Conflict => Err(CouchDaoError::DocumentExists { path: doc_id }),
        }
    }

    /// Read the current revision, then write it back guarded by that revision. A writer
    /// that got in between makes CouchDB reject the update, which reads as "no match".
    async fn claim_row_if_unclaimed(
        &self,
        id: GameId,
        claim: Claim,
    ) -> CouchResult<Option<GameRow>> {
        let Some((mut row, rev)) = self.load(&id).await? else {
            return Ok(None);
        };
        if row.is_claimed() {
            return Ok(None);
        }

        row.set_claim(claim);
        let document = CouchGameDocument::from((row.clone(), rev));
        match self.put_document(&game_doc_id(&id), &document).await? {
            PutOutcome::Written => Ok(Some(row)),
            PutOutcome::Conflict => {
                debug!(game_id = %id, "claim lost a revision race");
                Ok(None)
            }
        }
    }

    async fn release_row(&self, id: GameId) -> CouchResult<Option<GameRow>> {
        let doc_id = game_doc_id(&id);
        for attempt in 1..=MAX_RELEASE_ATTEMPTS {
            let Some((mut row, rev)) = self.load(&id).await? else {
                return Ok(None);
            };
            if row.volunteer_parent.is_none() && row.volunteer_children.is_none() {
                return Ok(Some(row));
            }

            row.clear_claim();
            let document = CouchGameDocument::from((row.clone(), rev));
            match self.put_document(&doc_id, &document).await? {
                PutOutcome::Written => return Ok(Some(row)),
                PutOutcome::Conflict => {
                    debug!(game_id = %id, attempt, "release hit a stale revision, retrying");
                }
            }
        }

        Err(CouchDaoError::RevisionConflict {
            path: doc_id,
            attempts: MAX_RELEASE_ATTEMPTS,
        })
    }

    async fn watch(&self) -> CouchResult<ChangeFeed> {
        let query = [
            ("feed", "continuous"),
            ("since", "now"),
            ("heartbeat", HEARTBEAT_MS),
        ];
        let response = self
            .request(Method::GET, CHANGES)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        let mut bytes = Box::pin(response.bytes_stream());
        let feed = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(source) => {
                        yield Err(StorageError::from(CouchDaoError::ChangesRead { source }));
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(end) = buffer.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=end).collect();
                    match parse_change_line(&line) {
                        Ok(Some(event)) => yield Ok(event),
                        Ok(None) => {}
                        Err(err) => yield Err(StorageError::from(err)),
                    }
                }
            }
        };

        Ok(feed.boxed())
    }
}

/// Blank lines are heartbeats.
fn parse_change_line(line: &[u8]) -> CouchResult<Option<ChangeEvent>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let parsed: ChangesLine =
        serde_json::from_slice(line).map_err(|source| CouchDaoError::DeserializeValue {
            path: CHANGES.to_string(),
            source,
        })?;
    Ok(parsed.into_event())
}

impl ClaimBackend for CouchBackend {
    fn fetch_rows(&self) -> BoxFuture<'static, StorageResult<Vec<GameRow>>> {
        let backend = self.clone();
        Box::pin(async move { backend.fetch_rows().await.map_err(Into::into) })
    }

    fn find_row(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
        let backend = self.clone();
        Box::pin(async move {
            let loaded = backend.load(&id).await?;
            Ok(loaded.map(|(row, _)| row))
        })
    }

    fn insert_row(&self, row: GameRow) -> BoxFuture<'static, StorageResult<GameRow>> {
        let backend = self.clone();
        Box::pin(async move { backend.insert_row(row).await.map_err(Into::into) })
    }

    fn claim_row_if_unclaimed(
        &self,
        id: GameId,
        claim: Claim,
    ) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
        let backend = self.clone();
        Box::pin(async move {
            backend
                .claim_row_if_unclaimed(id, claim)
                .await
                .map_err(Into::into)
        })
    }

    fn release_row(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
        let backend = self.clone();
        Box::pin(async move { backend.release_row(id).await.map_err(Into::into) })
    }

    fn watch(&self) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
        let backend = self.clone();
        Box::pin(async move { backend.watch().await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let backend = self.clone();
        Box::pin(async move { backend.ping().await.map_err(Into::into) })
    }
}

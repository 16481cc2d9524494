use futures::{StreamExt, TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Document, doc},
    change_stream::event::{ChangeStreamEvent, OperationType},
    options::{IndexOptions, ReturnDocument},
};
use tracing::info;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoGameDocument, any_claim_column_filter, doc_id, unclaimed_filter},
};
use crate::dao::{
    backend::{ChangeEvent, ChangeFeed, ChangeKind, ClaimBackend, GameRow},
    models::{Claim, GameId},
    storage::{StorageError, StorageResult},
};

const GAME_COLLECTION_NAME: &str = "games";

/// Games stored in a MongoDB collection.
///
/// The change feed relies on MongoDB change streams, which need a replica set (a
/// single-node replica set is enough).
#[derive(Clone)]
pub struct MongoBackend {
    database: Database,
}

impl MongoBackend {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            establish_connection(&config.options, &config.database_name, config.retry).await?;

        let backend = Self { database };
        backend.ensure_indexes().await?;
        info!(database = %config.database_name, "connected to MongoDB");
        Ok(backend)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let index = IndexModel::builder()
            .keys(doc! {"date": 1, "_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("game_date_idx".to_owned()))
                    .build(),
            )
            .build();

        self.collection()
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: GAME_COLLECTION_NAME,
                index: "date",
                source,
            })?;

        Ok(())
    }

    fn collection(&self) -> Collection<MongoGameDocument> {
        self.database
            .collection::<MongoGameDocument>(GAME_COLLECTION_NAME)
    }

    async fn ping(&self) -> MongoResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn fetch_rows(&self) -> MongoResult<Vec<GameRow>> {
        let documents: Vec<MongoGameDocument> = self
            .collection()
            .find(doc! {})
            .sort(doc! {"date": 1, "_id": 1})
            .await
            .map_err(|source| MongoDaoError::ListGames { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListGames { source })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn find_row(&self, id: GameId) -> MongoResult<Option<GameRow>> {
        let document = self
            .collection()
            .find_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::LoadGame { id, source })?;
        Ok(document.map(Into::into))
    }

    async fn insert_row(&self, row: GameRow) -> MongoResult<GameRow> {
        let id = row.id.clone();
        let document = MongoGameDocument::from(row);
        self.collection()
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::InsertGame { id, source })?;
        Ok(document.into())
    }

    /// Single `findOneAndUpdate` guarded by the "still unclaimed" filter.
    async fn claim_row_if_unclaimed(
        &self,
        id: GameId,
        claim: Claim,
    ) -> MongoResult<Option<GameRow>> {
        let update = doc! {
            "$set": {
                "volunteer_parent": claim.parent,
                "volunteer_children": claim.children,
            }
        };

        let document = self
            .collection()
            .find_one_and_update(unclaimed_filter(&id), update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::UpdateClaim { id, source })?;
        Ok(document.map(Into::into))
    }

    async fn release_row(&self, id: GameId) -> MongoResult<Option<GameRow>> {
        let update = doc! {
            "$set": {
                "volunteer_parent": null,
                "volunteer_children": null,
            }
        };

        // Only rows still holding a claim column are written, so releasing an
        // unclaimed game leaves the change stream silent.
        let released = self
            .collection()
            .find_one_and_update(any_claim_column_filter(&id), update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::UpdateClaim {
                id: id.clone(),
                source,
            })?;

        match released {
            Some(document) => Ok(Some(document.into())),
            None => self.find_row(id).await,
        }
    }

    async fn watch(&self) -> MongoResult<ChangeFeed> {
        let stream = self
            .database
            .collection::<Document>(GAME_COLLECTION_NAME)
            .watch()
            .await
            .map_err(|source| MongoDaoError::Watch {
                collection: GAME_COLLECTION_NAME,
                source,
            })?;

        Ok(stream
            .map(|item| {
                item.map(change_event)
                    .map_err(|source| StorageError::from(MongoDaoError::ChangeStream { source }))
            })
            .boxed())
    }
}

fn change_event(event: ChangeStreamEvent<Document>) -> ChangeEvent {
    let kind = match event.operation_type {
        OperationType::Insert => ChangeKind::Inserted,
        OperationType::Update | OperationType::Replace => ChangeKind::Updated,
        OperationType::Delete => ChangeKind::Deleted,
        _ => ChangeKind::Other,
    };
    let game_id = event
        .document_key
        .as_ref()
        .and_then(|key| key.get_str("_id").ok())
        .map(GameId::from);
    ChangeEvent::new(kind, game_id)
}

impl ClaimBackend for MongoBackend {
    fn fetch_rows(&self) -> BoxFuture<'static, StorageResult<Vec<GameRow>>> {
        let backend = self.clone();
        Box::pin(async move { backend.fetch_rows().await.map_err(Into::into) })
    }

    fn find_row(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameRow>>> {
        let backend = self.clone();
        Box::pin(async move { backend.find_row(id).await.map_err(Into::into) })
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

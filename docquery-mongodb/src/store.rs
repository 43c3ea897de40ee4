use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mea::mutex::Mutex;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, Database as MongoDatabase, IndexModel,
    options::ClientOptions,
};
use std::{fmt, sync::Arc};

use docquery_core::{
    backend::{
        AGGREGATE_OPTIONS, CollectionHandle, Connection, ConnectionBuilder, DeleteOutcome,
        FIND_OPTIONS, IndexInfo, InsertManyOutcome, InsertOneOutcome, UPDATE_OPTIONS,
        UpdateOutcome, option_bool, warn_unknown_options,
    },
    error::{DatabaseError, DatabaseResult},
};

use crate::{
    config::MongoConfig,
    options::{
        aggregate_options, create_collection_options, find_options, index_options, update_options,
    },
};

type SharedSession = Arc<Mutex<Option<ClientSession>>>;

// The driver reports duplicate keys as write errors with code 11000.
fn backend_error(err: mongodb::error::Error) -> DatabaseError {
    let message = err.to_string();
    if message.contains("E11000") {
        DatabaseError::DuplicateKey(message)
    } else {
        DatabaseError::Backend(message)
    }
}

fn transaction_error(err: mongodb::error::Error) -> DatabaseError {
    DatabaseError::Transaction(err.to_string())
}

/// A connection to one MongoDB database.
///
/// Clones share the client and the transaction session. While a transaction is active every
/// collection handle created from this connection runs its operations inside it.
#[derive(Clone)]
pub struct MongoConnection {
    client: Client,
    database: MongoDatabase,
    session: SharedSession,
}

impl fmt::Debug for MongoConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConnection")
            .field("database", &self.database.name())
            .finish_non_exhaustive()
    }
}

impl MongoConnection {
    pub fn new(client: Client, database: &str) -> Self {
        Self {
            database: client.database(database),
            client,
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoConnectionBuilder {
        MongoConnectionBuilder::new(dsn, database)
    }

    pub fn builder_from_config(config: MongoConfig) -> MongoConnectionBuilder {
        MongoConnectionBuilder { config }
    }

    fn get_collection(&self, name: &str) -> MongoCollection<Document> {
        self.database.collection(name)
    }
}

#[async_trait]
impl Connection for MongoConnection {
    async fn has_collection(&self, name: &str) -> DatabaseResult<bool> {
        Ok(self
            .get_collections()
            .await?
            .iter()
            .any(|existing| existing == name))
    }

    async fn get_collections(&self) -> DatabaseResult<Vec<String>> {
        let mut names = self
            .database
            .list_collection_names()
            .await
            .map_err(backend_error)?;
        names.sort();

        Ok(names)
    }

    async fn collection(&self, name: &str) -> DatabaseResult<Arc<dyn CollectionHandle>> {
        Ok(Arc::new(MongoCollectionHandle {
            name: name.to_string(),
            collection: self.get_collection(name),
            session: self.session.clone(),
        }))
    }

    async fn create_collection(&self, name: &str, options: Document) -> DatabaseResult<()> {
        warn_unknown_options(&options, &["capped", "size", "max"], "create_collection");

        self.database
            .create_collection(name)
            .with_options(create_collection_options(&options))
            .await
            .map_err(backend_error)
    }

    async fn drop_collection(&self, name: &str) -> DatabaseResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(backend_error)
    }

    async fn has_index(&self, collection: &str, name: &str) -> DatabaseResult<bool> {
        Ok(self
            .get_collection(collection)
            .list_index_names()
            .await
            .map_err(backend_error)?
            .iter()
            .any(|existing| existing == name))
    }

    async fn get_indexes(&self, collection: &str) -> DatabaseResult<Vec<IndexInfo>> {
        let models = self
            .get_collection(collection)
            .list_indexes()
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<IndexModel>>()
            .await
            .map_err(backend_error)?;

        Ok(models
            .into_iter()
            .map(|model| {
                let options = model.options.unwrap_or_default();
                IndexInfo {
                    name: options.name.unwrap_or_default(),
                    keys: model.keys,
                    unique: options.unique.unwrap_or(false),
                }
            })
            .collect())
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        options: Document,
    ) -> DatabaseResult<String> {
        warn_unknown_options(&options, &["name", "unique"], "create_index");

        let created = self
            .get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(keys)
                    .options(index_options(&options))
                    .build(),
            )
            .await
            .map_err(backend_error)?;

        log::debug!("created index {} on {collection}", created.index_name);
        Ok(created.index_name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DatabaseResult<()> {
        self.get_collection(collection)
            .drop_index(name)
            .await
            .map_err(backend_error)
    }

    async fn begin_transaction(&self) -> DatabaseResult<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Err(DatabaseError::TransactionAlreadyActive);
        }

        let mut session = self
            .client
            .start_session()
            .await
            .map_err(transaction_error)?;
        session
            .start_transaction()
            .await
            .map_err(transaction_error)?;
        *guard = Some(session);

        Ok(())
    }

    async fn commit(&self) -> DatabaseResult<()> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or(DatabaseError::NoActiveTransaction)?;

        session
            .commit_transaction()
            .await
            .map_err(transaction_error)?;
        *guard = None;

        Ok(())
    }

    async fn abort(&self) -> DatabaseResult<()> {
        let mut session = self
            .session
            .lock()
            .await
            .take()
            .ok_or(DatabaseError::NoActiveTransaction)?;

        session
            .abort_transaction()
            .await
            .map_err(transaction_error)
    }

    async fn shutdown(self) -> DatabaseResult<()> {
        self.client.shutdown().await;
        Ok(())
    }
}

/// Reads and writes against one MongoDB collection, joining the connection's transaction
/// when one is active.
#[derive(Clone)]
pub struct MongoCollectionHandle {
    name: String,
    collection: MongoCollection<Document>,
    session: SharedSession,
}

impl fmt::Debug for MongoCollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoCollectionHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CollectionHandle for MongoCollectionHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document, options: Document) -> DatabaseResult<Vec<Document>> {
        warn_unknown_options(&options, FIND_OPTIONS, "find");
        let options = find_options(&options);

        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            let mut cursor = self
                .collection
                .find(filter)
                .with_options(options)
                .session(&mut *session)
                .await
                .map_err(backend_error)?;

            return cursor
                .stream(session)
                .try_collect()
                .await
                .map_err(backend_error);
        }
        drop(guard);

        self.collection
            .find(filter)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect()
            .await
            .map_err(backend_error)
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Document,
    ) -> DatabaseResult<Vec<Document>> {
        warn_unknown_options(&options, AGGREGATE_OPTIONS, "aggregate");
        let options = aggregate_options(&options);

        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            let mut cursor = self
                .collection
                .aggregate(pipeline)
                .with_options(options)
                .session(&mut *session)
                .await
                .map_err(backend_error)?;

            return cursor
                .stream(session)
                .try_collect()
                .await
                .map_err(backend_error);
        }
        drop(guard);

        self.collection
            .aggregate(pipeline)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect()
            .await
            .map_err(backend_error)
    }

    async fn distinct(&self, field: &str, filter: Option<Document>) -> DatabaseResult<Vec<Bson>> {
        let filter = filter.unwrap_or_default();

        let mut guard = self.session.lock().await;
        let action = self.collection.distinct(field, filter);
        match guard.as_mut() {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(backend_error)
    }

    async fn insert_one(&self, document: Document) -> DatabaseResult<InsertOneOutcome> {
        let mut guard = self.session.lock().await;
        let action = self.collection.insert_one(document);
        let result = match guard.as_mut() {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(backend_error)?;

        Ok(InsertOneOutcome {
            acknowledged: true,
            inserted_id: result.inserted_id,
        })
    }

    async fn insert_many(&self, documents: Vec<Document>) -> DatabaseResult<InsertManyOutcome> {
        let mut guard = self.session.lock().await;
        let action = self.collection.insert_many(documents);
        let result = match guard.as_mut() {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(backend_error)?;

        let mut inserted: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        inserted.sort_by_key(|(position, _)| *position);

        Ok(InsertManyOutcome {
            acknowledged: true,
            inserted_ids: inserted.into_iter().map(|(_, id)| id).collect(),
        })
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Document,
    ) -> DatabaseResult<UpdateOutcome> {
        warn_unknown_options(&options, UPDATE_OPTIONS, "update");

        let multiple = option_bool(&options, "multiple", true);
        let options = update_options(&options);

        let mut guard = self.session.lock().await;
        let result = match (multiple, guard.as_mut()) {
            (true, Some(session)) => {
                self.collection
                    .update_many(filter, update)
                    .with_options(options)
                    .session(session)
                    .await
            }
            (true, None) => {
                self.collection
                    .update_many(filter, update)
                    .with_options(options)
                    .await
            }
            (false, Some(session)) => {
                self.collection
                    .update_one(filter, update)
                    .with_options(options)
                    .session(session)
                    .await
            }
            (false, None) => {
                self.collection
                    .update_one(filter, update)
                    .with_options(options)
                    .await
            }
        }
        .map_err(backend_error)?;

        Ok(UpdateOutcome {
            acknowledged: true,
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_count: u64::from(result.upserted_id.is_some()),
        })
    }

    async fn delete_many(&self, filter: Document) -> DatabaseResult<DeleteOutcome> {
        let mut guard = self.session.lock().await;
        let action = self.collection.delete_many(filter);
        let result = match guard.as_mut() {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(backend_error)?;

        Ok(DeleteOutcome {
            acknowledged: true,
            deleted_count: result.deleted_count,
        })
    }
}

/// Builder for [`MongoConnection`].
pub struct MongoConnectionBuilder {
    config: MongoConfig,
}

impl MongoConnectionBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            config: MongoConfig::new(dsn, database),
        }
    }

    /// Sets the application name reported to the server.
    pub fn with_app_name(mut self, app_name: &str) -> Self {
        self.config.app_name = Some(app_name.to_string());
        self
    }
}

#[async_trait]
impl ConnectionBuilder for MongoConnectionBuilder {
    type Connection = MongoConnection;

    async fn build(self) -> DatabaseResult<Self::Connection> {
        let mut options = ClientOptions::parse(&self.config.dsn)
            .await
            .map_err(|e| DatabaseError::Initialization(e.to_string()))?;
        if let Some(app_name) = self.config.app_name {
            options.app_name = Some(app_name);
        }

        let client = Client::with_options(options)
            .map_err(|e| DatabaseError::Initialization(e.to_string()))?;
        log::debug!("connected to database {}", self.config.database);

        Ok(MongoConnection::new(client, &self.config.database))
    }
}

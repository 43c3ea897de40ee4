//! In-memory connection and collection handles.
//!
//! Documents live in insertion order per collection, behind an async-aware read-write lock
//! shared by every clone of the connection and every handle it hands out. Filters and
//! pipelines are evaluated by [`crate::evaluator`] and [`crate::aggregation`].

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};

use docquery_core::{
    backend::{
        AGGREGATE_OPTIONS, CollectionHandle, Connection, ConnectionBuilder, DeleteOutcome,
        FIND_OPTIONS, IndexInfo, InsertManyOutcome, InsertOneOutcome, UPDATE_OPTIONS,
        UpdateOutcome, option_bool, option_u64, warn_unknown_options,
    },
    error::{DatabaseError, DatabaseResult},
    query::PRIMARY_KEY,
};

use crate::{
    aggregation::run_pipeline,
    evaluator::{DocumentEvaluator, get_path, project, select_matching, sort_documents, values_equal},
    update::{apply_update, upsert_seed},
};

const PRIMARY_INDEX: &str = "_id_";

type StoreMap = HashMap<String, MemoryCollection>;

#[derive(Debug, Clone)]
struct MemoryCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

impl MemoryCollection {
    fn new() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexInfo {
                name: PRIMARY_INDEX.to_string(),
                keys: doc! { PRIMARY_KEY: 1 },
                unique: true,
            }],
        }
    }

    /// Name of the first unique index `candidate` collides with, ignoring the document at
    /// position `skip`.
    fn find_duplicate(&self, candidate: &Document, skip: Option<usize>) -> Option<String> {
        self.indexes
            .iter()
            .filter(|index| index.unique)
            .find(|index| {
                let key = index_key(index, candidate);
                self.documents
                    .iter()
                    .enumerate()
                    .filter(|(position, _)| Some(*position) != skip)
                    .any(|(_, existing)| {
                        index_key(index, existing)
                            .iter()
                            .zip(&key)
                            .all(|(left, right)| values_equal(left, right))
                    })
            })
            .map(|index| index.name.clone())
    }
}

fn index_key(index: &IndexInfo, document: &Document) -> Vec<Bson> {
    index
        .keys
        .keys()
        .map(|field| get_path(document, field).cloned().unwrap_or(Bson::Null))
        .collect()
}

// `{ email: 1, age: -1 }` is named `email_1_age_-1`.
fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{field}_{direction}"))
        .collect::<Vec<_>>()
        .join("_")
}

/// Thread-safe in-memory document store.
///
/// `MemoryConnection` is cloneable; clones share the same data. Transactions snapshot the
/// whole store on `begin_transaction` and restore it on `abort`. Writes made during a
/// transaction are visible to readers before commit.
///
/// # Example
///
/// ```ignore
/// use docquery_memory::MemoryConnection;
/// use docquery::store::Database;
/// use bson::doc;
///
/// let db = Database::new(MemoryConnection::new());
/// let users = db.collection("users").await?;
/// users.insert(doc! { "name": "Alice", "age": 30 }).await?;
/// ```
#[derive(Clone, Debug)]
pub struct MemoryConnection {
    store: Arc<RwLock<StoreMap>>,
    snapshot: Arc<RwLock<Option<StoreMap>>>,
    acknowledge_writes: bool,
}

impl MemoryConnection {
    /// Creates an empty store that acknowledges writes.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            snapshot: Arc::new(RwLock::new(None)),
            acknowledge_writes: true,
        }
    }

    pub fn builder() -> MemoryConnectionBuilder {
        MemoryConnectionBuilder::default()
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn has_collection(&self, name: &str) -> DatabaseResult<bool> {
        Ok(self.store.read().await.contains_key(name))
    }

    async fn get_collections(&self) -> DatabaseResult<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect();
        names.sort();

        Ok(names)
    }

    async fn collection(&self, name: &str) -> DatabaseResult<Arc<dyn CollectionHandle>> {
        Ok(Arc::new(MemoryCollectionHandle {
            name: name.to_string(),
            store: self.store.clone(),
            acknowledge_writes: self.acknowledge_writes,
        }))
    }

    async fn create_collection(&self, name: &str, options: Document) -> DatabaseResult<()> {
        warn_unknown_options(&options, &[], "create_collection");

        let mut store = self.store.write().await;
        if store.contains_key(name) {
            return Err(DatabaseError::Backend(format!("collection {name} already exists")));
        }
        store.insert(name.to_string(), MemoryCollection::new());

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DatabaseResult<()> {
        self.store.write().await.remove(name);
        Ok(())
    }

    async fn has_index(&self, collection: &str, name: &str) -> DatabaseResult<bool> {
        Ok(self
            .store
            .read()
            .await
            .get(collection)
            .is_some_and(|collection| collection.indexes.iter().any(|index| index.name == name)))
    }

    async fn get_indexes(&self, collection: &str) -> DatabaseResult<Vec<IndexInfo>> {
        self.store
            .read()
            .await
            .get(collection)
            .map(|collection| collection.indexes.clone())
            .ok_or_else(|| DatabaseError::CollectionNotFound(collection.to_string()))
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        options: Document,
    ) -> DatabaseResult<String> {
        warn_unknown_options(&options, &["name", "unique"], "create_index");

        if keys.is_empty() {
            return Err(DatabaseError::InvalidDocument("index keys are empty".to_string()));
        }

        let name = options
            .get_str("name")
            .map(str::to_string)
            .unwrap_or_else(|_| default_index_name(&keys));
        let index = IndexInfo {
            name: name.clone(),
            keys,
            unique: option_bool(&options, "unique", false),
        };

        let mut store = self.store.write().await;
        let target = store
            .entry(collection.to_string())
            .or_insert_with(MemoryCollection::new);

        if let Some(existing) = target.indexes.iter().find(|existing| existing.name == name) {
            if *existing == index {
                return Ok(name);
            }
            return Err(DatabaseError::Backend(format!(
                "index {name} already exists with different options"
            )));
        }

        if index.unique {
            let mut seen: Vec<Vec<Bson>> = Vec::new();
            for document in &target.documents {
                let key = index_key(&index, document);
                if seen.iter().any(|other| {
                    other
                        .iter()
                        .zip(&key)
                        .all(|(left, right)| values_equal(left, right))
                }) {
                    return Err(DatabaseError::DuplicateKey(format!(
                        "existing documents violate unique index {name}"
                    )));
                }
                seen.push(key);
            }
        }

        target.indexes.push(index);
        log::debug!("created index {name} on {collection}");

        Ok(name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DatabaseResult<()> {
        if name == PRIMARY_INDEX {
            return Err(DatabaseError::Backend("cannot drop the _id index".to_string()));
        }

        let mut store = self.store.write().await;
        let target = store
            .get_mut(collection)
            .ok_or_else(|| DatabaseError::CollectionNotFound(collection.to_string()))?;

        let before = target.indexes.len();
        target.indexes.retain(|index| index.name != name);
        if target.indexes.len() == before {
            return Err(DatabaseError::Backend(format!("index {name} not found")));
        }

        Ok(())
    }

    async fn begin_transaction(&self) -> DatabaseResult<()> {
        let mut snapshot = self.snapshot.write().await;
        if snapshot.is_some() {
            return Err(DatabaseError::TransactionAlreadyActive);
        }
        *snapshot = Some(self.store.read().await.clone());

        Ok(())
    }

    async fn commit(&self) -> DatabaseResult<()> {
        self.snapshot
            .write()
            .await
            .take()
            .map(|_| ())
            .ok_or(DatabaseError::NoActiveTransaction)
    }

    async fn abort(&self) -> DatabaseResult<()> {
        let saved = self
            .snapshot
            .write()
            .await
            .take()
            .ok_or(DatabaseError::NoActiveTransaction)?;
        *self.store.write().await = saved;

        Ok(())
    }
}

/// Reads and writes against one in-memory collection.
///
/// Reads of a missing collection return nothing; writes create it.
#[derive(Clone, Debug)]
pub struct MemoryCollectionHandle {
    name: String,
    store: Arc<RwLock<StoreMap>>,
    acknowledge_writes: bool,
}

#[async_trait]
impl CollectionHandle for MemoryCollectionHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document, options: Document) -> DatabaseResult<Vec<Document>> {
        warn_unknown_options(&options, FIND_OPTIONS, "find");

        let store = self.store.read().await;
        let Some(collection) = store.get(&self.name) else {
            return Ok(Vec::new());
        };

        let mut documents = select_matching(&collection.documents, &filter)?;
        drop(store);

        if let Ok(sort) = options.get_document("sort") {
            sort_documents(&mut documents, sort);
        }

        let skip = option_u64(&options, "skip").unwrap_or(0) as usize;
        let limit = option_u64(&options, "limit")
            .filter(|limit| *limit > 0)
            .map(|limit| limit as usize)
            .unwrap_or(usize::MAX);
        let documents = documents.into_iter().skip(skip).take(limit);

        Ok(match options.get_document("projection") {
            Ok(projection) => documents
                .map(|document| project(&document, projection))
                .collect(),
            Err(_) => documents.collect(),
        })
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Document,
    ) -> DatabaseResult<Vec<Document>> {
        warn_unknown_options(&options, AGGREGATE_OPTIONS, "aggregate");

        let documents = self
            .store
            .read()
            .await
            .get(&self.name)
            .map(|collection| collection.documents.clone())
            .unwrap_or_default();

        run_pipeline(documents, &pipeline)
    }

    async fn distinct(&self, field: &str, filter: Option<Document>) -> DatabaseResult<Vec<Bson>> {
        let store = self.store.read().await;
        let Some(collection) = store.get(&self.name) else {
            return Ok(Vec::new());
        };

        let filter = filter.unwrap_or_default();
        let mut values: Vec<Bson> = Vec::new();
        for document in &collection.documents {
            if !DocumentEvaluator::new(document).matches(&filter)? {
                continue;
            }

            let found = match get_path(document, field) {
                Some(Bson::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for value in found {
                if !values.iter().any(|existing| values_equal(existing, &value)) {
                    values.push(value);
                }
            }
        }

        Ok(values)
    }

    async fn insert_one(&self, document: Document) -> DatabaseResult<InsertOneOutcome> {
        let inserted_ids = self.insert_documents(vec![document]).await?;

        Ok(InsertOneOutcome {
            acknowledged: self.acknowledge_writes,
            inserted_id: inserted_ids.into_iter().next().unwrap_or(Bson::Null),
        })
    }

    async fn insert_many(&self, documents: Vec<Document>) -> DatabaseResult<InsertManyOutcome> {
        let inserted_ids = self.insert_documents(documents).await?;

        Ok(InsertManyOutcome {
            acknowledged: self.acknowledge_writes,
            inserted_ids,
        })
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Document,
    ) -> DatabaseResult<UpdateOutcome> {
        warn_unknown_options(&options, UPDATE_OPTIONS, "update");

        if update.is_empty() {
            return Err(DatabaseError::InvalidDocument("update document is empty".to_string()));
        }

        let multiple = option_bool(&options, "multiple", true);
        let upsert = option_bool(&options, "upsert", false);

        let mut store = self.store.write().await;
        let collection = store
            .entry(self.name.clone())
            .or_insert_with(MemoryCollection::new);

        let mut targets = Vec::new();
        for (position, document) in collection.documents.iter().enumerate() {
            if DocumentEvaluator::new(document).matches(&filter)? {
                targets.push(position);
                if !multiple {
                    break;
                }
            }
        }

        let mut outcome = UpdateOutcome {
            acknowledged: self.acknowledge_writes,
            matched_count: targets.len() as u64,
            ..UpdateOutcome::default()
        };

        for position in targets {
            let mut updated = collection.documents[position].clone();
            apply_update(&mut updated, &update)?;

            if updated == collection.documents[position] {
                continue;
            }
            if let Some(index) = collection.find_duplicate(&updated, Some(position)) {
                return Err(DatabaseError::DuplicateKey(format!(
                    "update on {} violates unique index {index}",
                    self.name,
                )));
            }

            collection.documents[position] = updated;
            outcome.modified_count += 1;
        }

        if outcome.matched_count == 0 && upsert {
            let mut seeded = upsert_seed(&filter);
            apply_update(&mut seeded, &update)?;
            let seeded = with_primary_key(seeded);

            if let Some(index) = collection.find_duplicate(&seeded, None) {
                return Err(DatabaseError::DuplicateKey(format!(
                    "upsert on {} violates unique index {index}",
                    self.name,
                )));
            }

            collection.documents.push(seeded);
            outcome.upserted_count = 1;
        }

        Ok(outcome)
    }

    async fn delete_many(&self, filter: Document) -> DatabaseResult<DeleteOutcome> {
        let mut store = self.store.write().await;
        let Some(collection) = store.get_mut(&self.name) else {
            return Ok(DeleteOutcome {
                acknowledged: self.acknowledge_writes,
                deleted_count: 0,
            });
        };

        let doomed = collection
            .documents
            .iter()
            .map(|document| DocumentEvaluator::new(document).matches(&filter))
            .collect::<DatabaseResult<Vec<bool>>>()?;

        let before = collection.documents.len();
        let mut flags = doomed.into_iter();
        collection
            .documents
            .retain(|_| !flags.next().unwrap_or(false));

        Ok(DeleteOutcome {
            acknowledged: self.acknowledge_writes,
            deleted_count: (before - collection.documents.len()) as u64,
        })
    }
}

impl MemoryCollectionHandle {
    // All or nothing: a duplicate key anywhere in the batch leaves the collection untouched.
    async fn insert_documents(&self, documents: Vec<Document>) -> DatabaseResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let collection = store
            .entry(self.name.clone())
            .or_insert_with(MemoryCollection::new);

        let mut staged = collection.clone();
        let mut inserted_ids = Vec::with_capacity(documents.len());

        for document in documents {
            let document = with_primary_key(document);

            if let Some(index) = staged.find_duplicate(&document, None) {
                return Err(DatabaseError::DuplicateKey(format!(
                    "insert into {} violates unique index {index}",
                    self.name,
                )));
            }

            inserted_ids.push(document.get(PRIMARY_KEY).cloned().unwrap_or(Bson::Null));
            staged.documents.push(document);
        }

        *collection = staged;
        log::debug!("inserted {} documents into {}", inserted_ids.len(), self.name);

        Ok(inserted_ids)
    }
}

// A generated key goes first, the way a document store lays it out.
fn with_primary_key(document: Document) -> Document {
    if document.contains_key(PRIMARY_KEY) {
        return document;
    }

    let mut keyed = doc! { PRIMARY_KEY: ObjectId::new() };
    keyed.extend(document);
    keyed
}

/// Builder for [`MemoryConnection`].
///
/// # Example
///
/// ```ignore
/// use docquery_memory::MemoryConnection;
/// use docquery::backend::ConnectionBuilder;
/// use bson::doc;
///
/// let connection = MemoryConnection::builder()
///     .with_collection("users", vec![doc! { "name": "Ann" }])
///     .build()
///     .await?;
/// ```
pub struct MemoryConnectionBuilder {
    acknowledge_writes: bool,
    collections: Vec<(String, Vec<Document>)>,
}

impl Default for MemoryConnectionBuilder {
    fn default() -> Self {
        Self {
            acknowledge_writes: true,
            collections: Vec::new(),
        }
    }
}

impl MemoryConnectionBuilder {
    /// Sets whether writes report themselves as acknowledged. Unacknowledged writes are
    /// still applied.
    pub fn with_acknowledged_writes(mut self, acknowledge: bool) -> Self {
        self.acknowledge_writes = acknowledge;
        self
    }

    /// Seeds a collection. Documents without a primary key get a generated one.
    pub fn with_collection(mut self, name: &str, documents: Vec<Document>) -> Self {
        self.collections.push((name.to_string(), documents));
        self
    }
}

#[async_trait]
impl ConnectionBuilder for MemoryConnectionBuilder {
    type Connection = MemoryConnection;

    async fn build(self) -> DatabaseResult<Self::Connection> {
        let connection = MemoryConnection {
            acknowledge_writes: self.acknowledge_writes,
            ..MemoryConnection::new()
        };

        for (name, documents) in self.collections {
            let handle = MemoryCollectionHandle {
                name,
                store: connection.store.clone(),
                acknowledge_writes: true,
            };
            handle
                .insert_documents(documents)
                .await
                .map_err(|err| DatabaseError::Initialization(err.to_string()))?;
        }

        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn users() -> Arc<dyn CollectionHandle> {
        let connection = MemoryConnection::builder()
            .with_collection(
                "users",
                vec![
                    doc! { "_id": 1, "name": "Ann", "age": 17 },
                    doc! { "_id": 2, "name": "Bob", "age": 20 },
                    doc! { "_id": 3, "name": "Cy", "age": 25 },
                ],
            )
            .build()
            .await
            .unwrap();

        connection.collection("users").await.unwrap()
    }

    #[tokio::test]
    async fn find_applies_options_in_order() {
        let users = users().await;
        let rows = users
            .find(
                doc! { "age": { "$gte": 18 } },
                doc! { "sort": { "age": -1 }, "limit": 1_i64, "projection": { "name": 1, "_id": 0 } },
            )
            .await
            .unwrap();

        assert_eq!(rows, vec![doc! { "name": "Cy" }]);
    }

    #[tokio::test]
    async fn inserts_generate_keys_and_reject_duplicates() {
        let users = users().await;

        let outcome = users.insert_one(doc! { "name": "Di" }).await.unwrap();
        assert!(matches!(outcome.inserted_id, Bson::ObjectId(_)));

        let err = users
            .insert_many(vec![doc! { "_id": 9 }, doc! { "_id": 1 }])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateKey(_)));
        assert!(users.find(doc! { "_id": 9 }, doc! {}).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_counts_only_real_changes() {
        let users = users().await;
        let outcome = users
            .update_many(doc! {}, doc! { "$set": { "age": 20 } }, doc! {})
            .await
            .unwrap();

        assert_eq!(outcome.matched_count, 3);
        assert_eq!(outcome.modified_count, 2);
    }

    #[tokio::test]
    async fn update_single_and_upsert() {
        let users = users().await;

        let single = users
            .update_many(doc! {}, doc! { "$inc": { "age": 1 } }, doc! { "multiple": false })
            .await
            .unwrap();
        assert_eq!(single.modified_count, 1);

        let upserted = users
            .update_many(
                doc! { "name": "Eve" },
                doc! { "$set": { "age": 40 } },
                doc! { "upsert": true },
            )
            .await
            .unwrap();
        assert_eq!(upserted.upserted_count, 1);

        let eve = users.find(doc! { "name": "Eve" }, doc! {}).await.unwrap();
        assert_eq!(eve[0].get_i32("age").unwrap(), 40);
    }

    #[tokio::test]
    async fn delete_and_distinct() {
        let users = users().await;

        let deleted = users.delete_many(doc! { "age": { "$lt": 21 } }).await.unwrap();
        assert_eq!(deleted.deleted_count, 2);

        let names = users.distinct("name", None).await.unwrap();
        assert_eq!(names, vec![Bson::String("Cy".into())]);
    }

    #[tokio::test]
    async fn unique_indexes_are_enforced() {
        let connection = MemoryConnection::new();
        let name = connection
            .create_index("users", doc! { "email": 1 }, doc! { "unique": true })
            .await
            .unwrap();
        assert_eq!(name, "email_1");
        assert!(connection.has_index("users", "email_1").await.unwrap());
        assert_eq!(connection.get_indexes("users").await.unwrap().len(), 2);

        let users = connection.collection("users").await.unwrap();
        users.insert_one(doc! { "email": "a@b.c" }).await.unwrap();
        let err = users.insert_one(doc! { "email": "a@b.c" }).await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateKey(_)));

        connection.drop_index("users", "email_1").await.unwrap();
        assert!(connection.drop_index("users", "_id_").await.is_err());
    }

    #[tokio::test]
    async fn abort_restores_snapshot() {
        let connection = MemoryConnection::new();
        let items = connection.collection("items").await.unwrap();
        items.insert_one(doc! { "n": 1 }).await.unwrap();

        connection.begin_transaction().await.unwrap();
        assert!(matches!(
            connection.begin_transaction().await,
            Err(DatabaseError::TransactionAlreadyActive)
        ));
        items.insert_one(doc! { "n": 2 }).await.unwrap();
        connection.abort().await.unwrap();

        assert_eq!(items.find(doc! {}, doc! {}).await.unwrap().len(), 1);
        assert!(matches!(connection.commit().await, Err(DatabaseError::NoActiveTransaction)));
    }

    #[tokio::test]
    async fn collections_are_listed_and_dropped() {
        let connection = MemoryConnection::new();
        connection.create_collection("b", doc! {}).await.unwrap();
        connection.create_collection("a", doc! {}).await.unwrap();
        assert!(connection.create_collection("a", doc! {}).await.is_err());

        assert_eq!(connection.get_collections().await.unwrap(), vec!["a", "b"]);

        connection.drop_collection("a").await.unwrap();
        assert!(!connection.has_collection("a").await.unwrap());
    }
}

use docquery::{
    bson::{Bson, Document, doc, oid::ObjectId},
    memory::MemoryConnection,
    prelude::*,
};
use serde::{Deserialize, Serialize};

async fn database(acknowledge: bool) -> Database<MemoryConnection> {
    let connection = MemoryConnection::builder()
        .with_acknowledged_writes(acknowledge)
        .with_collection(
            "users",
            vec![
                doc! { "_id": 1, "name": "Ann", "status": "active", "visits": 1 },
                doc! { "_id": 2, "name": "Bob", "status": "active", "visits": 4 },
                doc! { "_id": 3, "name": "Cid", "status": "inactive", "visits": 2 },
            ],
        )
        .build()
        .await
        .unwrap();

    Database::new(connection)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Account {
    owner: String,
    balance: i64,
    #[serde(default)]
    tags: Vec<String>,
}

#[tokio::test]
async fn lone_document_is_stored_like_a_batch_of_one() {
    let db = database(true).await;
    let single = db.collection("single").await.unwrap();
    let batch = db.collection("batch").await.unwrap();
    let record = doc! { "_id": "k", "name": "Ann", "address": { "city": "Oslo" } };

    assert!(single.insert(record.clone()).await.unwrap());
    assert!(batch.insert(vec![record.clone()]).await.unwrap());

    let stored_single = single.new_query().get(&["*"]).await.unwrap();
    let stored_batch = batch.new_query().get(&["*"]).await.unwrap();
    assert_eq!(stored_single, vec![record]);
    assert_eq!(stored_single, stored_batch);
}

#[tokio::test]
async fn batches_from_arrays_and_documents_of_documents() {
    let db = database(true).await;
    let logs = db.collection("logs").await.unwrap();

    logs.insert(vec![doc! { "level": "info" }, doc! { "level": "warn" }])
        .await
        .unwrap();
    logs.insert(doc! { "first": { "level": "error" }, "second": { "level": "debug" } })
        .await
        .unwrap();

    let levels: Vec<String> = logs
        .new_query()
        .get(&["*"])
        .await
        .unwrap()
        .iter()
        .map(|row| row.get_str("level").unwrap().to_string())
        .collect();
    assert_eq!(levels, vec!["info", "warn", "error", "debug"]);
}

#[tokio::test]
async fn invalid_inserts_are_rejected() {
    let db = database(true).await;
    let users = db.collection("users").await.unwrap();

    let err = users.insert(Vec::<Document>::new()).await.unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidDocument(_)));

    let err = users.insert(Bson::Int32(4)).await.unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidDocument(_)));
}

#[tokio::test]
async fn duplicate_keys_leave_the_collection_untouched() {
    let db = database(true).await;
    let users = db.collection("users").await.unwrap();

    let err = users
        .insert(vec![doc! { "_id": 10, "name": "Dan" }, doc! { "_id": 1, "name": "Eve" }])
        .await
        .unwrap_err();

    assert!(matches!(err, DatabaseError::DuplicateKey(_)));
    assert_eq!(users.new_query().count().await.unwrap(), 3);
}

#[tokio::test]
async fn insert_get_id_returns_keys() {
    let db = database(true).await;
    let users = db.collection("users").await.unwrap();

    let id = users
        .insert_get_id(doc! { "name": "Dan", "email": "dan@example.com" }, None)
        .await
        .unwrap()
        .unwrap();
    let Bson::ObjectId(oid) = id.clone() else {
        panic!("expected a generated object id, got {id:?}");
    };

    let found = users
        .new_query()
        .find(oid.to_hex(), &["*"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get_str("name").unwrap(), "Dan");

    let email = users
        .insert_get_id(doc! { "name": "Eve", "email": "eve@example.com" }, Some("email"))
        .await
        .unwrap();
    assert_eq!(email, Some(Bson::String("eve@example.com".into())));

    let explicit = ObjectId::new();
    let id = users
        .insert_get_id(doc! { "_id": explicit, "name": "Fay" }, Some("_id"))
        .await
        .unwrap();
    assert_eq!(id, Some(Bson::ObjectId(explicit)));
}

#[tokio::test]
async fn update_sets_fields_on_every_match() {
    let db = database(true).await;
    let users = db.collection("users").await.unwrap();

    let modified = users
        .new_query()
        .and_where("status", "=", "active")
        .update(doc! { "name": "X" }, doc! {})
        .await
        .unwrap();
    assert_eq!(modified, 2);

    let renamed = users.new_query().and_where("name", "=", "X").count().await.unwrap();
    assert_eq!(renamed, 2);

    let cid = users.new_query().find(3, &["*"]).await.unwrap().unwrap();
    assert_eq!(cid, doc! { "_id": 3, "name": "Cid", "status": "inactive", "visits": 2 });
}

#[tokio::test]
async fn update_operators_and_options() {
    let db = database(true).await;
    let users = db.collection("users").await.unwrap();

    let modified = users
        .new_query()
        .update(doc! { "$inc": { "visits": 10 } }, doc! { "multiple": false })
        .await
        .unwrap();
    assert_eq!(modified, 1);
    assert_eq!(users.new_query().sum("visits").await.unwrap(), Bson::Int32(17));

    // Writing the value a record already holds modifies nothing.
    let modified = users
        .new_query()
        .and_where("_id", "=", 2)
        .update(doc! { "status": "active" }, doc! {})
        .await
        .unwrap();
    assert_eq!(modified, 0);

    let upserted = users
        .new_query()
        .and_where("name", "=", "Dan")
        .update(doc! { "status": "new" }, doc! { "upsert": true })
        .await
        .unwrap();
    assert_eq!(upserted, 1);

    let dan = users
        .new_query()
        .and_where("name", "=", "Dan")
        .first(&["name", "status"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dan.get_str("status").unwrap(), "new");

    let err = users
        .new_query()
        .update(doc! { "$inc": { "visits": 1 }, "name": "Y" }, doc! {})
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidDocument(_)));
}

#[tokio::test]
async fn update_outcome_reports_raw_counts() {
    let db = database(true).await;
    let users = db.collection("users").await.unwrap();

    let outcome = users
        .new_query()
        .and_where("status", "=", "active")
        .update_outcome(doc! { "status": "active", "seen": true }, doc! {})
        .await
        .unwrap();
    assert!(outcome.acknowledged);
    assert_eq!(outcome.matched_count, 2);
    assert_eq!(outcome.modified_count, 2);
    assert_eq!(outcome.upserted_count, 0);

    let outcome = users
        .new_query()
        .and_where("_id", "=", 1)
        .update_outcome(doc! { "seen": true }, doc! {})
        .await
        .unwrap();
    assert_eq!(outcome.matched_count, 1);
    assert_eq!(outcome.modified_count, 0);
}

#[tokio::test]
async fn delete_matches_or_one_key() {
    let db = database(true).await;
    let users = db.collection("users").await.unwrap();

    let deleted = users.new_query().delete(Some(Bson::Int32(2))).await.unwrap();
    assert_eq!(deleted, 1);

    let deleted = users
        .new_query()
        .and_where("status", "=", "active")
        .delete(None)
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let remaining = users.new_query().get(&["*"]).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get_i32("_id").unwrap(), 3);
}

#[tokio::test]
async fn unacknowledged_writes_report_nothing() {
    let db = database(false).await;
    let users = db.collection("users").await.unwrap();

    assert!(!users.insert(doc! { "_id": 4, "name": "Dan" }).await.unwrap());
    assert_eq!(users.insert_get_id(doc! { "name": "Eve" }, None).await.unwrap(), None);
    assert_eq!(
        users.new_query().update(doc! { "status": "gone" }, doc! {}).await.unwrap(),
        0
    );
    assert_eq!(users.new_query().and_where("_id", "=", 1).delete(None).await.unwrap(), 0);

    // The store still applied every write.
    assert_eq!(users.new_query().count().await.unwrap(), 4);
    assert_eq!(users.new_query().and_where("status", "=", "gone").count().await.unwrap(), 4);
}

#[tokio::test]
async fn typed_records_round_trip() {
    let db = database(true).await;
    let accounts = db.collection("accounts").await.unwrap();
    let records = vec![
        Account { owner: "ann".into(), balance: 100, tags: vec!["vip".into()] },
        Account { owner: "bob".into(), balance: 5, tags: Vec::new() },
    ];

    assert!(accounts.insert_records(&records).await.unwrap());

    let stored: Vec<Account> = accounts
        .new_query()
        .order_by("owner", "asc")
        .get_as(&["owner", "balance", "tags"])
        .await
        .unwrap();
    assert_eq!(stored, records);

    let rich: Option<Account> = accounts
        .new_query()
        .and_where("balance", ">", 50_i64)
        .first_as(&["*"])
        .await
        .unwrap();
    assert_eq!(rich.map(|account| account.owner), Some("ann".to_string()));

    let json = records[1].to_json().unwrap();
    assert_eq!(json, serde_json::json!({ "owner": "bob", "balance": 5, "tags": [] }));
    assert_eq!(Account::from_json(json).unwrap(), records[1]);
}

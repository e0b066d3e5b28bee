// SPDX-License-Identifier: PMPL-1.0-or-later
//! Adapter behaviour against the in-memory driver.

use std::sync::Arc;

use docrelay_store::{
    document_from_json, Document, DocumentStore, GetAllResult, InMemoryDriver, ObjectId, SetOutcome, StoreConfig,
    StoreError, Value,
};
use serde_json::json;

fn doc(json: serde_json::Value) -> Document {
    document_from_json(json).unwrap()
}

fn store() -> DocumentStore {
    DocumentStore::new(Arc::new(InMemoryDriver::new()), StoreConfig::default())
}

async fn seed(store: &DocumentStore, count: i64) {
    for n in 0..count {
        store
            .set_new("shop", "items", doc(json!({"n": n, "kind": "widget"})))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn paginated_get_all_returns_page_and_total() {
    let store = store();
    seed(&store, 12).await;

    let result = store
        .get_all(
            "shop",
            "items",
            doc(json!({"kind": "widget"})),
            doc(json!({"paginate": true, "page": 2, "limit": 5, "sort": {"n": 1}})),
        )
        .await
        .unwrap();

    match result {
        GetAllResult::Page(page) => {
            assert_eq!(page.items.len(), 5);
            assert_eq!(page.total, 12);
            assert_eq!(page.page, 2);
            assert_eq!(page.limit, 5);
            assert_eq!(page.items[0].get("n"), Some(&Value::Int(5)));
        }
        other => panic!("expected a page, got {other:?}"),
    }
}

#[tokio::test]
async fn paginated_get_all_uses_default_limit_and_stages() {
    let store = DocumentStore::new(
        Arc::new(InMemoryDriver::new()),
        StoreConfig { default_page_limit: 4 },
    );
    seed(&store, 9).await;

    let result = store
        .get_all(
            "shop",
            "items",
            Document::new(),
            doc(json!({
                "paginate": true,
                "stages": [{"$match": {"n": {"$gte": 3}}}],
                "projection": {"_id": 0, "kind": 0},
            })),
        )
        .await
        .unwrap()
        .into_value();

    assert_eq!(
        result.to_json(),
        json!({
            "items": [{"n": 3}, {"n": 4}, {"n": 5}, {"n": 6}],
            "total": 6,
            "page": 1,
            "limit": 4,
        })
    );
}

#[tokio::test]
async fn paginated_get_all_over_empty_collection() {
    let result = store()
        .get_all("shop", "none", Document::new(), doc(json!({"paginate": true})))
        .await
        .unwrap()
        .into_value();
    assert_eq!(result.to_json(), json!({"items": [], "total": 0, "page": 1, "limit": 10}));
}

#[tokio::test]
async fn plain_get_all_honours_sort_skip_limit() {
    let store = store();
    seed(&store, 6).await;
    let result = store
        .get_all(
            "shop",
            "items",
            Document::new(),
            doc(json!({"sort": {"n": -1}, "skip": 1, "limit": 2, "projection": {"n": 1, "_id": 0}})),
        )
        .await
        .unwrap()
        .into_value();
    assert_eq!(result.to_json(), json!([{"n": 4}, {"n": 3}]));
}

async fn seed_scores(store: &DocumentStore) {
    for (name, score) in [("cy", 1), ("al", 3), ("bo", 2), ("ax", 3)] {
        store
            .set_new("game", "scores", doc(json!({"name": name, "score": score})))
            .await
            .unwrap();
    }
}

fn names(docs: &[Document]) -> Vec<&str> {
    docs.iter().filter_map(|d| d.get("name").and_then(Value::as_str)).collect()
}

#[tokio::test]
async fn compound_sort_applies_keys_in_given_order() {
    let store = store();
    seed_scores(&store).await;

    let plain = store
        .get_all("game", "scores", Document::new(), doc(json!({"sort": {"score": -1, "name": 1}})))
        .await
        .unwrap();
    match plain {
        GetAllResult::Documents(docs) => assert_eq!(names(&docs), vec!["al", "ax", "bo", "cy"]),
        other => panic!("expected documents, got {other:?}"),
    }

    let paged = store
        .get_all(
            "game",
            "scores",
            Document::new(),
            doc(json!({"paginate": true, "limit": 3, "sort": {"score": -1, "name": 1}})),
        )
        .await
        .unwrap();
    match paged {
        GetAllResult::Page(page) => assert_eq!(names(&page.items), vec!["al", "ax", "bo"]),
        other => panic!("expected a page, got {other:?}"),
    }
}

#[tokio::test]
async fn compound_index_keeps_key_order() {
    let store = store();
    let name = store
        .create_index("game", "scores", doc(json!({"score": 1, "name": 1})), Document::new())
        .await
        .unwrap();
    assert_eq!(name, "score_1_name_1");

    let indexes = store.list_indexes("game", "scores").await.unwrap();
    let index = indexes.iter().find(|i| i.name == name).unwrap();
    let keys: Vec<&str> = index.keys.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["score", "name"]);
}

#[tokio::test]
async fn hex_identifiers_are_coerced_before_querying() {
    let store = store();
    let first = store.set_new("app", "users", doc(json!({"name": "ada"}))).await.unwrap();
    store.set_new("app", "users", doc(json!({"name": "bob"}))).await.unwrap();

    let hex = first.get("_id").and_then(Value::as_object_id).unwrap().to_hex();
    let found = store
        .get("app", "users", doc(json!({"_id": hex})), Document::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("name"), Some(&Value::from("ada")));

    let deleted = store.del("app", "users", doc(json!({"_id": hex}))).await.unwrap();
    assert_eq!(deleted.deleted_count, 1);
    let remaining = store
        .get_all("app", "users", Document::new(), Document::new())
        .await
        .unwrap()
        .into_value();
    assert_eq!(remaining.as_array().map(|a| a.len()), Some(1));
}

#[tokio::test]
async fn set_new_stores_references_as_identifiers() {
    let store = store();
    let parent = ObjectId::new();
    let child = store
        .set_new("app", "children", doc(json!({"parent": parent.to_hex()})))
        .await
        .unwrap();
    assert_eq!(child.get("parent"), Some(&Value::ObjectId(parent)));
}

#[tokio::test]
async fn set_wraps_plain_data_and_reports_counts() {
    let store = store();
    store.set_new("app", "users", doc(json!({"name": "ada", "age": 36}))).await.unwrap();

    let outcome = store
        .set("app", "users", doc(json!({"name": "ada"})), doc(json!({"age": 37})), Document::new())
        .await
        .unwrap();
    match outcome {
        SetOutcome::Update(result) => {
            assert_eq!(result.matched_count, 1);
            assert_eq!(result.modified_count, 1);
        }
        other => panic!("expected counts, got {other:?}"),
    }

    let found = store
        .get("app", "users", doc(json!({"name": "ada"})), Document::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("age"), Some(&Value::Int(37)));
}

#[tokio::test]
async fn upsert_with_return_document_after_yields_new_document() {
    let store = store();
    let outcome = store
        .set(
            "app",
            "settings",
            doc(json!({"key": "theme"})),
            doc(json!({"value": "dark"})),
            doc(json!({"upsert": true, "returnDocument": "after"})),
        )
        .await
        .unwrap();
    let value = outcome.into_value();
    assert_eq!(value.lookup_path("key"), Some(&Value::from("theme")));
    assert_eq!(value.lookup_path("value"), Some(&Value::from("dark")));
    assert!(matches!(value.lookup_path("_id"), Some(Value::ObjectId(_))));
}

#[tokio::test]
async fn invalid_return_document_is_rejected() {
    let err = store()
        .set(
            "app",
            "settings",
            Document::new(),
            doc(json!({"a": 1})),
            doc(json!({"returnDocument": "sideways"})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn bulk_applies_mixed_operations_in_order() {
    let store = store();
    let result = store
        .bulk(
            "app",
            "events",
            vec![
                Value::from(json!({"insertOne": {"document": {"k": 1}}})),
                Value::from(json!({"insertOne": {"document": {"k": 2}}})),
                Value::from(json!({"updateMany": {"filter": {}, "update": {"$inc": {"k": 10}}}})),
                Value::from(json!({"deleteOne": {"filter": {"k": 12}}})),
                Value::from(json!({"replaceOne": {"filter": {"k": 99}, "replacement": {"k": 0}, "upsert": true}})),
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.modified_count, 2);
    assert_eq!(result.deleted_count, 1);
    assert_eq!(result.upserted_count, 1);
    assert!(result.upserted_ids.contains_key(&4));

    let remaining = store
        .aggregate(
            "app",
            "events",
            vec![Value::from(json!({"$sort": {"k": 1}})), Value::from(json!({"$project": {"_id": 0}}))],
        )
        .await
        .unwrap();
    assert_eq!(remaining, vec![doc(json!({"k": 0})), doc(json!({"k": 11}))]);
}

#[tokio::test]
async fn aggregate_rejects_unknown_stage() {
    let err = store()
        .aggregate("app", "events", vec![Value::from(json!({"$graphLookup": {}}))])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unrecognized pipeline stage name: '$graphLookup'");
}

#[tokio::test]
async fn create_index_returns_name_and_enforces_uniqueness() {
    let store = store();
    let name = store
        .create_index("app", "users", doc(json!({"email": 1})), doc(json!({"unique": true, "sparse": false})))
        .await
        .unwrap();
    assert_eq!(name, "email_1");

    let named = store
        .create_index("app", "users", doc(json!({"age": -1})), doc(json!({"name": "by_age"})))
        .await
        .unwrap();
    assert_eq!(named, "by_age");

    store.set_new("app", "users", doc(json!({"email": "a@b.c"}))).await.unwrap();
    let err = store
        .set_new("app", "users", doc(json!({"email": "a@b.c"})))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("E11000 duplicate key error"));

    let indexes = store.list_indexes("app", "users").await.unwrap();
    let email = indexes.iter().find(|i| i.name == "email_1").unwrap();
    assert!(email.unique);
    assert_eq!(email.options.get("sparse"), Some(&Value::Bool(false)));
}

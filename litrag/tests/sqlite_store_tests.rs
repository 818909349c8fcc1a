//! Integration tests for the SQLite parent store.

use std::sync::Arc;

use futures::TryStreamExt;
use litrag::{ParentDocument, ParentStore, RetrievalError, SqliteParentStore};
use serde_json::json;

fn doc(id: &str, text: &str) -> ParentDocument {
    ParentDocument::new(id, text)
        .with_metadata("year", 2021)
        .with_metadata("doi", format!("10.1000/{id}"))
}

async fn file_store(dir: &tempfile::TempDir, table: &str) -> SqliteParentStore {
    SqliteParentStore::open(dir.path().join("parents.db"), table).await.unwrap()
}

#[tokio::test]
async fn get_many_matches_input_order_and_length() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir, "parent_documents").await;
    store.put_many(&[doc("a", "alpha"), doc("b", "beta"), doc("c", "gamma")]).await.unwrap();

    let found = store.get_many(&["c", "missing", "a", "c"]).await.unwrap();
    assert_eq!(found.len(), 4);
    assert_eq!(found[0].as_ref().unwrap().text, "gamma");
    assert!(found[1].is_none());
    assert_eq!(found[2].as_ref().unwrap().id, "a");
    assert_eq!(found[3].as_ref().unwrap().id, "c");
}

#[tokio::test]
async fn content_round_trips_text_and_metadata() {
    let store = SqliteParentStore::in_memory("parents").await.unwrap();
    let original = ParentDocument::new("pmc-1", "Full text with \"quotes\" and ünïcode.")
        .with_metadata("year", 1998)
        .with_metadata("authors", json!(["A. Author", "B. Author"]))
        .with_metadata("impact", 3.25);
    store.put_many(std::slice::from_ref(&original)).await.unwrap();

    let found = store.get_many(&["pmc-1"]).await.unwrap();
    assert_eq!(found[0].as_ref(), Some(&original));
}

#[tokio::test]
async fn reads_before_first_write_find_nothing() {
    let store = SqliteParentStore::in_memory("parents").await.unwrap();
    assert_eq!(store.get_many(&["a"]).await.unwrap(), vec![None]);
    let ids: Vec<String> = store.scan(None).try_collect().await.unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn delete_before_first_write_is_not_initialized() {
    let store = SqliteParentStore::in_memory("parents").await.unwrap();
    let err = store.delete_many(&["a"]).await.unwrap_err();
    assert!(matches!(err, RetrievalError::StoreNotInitialized { ref table } if table == "parents"));
}

#[tokio::test]
async fn duplicate_ids_append_and_lookup_returns_earliest() {
    let store = SqliteParentStore::in_memory("parents").await.unwrap();
    store.put_many(&[doc("a", "first")]).await.unwrap();
    store.put_many(&[doc("a", "second"), doc("b", "beta")]).await.unwrap();

    let ids: Vec<String> = store.scan(None).try_collect().await.unwrap();
    assert_eq!(ids, ["a", "a", "b"]);
    assert_eq!(store.get_many(&["a"]).await.unwrap()[0].as_ref().unwrap().text, "first");

    store.delete_many(&["a"]).await.unwrap();
    let ids: Vec<String> = store.scan(None).try_collect().await.unwrap();
    assert_eq!(ids, ["b"]);
}

#[tokio::test]
async fn table_creation_is_idempotent_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = file_store(&dir, "parents").await;
        store.put_many(&[doc("a", "alpha")]).await.unwrap();
        store.put_many(&[]).await.unwrap();
    }

    let reopened = file_store(&dir, "parents").await;
    reopened.put_many(&[doc("b", "beta")]).await.unwrap();
    let found = reopened.get_many(&["a", "b"]).await.unwrap();
    assert!(found.iter().all(Option::is_some));
}

#[tokio::test]
async fn table_names_are_sanitized_and_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let first = file_store(&dir, "papers-2021").await;
    let second = file_store(&dir, "papers 2022").await;
    assert_eq!(first.table_name(), "papers_2021");
    assert_eq!(second.table_name(), "papers_2022");

    first.put_many(&[doc("a", "alpha")]).await.unwrap();
    assert_eq!(second.get_many(&["a"]).await.unwrap(), vec![None]);

    assert!(SqliteParentStore::in_memory("--").await.is_err());
}

#[tokio::test]
async fn keyword_and_numeric_table_names_are_usable() {
    let dir = tempfile::tempdir().unwrap();
    for table in ["order", "2024_papers", "references"] {
        let store = file_store(&dir, table).await;
        assert_eq!(store.table_name(), table);

        store.put_many(&[doc("a", "alpha"), doc("b", "beta")]).await.unwrap();
        let found = store.get_many(&["b", "a"]).await.unwrap();
        assert_eq!(found[0].as_ref().unwrap().text, "beta");

        let ids: Vec<String> = store.scan(Some("a")).try_collect().await.unwrap();
        assert_eq!(ids, ["a"]);

        store.delete_many(&["a"]).await.unwrap();
        let ids: Vec<String> = store.scan(None).try_collect().await.unwrap();
        assert_eq!(ids, ["b"]);
    }
}

#[tokio::test]
async fn scan_pages_through_more_than_one_page_with_prefix() {
    let store = SqliteParentStore::in_memory("parents").await.unwrap();
    let docs: Vec<ParentDocument> = (0..1100)
        .map(|i| doc(&format!("{}{i:05}", if i % 2 == 0 { "pmc_" } else { "pmcx" }), "t"))
        .collect();
    store.put_many(&docs).await.unwrap();

    let all: Vec<String> = store.scan(None).try_collect().await.unwrap();
    assert_eq!(all.len(), 1100);
    assert_eq!(all.first().map(String::as_str), Some("pmc_00000"));

    // `_` must not act as a LIKE wildcard.
    let underscored: Vec<String> = store.scan(Some("pmc_")).try_collect().await.unwrap();
    assert_eq!(underscored.len(), 550);
    assert!(underscored.iter().all(|id| id.starts_with("pmc_")));
}

#[tokio::test]
async fn concurrent_readers_see_the_same_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(file_store(&dir, "parents").await);
    let docs: Vec<ParentDocument> = (0..50).map(|i| doc(&format!("d{i}"), "text")).collect();
    store.put_many(&docs).await.unwrap();

    let mut handles = Vec::new();
    for reader in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let ids: Vec<String> = (0..50).map(|i| format!("d{}", (i + reader) % 50)).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let found = store.get_many(&refs).await.unwrap();
            found.into_iter().zip(ids).all(|(doc, id)| doc.is_some_and(|d| d.id == id))
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

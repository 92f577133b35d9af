//! Runs against a Firestore emulator. Each test returns early unless
//! `FIRESTORE_EMULATOR_HOST` is set, e.g.
//!
//! ```sh
//! gcloud emulators firestore start --host-port=localhost:8080
//! FIRESTORE_EMULATOR_HOST=localhost:8080 cargo test --test firestore_emulator_test
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use flagfile_docstore::client::WriteOp;
use flagfile_docstore::document::Fields;
use flagfile_docstore::{
    ClientOptions, Collection, DataKind, DocumentClient, FirestoreClient, FirestoreOptions, ItemDescriptor,
    KeyedItem, StoreBuilder,
};
use serde_json::json;

const PROJECT_ID: &str = "flagfile-docstore-test";

fn emulator_host() -> Option<String> {
    std::env::var("FIRESTORE_EMULATOR_HOST").ok().filter(|h| !h.is_empty())
}

fn options(host: String) -> FirestoreOptions {
    FirestoreOptions {
        emulator_host: Some(host),
        ..FirestoreOptions::default()
    }
}

/// A collection no other test run uses.
fn unique_collection(name: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("{}-{}-{}", name, nanos, COUNTER.fetch_add(1, Ordering::SeqCst))
}

fn builder(host: String, collection: &str) -> StoreBuilder {
    StoreBuilder::new(PROJECT_ID, collection).client_options(ClientOptions::Firestore(options(host)))
}

fn item(key: &str, version: u64) -> KeyedItem {
    KeyedItem::new(key, ItemDescriptor::new(version, format!(r#"{{"key":"{key}"}}"#)))
}

#[tokio::test]
async fn data_store_round_trip() {
    let Some(host) = emulator_host() else { return };
    let collection = unique_collection("flags");
    let store = builder(host, &collection).prefix("emu").build_data_store().unwrap();

    assert_eq!(false, store.is_initialized().await);
    store
        .init(&[
            Collection::new(DataKind::FEATURES, vec![item("a", 1), item("b", 1), item("c", 1)]),
            Collection::new(DataKind::SEGMENTS, vec![]),
        ])
        .await
        .unwrap();
    store
        .init(&[
            Collection::new(DataKind::FEATURES, vec![item("a", 2), item("d", 1)]),
            Collection::new(DataKind::SEGMENTS, vec![]),
        ])
        .await
        .unwrap();
    assert_eq!(true, store.is_initialized().await);

    let mut keys: Vec<String> = store
        .get_all(&DataKind::FEATURES)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.key)
        .collect();
    keys.sort();
    assert_eq!(vec!["a", "d"], keys);

    assert_eq!(true, store.upsert(&DataKind::FEATURES, "a", &item("a", 3).item).await.unwrap());
    assert_eq!(false, store.upsert(&DataKind::FEATURES, "a", &item("a", 3).item).await.unwrap());
    assert_eq!(3, store.get(&DataKind::FEATURES, "a").await.unwrap().unwrap().version);
    assert_eq!(None, store.get(&DataKind::FEATURES, "b").await.unwrap());
    store.close().await.unwrap();
}

#[tokio::test]
async fn big_segment_reads() {
    let Some(host) = emulator_host() else { return };
    let collection = unique_collection("big-segments");
    let client = FirestoreClient::new(PROJECT_ID, options(host.clone())).unwrap();

    let mut membership = Fields::new();
    membership.insert("namespace".into(), json!("big_segments_user"));
    membership.insert("key".into(), json!("ctx"));
    membership.insert("included".into(), json!(["seg.g1"]));
    membership.insert("excluded".into(), json!(["seg.g2"]));
    let mut metadata = Fields::new();
    metadata.insert("synchronizedOn".into(), json!(1_700_000_000_000i64));
    let ops = [
        WriteOp::Set {
            id: "big_segments_user:ctx".into(),
            fields: membership,
        },
        WriteOp::Set {
            id: "big_segments_metadata:big_segments_metadata".into(),
            fields: metadata,
        },
    ];
    let results = client.write_batch(&collection, &ops).await.unwrap();
    assert_eq!(true, results.iter().all(|r| r.is_ok()));

    let store = builder(host, &collection).build_big_segment_store().unwrap();
    let m = store.get_membership("ctx").await.unwrap();
    assert_eq!(Some(true), m.check_membership("seg.g1"));
    assert_eq!(Some(false), m.check_membership("seg.g2"));
    assert_eq!(true, store.get_membership("nobody").await.unwrap().is_empty());
    assert_eq!(
        Some(1_700_000_000_000),
        store.get_metadata().await.unwrap().last_up_to_date
    );
}

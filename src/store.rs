//! Persistent data store for the evaluation engine.
//!
//! Every flag, segment or other entity is one document in a shared
//! collection, addressed through [`DocumentIdentity`]. The document carries
//! the namespace and key (for queries), the version (for conditional
//! updates) and the engine's serialized payload.
//!
//! `init` does not delete everything up front. It snapshots the existing ids
//! for the supplied kinds, writes every new item, then deletes the ids it did
//! not rewrite, and finally writes the readiness sentinel. An upsert from
//! another process that lands between the snapshot and the delete pass can
//! be lost; that process is expected to receive the same update and apply it
//! again.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

#[cfg(any(test, feature = "test-hooks"))]
use futures::future::BoxFuture;
use slog::{debug, info, o, warn, Logger};

use crate::batch::{self, BatchSettings};
use crate::client::{DocumentClient, RetryPolicy, TxDecision, TxOutcome, WriteOp};
use crate::connection::Connection;
use crate::document::{from_fields, to_fields, Fields, InitedDocument, ItemDocument};
use crate::error::{Error, Result};
use crate::ident::DocumentIdentity;
use crate::kind::{Collection, DataKind, ItemDescriptor, KeyedItem};
use crate::metrics::metrics;
use crate::size_guard;

/// Callback run by `upsert` right before its transaction starts.
#[cfg(any(test, feature = "test-hooks"))]
pub type UpdateHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct DataStore {
    conn: Connection,
    retry: RetryPolicy,
    batch: BatchSettings,
    logger: Logger,
    #[cfg(any(test, feature = "test-hooks"))]
    update_hook: std::sync::Mutex<Option<UpdateHook>>,
}

impl DataStore {
    pub(crate) fn new(
        client: Arc<dyn DocumentClient>,
        owns_client: bool,
        collection: String,
        prefix: Option<&str>,
        retry: RetryPolicy,
        batch: BatchSettings,
        logger: &Logger,
    ) -> Self {
        let logger = logger.new(o!("component" => "DataStore", "collection" => collection.clone()));
        info!(logger, "Using collection {}", collection; "backend" => client.backend_name());
        Self {
            conn: Connection::new(client, owns_client, collection, DocumentIdentity::new(prefix)),
            retry,
            batch,
            logger,
            #[cfg(any(test, feature = "test-hooks"))]
            update_hook: std::sync::Mutex::new(None),
        }
    }

    pub fn collection(&self) -> &str {
        &self.conn.collection
    }

    pub fn identity(&self) -> &DocumentIdentity {
        &self.conn.ident
    }

    /// Replaces the stored data for every kind in `all_data`, then marks the
    /// store initialized.
    ///
    /// Items that are too large are skipped and any previously stored value
    /// for their key is deleted. A failed submission may leave some writes
    /// applied; calling `init` again reconciles.
    pub async fn init(&self, all_data: &[Collection]) -> Result<()> {
        let started = Instant::now();
        let result = self.conn.scope.run(self.init_inner(all_data)).await;
        metrics()
            .op_duration
            .with_label_values(&["init"])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn init_inner(&self, all_data: &[Collection]) -> Result<()> {
        let ident = &self.conn.ident;

        // Everything currently stored for these kinds starts out marked for
        // deletion; rewriting an id clears the mark.
        let mut unused_old_ids = self.read_existing_ids(all_data).await?;

        let mut ops = Vec::new();
        let mut num_items = 0;
        for coll in all_data {
            for keyed in &coll.items {
                let doc = ItemDocument::new(ident, &coll.kind, &keyed.key, &keyed.item)?;
                let fields = to_fields(&doc)
                    .map_err(|e| Error::client(format!("encode {} key {}", coll.kind, keyed.key), e))?;
                if !size_guard::admit(&fields, &self.logger) {
                    metrics()
                        .oversized_total
                        .with_label_values(&[doc.namespace.as_str()])
                        .inc();
                    continue;
                }

                let id = ident.item_id(&coll.kind, &keyed.key);
                unused_old_ids.remove(&id);
                ops.push(WriteOp::Set { id, fields });
                num_items += 1;
            }
        }

        let inited_id = ident.inited_id();
        let deletes = unused_old_ids
            .into_iter()
            .filter(|id| *id != inited_id)
            .map(|id| WriteOp::Delete { id })
            .collect::<Vec<_>>();
        let num_deletes = deletes.len();
        ops.extend(deletes);

        let inited_namespace = ident.inited_namespace();
        let sentinel = InitedDocument {
            namespace: inited_namespace.clone(),
            key: inited_namespace,
        };
        ops.push(WriteOp::Set {
            id: inited_id,
            fields: to_fields(&sentinel).map_err(|e| Error::client("encode init marker", e))?,
        });

        let m = metrics();
        m.init_ops_total.with_label_values(&["set"]).inc_by(num_items as u64 + 1);
        m.init_ops_total.with_label_values(&["delete"]).inc_by(num_deletes as u64);

        if let Err(e) = batch::submit(self.conn.client.as_ref(), &self.conn.collection, &ops, self.batch).await {
            warn!(self.logger, "Init did not complete: {}", e);
            return Err(e);
        }

        info!(
            self.logger,
            "Initialized collection {:?} with {} item(s)", self.conn.collection, num_items;
            "deleted" => num_deletes
        );
        Ok(())
    }

    async fn read_existing_ids(&self, all_data: &[Collection]) -> Result<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        for coll in all_data {
            let namespace = self.conn.ident.kind_namespace(&coll.kind);
            let existing = self
                .conn
                .client
                .list_ids(&self.conn.collection, &namespace)
                .await
                .map_err(|e| Error::client(format!("get existing {} items prior to Init", coll.kind), e))?;
            ids.extend(existing);
        }
        Ok(ids)
    }

    /// Whether `init` has completed at least once for this prefix and
    /// collection. Read failures count as "not initialized".
    pub async fn is_initialized(&self) -> bool {
        let id = self.conn.ident.inited_id();
        match self.conn.get(&id, || "read init marker".to_string()).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                debug!(self.logger, "Could not read init marker: {}", e);
                false
            }
        }
    }

    pub async fn get_all(&self, kind: &DataKind) -> Result<Vec<KeyedItem>> {
        let namespace = self.conn.ident.kind_namespace(kind);
        let docs = self
            .conn
            .scope
            .run(async {
                self.conn
                    .client
                    .query(&self.conn.collection, &namespace)
                    .await
                    .map_err(|e| Error::client(format!("get all {}", kind), e))
            })
            .await?;

        docs.into_iter()
            .map(|(id, fields)| -> Result<KeyedItem> {
                Ok(from_fields::<ItemDocument>(&id, fields)?.into_keyed_item())
            })
            .collect()
    }

    pub async fn get(&self, kind: &DataKind, key: &str) -> Result<Option<ItemDescriptor>> {
        let id = self.conn.ident.item_id(kind, key);
        let found = self
            .conn
            .get(&id, || format!("get {} key {}", kind, key))
            .await?;
        match found {
            Some(fields) => Ok(Some(from_fields::<ItemDocument>(&id, fields)?.into_keyed_item().item)),
            None => {
                debug!(self.logger, "Item not found (key={})", key; "kind" => kind.name());
                Ok(None)
            }
        }
    }

    /// Writes `item` if its version is newer than the stored one.
    ///
    /// Returns `Ok(false)` when the stored version is equal or higher, and
    /// when the item is too large to store; neither is an error.
    pub async fn upsert(&self, kind: &DataKind, key: &str, item: &ItemDescriptor) -> Result<bool> {
        let started = Instant::now();
        let result = self.upsert_inner(kind, key, item).await;
        let m = metrics();
        m.op_duration
            .with_label_values(&["upsert"])
            .observe(started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(true) => "applied",
            Ok(false) => "rejected",
            Err(_) => "error",
        };
        m.upserts_total.with_label_values(&[outcome]).inc();
        result
    }

    async fn upsert_inner(&self, kind: &DataKind, key: &str, item: &ItemDescriptor) -> Result<bool> {
        if self.conn.scope.is_cancelled() {
            return Err(Error::Closed);
        }
        let doc = ItemDocument::new(&self.conn.ident, kind, key, item)?;
        let fields = to_fields(&doc).map_err(|e| Error::client(format!("encode {} key {}", kind, key), e))?;
        if !size_guard::admit(&fields, &self.logger) {
            metrics()
                .oversized_total
                .with_label_values(&[doc.namespace.as_str()])
                .inc();
            return Ok(false);
        }

        self.run_update_hook().await;

        let id = self.conn.ident.item_id(kind, key);
        let new_version = item.version;
        let logger = &self.logger;
        let doc_id = id.as_str();
        let body = move |current: Option<&Fields>| -> Result<TxDecision> {
            // A missing document loses to any version, including 0.
            let old_version = match current {
                Some(fields) => Some(from_fields::<ItemDocument>(doc_id, fields.clone())?.version),
                None => None,
            };
            if let Some(old) = old_version.filter(|old| *old >= new_version) {
                debug!(
                    logger,
                    "Not updating item due to version check (namespace={} key={} version={}, existing={})",
                    kind, key, new_version, old
                );
                return Ok(TxDecision::Abort);
            }
            Ok(TxDecision::Write(fields.clone()))
        };

        let outcome = self
            .conn
            .scope
            .run(self.conn.client.transact(&self.conn.collection, &id, self.retry, &body))
            .await
            .map_err(|e| match e {
                Error::Client { source, .. } => Error::client(format!("upsert {} key {}", kind, key), source),
                other => other,
            })?;
        Ok(outcome == TxOutcome::Committed)
    }

    /// Connectivity probe: "found" and "not found" both count as available.
    pub async fn is_store_available(&self) -> bool {
        let id = self.conn.ident.inited_id();
        self.conn.get(&id, || "probe store".to_string()).await.is_ok()
    }

    /// Cancels in-flight operations and releases the client if this store
    /// created it. Later calls fail with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        self.conn.close().await
    }

    /// Installs a callback that `upsert` awaits right before its
    /// transaction, so tests can slip a competing write in.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn set_update_hook(&self, hook: Option<UpdateHook>) {
        if let Ok(mut slot) = self.update_hook.lock() {
            *slot = hook;
        }
    }

    #[cfg(any(test, feature = "test-hooks"))]
    async fn run_update_hook(&self) {
        let hook = self.update_hook.lock().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook().await;
        }
    }

    #[cfg(not(any(test, feature = "test-hooks")))]
    async fn run_update_hook(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::FutureExt;

    use super::*;
    use crate::client::memory::MemoryClient;

    const COLLECTION: &str = "test-collection";

    fn store_on(client: &Arc<MemoryClient>, prefix: Option<&str>) -> DataStore {
        DataStore::new(
            client.clone(),
            false,
            COLLECTION.to_string(),
            prefix,
            RetryPolicy::default(),
            BatchSettings::default(),
            &Logger::root(slog::Discard, o!()),
        )
    }

    /// Upserts `first` while the hook writes `competing` through a second
    /// store instance just before the transaction.
    async fn race(first: u64, competing: u64) -> (bool, u64) {
        let client = Arc::new(MemoryClient::new());
        let store = store_on(&client, None);
        let other = Arc::new(store_on(&client, None));
        store
            .upsert(&DataKind::FEATURES, "flag", &ItemDescriptor::new(1, "v1"))
            .await
            .unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let hook: UpdateHook = Arc::new(move || {
            let other = Arc::clone(&other);
            let fired = Arc::clone(&fired);
            async move {
                if !fired.swap(true, Ordering::SeqCst) {
                    let item = ItemDescriptor::new(competing, format!("v{competing}"));
                    other.upsert(&DataKind::FEATURES, "flag", &item).await.unwrap();
                }
            }
            .boxed()
        });
        store.set_update_hook(Some(hook));

        let applied = store
            .upsert(&DataKind::FEATURES, "flag", &ItemDescriptor::new(first, format!("v{first}")))
            .await
            .unwrap();
        let stored = store.get(&DataKind::FEATURES, "flag").await.unwrap().unwrap();
        (applied, stored.version)
    }

    #[tokio::test]
    async fn higher_version_wins_when_it_arrives_second() {
        let (applied, stored) = race(3, 2).await;
        assert!(applied);
        assert_eq!(stored, 3);
    }

    #[tokio::test]
    async fn lower_version_loses_when_it_arrives_second() {
        let (applied, stored) = race(2, 3).await;
        assert!(!applied);
        assert_eq!(stored, 3);
    }

    #[tokio::test]
    async fn equal_version_from_competitor_wins() {
        let (applied, stored) = race(2, 2).await;
        assert!(!applied);
        assert_eq!(stored, 2);
    }

    #[tokio::test]
    async fn version_zero_wins_against_missing_document() {
        let client = Arc::new(MemoryClient::new());
        let store = store_on(&client, None);
        let applied = store
            .upsert(&DataKind::SEGMENTS, "s", &ItemDescriptor::new(0, "{}"))
            .await
            .unwrap();
        assert!(applied);
    }

    #[tokio::test]
    async fn malformed_stored_item_is_an_error() {
        let client = Arc::new(MemoryClient::new());
        let store = store_on(&client, None);
        let mut fields = Fields::new();
        fields.insert("namespace".into(), serde_json::json!("features"));
        fields.insert("key".into(), serde_json::json!("f"));
        fields.insert("version".into(), serde_json::json!("not a number"));
        client
            .write_batch(COLLECTION, &[WriteOp::Set { id: "features:f".into(), fields }])
            .await
            .unwrap();

        let err = store
            .upsert(&DataKind::FEATURES, "f", &ItemDescriptor::new(5, "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
        assert!(matches!(
            store.get(&DataKind::FEATURES, "f").await,
            Err(Error::Malformed { .. })
        ));
    }
}

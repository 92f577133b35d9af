use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentClient, RetryPolicy, TxBody, TxDecision, TxOutcome, WriteOp, WriteResults};
use crate::document::{Fields, FIELD_NAMESPACE};
use crate::error::{ClientError, Error, Result};
use crate::size_guard::STORE_DOCUMENT_LIMIT;

type CollectionData = BTreeMap<String, Fields>;

/// In-process document store backed by a `RwLock<HashMap>`.
///
/// Transactions hold the write lock for their whole body, so they never
/// conflict. Documents larger than the configured limit are refused, the
/// way a remote store refuses them.
pub struct MemoryClient {
    collections: RwLock<HashMap<String, CollectionData>>,
    max_document_size: usize,
    closed: AtomicBool,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::with_max_document_size(STORE_DOCUMENT_LIMIT)
    }

    pub fn with_max_document_size(max_document_size: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_document_size,
            closed: AtomicBool::new(false),
        }
    }

    /// Copy of every document in `collection`, keyed by id.
    pub async fn documents(&self, collection: &str) -> BTreeMap<String, Fields> {
        let data = self.collections.read().await;
        data.get(collection).cloned().unwrap_or_default()
    }

    fn ensure_open(&self) -> std::result::Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    fn check_size(&self, id: &str, fields: &Fields) -> std::result::Result<(), ClientError> {
        let size = serde_json::to_vec(fields)?.len();
        if size > self.max_document_size {
            return Err(ClientError::DocumentTooLarge {
                id: id.to_string(),
                size,
                limit: self.max_document_size,
            });
        }
        Ok(())
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

fn in_namespace(fields: &Fields, namespace: &str) -> bool {
    fields.get(FIELD_NAMESPACE).and_then(|v| v.as_str()) == Some(namespace)
}

#[async_trait]
impl DocumentClient for MemoryClient {
    fn backend_name(&self) -> &'static str {
        "Memory"
    }

    async fn get(&self, collection: &str, id: &str) -> std::result::Result<Option<Fields>, ClientError> {
        self.ensure_open()?;
        let data = self.collections.read().await;
        Ok(data.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn list_ids(
        &self,
        collection: &str,
        namespace: &str,
    ) -> std::result::Result<Vec<String>, ClientError> {
        Ok(self
            .query(collection, namespace)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    async fn query(
        &self,
        collection: &str,
        namespace: &str,
    ) -> std::result::Result<Vec<(String, Fields)>, ClientError> {
        self.ensure_open()?;
        let data = self.collections.read().await;
        Ok(data
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, fields)| in_namespace(fields, namespace))
                    .map(|(id, fields)| (id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn transact(
        &self,
        collection: &str,
        id: &str,
        _policy: RetryPolicy,
        body: &TxBody<'_>,
    ) -> Result<TxOutcome> {
        let op = || format!("update {id}");
        self.ensure_open().map_err(|e| Error::client(op(), e))?;

        let mut data = self.collections.write().await;
        let docs = data.entry(collection.to_string()).or_default();
        match body(docs.get(id))? {
            TxDecision::Abort => Ok(TxOutcome::Aborted),
            TxDecision::Write(fields) => {
                self.check_size(id, &fields).map_err(|e| Error::client(op(), e))?;
                docs.insert(id.to_string(), fields);
                Ok(TxOutcome::Committed)
            }
        }
    }

    async fn write_batch(
        &self,
        collection: &str,
        ops: &[WriteOp],
    ) -> std::result::Result<WriteResults, ClientError> {
        self.ensure_open()?;
        let mut data = self.collections.write().await;
        let docs = data.entry(collection.to_string()).or_default();
        Ok(ops
            .iter()
            .map(|op| match op {
                WriteOp::Set { id, fields } => {
                    self.check_size(id, fields)?;
                    docs.insert(id.clone(), fields.clone());
                    Ok(())
                }
                WriteOp::Delete { id } => {
                    docs.remove(id);
                    Ok(())
                }
            })
            .collect())
    }

    async fn close(&self) -> std::result::Result<(), ClientError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(namespace: &str, version: u64) -> Fields {
        let mut f = Fields::new();
        f.insert("namespace".into(), json!(namespace));
        f.insert("version".into(), json!(version));
        f
    }

    #[tokio::test]
    async fn query_filters_by_namespace() {
        let client = MemoryClient::new();
        let ops = vec![
            WriteOp::Set { id: "features:a".into(), fields: doc("features", 1) },
            WriteOp::Set { id: "segments:a".into(), fields: doc("segments", 1) },
            WriteOp::Set { id: "features:b".into(), fields: doc("features", 1) },
        ];
        let results = client.write_batch("c", &ops).await.unwrap();
        assert!(results.iter().all(|r| r.is_ok()));

        let ids = client.list_ids("c", "features").await.unwrap();
        assert_eq!(ids, vec!["features:a".to_string(), "features:b".to_string()]);
        assert!(client.list_ids("other", "features").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_reports_oversized_document_and_keeps_going() {
        let client = MemoryClient::with_max_document_size(64);
        let mut big = doc("features", 1);
        big.insert("payload".into(), json!("x".repeat(100)));
        let ops = vec![
            WriteOp::Set { id: "features:big".into(), fields: big },
            WriteOp::Set { id: "features:ok".into(), fields: doc("features", 1) },
        ];
        let results = client.write_batch("c", &ops).await.unwrap();
        assert!(matches!(results[0], Err(ClientError::DocumentTooLarge { .. })));
        assert!(results[1].is_ok());
        assert_eq!(client.documents("c").await.len(), 1);
    }

    #[tokio::test]
    async fn transaction_sees_current_document() {
        let client = MemoryClient::new();
        let body = |current: Option<&Fields>| -> Result<TxDecision> {
            Ok(match current {
                None => TxDecision::Write(doc("features", 1)),
                Some(_) => TxDecision::Abort,
            })
        };
        let policy = RetryPolicy::default();
        assert_eq!(
            client.transact("c", "features:a", policy, &body).await.unwrap(),
            TxOutcome::Committed
        );
        assert_eq!(
            client.transact("c", "features:a", policy, &body).await.unwrap(),
            TxOutcome::Aborted
        );
    }

    #[tokio::test]
    async fn closed_client_rejects_operations() {
        let client = MemoryClient::new();
        client.close().await.unwrap();
        assert!(matches!(client.get("c", "x").await, Err(ClientError::Closed)));
        assert!(matches!(client.write_batch("c", &[]).await, Err(ClientError::Closed)));
    }
}

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{DocumentClient, RetryPolicy, TxBody, TxDecision, TxOutcome, WriteOp, WriteResults};
use crate::document::{Fields, FIELD_NAMESPACE};
use crate::error::{ClientError, Error, Result};

/// Persistent document store backed by sled. Each collection is a sled tree
/// mapping document id to the JSON-encoded field map.
///
/// Transactions are optimistic: read, decide, then compare-and-swap against
/// the bytes that were read, retrying under the caller's [`RetryPolicy`].
pub struct SledClient {
    db: sled::Db,
    closed: AtomicBool,
}

impl SledClient {
    pub fn new(db: sled::Db) -> Self {
        Self {
            db,
            closed: AtomicBool::new(false),
        }
    }

    /// Open a sled database at the given directory path.
    pub fn open(data_dir: &str) -> std::result::Result<Self, ClientError> {
        let db = sled::open(data_dir)?;
        Ok(Self::new(db))
    }

    fn tree(&self, collection: &str) -> std::result::Result<sled::Tree, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        Ok(self.db.open_tree(collection)?)
    }

    fn decode(bytes: &[u8]) -> std::result::Result<Fields, ClientError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn apply(tree: &sled::Tree, op: &WriteOp) -> std::result::Result<(), ClientError> {
        match op {
            WriteOp::Set { id, fields } => {
                tree.insert(id.as_bytes(), serde_json::to_vec(fields)?)?;
            }
            WriteOp::Delete { id } => {
                tree.remove(id.as_bytes())?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentClient for SledClient {
    fn backend_name(&self) -> &'static str {
        "Sled"
    }

    async fn get(&self, collection: &str, id: &str) -> std::result::Result<Option<Fields>, ClientError> {
        self.tree(collection)?
            .get(id.as_bytes())?
            .map(|ivec| Self::decode(&ivec))
            .transpose()
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
        let mut docs = Vec::new();
        for entry in self.tree(collection)?.iter() {
            let (key, value) = entry?;
            let fields = Self::decode(&value)?;
            if fields.get(FIELD_NAMESPACE).and_then(|v| v.as_str()) != Some(namespace) {
                continue;
            }
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| ClientError::Codec(format!("invalid key encoding: {}", e)))?;
            docs.push((id, fields));
        }
        Ok(docs)
    }

    async fn transact(
        &self,
        collection: &str,
        id: &str,
        policy: RetryPolicy,
        body: &TxBody<'_>,
    ) -> Result<TxOutcome> {
        let op = || format!("update {id}");
        let tree = self.tree(collection).map_err(|e| Error::client(op(), e))?;

        let attempts = policy.max_attempts.max(1);
        for _ in 0..attempts {
            let current = tree.get(id.as_bytes()).map_err(|e| Error::client(op(), e.into()))?;
            let decoded = current
                .as_ref()
                .map(|ivec| Self::decode(ivec))
                .transpose()
                .map_err(|e| Error::client(op(), e))?;

            let fields = match body(decoded.as_ref())? {
                TxDecision::Abort => return Ok(TxOutcome::Aborted),
                TxDecision::Write(fields) => fields,
            };
            let bytes = serde_json::to_vec(&fields).map_err(|e| Error::client(op(), e.into()))?;

            let swapped = tree
                .compare_and_swap(id.as_bytes(), current, Some(bytes))
                .map_err(|e| Error::client(op(), e.into()))?;
            if swapped.is_ok() {
                return Ok(TxOutcome::Committed);
            }
        }

        Err(Error::TransactionContention {
            id: id.to_string(),
            attempts,
        })
    }

    async fn write_batch(
        &self,
        collection: &str,
        ops: &[WriteOp],
    ) -> std::result::Result<WriteResults, ClientError> {
        let tree = self.tree(collection)?;
        let results = ops.iter().map(|op| Self::apply(&tree, op)).collect();
        tree.flush()?;
        Ok(results)
    }

    async fn close(&self) -> std::result::Result<(), ClientError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use serde_json::json;

    use super::*;

    fn temp_client() -> (tempfile::TempDir, SledClient) {
        let dir = tempfile::tempdir().unwrap();
        let client = SledClient::open(dir.path().to_str().unwrap()).unwrap();
        (dir, client)
    }

    fn doc(namespace: &str, version: u64) -> Fields {
        let mut f = Fields::new();
        f.insert("namespace".into(), json!(namespace));
        f.insert("version".into(), json!(version));
        f
    }

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        {
            let client = SledClient::open(&path).unwrap();
            let ops = [WriteOp::Set { id: "features:a".into(), fields: doc("features", 3) }];
            client.write_batch("c", &ops).await.unwrap();
            client.close().await.unwrap();
        }
        let client = SledClient::open(&path).unwrap();
        let fields = client.get("c", "features:a").await.unwrap().unwrap();
        assert_eq!(fields["version"], json!(3));
    }

    #[tokio::test]
    async fn conflicting_write_retries_body_with_fresh_data() {
        let (_dir, client) = temp_client();
        let ops = [WriteOp::Set { id: "features:a".into(), fields: doc("features", 1) }];
        client.write_batch("c", &ops).await.unwrap();

        // The first run of the body sneaks in a competing write, so its
        // compare-and-swap fails and the body must run again.
        let runs = AtomicU32::new(0);
        let tree = client.db.open_tree("c").unwrap();
        let body = |current: Option<&Fields>| -> Result<TxDecision> {
            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                tree.insert("features:a", serde_json::to_vec(&doc("features", 5)).unwrap())
                    .unwrap();
            }
            let stored = current.and_then(|f| f["version"].as_u64()).unwrap_or(0);
            Ok(if stored >= 2 { TxDecision::Abort } else { TxDecision::Write(doc("features", 2)) })
        };

        let outcome = client
            .transact("c", "features:a", RetryPolicy::default(), &body)
            .await
            .unwrap();
        assert_eq!(outcome, TxOutcome::Aborted);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let fields = client.get("c", "features:a").await.unwrap().unwrap();
        assert_eq!(fields["version"], json!(5));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (_dir, client) = temp_client();
        let tree = client.db.open_tree("c").unwrap();
        let counter = AtomicU32::new(0);
        let body = |_: Option<&Fields>| -> Result<TxDecision> {
            let n = counter.fetch_add(1, Ordering::SeqCst) as u64;
            tree.insert("features:a", serde_json::to_vec(&doc("features", n)).unwrap())
                .unwrap();
            Ok(TxDecision::Write(doc("features", 100)))
        };
        let err = client
            .transact("c", "features:a", RetryPolicy { max_attempts: 3 }, &body)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionContention { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn closed_client_rejects_operations() {
        let (_dir, client) = temp_client();
        client.close().await.unwrap();
        assert!(matches!(client.get("c", "x").await, Err(ClientError::Closed)));
    }
}

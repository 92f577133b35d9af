pub mod firestore;
pub mod memory;
pub mod sled_client;

use async_trait::async_trait;

use crate::document::Fields;
use crate::error::{ClientError, Result};

/// One entry of a non-atomic batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { id: String, fields: Fields },
    Delete { id: String },
}

impl WriteOp {
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Set { id, .. } | WriteOp::Delete { id } => id,
        }
    }
}

/// What a transaction body decided after seeing the current document.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    Write(Fields),
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    Aborted,
}

/// Conflict handling for optimistic transactions. A body is re-run against
/// fresh data after each conflicting commit, up to `max_attempts` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Transaction body: receives the current document (`None` if absent).
pub type TxBody<'a> = dyn Fn(Option<&Fields>) -> Result<TxDecision> + Send + Sync + 'a;

/// Per-operation results of a batch write, in submission order.
pub type WriteResults = Vec<std::result::Result<(), ClientError>>;

/// Primitives of the underlying document store. Implementations must be
/// thread-safe; one instance may be shared by several stores.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Short backend name, used when describing the configuration.
    fn backend_name(&self) -> &'static str;

    async fn get(&self, collection: &str, id: &str) -> std::result::Result<Option<Fields>, ClientError>;

    /// Ids of all documents whose `namespace` field equals `namespace`.
    async fn list_ids(
        &self,
        collection: &str,
        namespace: &str,
    ) -> std::result::Result<Vec<String>, ClientError>;

    /// All documents whose `namespace` field equals `namespace`.
    async fn query(
        &self,
        collection: &str,
        namespace: &str,
    ) -> std::result::Result<Vec<(String, Fields)>, ClientError>;

    /// Atomic read-modify-write of one document. Concurrent transactions on
    /// the same id never interleave between the read and the write.
    async fn transact(
        &self,
        collection: &str,
        id: &str,
        policy: RetryPolicy,
        body: &TxBody<'_>,
    ) -> Result<TxOutcome>;

    /// Applies every operation independently. There is no atomicity across
    /// operations; the outer error means the request as a whole failed.
    async fn write_batch(
        &self,
        collection: &str,
        ops: &[WriteOp],
    ) -> std::result::Result<WriteResults, ClientError>;

    async fn close(&self) -> std::result::Result<(), ClientError>;
}

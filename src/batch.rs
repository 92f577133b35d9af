use futures::stream::{self, StreamExt};

use crate::client::{DocumentClient, WriteOp};
use crate::error::{ClientError, Error, Result};

/// Chunking and parallelism for Init's bulk submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Operations per `write_batch` request.
    pub batch_size: usize,
    /// Requests in flight at once.
    pub max_parallel: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_parallel: 8,
        }
    }
}

/// Outcome of a submission in which every operation was attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Submits `ops` in parallel chunks. There is no ordering between chunks
/// and no atomicity across operations. Every chunk is attempted; failures
/// are folded into one [`Error::BatchWrite`] carrying the first cause.
pub async fn submit(
    client: &dyn DocumentClient,
    collection: &str,
    ops: &[WriteOp],
    settings: BatchSettings,
) -> Result<BatchReport> {
    let batch_size = settings.batch_size.max(1);
    let max_parallel = settings.max_parallel.max(1);

    let results: Vec<(usize, std::result::Result<_, ClientError>)> = stream::iter(ops.chunks(batch_size))
        .map(|chunk| async move { (chunk.len(), client.write_batch(collection, chunk).await) })
        .buffer_unordered(max_parallel)
        .collect()
        .await;

    let mut failed = 0;
    let mut first_error: Option<ClientError> = None;
    for (len, result) in results {
        match result {
            Ok(per_op) => {
                for e in per_op.into_iter().filter_map(|r| r.err()) {
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
            Err(e) => {
                failed += len;
                first_error.get_or_insert(e);
            }
        }
    }

    let report = BatchReport {
        attempted: ops.len(),
        failed,
    };
    match first_error {
        None => Ok(report),
        Some(ClientError::Closed) => Err(Error::Closed),
        Some(source) => Err(Error::BatchWrite {
            attempted: report.attempted,
            failed: report.failed,
            source,
        }),
    }
}

use thiserror::Error;

/// Errors returned by the data store and big segment store.
///
/// "Not found" and "version conflict" are not errors: they surface as
/// `Option::None` and `applied == false` respectively.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid construction parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The store was closed, or closing it cancelled this operation.
    #[error("store is closed")]
    Closed,

    /// Transport, permission or database failure, with operation context.
    #[error("failed to {op}: {source}")]
    Client {
        op: String,
        #[source]
        source: ClientError,
    },

    /// A stored document does not match its schema.
    #[error("malformed document {id}: {reason}")]
    Malformed { id: String, reason: String },

    /// The item payload cannot be stored in the document's string field.
    #[error("payload for {namespace} key {key} is not valid UTF-8")]
    PayloadEncoding { namespace: String, key: String },

    /// Init submitted its operations but some of them failed.
    #[error("failed to write {attempted} operation(s) in batches ({failed} failed): {source}")]
    BatchWrite {
        attempted: usize,
        failed: usize,
        #[source]
        source: ClientError,
    },

    /// Optimistic transaction kept conflicting until the retry policy gave up.
    #[error("transaction on {id} still conflicting after {attempts} attempt(s)")]
    TransactionContention { id: String, attempts: u32 },
}

impl Error {
    pub(crate) fn client(op: impl Into<String>, source: ClientError) -> Self {
        match source {
            ClientError::Closed => Error::Closed,
            source => Error::Client {
                op: op.into(),
                source,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a [`crate::client::DocumentClient`] backend.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from a remote store.
    #[error("{code}: {message}")]
    Status { code: String, message: String },

    /// The store rejected a transaction commit because of a concurrent write.
    #[error("transaction conflict on {0}")]
    Conflict(String),

    #[error("document {id} is {size} bytes, above the store limit of {limit}")]
    DocumentTooLarge { id: String, size: usize, limit: usize },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("client is closed")]
    Closed,
}

impl From<sled::Error> for ClientError {
    fn from(e: sled::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Codec(e.to_string())
    }
}

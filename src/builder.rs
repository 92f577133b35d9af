//! Construction of [`DataStore`] and [`BigSegmentStore`] instances.
//!
//! The two stores are independent: they may use different collections and
//! prefixes, or share one client supplied by the caller.
//!
//! ```no_run
//! # async fn example() -> flagfile_docstore::Result<()> {
//! use flagfile_docstore::StoreBuilder;
//!
//! let store = StoreBuilder::data_store("my-project", "flags")
//!     .prefix("checkout")
//!     .build_data_store()?;
//! let big_segments = StoreBuilder::big_segment_store("my-project", "flags-big-segments")
//!     .build_big_segment_store()?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use slog::{o, Logger};

use crate::batch::BatchSettings;
use crate::big_segments::BigSegmentStore;
use crate::client::firestore::{FirestoreClient, FirestoreOptions};
use crate::client::memory::MemoryClient;
use crate::client::sled_client::SledClient;
use crate::client::{DocumentClient, RetryPolicy};
use crate::config::{StorageBackend, StoreConfig};
use crate::error::{Error, Result};
use crate::store::DataStore;

/// How to create the client when none is supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOptions {
    Firestore(FirestoreOptions),
    Sled { path: PathBuf },
    Memory,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions::Firestore(FirestoreOptions::default())
    }
}

impl ClientOptions {
    fn backend_name(&self) -> &'static str {
        match self {
            ClientOptions::Firestore(_) => "Firestore",
            ClientOptions::Sled { .. } => "Sled",
            ClientOptions::Memory => "Memory",
        }
    }
}

pub struct StoreBuilder {
    project_id: String,
    collection: String,
    prefix: Option<String>,
    client: Option<Arc<dyn DocumentClient>>,
    client_options: ClientOptions,
    logger: Logger,
    retry_policy: RetryPolicy,
    batch: BatchSettings,
}

impl StoreBuilder {
    /// `collection` is always required; `project_id` is required unless a
    /// client is supplied or a local backend is selected.
    pub fn new(project_id: &str, collection: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            collection: collection.to_string(),
            prefix: None,
            client: None,
            client_options: ClientOptions::default(),
            logger: Logger::root(slog::Discard, o!()),
            retry_policy: RetryPolicy::default(),
            batch: BatchSettings::default(),
        }
    }

    /// Builder for a primary data store.
    pub fn data_store(project_id: &str, collection: &str) -> Self {
        Self::new(project_id, collection)
    }

    /// Builder for a big segment store; usually a different collection from
    /// the data store's.
    pub fn big_segment_store(project_id: &str, collection: &str) -> Self {
        Self::new(project_id, collection)
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let client_options = match config.backend {
            StorageBackend::Firestore => ClientOptions::Firestore(FirestoreOptions {
                database: config.database.clone(),
                emulator_host: config.emulator_host.clone(),
                access_token: config.access_token.clone(),
            }),
            StorageBackend::Sled => ClientOptions::Sled {
                path: PathBuf::from(&config.data_dir),
            },
            StorageBackend::Memory => ClientOptions::Memory,
        };
        let mut builder = Self::new(&config.project_id, &config.collection)
            .client_options(client_options)
            .retry_policy(RetryPolicy {
                max_attempts: config.max_transaction_attempts,
            })
            .batch_settings(BatchSettings {
                batch_size: config.batch_size,
                max_parallel: config.max_parallel_batches,
            });
        if let Some(ref prefix) = config.prefix {
            builder = builder.prefix(prefix);
        }
        builder
    }

    /// Namespaces every key, so several logical stores can share one
    /// collection.
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string()).filter(|p| !p.is_empty());
        self
    }

    /// Use an existing client. The store never closes a client it did not
    /// create, and `client_options` is ignored.
    pub fn client(mut self, client: Arc<dyn DocumentClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn client_options(mut self, options: ClientOptions) -> Self {
        self.client_options = options;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn batch_settings(mut self, settings: BatchSettings) -> Self {
        self.batch = settings;
        self
    }

    /// Name of the backend the built store will talk to.
    pub fn describe_configuration(&self) -> &'static str {
        match &self.client {
            Some(client) => client.backend_name(),
            None => self.client_options.backend_name(),
        }
    }

    pub fn build_data_store(&self) -> Result<DataStore> {
        let (client, owns_client) = self.make_client()?;
        Ok(DataStore::new(
            client,
            owns_client,
            self.collection.clone(),
            self.prefix.as_deref(),
            self.retry_policy,
            self.batch,
            &self.logger,
        ))
    }

    pub fn build_big_segment_store(&self) -> Result<BigSegmentStore> {
        let (client, owns_client) = self.make_client()?;
        Ok(BigSegmentStore::new(
            client,
            owns_client,
            self.collection.clone(),
            self.prefix.as_deref(),
            &self.logger,
        ))
    }

    fn make_client(&self) -> Result<(Arc<dyn DocumentClient>, bool)> {
        if self.collection.is_empty() {
            return Err(Error::Config("collection name is required".to_string()));
        }
        if let Some(ref client) = self.client {
            return Ok((Arc::clone(client), false));
        }

        let client: Arc<dyn DocumentClient> = match &self.client_options {
            ClientOptions::Firestore(options) => {
                if self.project_id.is_empty() {
                    return Err(Error::Config("project ID is required".to_string()));
                }
                let client = FirestoreClient::new(&self.project_id, options.clone())
                    .map_err(|e| Error::Config(format!("failed to create Firestore client: {}", e)))?;
                Arc::new(client)
            }
            ClientOptions::Sled { path } => {
                let path = path.to_string_lossy();
                let client = SledClient::open(&path)
                    .map_err(|e| Error::Config(format!("failed to open sled db at {}: {}", path, e)))?;
                Arc::new(client)
            }
            ClientOptions::Memory => Arc::new(MemoryClient::new()),
        };
        Ok((client, true))
    }
}

//! Document-store persistence for feature flag data.
//!
//! [`DataStore`] keeps the evaluation engine's flags and segments in one
//! document collection and lets several processes update it concurrently
//! with version checks. [`BigSegmentStore`] reads per-context segment
//! membership written by an external synchronization job.
//!
//! # Examples
//! ```no_run
//! # async fn example() -> flagfile_docstore::Result<()> {
//! use flagfile_docstore::{Collection, DataKind, ItemDescriptor, KeyedItem, StoreBuilder};
//!
//! let store = StoreBuilder::new("my-project", "flags").build_data_store()?;
//! store
//!     .init(&[Collection::new(
//!         DataKind::FEATURES,
//!         vec![KeyedItem::new("new-checkout", ItemDescriptor::new(1, r#"{"on":true}"#))],
//!     )])
//!     .await?;
//! assert!(store.is_initialized().await);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod big_segments;
pub mod builder;
pub mod client;
pub mod config;
mod connection;
pub mod document;
pub mod error;
pub mod ident;
pub mod kind;
pub mod metrics;
pub mod scope;
pub mod size_guard;
pub mod store;

pub use batch::BatchSettings;
pub use big_segments::{BigSegmentMembership, BigSegmentStore, BigSegmentStoreMetadata};
pub use builder::{ClientOptions, StoreBuilder};
pub use client::firestore::{FirestoreClient, FirestoreOptions};
pub use client::memory::MemoryClient;
pub use client::sled_client::SledClient;
pub use client::{DocumentClient, RetryPolicy};
pub use config::{StorageBackend, StoreConfig};
pub use error::{ClientError, Error, Result};
pub use ident::DocumentIdentity;
pub use kind::{Collection, DataKind, ItemDescriptor, KeyedItem};
pub use store::DataStore;

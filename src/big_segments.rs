//! Read side of the big segment store.
//!
//! Membership data is written by an external synchronization job. Each
//! context hash key has its own document with optional `included` and
//! `excluded` lists of segment references; a singleton metadata document
//! records when the job last synchronized.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use slog::{debug, info, o, Logger};

use crate::client::DocumentClient;
use crate::connection::Connection;
use crate::document::{from_fields, BigSegmentMetadataDocument, MembershipDocument};
use crate::error::Result;
use crate::ident::DocumentIdentity;

/// Namespace (and key) of the metadata document.
pub const METADATA_KEY: &str = "big_segments_metadata";
/// Namespace of the per-context membership documents.
pub const USER_DATA_KEY: &str = "big_segments_user";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BigSegmentStoreMetadata {
    /// Milliseconds since the epoch of the last synchronization; `None` if
    /// the store has never been synchronized.
    pub last_up_to_date: Option<u64>,
}

impl BigSegmentStoreMetadata {
    pub fn last_up_to_date_time(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.last_up_to_date?).ok()?;
        DateTime::from_timestamp_millis(millis)
    }
}

/// Membership of one context in big segments.
///
/// An empty membership answers `None` for every reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BigSegmentMembership {
    included: Vec<String>,
    excluded: Vec<String>,
}

impl BigSegmentMembership {
    pub fn from_segment_refs(included: Vec<String>, excluded: Vec<String>) -> Self {
        Self { included, excluded }
    }

    /// `Some(true)` if included, `Some(false)` if excluded, `None` if the
    /// reference appears in neither list. Exclusion wins when a reference
    /// is in both.
    pub fn check_membership(&self, segment_ref: &str) -> Option<bool> {
        if self.is_excluded(segment_ref) {
            Some(false)
        } else if self.is_included(segment_ref) {
            Some(true)
        } else {
            None
        }
    }

    pub fn is_included(&self, segment_ref: &str) -> bool {
        self.included.iter().any(|r| r == segment_ref)
    }

    pub fn is_excluded(&self, segment_ref: &str) -> bool {
        self.excluded.iter().any(|r| r == segment_ref)
    }

    pub fn included(&self) -> &[String] {
        &self.included
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }
}

pub struct BigSegmentStore {
    conn: Connection,
    logger: Logger,
}

impl BigSegmentStore {
    pub(crate) fn new(
        client: Arc<dyn DocumentClient>,
        owns_client: bool,
        collection: String,
        prefix: Option<&str>,
        logger: &Logger,
    ) -> Self {
        let logger = logger.new(o!("component" => "BigSegmentStore", "collection" => collection.clone()));
        info!(logger, "Using collection {}", collection; "backend" => client.backend_name());
        Self {
            conn: Connection::new(client, owns_client, collection, DocumentIdentity::new(prefix)),
            logger,
        }
    }

    pub fn identity(&self) -> &DocumentIdentity {
        &self.conn.ident
    }

    /// Absence of the metadata document, or a marker that is not a positive
    /// integer, both mean "never synchronized" and are not errors.
    pub async fn get_metadata(&self) -> Result<BigSegmentStoreMetadata> {
        let id = self.conn.ident.doc_id(METADATA_KEY, METADATA_KEY);
        let Some(fields) = self.conn.get(&id, || "get big segment metadata".to_string()).await? else {
            return Ok(BigSegmentStoreMetadata::default());
        };

        let doc: BigSegmentMetadataDocument = from_fields(&id, fields)?;
        let last_up_to_date = doc.synchronized_millis();
        if last_up_to_date.is_none() && doc.synchronized_on.is_some() {
            debug!(self.logger, "Ignoring unusable synchronization marker {:?}", doc.synchronized_on);
        }
        Ok(BigSegmentStoreMetadata { last_up_to_date })
    }

    /// A context with no membership document gets an empty membership.
    pub async fn get_membership(&self, context_hash_key: &str) -> Result<BigSegmentMembership> {
        let id = self.conn.ident.doc_id(USER_DATA_KEY, context_hash_key);
        let found = self
            .conn
            .get(&id, || format!("get big segment membership for {}", context_hash_key))
            .await?;
        let Some(fields) = found else {
            debug!(self.logger, "No membership data (key={})", context_hash_key);
            return Ok(BigSegmentMembership::default());
        };

        let doc: MembershipDocument = from_fields(&id, fields)?;
        Ok(BigSegmentMembership::from_segment_refs(
            doc.included.unwrap_or_default(),
            doc.excluded.unwrap_or_default(),
        ))
    }

    pub async fn close(&self) -> Result<()> {
        self.conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_membership_knows_nothing() {
        let m = BigSegmentMembership::default();
        assert!(m.is_empty());
        assert_eq!(m.check_membership("seg.g1"), None);
    }

    #[test]
    fn exclusion_takes_precedence() {
        let m = BigSegmentMembership::from_segment_refs(
            vec!["a.g1".into(), "b.g1".into()],
            vec!["b.g1".into(), "c.g1".into()],
        );
        assert_eq!(m.check_membership("a.g1"), Some(true));
        assert_eq!(m.check_membership("b.g1"), Some(false));
        assert_eq!(m.check_membership("c.g1"), Some(false));
        assert_eq!(m.check_membership("d.g1"), None);
        assert!(m.is_included("b.g1") && m.is_excluded("b.g1"));
    }

    #[test]
    fn metadata_time_conversion() {
        let meta = BigSegmentStoreMetadata {
            last_up_to_date: Some(1_700_000_000_123),
        };
        let time = meta.last_up_to_date_time().unwrap();
        assert_eq!(time.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(BigSegmentStoreMetadata::default().last_up_to_date_time(), None);
    }
}

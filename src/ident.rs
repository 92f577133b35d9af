//! Document identity scheme.
//!
//! Every document lives at `{prefix}:{namespace}:{key}` (or `{namespace}:{key}`
//! without a prefix). Ids are recomputed on demand by both the Init
//! reconciliation pass and the upsert path, so nothing here may depend on
//! state other than the prefix.
//!
//! The prefix appears once per id. Prefixed collections written by tools
//! that repeat the prefix inside the namespace part (`{p}:{p}:{kind}:{key}`)
//! are not readable through this scheme.
//!
//! The delimiter is not escaped. Namespaces and keys containing `:` can
//! collide, which callers must rule out.

use crate::kind::DataKind;

pub const DELIMITER: char = ':';

/// Base namespace of the readiness sentinel.
pub const INITED_NAMESPACE: &str = "$inited";

/// Builds the document id for `(prefix, namespace, key)`.
///
/// `namespace` is the unprefixed namespace; an empty prefix is the same as
/// no prefix.
pub fn encode(prefix: Option<&str>, namespace: &str, key: &str) -> String {
    match prefix.filter(|p| !p.is_empty()) {
        Some(p) => format!("{p}{DELIMITER}{namespace}{DELIMITER}{key}"),
        None => format!("{namespace}{DELIMITER}{key}"),
    }
}

/// Identity scheme bound to one store's prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentIdentity {
    prefix: Option<String>,
}

impl DocumentIdentity {
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// The value stored in a document's `namespace` field.
    pub fn namespace(&self, base: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}{DELIMITER}{base}"),
            None => base.to_string(),
        }
    }

    pub fn doc_id(&self, base: &str, key: &str) -> String {
        encode(self.prefix(), base, key)
    }

    pub fn kind_namespace(&self, kind: &DataKind) -> String {
        self.namespace(kind.name())
    }

    pub fn item_id(&self, kind: &DataKind, key: &str) -> String {
        self.doc_id(kind.name(), key)
    }

    pub fn inited_namespace(&self) -> String {
        self.namespace(INITED_NAMESPACE)
    }

    pub fn inited_id(&self) -> String {
        self.doc_id(INITED_NAMESPACE, INITED_NAMESPACE)
    }
}

use std::borrow::Cow;
use std::fmt;

/// A category of stored entity, such as feature flags or segments.
///
/// The name is used verbatim to build the namespace of every document of
/// this kind, so it must be stable across releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKind {
    name: Cow<'static, str>,
}

impl DataKind {
    pub const FEATURES: DataKind = DataKind::from_static("features");
    pub const SEGMENTS: DataKind = DataKind::from_static("segments");

    pub const fn from_static(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
        }
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One serialized entity as the evaluation engine hands it to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDescriptor {
    pub version: u64,
    /// The engine's own serialization; never interpreted here.
    pub payload: Vec<u8>,
}

impl ItemDescriptor {
    pub fn new(version: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            version,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedItem {
    pub key: String,
    pub item: ItemDescriptor,
}

impl KeyedItem {
    pub fn new(key: impl Into<String>, item: ItemDescriptor) -> Self {
        Self {
            key: key.into(),
            item,
        }
    }
}

/// All items of one kind, as passed to `DataStore::init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub kind: DataKind,
    pub items: Vec<KeyedItem>,
}

impl Collection {
    pub fn new(kind: DataKind, items: Vec<KeyedItem>) -> Self {
        Self { kind, items }
    }
}

//! Flatten directory attributes into principal metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::directory::{DirectoryAttribute, DirectoryEntry, SearchControls};

/// Metadata keyed by attribute name.
pub type Metadata = BTreeMap<String, AttributeValue>;

/// Value of a captured attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Attribute with exactly one value.
    Single(Option<String>),
    /// Multi-valued attribute, in returned order.
    Multiple(Vec<Option<String>>),
}

impl AttributeValue {
    /// Single value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Single(value) => value.as_deref(),
            Self::Multiple(_) => None,
        }
    }

    /// Every value.
    pub fn values(&self) -> Vec<Option<&str>> {
        match self {
            Self::Single(value) => vec![value.as_deref()],
            Self::Multiple(values) => values.iter().map(Option::as_deref).collect(),
        }
    }

    /// `None` when there is no value at all.
    pub fn from_values(mut values: Vec<Option<String>>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::Single),
            _ => Some(Self::Multiple(values)),
        }
    }
}

/// Collect metadata from the first entry of a search.
///
/// Extra entries are ignored with a warning: the filter is expected to
/// match a single user but the directory does not guarantee it.
pub fn collect(
    entries: Vec<DirectoryEntry>,
    controls: &SearchControls,
) -> Metadata {
    if entries.len() > 1 {
        tracing::warn!(
            count = entries.len(),
            "LDAP user filter returns more than one user"
        );
    }

    entries
        .into_iter()
        .next()
        .map(|entry| collect_entry(entry, controls))
        .unwrap_or_default()
}

/// Collect metadata from one entry.
pub fn collect_entry(entry: DirectoryEntry, controls: &SearchControls) -> Metadata {
    entry
        .attributes
        .into_iter()
        .filter(|attribute| controls.allows(&attribute.id))
        .filter_map(|DirectoryAttribute { id, values }| {
            AttributeValue::from_values(values).map(|value| (id, value))
        })
        .collect()
}

//! Records and their ordered field maps
//!
//! Extractors produce field maps whose key order is meaningful: the first
//! record seen for a destination decides that destination's column order.

/// Key prefix marking metadata fields that are never written as columns
pub const METADATA_PREFIX: char = '_';

/// Ordered name -> value map
///
/// Insertion order is preserved; inserting an existing name replaces the value
/// in place without moving it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(String, String)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a field, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Names of all non-metadata fields, in insertion order
    pub fn column_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(k, _)| !is_metadata_key(k))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// Returns true if the key is reserved for metadata
pub fn is_metadata_key(key: &str) -> bool {
    key.starts_with(METADATA_PREFIX)
}

/// A single extracted record bound for one destination store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Logical name of the output store (e.g. "race_result.csv")
    pub destination: String,

    /// Field values in extractor order
    pub fields: Fields,
}

impl Record {
    pub fn new(destination: impl Into<String>, fields: Fields) -> Self {
        Self {
            destination: destination.into(),
            fields,
        }
    }

    /// Projects the record onto a fixed column list
    ///
    /// Columns the record lacks are empty; fields outside the list are dropped.
    pub fn project<'a>(&'a self, columns: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        columns
            .iter()
            .map(move |c| self.fields.get(c).unwrap_or(""))
    }
}

/// Records produced from one fetch task, in extraction order
pub type RecordBatch = Vec<Record>;

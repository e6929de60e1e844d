//! Normalized output rows
//!
//! A [`Record`] is an ordered list of named string fields plus a separate
//! block of provenance columns. Extractors fill in the fields; the
//! coordinator stamps provenance from the owning work unit before the record
//! is accumulated, so every row written can be attributed without context.

use crate::crawler::WorkUnit;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Column holding the owning work unit's identifier
pub const UNIT_ID_COLUMN: &str = "unit_id";

/// A normalized row of domain data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    provenance: Vec<(String, String)>,
    fields: Vec<(String, String)>,
}

impl Record {
    /// Creates an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, replacing an existing field of the same name
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a field, keeping its original position if it already exists
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Inserts a field at the front of the data columns
    pub fn prepend(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.fields.retain(|(n, _)| *n != name);
        self.fields.insert(0, (name, value.into()));
    }

    /// Stamps provenance columns from the work unit that produced this record
    ///
    /// Provenance always starts with [`UNIT_ID_COLUMN`], followed by the
    /// unit's label and its classification tags in a stable order.
    pub fn attribute(mut self, unit: &WorkUnit) -> Self {
        self.provenance = unit.provenance();
        self
    }

    /// The work unit this record was attributed to, if any
    pub fn unit_id(&self) -> Option<&str> {
        self.provenance
            .iter()
            .find(|(n, _)| n == UNIT_ID_COLUMN)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a column by name, provenance first
    pub fn get(&self, name: &str) -> Option<&str> {
        self.provenance
            .iter()
            .chain(self.fields.iter())
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Column names in output order
    pub fn columns(&self) -> Vec<&str> {
        self.entries().map(|(n, _)| n).collect()
    }

    /// All (column, value) pairs in output order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.provenance
            .iter()
            .chain(self.fields.iter())
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of data fields, excluding provenance
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.provenance.len() + self.fields.len()))?;
        for (name, value) in self.entries() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

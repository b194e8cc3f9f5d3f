//! Human-readable attribute and class names.
//!
//! The name tables fix the positional correspondence between model outputs
//! and labels. Position `i` of a table names output `i` of a model.

use crate::{common::*, store::parse_id_table};

/// An ordered table of unique names, indexed by `id - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTable {
    names: IndexSet<String>,
}

impl NameTable {
    /// Load an `id name` file with contiguous ids starting from 1.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure!(
            path.is_file(),
            DataError::resource_missing(format!("the name file '{}' does not exist", path.display()))
        );
        let text = fs::read_to_string(path)?;
        Self::parse(&text).with_context(|| format!("invalid name file '{}'", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let names = parse_id_table(text, |name| Ok(name.to_owned()))?;
        Self::from_names(names)
    }

    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let num_names = names.len();
        let names: IndexSet<String> = names.into_iter().collect();
        ensure!(
            names.len() == num_names,
            DataError::integrity("duplicated names found")
        );
        ensure!(!names.is_empty(), DataError::integrity("no names found"));
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get_index(index).map(String::as_str)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.get_index_of(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Pair each name with the value at the same position.
    pub fn zip_values<T>(&self, values: &[T]) -> Result<Vec<(String, T)>>
    where
        T: Copy,
    {
        ensure!(
            values.len() == self.names.len(),
            DataError::integrity(format!(
                "expect {} values to match the name table, but get {}",
                self.names.len(),
                values.len()
            ))
        );
        Ok(self
            .names
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect())
    }
}

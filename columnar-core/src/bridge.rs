//! One-way conversion from a columnar store to a row-iterator partition.

use std::fmt;

use crate::error::Result;
use crate::row::ColumnarRow;
use crate::store::ColumnarStore;

/// Representation a pipeline stage wants a partition in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionFormat {
    Columnar,
    RowIterator,
}

impl fmt::Display for PartitionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionFormat::Columnar => f.write_str("columnar"),
            PartitionFormat::RowIterator => f.write_str("row-iterator"),
        }
    }
}

/// Materialized, heap-resident rows of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPartition<T> {
    rows: Vec<T>,
}

impl<T> RowPartition<T> {
    pub fn new(rows: impl IntoIterator<Item = T>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }
}

impl<T> IntoIterator for RowPartition<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// A partition in either representation.
#[derive(Debug)]
pub enum Partition<T> {
    Columnar(ColumnarStore),
    Rows(RowPartition<T>),
}

impl<T> Partition<T> {
    pub fn format(&self) -> PartitionFormat {
        match self {
            Partition::Columnar(_) => PartitionFormat::Columnar,
            Partition::Rows(_) => PartitionFormat::RowIterator,
        }
    }
}

impl ColumnarStore {
    /// Convert into `target`.
    ///
    /// `Columnar` hands back this very store. `RowIterator` decodes every row
    /// onto the heap and then frees the pinned buffers, so the store does not
    /// outlive the conversion.
    pub fn convert<T: ColumnarRow>(mut self, target: PartitionFormat) -> Result<Partition<T>> {
        match target {
            PartitionFormat::Columnar => Ok(Partition::Columnar(self)),
            PartitionFormat::RowIterator => {
                let rows = self
                    .deserialize::<T>()
                    .and_then(|rows| rows.collect::<Result<Vec<T>>>());
                self.free()?;
                Ok(Partition::Rows(RowPartition::new(rows?)))
            }
        }
    }
}

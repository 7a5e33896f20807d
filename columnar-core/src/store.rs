//! The columnar store: one pinned buffer per schema column.

use gpu_memory_manager::{PinnedAllocator, PinnedBuffer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{PartitionError, Result};
use crate::schema::Schema;

/// Largest byte length of a single column buffer (2^31 - 1).
pub const MAX_COLUMN_BYTES: usize = i32::MAX as usize;

/// Column-major, pinned representation of one partition.
///
/// Buffers are allocated eagerly on construction and released by an explicit
/// [`ColumnarStore::free`]. A store dropped while still live is freed from
/// `Drop` with a warning; that path exists to surface leaks, not to replace
/// the explicit call.
///
/// The store is single-owner and carries no synchronization.
pub struct ColumnarStore {
    schema: Arc<Schema>,
    row_count: usize,
    buffers: Vec<PinnedBuffer>,
    allocator: Arc<dyn PinnedAllocator>,
    freed: bool,
}

impl ColumnarStore {
    /// Allocate a store for `row_count` rows of `schema`.
    ///
    /// Every column size is checked against [`MAX_COLUMN_BYTES`] before
    /// anything is allocated.
    pub fn new(
        schema: Arc<Schema>,
        row_count: usize,
        allocator: Arc<dyn PinnedAllocator>,
    ) -> Result<Self> {
        let sizes = column_sizes(&schema, row_count)?;

        let mut buffers = Vec::with_capacity(sizes.len());
        for bytes in sizes {
            let buffer = if bytes == 0 {
                Ok(PinnedBuffer::empty())
            } else {
                allocator.allocate(bytes)
            };
            match buffer {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => {
                    release_all(allocator.as_ref(), &mut buffers);
                    return Err(err.into());
                }
            }
        }

        debug!(
            "Allocated columnar store: {} columns x {} rows via {}",
            schema.len(),
            row_count,
            allocator.name()
        );

        Ok(Self {
            schema,
            row_count,
            buffers,
            allocator,
            freed: false,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn num_columns(&self) -> usize {
        self.schema.len()
    }

    pub fn is_freed(&self) -> bool {
        self.freed
    }

    pub fn allocator(&self) -> &Arc<dyn PinnedAllocator> {
        &self.allocator
    }

    /// Total bytes held across all column buffers.
    pub fn memory_usage(&self) -> usize {
        self.schema
            .columns()
            .iter()
            .map(|column| column.column_type.bytes() * self.row_count)
            .sum()
    }

    /// Reset every buffer cursor to the start. No-op once freed.
    pub fn rewind(&mut self) {
        for buffer in &mut self.buffers {
            buffer.rewind();
        }
    }

    /// Release every buffer. A second call fails with
    /// [`PartitionError::DoubleFree`] and changes nothing.
    pub fn free(&mut self) -> Result<()> {
        if self.freed {
            return Err(PartitionError::DoubleFree);
        }
        self.freed = true;

        debug!("Freeing columnar store ({} bytes)", self.memory_usage());
        match release_all(self.allocator.as_ref(), &mut self.buffers) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Raw bytes of column `index`.
    pub fn column_bytes(&self, index: usize) -> Result<&[u8]> {
        self.ensure_live()?;
        self.buffers
            .get(index)
            .map(PinnedBuffer::as_slice)
            .ok_or(PartitionError::ColumnOutOfRange {
                index,
                columns: self.buffers.len(),
            })
    }

    /// Mutable raw bytes of column `index`, for bulk fills that bypass the
    /// row codec.
    pub fn column_bytes_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        self.ensure_live()?;
        let columns = self.buffers.len();
        self.buffers
            .get_mut(index)
            .map(PinnedBuffer::as_mut_slice)
            .ok_or(PartitionError::ColumnOutOfRange { index, columns })
    }

    /// Pinned buffer of column `index`, e.g. to hand its pointer to a device
    /// copy.
    pub fn column_buffer(&self, index: usize) -> Result<&PinnedBuffer> {
        self.ensure_live()?;
        self.buffers.get(index).ok_or(PartitionError::ColumnOutOfRange {
            index,
            columns: self.buffers.len(),
        })
    }

    pub(crate) fn buffers_mut(&mut self) -> Result<&mut [PinnedBuffer]> {
        self.ensure_live()?;
        Ok(&mut self.buffers)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.freed {
            return Err(PartitionError::UseAfterFree);
        }
        Ok(())
    }
}

impl fmt::Debug for ColumnarStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnarStore")
            .field("columns", &self.schema.len())
            .field("row_count", &self.row_count)
            .field("memory_usage", &self.memory_usage())
            .field("allocator", &self.allocator.name())
            .field("freed", &self.freed)
            .finish()
    }
}

impl Drop for ColumnarStore {
    fn drop(&mut self) {
        if self.freed {
            return;
        }
        warn!(
            leaked_bytes = self.memory_usage(),
            row_count = self.row_count,
            "Columnar store dropped without free; releasing its buffers"
        );
        if let Err(err) = self.free() {
            warn!("Releasing leaked columnar store failed: {}", err);
        }
    }
}

/// Per-column byte sizes, or the first column that cannot fit in one buffer.
fn column_sizes(schema: &Schema, row_count: usize) -> Result<Vec<usize>> {
    schema
        .columns()
        .iter()
        .enumerate()
        .map(|(column, descriptor)| {
            let bytes = (descriptor.column_type.bytes() as u64).saturating_mul(row_count as u64);
            if bytes > MAX_COLUMN_BYTES as u64 {
                return Err(PartitionError::CapacityExceeded {
                    column,
                    bytes,
                    max: MAX_COLUMN_BYTES,
                });
            }
            Ok(bytes as usize)
        })
        .collect()
}

/// Free every buffer, continuing past failures. Returns the first failure.
fn release_all(
    allocator: &dyn PinnedAllocator,
    buffers: &mut Vec<PinnedBuffer>,
) -> Option<anyhow::Error> {
    let mut first_err = None;
    for buffer in buffers.drain(..) {
        if buffer.is_empty() {
            continue;
        }
        if let Err(err) = allocator.free(buffer) {
            warn!("Failed to free column buffer: {:#}", err);
            first_err.get_or_insert(err);
        }
    }
    first_err
}

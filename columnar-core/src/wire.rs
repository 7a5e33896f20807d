//! Cross-process transfer of a columnar store.
//!
//! Column buffers live in pinned memory, so a store is shipped with its own
//! framing rather than through a generic serializer:
//!
//! ```text
//! [schema encoding][row count: u64 BE][column 0 bytes]...[column N-1 bytes]
//! ```
//!
//! Column `i` carries exactly `schema[i].bytes() * row_count` bytes, in schema
//! order. Both directions block on the stream and have no timeout.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use gpu_memory_manager::{PinnedAllocator, PinnedBuffer};
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use tracing::debug;

use crate::error::{PartitionError, Result};
use crate::schema::Schema;
use crate::store::ColumnarStore;

/// Write `store` to `out`. Buffers are rewound and written straight from
/// pinned memory.
pub fn write_store<W: Write + ?Sized>(store: &mut ColumnarStore, out: &mut W) -> Result<()> {
    store.ensure_live()?;
    store.schema().write_to(out)?;
    out.write_u64::<BigEndian>(store.row_count() as u64)?;

    store.rewind();
    for index in 0..store.num_columns() {
        out.write_all(store.column_bytes(index)?)?;
    }
    out.flush()?;

    debug!(
        "Wrote columnar store: {} columns, {} rows, {} bytes of column data",
        store.num_columns(),
        store.row_count(),
        store.memory_usage()
    );
    Ok(())
}

/// Read a store written by [`write_store`], allocating its buffers from
/// `allocator`.
///
/// Column data is pulled through one transfer buffer sized to the largest
/// column. A stream that ends before every column is full fails with
/// [`PartitionError::TruncatedTransfer`]; the half-built store is released.
pub fn read_store<R: Read + ?Sized>(
    input: &mut R,
    allocator: Arc<dyn PinnedAllocator>,
) -> Result<ColumnarStore> {
    let schema = Schema::read_from(input)?;
    let row_count = input.read_u64::<BigEndian>()?;
    let row_count = usize::try_from(row_count).map_err(|_| PartitionError::CapacityExceeded {
        column: 0,
        bytes: row_count,
        max: crate::store::MAX_COLUMN_BYTES,
    })?;

    let mut store = ColumnarStore::new(Arc::new(schema), row_count, allocator)?;
    if let Err(err) = fill_columns(input, &mut store) {
        store.free()?;
        return Err(err);
    }

    debug!(
        "Read columnar store: {} columns, {} rows",
        store.num_columns(),
        store.row_count()
    );
    Ok(store)
}

fn fill_columns<R: Read + ?Sized>(input: &mut R, store: &mut ColumnarStore) -> Result<()> {
    let buffers = store.buffers_mut()?;
    let largest = buffers.iter().map(PinnedBuffer::capacity).max().unwrap_or(0);
    let mut transfer = vec![0u8; largest];

    for (column, buffer) in buffers.iter_mut().enumerate() {
        buffer.rewind();
        while buffer.remaining() > 0 {
            let want = buffer.remaining().min(transfer.len());
            match input.read(&mut transfer[..want]) {
                Ok(0) => {
                    return Err(PartitionError::TruncatedTransfer {
                        column,
                        expected: buffer.capacity(),
                        actual: buffer.position(),
                    })
                }
                Ok(n) => buffer.put(&transfer[..n])?,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        buffer.rewind();
    }
    Ok(())
}

/// Encode a store into a fresh byte vector.
pub fn to_bytes(store: &mut ColumnarStore) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(store.memory_usage() + 64);
    write_store(store, &mut out)?;
    Ok(out)
}

/// Decode a store from an in-memory encoding.
pub fn from_bytes(bytes: &[u8], allocator: Arc<dyn PinnedAllocator>) -> Result<ColumnarStore> {
    let mut input = bytes;
    read_store(&mut input, allocator)
}

impl ColumnarStore {
    pub fn write_to<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<()> {
        write_store(self, out)
    }

    pub fn read_from<R: Read + ?Sized>(
        input: &mut R,
        allocator: Arc<dyn PinnedAllocator>,
    ) -> Result<Self> {
        read_store(input, allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, ColumnType};
    use gpu_memory_manager::HostAllocator;
    use std::io;

    fn host() -> Arc<HostAllocator> {
        Arc::new(HostAllocator::default())
    }

    fn filled_store(allocator: Arc<HostAllocator>) -> ColumnarStore {
        let schema = Arc::new(Schema::new(vec![
            ColumnDescriptor::new(ColumnType::Int, "a"),
            ColumnDescriptor::new(ColumnType::Double, "b"),
        ]));
        let mut store = ColumnarStore::new(schema, 3, allocator).unwrap();
        for (index, fill) in [(0, 0x11u8), (1, 0x22u8)] {
            for (i, byte) in store.column_bytes_mut(index).unwrap().iter_mut().enumerate() {
                *byte = fill.wrapping_add(i as u8);
            }
        }
        store
    }

    /// Hands out at most `chunk` bytes per read and interrupts every other call.
    struct Dribble<'a> {
        data: &'a [u8],
        chunk: usize,
        interrupt: bool,
    }

    impl Read for Dribble<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::new(ErrorKind::Interrupted, "retry"));
            }
            let n = buf.len().min(self.chunk).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn layout_is_schema_count_columns() {
        let mut store = filled_store(host());
        let bytes = to_bytes(&mut store).unwrap();

        let mut schema_bytes = Vec::new();
        store.schema().write_to(&mut schema_bytes).unwrap();
        let header = schema_bytes.len();
        assert_eq!(&bytes[..header], schema_bytes.as_slice());
        assert_eq!(&bytes[header..header + 8], &3u64.to_be_bytes());
        assert_eq!(&bytes[header + 8..header + 20], store.column_bytes(0).unwrap());
        assert_eq!(&bytes[header + 20..], store.column_bytes(1).unwrap());
        store.free().unwrap();
    }

    #[test]
    fn round_trip_through_short_reads() {
        let allocator = host();
        let mut store = filled_store(allocator.clone());
        let bytes = to_bytes(&mut store).unwrap();

        let mut input = Dribble { data: &bytes, chunk: 5, interrupt: false };
        let mut copy = read_store(&mut input, allocator.clone()).unwrap();
        assert_eq!(copy.schema(), store.schema());
        assert_eq!(copy.row_count(), 3);
        for index in 0..2 {
            assert_eq!(copy.column_bytes(index).unwrap(), store.column_bytes(index).unwrap());
        }
        copy.free().unwrap();
        store.free().unwrap();
        assert_eq!(allocator.live_bytes(), 0);
    }

    #[test]
    fn truncated_stream_fails_and_releases() {
        let allocator = host();
        let mut store = filled_store(allocator.clone());
        let bytes = to_bytes(&mut store).unwrap();
        store.free().unwrap();

        let cut = &bytes[..bytes.len() - 4];
        let err = from_bytes(cut, allocator.clone()).unwrap_err();
        assert!(matches!(
            err,
            PartitionError::TruncatedTransfer { column: 1, expected: 24, actual: 20 }
        ));
        assert_eq!(allocator.live_bytes(), 0);
    }

    #[test]
    fn freed_store_cannot_be_written() {
        let mut store = filled_store(host());
        store.free().unwrap();
        assert!(matches!(to_bytes(&mut store), Err(PartitionError::UseAfterFree)));
    }

    #[test]
    fn empty_partition_round_trips() {
        let allocator = host();
        let schema = Arc::new(Schema::primitive(ColumnType::Long));
        let mut store = ColumnarStore::new(schema, 0, allocator.clone()).unwrap();
        let bytes = to_bytes(&mut store).unwrap();
        let mut copy = from_bytes(&bytes, allocator).unwrap();
        assert_eq!(copy.row_count(), 0);
        assert!(copy.schema().is_primitive());
        copy.free().unwrap();
        store.free().unwrap();
    }
}

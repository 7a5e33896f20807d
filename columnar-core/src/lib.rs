//! Columnar, pinned-memory partitions.
//!
//! A [`ColumnarStore`] holds one partition as one pinned buffer per column.
//! Rows go in and out through a [`RowCodec`] (or the `serialize` /
//! `deserialize` shortcuts on the store), the store can be shipped across a
//! process boundary with [`wire`], and [`ColumnarStore::convert`] turns it
//! into a heap-resident [`RowPartition`].
//!
//! ```ignore
//! let allocator = PartitionConfig::default().build_allocator()?;
//! let mut store = ColumnarStore::new(Arc::new(Point::schema()), points.len(), allocator)?;
//! store.serialize::<Point, _>(&points)?;
//! let back: Vec<Point> = store.deserialize::<Point>()?.collect::<Result<_>>()?;
//! store.free()?;
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod row;
pub mod schema;
pub mod store;
pub mod wire;

pub use bridge::{Partition, PartitionFormat, RowPartition};
pub use codec::{deserialize_column_value, encode_value, RowCodec, Rows};
pub use config::{AllocatorKind, PartitionConfig};
pub use error::{PartitionError, Result};
pub use row::{ColumnAccessor, ColumnScalar, ColumnarRow};
pub use schema::{AccessorPath, ColumnDescriptor, ColumnType, ColumnValue, Schema};
pub use store::{ColumnarStore, MAX_COLUMN_BYTES};

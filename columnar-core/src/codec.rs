//! Row <-> column conversion.
//!
//! Encoding walks rows in order and, for each row, appends one little-endian
//! scalar to every column buffer. Only the current row is ever held, so the
//! input can be an arbitrarily long lazy iterator. Decoding mirrors this and
//! yields rows lazily.

use gpu_memory_manager::PinnedBuffer;
use std::borrow::Borrow;
use std::iter::FusedIterator;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PartitionError, Result};
use crate::row::{ColumnAccessor, ColumnarRow};
use crate::schema::{ColumnType, ColumnValue, Schema};
use crate::store::ColumnarStore;

/// Append one scalar at the buffer cursor.
pub fn encode_value(value: ColumnValue, buffer: &mut PinnedBuffer) -> Result<()> {
    match value {
        ColumnValue::Byte(v) => buffer.put(&v.to_le_bytes())?,
        ColumnValue::Short(v) => buffer.put(&v.to_le_bytes())?,
        ColumnValue::Int(v) => buffer.put(&v.to_le_bytes())?,
        ColumnValue::Long(v) => buffer.put(&v.to_le_bytes())?,
        ColumnValue::Float(v) => buffer.put(&v.to_le_bytes())?,
        ColumnValue::Double(v) => buffer.put(&v.to_le_bytes())?,
    }
    Ok(())
}

/// Read exactly one scalar of `column_type` at the buffer cursor.
pub fn deserialize_column_value(
    column_type: ColumnType,
    buffer: &mut PinnedBuffer,
) -> Result<ColumnValue> {
    let value = match column_type {
        ColumnType::Byte => ColumnValue::Byte(i8::from_le_bytes(buffer.take_array()?)),
        ColumnType::Short => ColumnValue::Short(i16::from_le_bytes(buffer.take_array()?)),
        ColumnType::Int => ColumnValue::Int(i32::from_le_bytes(buffer.take_array()?)),
        ColumnType::Long => ColumnValue::Long(i64::from_le_bytes(buffer.take_array()?)),
        ColumnType::Float => ColumnValue::Float(f32::from_le_bytes(buffer.take_array()?)),
        ColumnType::Double => ColumnValue::Double(f64::from_le_bytes(buffer.take_array()?)),
    };
    Ok(value)
}

/// A schema bound to row type `T`.
///
/// Binding resolves every accessor path once and checks its type, so the
/// per-row loops only call function pointers.
pub struct RowCodec<T> {
    schema: Arc<Schema>,
    accessors: Vec<ColumnAccessor<T>>,
    primitive: Option<ColumnType>,
}

impl<T: ColumnarRow> RowCodec<T> {
    pub fn bind(schema: Arc<Schema>) -> Result<Self> {
        let primitive = if schema.is_primitive() {
            let column_type = schema.columns()[0].column_type;
            if T::primitive_type() != Some(column_type) {
                return Err(PartitionError::mismatch(format!(
                    "row type is not a primitive {}",
                    column_type
                )));
            }
            Some(column_type)
        } else {
            None
        };

        let accessors = schema
            .columns()
            .iter()
            .map(|column| {
                let accessor = T::accessor(&column.path).ok_or_else(|| {
                    PartitionError::mismatch(format!("row type has no field at {}", column.path))
                })?;
                if accessor.column_type != column.column_type {
                    return Err(PartitionError::mismatch(format!(
                        "field {} is {}, schema declares {}",
                        column.path, accessor.column_type, column.column_type
                    )));
                }
                Ok(accessor)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            schema,
            accessors,
            primitive,
        })
    }

    /// Bind the schema `T` itself produces.
    pub fn for_row_type() -> Result<Self> {
        Self::bind(Arc::new(T::schema()))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Write up to `store.row_count()` rows, returning how many were written.
    ///
    /// Extra input rows are never pulled from the iterator. When fewer rows
    /// arrive, trailing positions keep whatever the buffers already held.
    pub fn serialize<I>(&self, rows: I, store: &mut ColumnarStore) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        self.check_store(store)?;
        store.rewind();
        let row_count = store.row_count();
        let buffers = store.buffers_mut()?;

        let mut written = 0;
        for row in rows.into_iter().take(row_count) {
            let row: &T = row.borrow();
            for (accessor, buffer) in self.accessors.iter().zip(buffers.iter_mut()) {
                encode_value((accessor.get)(row), buffer)?;
            }
            written += 1;
        }

        if written < row_count {
            debug!("Serialized {} of {} rows; tail left untouched", written, row_count);
        }
        Ok(written)
    }

    /// Lazily decode every row. Rewinds first; the iterator consumes the
    /// buffer cursors.
    pub fn deserialize<'a>(&self, store: &'a mut ColumnarStore) -> Result<Rows<'a, T>> {
        self.check_store(store)?;
        store.rewind();
        let remaining = store.row_count();
        let buffers = store.buffers_mut()?;

        Ok(Rows {
            buffers,
            accessors: self.accessors.clone(),
            primitive: self.primitive,
            remaining,
        })
    }

    fn check_store(&self, store: &ColumnarStore) -> Result<()> {
        store.ensure_live()?;
        if !Arc::ptr_eq(&self.schema, store.schema()) && *self.schema != **store.schema() {
            return Err(PartitionError::mismatch(
                "store was built from a different schema",
            ));
        }
        Ok(())
    }
}

/// One-shot iterator over the rows of a store.
pub struct Rows<'a, T> {
    buffers: &'a mut [PinnedBuffer],
    accessors: Vec<ColumnAccessor<T>>,
    primitive: Option<ColumnType>,
    remaining: usize,
}

impl<T: ColumnarRow> Rows<'_, T> {
    fn decode_row(&mut self) -> Result<T> {
        if let Some(column_type) = self.primitive {
            let value = deserialize_column_value(column_type, &mut self.buffers[0])?;
            return T::from_scalar(value).ok_or_else(|| {
                PartitionError::mismatch(format!("row type cannot hold a {} scalar", column_type))
            });
        }

        let mut row = T::blank();
        for (accessor, buffer) in self.accessors.iter().zip(self.buffers.iter_mut()) {
            let value = deserialize_column_value(accessor.column_type, buffer)?;
            (accessor.set)(&mut row, value);
        }
        Ok(row)
    }
}

impl<T: ColumnarRow> Iterator for Rows<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let row = self.decode_row();
        self.remaining = if row.is_ok() { self.remaining - 1 } else { 0 };
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: ColumnarRow> ExactSizeIterator for Rows<'_, T> {}

impl<T: ColumnarRow> FusedIterator for Rows<'_, T> {}

impl ColumnarStore {
    /// Bind `T` to this store's schema and write `rows` into it.
    pub fn serialize<T, I>(&mut self, rows: I) -> Result<usize>
    where
        T: ColumnarRow,
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        RowCodec::<T>::bind(Arc::clone(self.schema()))?.serialize(rows, self)
    }

    /// Bind `T` to this store's schema and decode its rows lazily.
    pub fn deserialize<T: ColumnarRow>(&mut self) -> Result<Rows<'_, T>> {
        RowCodec::<T>::bind(Arc::clone(self.schema()))?.deserialize(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AccessorPath, ColumnDescriptor};
    use gpu_memory_manager::{HostAllocator, PinnedAllocator};

    #[derive(Debug, Clone, PartialEq)]
    struct Pair {
        a: i32,
        b: f64,
    }

    crate::columnar_row!(Pair { a: i32, b: f64 });

    #[derive(Debug, Clone, PartialEq)]
    struct Quote {
        bid: f64,
        size: i16,
    }

    impl Quote {
        fn blank() -> Self {
            Quote { bid: 0.0, size: 0 }
        }
    }

    /// Nested row whose quote holder is created lazily while decoding.
    #[derive(Debug, Clone, PartialEq)]
    struct Trade {
        id: i64,
        quote: Option<Quote>,
    }

    impl ColumnarRow for Trade {
        fn schema() -> Schema {
            Schema::new(vec![
                ColumnDescriptor::new(ColumnType::Long, "id"),
                ColumnDescriptor::new(ColumnType::Double, "quote.bid"),
                ColumnDescriptor::new(ColumnType::Short, "quote.size"),
            ])
        }

        fn blank() -> Self {
            Trade { id: 0, quote: None }
        }

        fn accessor(path: &AccessorPath) -> Option<ColumnAccessor<Self>> {
            use crate::row::ColumnScalar;
            let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();
            match segments.as_slice() {
                ["id"] => Some(ColumnAccessor::<Self>::new(
                    ColumnType::Long,
                    |row: &Self| row.id.into_value(),
                    |row: &mut Self, value| {
                        if let Some(v) = i64::from_value(value) {
                            row.id = v;
                        }
                    },
                )),
                ["quote", "bid"] => Some(ColumnAccessor::<Self>::new(
                    ColumnType::Double,
                    |row: &Self| row.quote.as_ref().map_or(0.0, |q| q.bid).into_value(),
                    |row: &mut Self, value| {
                        if let Some(v) = f64::from_value(value) {
                            row.quote.get_or_insert_with(Quote::blank).bid = v;
                        }
                    },
                )),
                ["quote", "size"] => Some(ColumnAccessor::<Self>::new(
                    ColumnType::Short,
                    |row: &Self| row.quote.as_ref().map_or(0, |q| q.size).into_value(),
                    |row: &mut Self, value| {
                        if let Some(v) = i16::from_value(value) {
                            row.quote.get_or_insert_with(Quote::blank).size = v;
                        }
                    },
                )),
                _ => None,
            }
        }
    }

    fn host() -> Arc<dyn PinnedAllocator> {
        Arc::new(HostAllocator::default())
    }

    fn pairs() -> Vec<Pair> {
        vec![
            Pair { a: 1, b: 1.5 },
            Pair { a: 2, b: 2.5 },
            Pair { a: 3, b: 3.5 },
        ]
    }

    #[test]
    fn writes_little_endian_columns() {
        let mut store = ColumnarStore::new(Arc::new(Pair::schema()), 3, host()).unwrap();
        assert_eq!(store.serialize::<Pair, _>(&pairs()).unwrap(), 3);

        assert_eq!(
            store.column_bytes(0).unwrap(),
            &[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]
        );
        let doubles: Vec<u8> = [1.5f64, 2.5, 3.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(store.column_bytes(1).unwrap(), doubles.as_slice());
        store.free().unwrap();
    }

    #[test]
    fn round_trips_rows_in_order() {
        let mut store = ColumnarStore::new(Arc::new(Pair::schema()), 3, host()).unwrap();
        store.serialize::<Pair, _>(pairs()).unwrap();

        let rows = store.deserialize::<Pair>().unwrap();
        assert_eq!(rows.len(), 3);
        let decoded: Vec<Pair> = rows.collect::<Result<_>>().unwrap();
        assert_eq!(decoded, pairs());
        store.free().unwrap();
    }

    #[test]
    fn nested_holders_are_created_on_decode() {
        let trades = vec![
            Trade { id: 7, quote: Some(Quote { bid: 99.25, size: 10 }) },
            Trade { id: -1, quote: Some(Quote { bid: 0.5, size: -3 }) },
        ];
        let codec = RowCodec::<Trade>::for_row_type().unwrap();
        let mut store = ColumnarStore::new(Arc::clone(codec.schema()), 2, host()).unwrap();
        codec.serialize(&trades, &mut store).unwrap();

        let decoded: Vec<Trade> = codec.deserialize(&mut store).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(decoded, trades);
        store.free().unwrap();
    }

    #[test]
    fn primitive_rows() {
        let values = vec![i64::MIN, 0, 42, i64::MAX];
        let mut store = ColumnarStore::new(Arc::new(i64::schema()), 4, host()).unwrap();
        store.serialize::<i64, _>(&values).unwrap();
        let decoded: Vec<i64> = store.deserialize::<i64>().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(decoded, values);
        store.free().unwrap();
    }

    #[test]
    fn extra_input_is_not_consumed() {
        let mut store = ColumnarStore::new(Arc::new(i32::schema()), 2, host()).unwrap();
        let mut pulled = 0;
        let rows = (0..10i32).inspect(|_| pulled += 1);
        assert_eq!(store.serialize::<i32, _>(rows).unwrap(), 2);
        assert_eq!(pulled, 2);
        store.free().unwrap();
    }

    #[test]
    fn short_input_leaves_tail_untouched() {
        let mut store = ColumnarStore::new(Arc::new(i32::schema()), 3, host()).unwrap();
        store.serialize::<i32, _>([10i32, 20, 30]).unwrap();
        assert_eq!(store.serialize::<i32, _>([7i32]).unwrap(), 1);

        let decoded: Vec<i32> = store.deserialize::<i32>().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(decoded, vec![7, 20, 30]);
        store.free().unwrap();
    }

    #[test]
    fn deserialize_restarts_after_rewind() {
        let mut store = ColumnarStore::new(Arc::new(Pair::schema()), 3, host()).unwrap();
        store.serialize::<Pair, _>(pairs()).unwrap();

        let first: Vec<Pair> = store.deserialize::<Pair>().unwrap().take(2).collect::<Result<_>>().unwrap();
        assert_eq!(first.len(), 2);
        let again: Vec<Pair> = store.deserialize::<Pair>().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(again, pairs());
        store.free().unwrap();
    }

    #[test]
    fn binding_checks_paths_and_types() {
        let missing = Arc::new(Schema::new(vec![ColumnDescriptor::new(ColumnType::Int, "c")]));
        assert!(matches!(
            RowCodec::<Pair>::bind(missing),
            Err(PartitionError::SchemaMismatch { .. })
        ));

        let wrong_type = Arc::new(Schema::new(vec![ColumnDescriptor::new(ColumnType::Long, "a")]));
        assert!(matches!(
            RowCodec::<Pair>::bind(wrong_type),
            Err(PartitionError::SchemaMismatch { .. })
        ));

        assert!(RowCodec::<i32>::bind(Arc::new(i16::schema())).is_err());
        assert!(RowCodec::<Pair>::bind(Arc::new(i32::schema())).is_err());
    }

    #[test]
    fn codec_rejects_foreign_store() {
        let codec = RowCodec::<Pair>::for_row_type().unwrap();
        let mut store = ColumnarStore::new(Arc::new(i32::schema()), 1, host()).unwrap();
        assert!(codec.serialize(&pairs(), &mut store).is_err());
        store.free().unwrap();
    }

    #[test]
    fn freed_store_rejects_conversion() {
        let mut store = ColumnarStore::new(Arc::new(Pair::schema()), 1, host()).unwrap();
        store.free().unwrap();
        assert!(matches!(
            store.serialize::<Pair, _>(&pairs()),
            Err(PartitionError::UseAfterFree)
        ));
        assert!(matches!(store.deserialize::<Pair>(), Err(PartitionError::UseAfterFree)));
    }

    #[test]
    fn scalar_read_advances_cursor() {
        let allocator = HostAllocator::default();
        let mut buffer = allocator.allocate(6).unwrap();
        encode_value(ColumnValue::Short(-2), &mut buffer).unwrap();
        encode_value(ColumnValue::Float(0.25), &mut buffer).unwrap();
        buffer.rewind();

        assert_eq!(
            deserialize_column_value(ColumnType::Short, &mut buffer).unwrap(),
            ColumnValue::Short(-2)
        );
        assert_eq!(buffer.position(), 2);
        assert_eq!(
            deserialize_column_value(ColumnType::Float, &mut buffer).unwrap(),
            ColumnValue::Float(0.25)
        );
        assert!(deserialize_column_value(ColumnType::Byte, &mut buffer).is_err());
        allocator.free(buffer).unwrap();
    }
}

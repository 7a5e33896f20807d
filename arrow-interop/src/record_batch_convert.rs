//! Conversion between Arrow `RecordBatch` and `ColumnarStore`.

use anyhow::{bail, Context, Result};
use arrow_array::{
    Array, ArrayRef, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array, Int8Array,
    RecordBatch, RecordBatchOptions,
};
use columnar_core::{ColumnType, ColumnarStore};
use gpu_memory_manager::PinnedAllocator;
use std::sync::Arc;

use crate::schema_utils::{to_arrow_schema, SchemaExt};

// ---------------------------------------------------------------------------
// Store → Arrow
// ---------------------------------------------------------------------------

/// Copy every column of a live store into an Arrow `RecordBatch`.
pub fn store_to_record_batch(store: &ColumnarStore) -> Result<RecordBatch> {
    let schema = Arc::new(to_arrow_schema(store.schema()));
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(store.num_columns());

    for (index, descriptor) in store.schema().columns().iter().enumerate() {
        let bytes = store.column_bytes(index)?;
        let array: ArrayRef = match descriptor.column_type {
            ColumnType::Byte => Arc::new(Int8Array::from(decode_le(bytes, i8::from_le_bytes))),
            ColumnType::Short => Arc::new(Int16Array::from(decode_le(bytes, i16::from_le_bytes))),
            ColumnType::Int => Arc::new(Int32Array::from(decode_le(bytes, i32::from_le_bytes))),
            ColumnType::Long => Arc::new(Int64Array::from(decode_le(bytes, i64::from_le_bytes))),
            ColumnType::Float => Arc::new(Float32Array::from(decode_le(bytes, f32::from_le_bytes))),
            ColumnType::Double => {
                Arc::new(Float64Array::from(decode_le(bytes, f64::from_le_bytes)))
            }
        };
        columns.push(array);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(store.row_count()));
    RecordBatch::try_new_with_options(schema, columns, &options)
        .context("Building RecordBatch from columnar store")
}

fn decode_le<T, const N: usize>(bytes: &[u8], decode: fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            decode(raw)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Arrow → Store
// ---------------------------------------------------------------------------

/// Copy a `RecordBatch` into a freshly allocated store.
///
/// Every column must map exactly onto a column type and be free of nulls.
/// Field names become accessor paths (split on `.`).
pub fn record_batch_to_store(
    batch: &RecordBatch,
    allocator: Arc<dyn PinnedAllocator>,
) -> Result<ColumnarStore> {
    let schema = batch.schema().to_columnar()?;
    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        if column.null_count() > 0 {
            bail!(
                "Column '{}' has {} nulls; columnar stores cannot encode nulls",
                field.name(),
                column.null_count()
            );
        }
    }

    let mut store = ColumnarStore::new(Arc::new(schema), batch.num_rows(), allocator)?;
    if let Err(err) = fill_store(batch, &mut store) {
        store.free()?;
        return Err(err);
    }
    Ok(store)
}

fn fill_store(batch: &RecordBatch, store: &mut ColumnarStore) -> Result<()> {
    let types: Vec<ColumnType> = store
        .schema()
        .columns()
        .iter()
        .map(|c| c.column_type)
        .collect();

    for (index, (column_type, array)) in types.into_iter().zip(batch.columns()).enumerate() {
        let dst = store.column_bytes_mut(index)?;
        let array = array.as_ref();
        match column_type {
            ColumnType::Byte => {
                encode_le(dst, &downcast::<Int8Array>(array)?.values()[..], i8::to_le_bytes)
            }
            ColumnType::Short => {
                encode_le(dst, &downcast::<Int16Array>(array)?.values()[..], i16::to_le_bytes)
            }
            ColumnType::Int => {
                encode_le(dst, &downcast::<Int32Array>(array)?.values()[..], i32::to_le_bytes)
            }
            ColumnType::Long => {
                encode_le(dst, &downcast::<Int64Array>(array)?.values()[..], i64::to_le_bytes)
            }
            ColumnType::Float => {
                encode_le(dst, &downcast::<Float32Array>(array)?.values()[..], f32::to_le_bytes)
            }
            ColumnType::Double => {
                encode_le(dst, &downcast::<Float64Array>(array)?.values()[..], f64::to_le_bytes)
            }
        }
    }
    Ok(())
}

fn downcast<A: Array + 'static>(array: &dyn Array) -> Result<&A> {
    array
        .as_any()
        .downcast_ref::<A>()
        .with_context(|| format!("Unexpected array type {:?}", array.data_type()))
}

fn encode_le<T: Copy, const N: usize>(dst: &mut [u8], values: &[T], encode: fn(T) -> [u8; N]) {
    for (chunk, &value) in dst.chunks_exact_mut(N).zip(values) {
        chunk.copy_from_slice(&encode(value));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

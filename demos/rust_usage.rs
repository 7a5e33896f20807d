use anyhow::Result;
use pinned_columnar::memory::{HostAllocator, SlabAllocator};
use pinned_columnar::{
    columnar_row, wire, ColumnarRow, ColumnarStore, Partition, PartitionConfig, PartitionFormat,
};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Debug, Clone, PartialEq)]
struct Reading {
    sensor: i32,
    timestamp: i64,
    value: f64,
}

columnar_row!(Reading {
    sensor: i32,
    timestamp: i64,
    value: f64,
});

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    info!("Pinned columnar partitions - Rust examples");

    // Example 1: rows in, rows out
    round_trip_example()?;

    // Example 2: shipping a partition as bytes
    wire_example()?;

    // Example 3: pooled allocation and conversion to rows
    slab_and_convert_example()?;

    // Example 4: forgetting to free
    leak_example()?;

    Ok(())
}

fn readings(n: usize) -> Vec<Reading> {
    (0..n)
        .map(|i| Reading {
            sensor: (i % 4) as i32,
            timestamp: 1_700_000_000_000 + i as i64 * 1000,
            value: (i as f64).sqrt(),
        })
        .collect()
}

fn round_trip_example() -> Result<()> {
    info!("=== Example 1: Round trip ===");

    let allocator = PartitionConfig::default().build_allocator()?;
    let rows = readings(8);

    let mut store = ColumnarStore::new(Arc::new(Reading::schema()), rows.len(), allocator)?;
    store.serialize::<Reading, _>(&rows)?;
    info!("Stored {} rows in {} bytes", store.row_count(), store.memory_usage());

    for row in store.deserialize::<Reading>()? {
        info!("  {:?}", row?);
    }

    store.free()?;
    Ok(())
}

fn wire_example() -> Result<()> {
    info!("=== Example 2: Wire transfer ===");

    let allocator = PartitionConfig::default().build_allocator()?;
    let mut store = ColumnarStore::new(Arc::new(Reading::schema()), 1000, allocator.clone())?;
    store.serialize::<Reading, _>(readings(1000))?;

    let bytes = wire::to_bytes(&mut store)?;
    info!("Encoded partition: {} bytes on the wire", bytes.len());
    store.free()?;

    let mut received = wire::from_bytes(&bytes, allocator)?;
    let first = received.deserialize::<Reading>()?.next().transpose()?;
    info!("First received row: {:?}", first);
    received.free()?;
    Ok(())
}

fn slab_and_convert_example() -> Result<()> {
    info!("=== Example 3: Slab allocator and row conversion ===");

    let host = Arc::new(HostAllocator::default());
    let slab = Arc::new(SlabAllocator::new(host, &[4 * 1024, 64 * 1024], 4)?);

    for batch in 0..3 {
        let rows = readings(100 + batch * 50);
        let mut store = ColumnarStore::new(Arc::new(Reading::schema()), rows.len(), slab.clone())?;
        store.serialize::<Reading, _>(&rows)?;

        if let Partition::Rows(partition) = store.convert::<Reading>(PartitionFormat::RowIterator)? {
            info!("Batch {}: {} rows materialized", batch, partition.len());
        }
    }

    // Every batch after the first reuses the pooled slabs.
    info!("Slab stats: {:?}", slab.stats());
    Ok(())
}

fn leak_example() -> Result<()> {
    info!("=== Example 4: Dropped without free ===");

    let allocator = PartitionConfig::default().build_allocator()?;
    let store = ColumnarStore::new(Arc::new(Reading::schema()), 64, allocator)?;
    info!("Dropping a live store of {} bytes; expect a warning", store.memory_usage());
    drop(store);
    Ok(())
}

//! Pinned columnar partitions.
//!
//! Facade over the workspace crates:
//!
//! - [`columnar_core`]: schemas, the columnar store, row conversion, the wire
//!   format and the row-partition bridge (re-exported at the top level).
//! - [`memory`]: pinned allocators and buffer handles.
//! - [`arrow`]: conversion to and from Arrow record batches.

pub use columnar_core::*;

pub use arrow_interop as arrow;
pub use gpu_memory_manager as memory;

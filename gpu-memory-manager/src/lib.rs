//! Pinned host memory for columnar partitions.
//!
//! Column buffers live outside the Rust heap in regions an accelerator can map
//! for DMA. This crate owns that seam: the [`PinnedAllocator`] trait, the
//! [`PinnedBuffer`] handle it hands out, and a few allocators:
//!
//! - [`HostAllocator`]: page-aligned host memory from the global allocator.
//! - [`SlabAllocator`]: size-class pooling on top of any other allocator.
//! - `CudaHostAllocator` (feature `cuda`): page-locked memory from the CUDA
//!   driver.
//!
//! Buffers are plain handles. Dropping one does not release its memory; it
//! must be handed back to the allocator that produced it.

pub mod host_allocator;
pub mod pinned_buffer;
pub mod slab_allocator;

#[cfg(feature = "cuda")]
pub mod cuda_allocator;

pub use host_allocator::HostAllocator;
pub use pinned_buffer::PinnedBuffer;
pub use slab_allocator::{SlabAllocator, SlabStats};

#[cfg(feature = "cuda")]
pub use cuda_allocator::CudaHostAllocator;

use anyhow::Result;

/// Allocator for host memory that a GPU runtime can map for transfer.
///
/// `free` must only ever receive buffers produced by the same allocator's
/// `allocate`, and each buffer exactly once. Ownership of [`PinnedBuffer`]
/// enforces the "exactly once" half.
pub trait PinnedAllocator: Send + Sync {
    /// Allocate `bytes` of pinned memory. `bytes` must be positive.
    fn allocate(&self, bytes: usize) -> Result<PinnedBuffer>;

    /// Release a buffer previously returned by [`PinnedAllocator::allocate`].
    fn free(&self, buffer: PinnedBuffer) -> Result<()>;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;
}

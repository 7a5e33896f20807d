use anyhow::{bail, Context, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::{PinnedAllocator, PinnedBuffer};

/// Default alignment: one host page, so regions can be registered with a
/// device runtime without bounce buffers.
pub const DEFAULT_ALIGNMENT: usize = 4096;

/// Page-aligned host memory from the global allocator.
///
/// Regions are zero-filled on allocation. They are not page-locked by the OS;
/// use `CudaHostAllocator` when true pinning is required.
pub struct HostAllocator {
    alignment: usize,
    live_bytes: AtomicUsize,
    live_buffers: AtomicUsize,
}

impl HostAllocator {
    pub fn new(alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            bail!("Alignment must be a power of two, got {}", alignment);
        }
        info!("Initializing host allocator (alignment {})", alignment);
        Ok(Self {
            alignment,
            live_bytes: AtomicUsize::new(0),
            live_buffers: AtomicUsize::new(0),
        })
    }

    /// Bytes currently handed out and not yet freed.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Relaxed)
    }

    fn layout(&self, bytes: usize) -> Result<Layout> {
        Layout::from_size_align(bytes, self.alignment)
            .with_context(|| format!("Invalid layout for {} bytes", bytes))
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            live_bytes: AtomicUsize::new(0),
            live_buffers: AtomicUsize::new(0),
        }
    }
}

impl PinnedAllocator for HostAllocator {
    fn allocate(&self, bytes: usize) -> Result<PinnedBuffer> {
        if bytes == 0 {
            bail!("Allocation size must be positive");
        }
        let layout = self.layout(bytes)?;

        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .with_context(|| format!("Failed to allocate {} bytes of host memory", bytes))?;

        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        debug!("Allocated {} bytes at {:p}", bytes, ptr);

        // SAFETY: freshly allocated, unaliased, `bytes` long.
        Ok(unsafe { PinnedBuffer::from_raw_parts(ptr, bytes, bytes, 0) })
    }

    fn free(&self, buffer: PinnedBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let bytes = buffer.allocated_len();
        let layout = self.layout(bytes)?;
        debug!("Freeing {} bytes at {:p}", bytes, buffer.raw());

        // SAFETY: the buffer came from `allocate` with this same layout and is
        // consumed here, so no handle to the region survives.
        unsafe { alloc::dealloc(buffer.raw().as_ptr(), layout) };

        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "host"
    }
}

impl Drop for HostAllocator {
    fn drop(&mut self) {
        let live = self.live_buffers();
        if live > 0 {
            warn!(
                "Host allocator dropped with {} live buffers ({} bytes)",
                live,
                self.live_bytes()
            );
        }
    }
}

//! Page-locked host memory from the CUDA driver.

use anyhow::{bail, Context, Result};
use cudarc::driver::{result, CudaDevice};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{PinnedAllocator, PinnedBuffer};

/// Allocates through `cuMemHostAlloc`, so regions are page-locked and can be
/// copied to the device asynchronously.
pub struct CudaHostAllocator {
    device: Arc<CudaDevice>,
}

impl CudaHostAllocator {
    pub fn new(device: Arc<CudaDevice>) -> Self {
        info!("Initializing CUDA host allocator on device {}", device.ordinal());
        Self { device }
    }

    pub fn for_ordinal(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new(ordinal)
            .with_context(|| format!("Failed to open CUDA device {}", ordinal))?;
        Ok(Self::new(device))
    }
}

impl PinnedAllocator for CudaHostAllocator {
    fn allocate(&self, bytes: usize) -> Result<PinnedBuffer> {
        if bytes == 0 {
            bail!("Allocation size must be positive");
        }
        self.device
            .bind_to_thread()
            .context("Failed to bind CUDA context")?;

        // SAFETY: the device context is current on this thread.
        let ptr = unsafe { result::malloc_host(bytes, 0) }
            .with_context(|| format!("Failed to allocate {} bytes of pinned memory", bytes))?;
        let ptr = NonNull::new(ptr as *mut u8).context("CUDA returned a null host pointer")?;
        debug!("Pinned {} bytes at {:p}", bytes, ptr);

        // SAFETY: freshly allocated by the driver, unaliased, `bytes` long.
        Ok(unsafe { PinnedBuffer::from_raw_parts(ptr, bytes, bytes, 0) })
    }

    fn free(&self, buffer: PinnedBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        self.device
            .bind_to_thread()
            .context("Failed to bind CUDA context")?;
        debug!("Unpinning {} bytes at {:p}", buffer.allocated_len(), buffer.raw());

        // SAFETY: the region came from `malloc_host` and the handle is consumed.
        unsafe { result::free_host(buffer.raw().as_ptr() as *mut c_void) }
            .context("Failed to free pinned memory")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cuda-host"
    }
}

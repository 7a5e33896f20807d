use gpu_memory_manager::{HostAllocator, PinnedAllocator, SlabAllocator};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;

/// Which allocator backs column buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    /// Page-aligned host memory.
    Host,
    /// Size-class pool over host memory.
    Slab,
    /// CUDA page-locked host memory (needs the `cuda` feature).
    Cuda,
}

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub allocator: AllocatorKind,
    /// Alignment of host regions in bytes
    pub alignment: usize,
    /// Slab class sizes, strictly increasing
    pub slab_sizes: Vec<usize>,
    pub max_slabs_per_class: usize,
    /// Device ordinal for `AllocatorKind::Cuda`
    pub cuda_device: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            allocator: AllocatorKind::Host,
            alignment: gpu_memory_manager::host_allocator::DEFAULT_ALIGNMENT,
            slab_sizes: vec![
                64 * 1024,         // 64KB
                1024 * 1024,       // 1MB
                16 * 1024 * 1024,  // 16MB
                256 * 1024 * 1024, // 256MB
            ],
            max_slabs_per_class: 16,
            cuda_device: 0,
        }
    }
}

impl PartitionConfig {
    pub fn build_allocator(&self) -> Result<Arc<dyn PinnedAllocator>> {
        info!("Building {:?} allocator for columnar partitions", self.allocator);
        let allocator: Arc<dyn PinnedAllocator> = match self.allocator {
            AllocatorKind::Host => Arc::new(HostAllocator::new(self.alignment)?),
            AllocatorKind::Slab => {
                let host: Arc<dyn PinnedAllocator> = Arc::new(HostAllocator::new(self.alignment)?);
                Arc::new(SlabAllocator::new(
                    host,
                    &self.slab_sizes,
                    self.max_slabs_per_class,
                )?)
            }
            AllocatorKind::Cuda => self.cuda_allocator()?,
        };
        Ok(allocator)
    }

    #[cfg(feature = "cuda")]
    fn cuda_allocator(&self) -> Result<Arc<dyn PinnedAllocator>> {
        let allocator = gpu_memory_manager::CudaHostAllocator::for_ordinal(self.cuda_device)?;
        Ok(Arc::new(allocator))
    }

    #[cfg(not(feature = "cuda"))]
    fn cuda_allocator(&self) -> Result<Arc<dyn PinnedAllocator>> {
        Err(anyhow::anyhow!(
            "CUDA allocator requested for device {} but built without the `cuda` feature",
            self.cuda_device
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_host_allocator() {
        let allocator = PartitionConfig::default().build_allocator().unwrap();
        assert_eq!(allocator.name(), "host");
    }

    #[test]
    fn slab_config_builds_pool() {
        let config = PartitionConfig {
            allocator: AllocatorKind::Slab,
            slab_sizes: vec![1024, 4096],
            ..Default::default()
        };
        let allocator = config.build_allocator().unwrap();
        assert_eq!(allocator.name(), "slab");
        let buffer = allocator.allocate(100).unwrap();
        assert_eq!(buffer.allocated_len(), 1024);
        allocator.free(buffer).unwrap();
    }

    #[test]
    fn invalid_slab_sizes_are_rejected() {
        let config = PartitionConfig {
            allocator: AllocatorKind::Slab,
            slab_sizes: vec![4096, 1024],
            ..Default::default()
        };
        assert!(config.build_allocator().is_err());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn cuda_needs_feature() {
        let config = PartitionConfig {
            allocator: AllocatorKind::Cuda,
            ..Default::default()
        };
        assert!(config.build_allocator().is_err());
    }
}

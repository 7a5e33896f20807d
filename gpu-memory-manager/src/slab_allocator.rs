use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{PinnedAllocator, PinnedBuffer};

/// Slot tag for requests larger than every slab class; these bypass the pool.
const OVERSIZE_SLOT: usize = usize::MAX;

/// Slab allocator for pinned memory
///
/// Pinned allocations are expensive (the OS has to lock pages), so regions are
/// kept in fixed-size classes and reused instead of being returned to the
/// backing allocator on every free. Reused regions are not cleared.
pub struct SlabAllocator {
    backing: Arc<dyn PinnedAllocator>,
    slab_classes: Vec<SlabClass>,
}

struct SlabClass {
    size: usize,
    free_slabs: Mutex<VecDeque<PinnedBuffer>>,
    max_slabs: usize,
    allocated_count: Mutex<usize>,
}

/// Snapshot of one slab class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabStats {
    pub size: usize,
    /// Regions sitting in the pool.
    pub pooled: usize,
    /// Regions owned by this class, pooled or handed out.
    pub allocated: usize,
}

impl SlabAllocator {
    pub fn new(
        backing: Arc<dyn PinnedAllocator>,
        slab_sizes: &[usize],
        max_slabs_per_class: usize,
    ) -> Result<Self> {
        if slab_sizes.is_empty() {
            bail!("Slab allocator needs at least one slab size");
        }
        if slab_sizes.windows(2).any(|w| w[0] >= w[1]) {
            bail!("Slab sizes must be strictly increasing: {:?}", slab_sizes);
        }

        info!("Initializing Slab Allocator over {}", backing.name());
        info!("  Slab sizes: {:?}", slab_sizes);
        info!("  Max slabs per class: {}", max_slabs_per_class);

        let slab_classes = slab_sizes
            .iter()
            .map(|&size| SlabClass {
                size,
                free_slabs: Mutex::new(VecDeque::new()),
                max_slabs: max_slabs_per_class,
                allocated_count: Mutex::new(0),
            })
            .collect();

        Ok(Self {
            backing,
            slab_classes,
        })
    }

    pub fn stats(&self) -> Vec<SlabStats> {
        self.slab_classes
            .iter()
            .map(|class| SlabStats {
                size: class.size,
                pooled: class.free_slabs.lock().len(),
                allocated: *class.allocated_count.lock(),
            })
            .collect()
    }

    /// Smallest class that fits `size`, if any.
    fn find_slab_class(&self, size: usize) -> Option<usize> {
        self.slab_classes
            .iter()
            .position(|slab_class| slab_class.size >= size)
    }

    fn allocate_new_slab(&self, slab_class: &SlabClass, class_idx: usize) -> Result<PinnedBuffer> {
        let mut count = slab_class.allocated_count.lock();

        if *count >= slab_class.max_slabs {
            bail!(
                "Maximum number of slabs ({}) reached for class {}",
                slab_class.max_slabs,
                class_idx
            );
        }

        debug!("Allocating new slab for class {} (size {})", class_idx, slab_class.size);
        let buffer = self.backing.allocate(slab_class.size)?;
        *count += 1;

        Ok(buffer)
    }
}

impl PinnedAllocator for SlabAllocator {
    fn allocate(&self, size: usize) -> Result<PinnedBuffer> {
        if size == 0 {
            bail!("Allocation size must be positive");
        }

        let Some(class_idx) = self.find_slab_class(size) else {
            debug!("Request of {} bytes exceeds largest slab, using backing allocator", size);
            let buffer = self.backing.allocate(size)?;
            return Ok(buffer.reissue(size, OVERSIZE_SLOT));
        };
        let slab_class = &self.slab_classes[class_idx];

        let reused = slab_class.free_slabs.lock().pop_front();
        let buffer = match reused {
            Some(buffer) => {
                debug!("Reusing slab from class {} (size {})", class_idx, slab_class.size);
                buffer
            }
            None => self.allocate_new_slab(slab_class, class_idx)?,
        };

        Ok(buffer.reissue(size, class_idx))
    }

    fn free(&self, buffer: PinnedBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let class_idx = buffer.slot();
        if class_idx == OVERSIZE_SLOT {
            let allocated = buffer.allocated_len();
            return self.backing.free(buffer.reissue(allocated, 0));
        }
        let Some(slab_class) = self.slab_classes.get(class_idx) else {
            bail!("Invalid slab class index: {}", class_idx);
        };

        debug!("Returning slab to pool (class {})", class_idx);
        slab_class
            .free_slabs
            .lock()
            .push_back(buffer.reissue(slab_class.size, 0));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slab"
    }
}

impl Drop for SlabAllocator {
    fn drop(&mut self) {
        info!("Shutting down Slab Allocator");

        for (idx, slab_class) in self.slab_classes.iter().enumerate() {
            let mut free_slabs = slab_class.free_slabs.lock();
            let mut count = slab_class.allocated_count.lock();
            info!("  Class {}: {} free slabs", idx, free_slabs.len());

            for buffer in free_slabs.drain(..) {
                if let Err(err) = self.backing.free(buffer) {
                    warn!("Failed to release slab from class {}: {:#}", idx, err);
                }
                *count -= 1;
            }
            if *count > 0 {
                warn!("  Class {}: {} slabs still handed out", idx, *count);
            }
        }
    }
}

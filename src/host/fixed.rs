//! Hosting subsystem with fixed answers
//!
//! Used to inspect the layout a device would get for a given identity, and
//! as the per-instance double in tests.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use super::AcceleratorHost;

/// Zero-copy pool description reported by a [`FixedHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ZeroCopy {
    physical_base: u64,
    pool_base: Option<u64>,
}

/// Host that reports fixed identity values and counts notifications
#[derive(Debug, Default)]
pub struct FixedHost {
    vm_id: i64,
    arena_base: Option<u64>,
    arena_slots: Option<u32>,
    zero_copy: Option<ZeroCopy>,
    resets: AtomicU64,
    exits: AtomicU64,
}

impl FixedHost {
    /// Create a host reporting `vm_id`, with no arena and no zero-copy pool
    pub fn new(vm_id: i64) -> Self {
        Self {
            vm_id,
            ..Default::default()
        }
    }

    /// Report `base` as the shared memory arena base
    pub fn arena_base(mut self, base: u64) -> Self {
        self.arena_base = Some(base);
        self
    }

    /// Report the arena as holding `slots` dstore slots
    pub fn arena_slots(mut self, slots: u32) -> Self {
        self.arena_slots = Some(slots);
        self
    }

    /// Enable zero-copy with the given physical base and pool host address
    pub fn zero_copy(mut self, physical_base: u64, pool_base: u64) -> Self {
        self.zero_copy = Some(ZeroCopy {
            physical_base,
            pool_base: Some(pool_base),
        });
        self
    }

    /// Enable zero-copy but fail to provide the pool mapping
    pub fn zero_copy_without_pool(mut self, physical_base: u64) -> Self {
        self.zero_copy = Some(ZeroCopy {
            physical_base,
            pool_base: None,
        });
        self
    }

    /// Number of reset notifications received
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Number of exit notifications received
    pub fn exit_count(&self) -> u64 {
        self.exits.load(Ordering::SeqCst)
    }
}

impl AcceleratorHost for FixedHost {
    fn get_vm_id(&self) -> i64 {
        self.vm_id
    }

    fn get_zcopy_capability(&self) -> bool {
        self.zero_copy.is_some()
    }

    fn get_zcopy_physical_base(&self) -> u64 {
        self.zero_copy.map(|z| z.physical_base).unwrap_or(0)
    }

    fn get_zcopy_pool_base(&self) -> Option<u64> {
        self.zero_copy.and_then(|z| z.pool_base)
    }

    fn get_shared_memory_arena_base(&self) -> Option<u64> {
        self.arena_base
    }

    fn get_shared_memory_arena_slots(&self) -> Option<u32> {
        self.arena_slots
    }

    fn notify_vm_reset(&self) {
        let n = self.resets.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("fixed host: vm {} reset #{}", self.vm_id, n);
    }

    fn notify_vm_exit(&self) {
        let n = self.exits.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("fixed host: vm {} exit #{}", self.vm_id, n);
    }
}

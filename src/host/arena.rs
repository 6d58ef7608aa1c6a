//! In-process hosting subsystem backed by anonymous mappings
//!
//! One [`ArenaHost`] serves every VM on the host. It owns a single arena
//! holding one dstore slot per VM and, optionally, the global zero-copy pool.
//! VMs attach through [`ArenaHost::attach`], which assigns the lowest free
//! 1-based id; dropping the returned [`VmHandle`] frees the id again, so ids
//! stay dense and the `(vm_id - 1) * slot_size` partitioning stays in bounds.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};
use vm_memory::{Bytes, GuestAddress, GuestMemory, GuestMemoryMmap};

use super::AcceleratorHost;
use crate::{Error, Result};

const SCRUB_CHUNK: usize = 4096;

/// Lifecycle state the host tracks for one attached VM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VmLifecycle {
    /// Reset notifications received since attach
    pub resets: u64,
    /// The guest driver has unloaded and the slot was scrubbed
    pub exited: bool,
}

struct ZeroCopyPool {
    memory: GuestMemoryMmap,
    host_base: u64,
    physical_base: u64,
}

struct ArenaInner {
    arena: GuestMemoryMmap,
    arena_base: u64,
    slot_size: u64,
    max_vms: u32,
    zero_copy: Option<ZeroCopyPool>,
    vms: Mutex<BTreeMap<u32, VmLifecycle>>,
}

impl ArenaInner {
    fn vms(&self) -> MutexGuard<'_, BTreeMap<u32, VmLifecycle>> {
        // Entries are plain data; a panic mid-update cannot leave them torn.
        self.vms.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Zero a VM's slot in place, one page at a time
    fn scrub_slot(&self, vm_id: u32) -> Result<()> {
        const ZERO_PAGE: [u8; SCRUB_CHUNK] = [0u8; SCRUB_CHUNK];

        let start = u64::from(vm_id - 1) * self.slot_size;
        let end = start + self.slot_size;
        let mut addr = start;
        while addr < end {
            let len = (end - addr).min(SCRUB_CHUNK as u64) as usize;
            self.arena
                .write_slice(&ZERO_PAGE[..len], GuestAddress(addr))
                .map_err(|e| {
                    Error::Memory(format!("failed to scrub slot of vm {}: {}", vm_id, e))
                })?;
            addr += len as u64;
        }
        Ok(())
    }
}

/// Builder for [`ArenaHost`]
#[derive(Debug, Clone)]
pub struct ArenaHostBuilder {
    slot_size: u64,
    max_vms: u32,
    zero_copy: Option<(u64, u64)>,
}

impl ArenaHostBuilder {
    /// Arena of `max_vms` slots of `slot_size` bytes each
    pub fn new(slot_size: u64, max_vms: u32) -> Self {
        Self {
            slot_size,
            max_vms,
            zero_copy: None,
        }
    }

    /// Also allocate a zero-copy pool of `size` bytes, reported to guests at
    /// `physical_base`
    pub fn zero_copy(mut self, size: u64, physical_base: u64) -> Self {
        self.zero_copy = Some((size, physical_base));
        self
    }

    pub fn build(self) -> Result<ArenaHost> {
        if self.slot_size == 0 || self.max_vms == 0 {
            return Err(Error::Config(
                "arena needs a non-zero slot size and at least one VM".into(),
            ));
        }
        let arena_size = self
            .slot_size
            .checked_mul(u64::from(self.max_vms))
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| {
                Error::Config(format!(
                    "arena of {} slots x {:#x} bytes overflows",
                    self.max_vms, self.slot_size
                ))
            })?;

        let (arena, arena_base) = map_anonymous(arena_size, "arena")?;

        let zero_copy = match self.zero_copy {
            Some((size, physical_base)) => {
                let size = usize::try_from(size)
                    .map_err(|_| Error::Config(format!("zero-copy pool too large: {:#x}", size)))?;
                let (memory, host_base) = map_anonymous(size, "zero-copy pool")?;
                Some(ZeroCopyPool {
                    memory,
                    host_base,
                    physical_base,
                })
            }
            None => None,
        };

        info!(
            "arena host: {} slots x {:#x} bytes at {:#x}, zero-copy {}",
            self.max_vms,
            self.slot_size,
            arena_base,
            if zero_copy.is_some() { "on" } else { "off" }
        );

        Ok(ArenaHost {
            inner: Arc::new(ArenaInner {
                arena,
                arena_base,
                slot_size: self.slot_size,
                max_vms: self.max_vms,
                zero_copy,
                vms: Mutex::new(BTreeMap::new()),
            }),
        })
    }
}

fn map_anonymous(size: usize, what: &str) -> Result<(GuestMemoryMmap, u64)> {
    let memory = GuestMemoryMmap::from_ranges(&[(GuestAddress(0), size)])
        .map_err(|e| Error::Memory(format!("Failed to map {}: {}", what, e)))?;
    let base = memory
        .get_host_address(GuestAddress(0))
        .map_err(|e| Error::Memory(format!("{} host address: {}", what, e)))? as u64;
    Ok((memory, base))
}

/// Hosting subsystem owning the shared memory arena of every VM
#[derive(Clone)]
pub struct ArenaHost {
    inner: Arc<ArenaInner>,
}

impl ArenaHost {
    pub fn builder(slot_size: u64, max_vms: u32) -> ArenaHostBuilder {
        ArenaHostBuilder::new(slot_size, max_vms)
    }

    /// Register a new VM and return the handle its device talks to
    pub fn attach(&self) -> Result<VmHandle> {
        let mut vms = self.inner.vms();
        let vm_id = (1..=self.inner.max_vms)
            .find(|id| !vms.contains_key(id))
            .ok_or_else(|| {
                Error::Host(format!(
                    "all {} arena slots are in use",
                    self.inner.max_vms
                ))
            })?;
        vms.insert(vm_id, VmLifecycle::default());
        debug!("arena host: attached vm {}", vm_id);

        Ok(VmHandle {
            vm_id,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn arena_base(&self) -> u64 {
        self.inner.arena_base
    }

    pub fn slot_size(&self) -> u64 {
        self.inner.slot_size
    }

    pub fn max_vms(&self) -> u32 {
        self.inner.max_vms
    }

    /// Ids of the currently attached VMs, ascending
    pub fn attached(&self) -> Vec<u32> {
        self.inner.vms().keys().copied().collect()
    }

    pub fn lifecycle(&self, vm_id: u32) -> Option<VmLifecycle> {
        self.inner.vms().get(&vm_id).copied()
    }

    /// The arena mapping, addressed by offset from its base
    pub fn arena_memory(&self) -> &GuestMemoryMmap {
        &self.inner.arena
    }

    /// The zero-copy pool mapping, addressed by offset from its base
    pub fn zero_copy_memory(&self) -> Option<&GuestMemoryMmap> {
        self.inner.zero_copy.as_ref().map(|pool| &pool.memory)
    }
}

/// A single VM's view of the [`ArenaHost`]
///
/// Keeps the arena mapped while any device still holds it.
pub struct VmHandle {
    vm_id: u32,
    inner: Arc<ArenaInner>,
}

impl VmHandle {
    pub fn vm_id(&self) -> u32 {
        self.vm_id
    }
}

impl AcceleratorHost for VmHandle {
    fn get_vm_id(&self) -> i64 {
        i64::from(self.vm_id)
    }

    fn get_zcopy_capability(&self) -> bool {
        self.inner.zero_copy.is_some()
    }

    fn get_zcopy_physical_base(&self) -> u64 {
        self.inner
            .zero_copy
            .as_ref()
            .map(|pool| pool.physical_base)
            .unwrap_or(0)
    }

    fn get_zcopy_pool_base(&self) -> Option<u64> {
        self.inner.zero_copy.as_ref().map(|pool| pool.host_base)
    }

    fn get_shared_memory_arena_base(&self) -> Option<u64> {
        Some(self.inner.arena_base)
    }

    fn get_shared_memory_arena_slots(&self) -> Option<u32> {
        Some(self.inner.max_vms)
    }

    fn notify_vm_reset(&self) {
        let mut vms = self.inner.vms();
        if let Some(state) = vms.get_mut(&self.vm_id) {
            state.resets += 1;
            state.exited = false;
            debug!("arena host: vm {} reset #{}", self.vm_id, state.resets);
        }
    }

    fn notify_vm_exit(&self) {
        {
            let mut vms = self.inner.vms();
            match vms.get_mut(&self.vm_id) {
                Some(state) => state.exited = true,
                None => return,
            }
        }

        // Scrub outside the table lock; the slot stays ours while this
        // handle lives.
        if let Err(e) = self.inner.scrub_slot(self.vm_id) {
            warn!("arena host: {}", e);
        }
        debug!("arena host: vm {} exited, slot released", self.vm_id);
    }
}

impl Drop for VmHandle {
    fn drop(&mut self) {
        self.inner.vms().remove(&self.vm_id);
        debug!("arena host: detached vm {}", self.vm_id);
    }
}

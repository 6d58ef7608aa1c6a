//! Shared memory windows exposed to the guest

use std::ops::Range;

use serde::Serialize;
use tracing::info;
use vgpu_protocol::{bar, DSTORE_REGION_NAME, ZCOPY_REGION_NAME};

use super::arena::SharedArena;
use crate::bridge::LifecycleBridge;
use crate::config::VgpuConfig;
use crate::{Error, Result};

/// Where a window's memory comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WindowBacking {
    /// A VM-private slot of the shared arena
    PerVmSlot { vm_id: u32, offset: u64 },
    /// The host's global pool, shared by every VM with the capability
    GlobalPool,
}

/// A host-backed memory window mapped into the guest through a BAR
///
/// The host address is borrowed from the hosting subsystem and stays valid
/// for the lifetime of the device; neither it nor the size ever change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryWindow {
    name: &'static str,
    bar: u8,
    host_addr: u64,
    size: u64,
    backing: WindowBacking,
}

impl MemoryWindow {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bar(&self) -> u8 {
        self.bar
    }

    pub fn host_addr(&self) -> u64 {
        self.host_addr
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn backing(&self) -> WindowBacking {
        self.backing
    }

    /// Windows are always mapped read/write
    pub fn writable(&self) -> bool {
        true
    }

    pub fn prefetchable(&self) -> bool {
        true
    }

    pub fn host_range(&self) -> Range<u64> {
        self.host_addr..self.host_addr + self.size
    }
}

/// The dstore window and, if zero-copy is available, the zcopy window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowManager {
    dstore: MemoryWindow,
    zcopy: Option<MemoryWindow>,
}

impl WindowManager {
    /// Place both windows using the identity cached in `bridge`
    ///
    /// A missing arena base or an out-of-bounds slot is fatal. The zcopy
    /// window exists exactly when the bridge reports zero-copy enabled.
    pub fn new(bridge: &LifecycleBridge, config: &VgpuConfig) -> Result<Self> {
        let vm_id = bridge.query_vm_id();
        let arena = SharedArena::new(
            bridge.query_shared_memory_arena_base()?,
            config.dstore_size,
            bridge.query_shared_memory_arena_slots(),
        )?;
        let slot = arena.slot(vm_id)?;

        let dstore = MemoryWindow {
            name: DSTORE_REGION_NAME,
            bar: bar::DSTORE,
            host_addr: arena.base() + slot.offset,
            size: slot.size,
            backing: WindowBacking::PerVmSlot {
                vm_id,
                offset: slot.offset,
            },
        };
        info!(
            "vgpu: vm {} dstore at {:#x} ({:#x} bytes, slot offset {:#x})",
            vm_id, dstore.host_addr, dstore.size, slot.offset
        );

        let zcopy = Self::zcopy_window(bridge, config.zcopy_size);

        Ok(Self { dstore, zcopy })
    }

    fn zcopy_window(bridge: &LifecycleBridge, size: u64) -> Option<MemoryWindow> {
        let host_addr = bridge.query_zero_copy_pool_base()?;
        info!("vgpu: zcopy at {:#x} ({:#x} bytes)", host_addr, size);
        Some(MemoryWindow {
            name: ZCOPY_REGION_NAME,
            bar: bar::ZCOPY,
            host_addr,
            size,
            backing: WindowBacking::GlobalPool,
        })
    }

    pub fn dstore(&self) -> &MemoryWindow {
        &self.dstore
    }

    pub fn zcopy(&self) -> Option<&MemoryWindow> {
        self.zcopy.as_ref()
    }

    /// All exposed windows, dstore first
    pub fn windows(&self) -> impl Iterator<Item = &MemoryWindow> {
        std::iter::once(&self.dstore).chain(self.zcopy.as_ref())
    }

    /// Window backing the given BAR
    pub fn by_bar(&self, index: u8) -> Result<&MemoryWindow> {
        self.windows()
            .find(|w| w.bar == index)
            .ok_or_else(|| Error::Device(format!("no memory window on BAR {}", index)))
    }
}

//! VM identity and lifecycle bridge
//!
//! The only code that talks to the hosting accelerator subsystem. Identity and
//! zero-copy capability are queried once when the bridge is built and cached
//! for the device's lifetime; notifications are forwarded as-is.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::host::AcceleratorHost;
use crate::{Error, Result};

/// Identity of the VM a device belongs to, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VmIdentity {
    /// 1-based VM id
    pub vm_id: u32,
    /// Whether the zero-copy pool is available
    pub zero_copy_enabled: bool,
    /// Physical base of the zero-copy pool; 0 when disabled
    pub zero_copy_physical_base: u64,
}

/// Cached view of the hosting subsystem for one device
pub struct LifecycleBridge {
    host: Arc<dyn AcceleratorHost>,
    identity: VmIdentity,
    zero_copy_pool: Option<u64>,
}

impl fmt::Debug for LifecycleBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleBridge")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LifecycleBridge {
    /// Query and cache identity and capability from `host`
    ///
    /// Fails if the host reports a vm_id that cannot index a dstore slot.
    /// Zero-copy counts as enabled only if the host also provides a pool
    /// that can back a window of `zcopy_size` bytes; otherwise the device
    /// reports the capability as absent.
    pub fn new(host: Arc<dyn AcceleratorHost>, zcopy_size: u64) -> Result<Self> {
        let raw_id = host.get_vm_id();
        let vm_id = u32::try_from(raw_id)
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                Error::Config(format!(
                    "host reported vm_id {}; ids must be in 1..={}",
                    raw_id,
                    u32::MAX
                ))
            })?;

        let zero_copy_pool = if host.get_zcopy_capability() {
            usable_pool(host.as_ref(), zcopy_size)
        } else {
            None
        };
        let zero_copy_enabled = zero_copy_pool.is_some();
        let zero_copy_physical_base = if zero_copy_enabled {
            host.get_zcopy_physical_base()
        } else {
            0
        };

        let identity = VmIdentity {
            vm_id,
            zero_copy_enabled,
            zero_copy_physical_base,
        };
        info!(
            "vgpu bridge: vm {} zero-copy={} phys={:#x}",
            vm_id, zero_copy_enabled, zero_copy_physical_base
        );

        Ok(Self {
            host,
            identity,
            zero_copy_pool,
        })
    }

    pub fn identity(&self) -> &VmIdentity {
        &self.identity
    }

    pub fn query_vm_id(&self) -> u32 {
        self.identity.vm_id
    }

    /// `(enabled, physical_base)` as cached at construction
    pub fn query_zero_copy_capability(&self) -> (bool, u64) {
        (
            self.identity.zero_copy_enabled,
            self.identity.zero_copy_physical_base,
        )
    }

    /// Host address of the dstore arena
    pub fn query_shared_memory_arena_base(&self) -> Result<u64> {
        self.host
            .get_shared_memory_arena_base()
            .ok_or(Error::ArenaUnavailable)
    }

    pub fn query_shared_memory_arena_slots(&self) -> Option<u32> {
        self.host.get_shared_memory_arena_slots()
    }

    /// Host address of the global zero-copy pool, if capability is enabled
    pub fn query_zero_copy_pool_base(&self) -> Option<u64> {
        self.zero_copy_pool
    }

    pub fn notify_reset(&self) {
        debug!("vgpu bridge: vm {} module init", self.identity.vm_id);
        self.host.notify_vm_reset();
    }

    pub fn notify_exit(&self) {
        debug!("vgpu bridge: vm {} module exit", self.identity.vm_id);
        self.host.notify_vm_exit();
    }
}

fn usable_pool(host: &dyn AcceleratorHost, size: u64) -> Option<u64> {
    let Some(base) = host.get_zcopy_pool_base() else {
        warn!("vgpu bridge: zero-copy reported but the host has no pool mapping; disabling");
        return None;
    };
    if base.checked_add(size).is_none() {
        warn!(
            "vgpu bridge: zero-copy pool {:#x} + {:#x} exceeds the address space; disabling",
            base, size
        );
        return None;
    }
    Some(base)
}

//! Hosting accelerator subsystem interface
//!
//! The device never reaches for a global hypervisor handle. Whatever supplies
//! VM identity, zero-copy capability and shared memory bases is passed in as
//! an [`AcceleratorHost`] when the device is realized:
//! - [`FixedHost`] answers with fixed values and counts notifications
//! - [`ArenaHost`] owns a real shared memory arena and hands out per-VM handles

pub mod fixed;

#[cfg(target_os = "linux")]
pub mod arena;

pub use fixed::FixedHost;

#[cfg(target_os = "linux")]
pub use arena::{ArenaHost, ArenaHostBuilder, VmHandle, VmLifecycle};

/// Operations the device consumes from the hosting accelerator subsystem.
///
/// Every call is synchronous and must not block. Implementations shared by
/// several VMs are responsible for isolating concurrent notifications.
pub trait AcceleratorHost: Send + Sync {
    /// Identity of the VM this device belongs to. Valid ids are 1-based and
    /// densely assigned; anything `<= 0` is rejected by the device.
    fn get_vm_id(&self) -> i64;

    /// Whether the zero-copy pool is available to this VM
    fn get_zcopy_capability(&self) -> bool;

    /// Physical base of the zero-copy pool as seen by the accelerator
    fn get_zcopy_physical_base(&self) -> u64;

    /// Host address of the pre-allocated global zero-copy pool
    fn get_zcopy_pool_base(&self) -> Option<u64>;

    /// Host address of the arena holding every VM's dstore slot
    fn get_shared_memory_arena_base(&self) -> Option<u64>;

    /// Number of dstore slots in the arena, if the host knows it
    fn get_shared_memory_arena_slots(&self) -> Option<u32> {
        None
    }

    /// Guest driver requested a logical reset
    fn notify_vm_reset(&self);

    /// Guest driver unloaded; per-VM acceleration state may be released
    fn notify_vm_exit(&self);
}

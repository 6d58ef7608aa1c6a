//! vgpu-bridge: control registers and shared memory windows for a
//! virtualized accelerator
//!
//! The guest accelerator driver talks to the host GPU-virtualization
//! subsystem through an emulated PCI function. This crate implements that
//! function's core:
//!
//! - **Register block**: a small MMIO BAR reporting VM identity and zero-copy
//!   capability, and accepting driver load/unload notifications
//! - **Shared memory windows**: a per-VM `dstore` slot carved out of one host
//!   arena, plus the optional global `zcopy` pool
//! - **Lifecycle bridge**: the only point of contact with the hosting
//!   subsystem, injected as an [`AcceleratorHost`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vgpu_bridge::{FixedHost, VgpuConfig, VgpuDevice};
//! use vgpu_protocol::regs;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Arc::new(FixedHost::new(3).arena_base(0x1000_0000));
//!     let config = VgpuConfig::default().dstore_size(0x10_0000);
//!
//!     let device = VgpuDevice::realize(&config, host)?;
//!     println!("dstore at {:#x}", device.windows().dstore().host_addr());
//!     println!("VM_ID = {}", device.registers().read(regs::VM_ID));
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod devices;
pub mod error;
pub mod host;
pub mod memory;

// Re-exports for convenience
pub use bridge::{LifecycleBridge, VmIdentity};
pub use config::VgpuConfig;
pub use devices::VgpuDevice;
pub use error::{Error, Result};
pub use host::{AcceleratorHost, FixedHost};

#[cfg(target_os = "linux")]
pub use host::ArenaHost;

// Prelude for common imports
pub mod prelude {
    pub use crate::devices::{BarDescriptor, DisplayReset, RegisterFile, VgpuDevice};
    pub use crate::error::{Error, Result};
    pub use crate::host::{AcceleratorHost, FixedHost};
    pub use crate::memory::{MemoryWindow, WindowBacking};
    pub use crate::{LifecycleBridge, VgpuConfig, VmIdentity};
    pub use vgpu_protocol::{regs, Register, UNKNOWN_REGISTER_VALUE};
}

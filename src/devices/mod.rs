//! Device emulation for the vgpu function
//!
//! - [`registers`]: the control register block (BAR 2)
//! - [`vgpu`]: the PCI function tying registers and memory windows together

pub mod registers;
pub mod vgpu;

pub use registers::{RegisterFile, RegisterStatsSnapshot};
pub use vgpu::{BarDescriptor, DeviceLayout, DisplayReset, PciIdentity, VgpuDevice, PCI_IDENTITY};

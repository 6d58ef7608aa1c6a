//! vgpu PCI function
//!
//! Ties the register block and the shared memory windows of one VM together.
//! VGA emulation, bus registration and ROM loading belong to the surrounding
//! framework; the device only describes what it wants mapped where and hooks
//! the framework's display reset.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use vgpu_protocol::{bar, pci, REGISTER_BLOCK_SIZE};

use crate::bridge::{LifecycleBridge, VmIdentity};
use crate::config::VgpuConfig;
use crate::devices::registers::{RegisterFile, RegisterStatsSnapshot};
use crate::host::AcceleratorHost;
use crate::memory::{MemoryWindow, WindowManager};
use crate::Result;

/// Reset of the display state shared with the VGA emulation
pub trait DisplayReset: Send + Sync {
    fn reset(&mut self);
}

/// One BAR the framework should register for the function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarDescriptor {
    pub index: u8,
    pub region: &'static str,
    pub size: u64,
    pub prefetchable: bool,
    /// Backed by host RAM rather than trapped MMIO
    pub ram: bool,
}

/// PCI identity of the function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PciIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_id: u16,
    pub revision: u8,
    pub hotpluggable: bool,
    pub description: &'static str,
    pub rom_file: &'static str,
}

pub const PCI_IDENTITY: PciIdentity = PciIdentity {
    vendor_id: pci::VENDOR_ID,
    device_id: pci::DEVICE_ID,
    class_id: pci::CLASS_ID,
    revision: pci::REVISION,
    hotpluggable: pci::HOTPLUGGABLE,
    description: pci::DESCRIPTION,
    rom_file: pci::ROM_FILE,
};

/// Serializable summary of a realized device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceLayout {
    pub pci: PciIdentity,
    pub identity: VmIdentity,
    pub bars: Vec<BarDescriptor>,
    pub windows: Vec<MemoryWindow>,
    pub registers: RegisterStatsSnapshot,
}

/// A realized vgpu device instance
pub struct VgpuDevice {
    bridge: Arc<LifecycleBridge>,
    registers: RegisterFile,
    windows: WindowManager,
    vram_size: u64,
    display: Option<Box<dyn DisplayReset>>,
    resets: u64,
}

impl fmt::Debug for VgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VgpuDevice")
            .field("identity", self.bridge.identity())
            .field("windows", &self.windows)
            .field("vram_size", &self.vram_size)
            .field("resets", &self.resets)
            .finish_non_exhaustive()
    }
}

impl VgpuDevice {
    /// Realize the device for the VM `host` belongs to
    ///
    /// Identity and capability are queried here, once. Fails if the config is
    /// invalid, the host reports an unusable vm_id or no dstore arena.
    pub fn realize(config: &VgpuConfig, host: Arc<dyn AcceleratorHost>) -> Result<Self> {
        config.validate()?;

        let bridge = Arc::new(LifecycleBridge::new(host, config.zcopy_size)?);
        let windows = WindowManager::new(&bridge, config)?;
        let mut registers = RegisterFile::new(Arc::clone(&bridge));
        if let Some(base) = config.mmio_base {
            registers.set_mmio_base(base);
        }

        let device = Self {
            bridge,
            registers,
            windows,
            vram_size: config.vram_size(),
            display: None,
            resets: 0,
        };
        info!(
            "vgpu: realized for vm {} with {} window(s)",
            device.identity().vm_id,
            device.windows.windows().count()
        );
        Ok(device)
    }

    /// Attach the display reset hook of the VGA emulation
    pub fn with_display(mut self, display: Box<dyn DisplayReset>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn identity(&self) -> &VmIdentity {
        self.bridge.identity()
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn windows(&self) -> &WindowManager {
        &self.windows
    }

    /// Program the guest physical base of the register BAR
    pub fn set_mmio_base(&mut self, base: u64) {
        self.registers.set_mmio_base(base);
    }

    pub fn handles_mmio(&self, addr: u64) -> bool {
        self.registers.handles_mmio(addr)
    }

    pub fn mmio_read(&self, offset: u64, data: &mut [u8]) {
        self.registers.mmio_read(offset, data);
    }

    pub fn mmio_write(&self, offset: u64, data: &[u8]) {
        self.registers.mmio_write(offset, data);
    }

    /// Descriptor of BAR `index`
    pub fn bar(&self, index: u8) -> Result<BarDescriptor> {
        let region = bar::region_name(index)?;
        let (size, prefetchable, ram) = match index {
            bar::VRAM => (self.vram_size, true, true),
            bar::REGISTERS => (REGISTER_BLOCK_SIZE, false, false),
            _ => {
                let window = self.windows.by_bar(index)?;
                (window.size(), window.prefetchable(), true)
            }
        };
        Ok(BarDescriptor {
            index,
            region,
            size,
            prefetchable,
            ram,
        })
    }

    /// Every BAR the device exposes, by index
    pub fn bars(&self) -> Vec<BarDescriptor> {
        [bar::VRAM, bar::REGISTERS, bar::DSTORE, bar::ZCOPY]
            .into_iter()
            .filter_map(|index| self.bar(index).ok())
            .collect()
    }

    /// Framework-initiated reset
    ///
    /// Forwards to the display reset only. Identity, capability and windows
    /// were fixed at realize and stay as they are.
    pub fn reset(&mut self) {
        self.resets += 1;
        debug!(
            "vgpu: device reset #{} for vm {}",
            self.resets,
            self.identity().vm_id
        );
        if let Some(display) = self.display.as_mut() {
            display.reset();
        }
    }

    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    pub fn layout(&self) -> DeviceLayout {
        DeviceLayout {
            pci: PCI_IDENTITY,
            identity: *self.identity(),
            bars: self.bars(),
            windows: self.windows.windows().cloned().collect(),
            registers: self.registers.stats(),
        }
    }
}

//! Shared register layout for the vgpu device.
//!
//! This crate is the single source of truth for everything the host-side
//! device model (`vgpu-bridge`) and the guest driver must agree on: register
//! offsets, BAR numbering, default window sizes and the PCI identity.
//!
//! ## Register block (BAR 2)
//!
//! ```text
//! ┌────────┬────────┬─────────────────────┬──────────────────────────────┐
//! │ offset │ access │ register            │ meaning                      │
//! ├────────┼────────┼─────────────────────┼──────────────────────────────┤
//! │ 0x00   │ R      │ VM_ID               │ identity of the running VM   │
//! │ 0x04   │ W      │ MOD_INIT            │ guest driver loaded (reset)  │
//! │ 0x08   │ W      │ MOD_EXIT            │ guest driver unloaded        │
//! │ 0x0c   │ R      │ ZERO_COPY           │ 1 if zero-copy is available  │
//! │ 0x10   │ R      │ ZERO_COPY_PHYS      │ zero-copy phys base, low 32  │
//! │ 0x14   │ R      │ ZERO_COPY_PHYS_HIGH │ zero-copy phys base, high 32 │
//! └────────┴────────┴─────────────────────┴──────────────────────────────┘
//! ```
//!
//! All registers are 32 bits wide and little-endian. Reading anything that is
//! not a readable register returns [`UNKNOWN_REGISTER_VALUE`].

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors raised when decoding values against the register layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The offset does not name a register.
    UnknownRegister(u64),
    /// The BAR index is not used by the device.
    UnknownBar(u8),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownRegister(offset) => {
                write!(f, "Unknown register offset: {:#x}", offset)
            }
            ProtocolError::UnknownBar(index) => write!(f, "Unknown BAR index: {}", index),
        }
    }
}

impl std::error::Error for ProtocolError {}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Register offsets inside the register BAR.
pub mod regs {
    pub const VM_ID: u64 = 0x00;
    pub const MOD_INIT: u64 = 0x04;
    pub const MOD_EXIT: u64 = 0x08;
    pub const ZERO_COPY: u64 = 0x0c;
    pub const ZERO_COPY_PHYS: u64 = 0x10;
    pub const ZERO_COPY_PHYS_HIGH: u64 = 0x14;
}

/// BAR numbering of the PCI function.
pub mod bar {
    /// VGA framebuffer (prefetchable)
    pub const VRAM: u8 = 1;
    /// Control registers
    pub const REGISTERS: u8 = 2;
    /// Per-VM dstore window (prefetchable)
    pub const DSTORE: u8 = 4;
    /// Global zero-copy pool window (prefetchable, optional)
    pub const ZCOPY: u8 = 5;

    /// Name of the memory region backing a BAR.
    pub fn region_name(index: u8) -> Result<&'static str, super::ProtocolError> {
        match index {
            VRAM => Ok("vga.vram"),
            REGISTERS => Ok(super::REGISTER_REGION_NAME),
            DSTORE => Ok(super::DSTORE_REGION_NAME),
            ZCOPY => Ok(super::ZCOPY_REGION_NAME),
            other => Err(super::ProtocolError::UnknownBar(other)),
        }
    }
}

/// PCI identity of the function.
pub mod pci {
    pub const VENDOR_ID: u16 = 0x1af4;
    pub const DEVICE_ID: u16 = 0x10f5;
    /// PCI_CLASS_DISPLAY_VGA
    pub const CLASS_ID: u16 = 0x0300;
    pub const REVISION: u8 = 0x00;
    pub const HOTPLUGGABLE: bool = false;
    pub const DESCRIPTION: &str = "vgpu accelerator bridge";
    pub const ROM_FILE: &str = "vgabios-vgpu.bin";
}

/// Size of the register BAR.
pub const REGISTER_BLOCK_SIZE: u64 = 0x1000;

/// Width of every register access in bytes.
pub const REGISTER_WIDTH: usize = 4;

/// Value returned for reads of undefined offsets.
pub const UNKNOWN_REGISTER_VALUE: u32 = 0xFFFF_FFFF;

/// Default size of one per-VM dstore slot.
pub const DEFAULT_DSTORE_SIZE: u64 = 64 << 20;

/// Default size of the zero-copy window.
pub const DEFAULT_ZCOPY_SIZE: u64 = 256 << 20;

/// Default VGA memory size in megabytes.
pub const DEFAULT_VRAM_MB: u32 = 16;

pub const DSTORE_REGION_NAME: &str = "vgpu.dstore";
pub const ZCOPY_REGION_NAME: &str = "vgpu.zcopy";
pub const REGISTER_REGION_NAME: &str = "vgpu.reg";

// ---------------------------------------------------------------------------
// Register
// ---------------------------------------------------------------------------

/// Direction a register may be accessed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    WriteOnly,
}

/// Registers of the control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Register {
    /// Identity of the running VM
    VmId,
    /// Guest driver loaded; requests a logical reset
    ModInit,
    /// Guest driver unloaded
    ModExit,
    /// Zero-copy capability flag
    ZeroCopy,
    /// Low word of the zero-copy physical base
    ZeroCopyPhys,
    /// High word of the zero-copy physical base
    ZeroCopyPhysHigh,
}

impl Register {
    /// Every register, in offset order.
    pub const ALL: [Register; 6] = [
        Register::VmId,
        Register::ModInit,
        Register::ModExit,
        Register::ZeroCopy,
        Register::ZeroCopyPhys,
        Register::ZeroCopyPhysHigh,
    ];

    pub const fn offset(self) -> u64 {
        match self {
            Register::VmId => regs::VM_ID,
            Register::ModInit => regs::MOD_INIT,
            Register::ModExit => regs::MOD_EXIT,
            Register::ZeroCopy => regs::ZERO_COPY,
            Register::ZeroCopyPhys => regs::ZERO_COPY_PHYS,
            Register::ZeroCopyPhysHigh => regs::ZERO_COPY_PHYS_HIGH,
        }
    }

    pub const fn access(self) -> Access {
        match self {
            Register::ModInit | Register::ModExit => Access::WriteOnly,
            _ => Access::ReadOnly,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Register::VmId => "VM_ID",
            Register::ModInit => "MOD_INIT",
            Register::ModExit => "MOD_EXIT",
            Register::ZeroCopy => "ZERO_COPY",
            Register::ZeroCopyPhys => "ZERO_COPY_PHYS",
            Register::ZeroCopyPhysHigh => "ZERO_COPY_PHYS_HIGH",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u64> for Register {
    type Error = ProtocolError;

    fn try_from(offset: u64) -> Result<Self, Self::Error> {
        Register::ALL
            .iter()
            .copied()
            .find(|reg| reg.offset() == offset)
            .ok_or(ProtocolError::UnknownRegister(offset))
    }
}

// ---------------------------------------------------------------------------
// Physical address helpers
// ---------------------------------------------------------------------------

/// Split a 64-bit physical address into the (low, high) register words.
pub const fn split_phys(addr: u64) -> (u32, u32) {
    ((addr & 0xFFFF_FFFF) as u32, ((addr >> 32) & 0xFFFF_FFFF) as u32)
}

/// Reassemble a physical address read back from the two register words.
pub const fn join_phys(low: u32, high: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_register_aligned_and_unique() {
        for (i, reg) in Register::ALL.iter().enumerate() {
            assert_eq!(reg.offset() % REGISTER_WIDTH as u64, 0, "{}", reg);
            assert!(reg.offset() + (REGISTER_WIDTH as u64) <= REGISTER_BLOCK_SIZE);
            for other in &Register::ALL[i + 1..] {
                assert_ne!(reg.offset(), other.offset());
            }
        }
    }

    #[test]
    fn register_try_from_offset() {
        for reg in Register::ALL {
            assert_eq!(Register::try_from(reg.offset()), Ok(reg));
        }
        assert_eq!(
            Register::try_from(0x18),
            Err(ProtocolError::UnknownRegister(0x18))
        );
        assert_eq!(
            Register::try_from(0x02),
            Err(ProtocolError::UnknownRegister(0x02))
        );
    }

    #[test]
    fn access_direction() {
        assert_eq!(Register::ModInit.access(), Access::WriteOnly);
        assert_eq!(Register::ModExit.access(), Access::WriteOnly);
        assert_eq!(Register::VmId.access(), Access::ReadOnly);
        assert_eq!(Register::ZeroCopyPhysHigh.access(), Access::ReadOnly);
    }

    #[test]
    fn split_phys_example() {
        assert_eq!(split_phys(0x1_2345_6789), (0x2345_6789, 0x0000_0001));
        assert_eq!(split_phys(0), (0, 0));
    }

    #[test]
    fn phys_words_reassemble() {
        for addr in [0u64, 1, 0xFFFF_FFFF, 0x1_0000_0000, 0x1_2345_6789, u64::MAX] {
            let (low, high) = split_phys(addr);
            assert_eq!(join_phys(low, high), addr);
        }
    }

    #[test]
    fn register_serializes_by_name() {
        let json = serde_json::to_string(&Register::ZeroCopyPhysHigh).unwrap();
        assert_eq!(json, "\"ZERO_COPY_PHYS_HIGH\"");
    }

    #[test]
    fn bar_region_names() {
        assert_eq!(bar::region_name(bar::DSTORE), Ok(DSTORE_REGION_NAME));
        assert_eq!(bar::region_name(bar::ZCOPY), Ok(ZCOPY_REGION_NAME));
        assert_eq!(bar::region_name(0), Err(ProtocolError::UnknownBar(0)));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ProtocolError::UnknownRegister(0x40).to_string(),
            "Unknown register offset: 0x40"
        );
        assert_eq!(ProtocolError::UnknownBar(3).to_string(), "Unknown BAR index: 3");
    }
}

//! vgpu control register block (BAR 2)
//!
//! Dispatch is table driven: each defined offset maps to either a read
//! handler over the cached [`VmIdentity`] or a write handler that forwards a
//! notification through the [`LifecycleBridge`]. Everything else falls through
//! to one fallback that logs and returns [`UNKNOWN_REGISTER_VALUE`] (reads) or
//! drops the value (writes). No access can fail or block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace, warn};
use vgpu_protocol::{
    split_phys, Register, REGISTER_BLOCK_SIZE, REGISTER_WIDTH, UNKNOWN_REGISTER_VALUE,
};

use crate::bridge::{LifecycleBridge, VmIdentity};

type ReadHandler = fn(&VmIdentity) -> u32;
type WriteHandler = fn(&LifecycleBridge, u32);

enum Handler {
    Read(ReadHandler),
    Write(WriteHandler),
}

struct RegisterEntry {
    register: Register,
    handler: Handler,
}

static REGISTER_TABLE: [RegisterEntry; 6] = [
    RegisterEntry {
        register: Register::VmId,
        handler: Handler::Read(read_vm_id),
    },
    RegisterEntry {
        register: Register::ModInit,
        handler: Handler::Write(write_mod_init),
    },
    RegisterEntry {
        register: Register::ModExit,
        handler: Handler::Write(write_mod_exit),
    },
    RegisterEntry {
        register: Register::ZeroCopy,
        handler: Handler::Read(read_zero_copy),
    },
    RegisterEntry {
        register: Register::ZeroCopyPhys,
        handler: Handler::Read(read_zero_copy_phys),
    },
    RegisterEntry {
        register: Register::ZeroCopyPhysHigh,
        handler: Handler::Read(read_zero_copy_phys_high),
    },
];

fn read_vm_id(identity: &VmIdentity) -> u32 {
    identity.vm_id
}

fn read_zero_copy(identity: &VmIdentity) -> u32 {
    u32::from(identity.zero_copy_enabled)
}

fn read_zero_copy_phys(identity: &VmIdentity) -> u32 {
    split_phys(identity.zero_copy_physical_base).0
}

fn read_zero_copy_phys_high(identity: &VmIdentity) -> u32 {
    split_phys(identity.zero_copy_physical_base).1
}

fn write_mod_init(bridge: &LifecycleBridge, _value: u32) {
    bridge.notify_reset();
}

fn write_mod_exit(bridge: &LifecycleBridge, _value: u32) {
    bridge.notify_exit();
}

fn lookup(offset: u64) -> Option<&'static RegisterEntry> {
    REGISTER_TABLE
        .iter()
        .find(|entry| entry.register.offset() == offset)
}

/// Dispatch counters
#[derive(Debug, Default)]
struct RegisterStats {
    reads: AtomicU64,
    writes: AtomicU64,
    unknown_reads: AtomicU64,
    unknown_writes: AtomicU64,
    resets: AtomicU64,
    exits: AtomicU64,
}

/// Point-in-time copy of the register dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegisterStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub unknown_reads: u64,
    pub unknown_writes: u64,
    pub resets: u64,
    pub exits: u64,
}

/// The register BAR of one device
pub struct RegisterFile {
    bridge: Arc<LifecycleBridge>,
    mmio_base: Option<u64>,
    stats: RegisterStats,
}

impl RegisterFile {
    pub fn new(bridge: Arc<LifecycleBridge>) -> Self {
        Self {
            bridge,
            mmio_base: None,
            stats: RegisterStats::default(),
        }
    }

    pub fn set_mmio_base(&mut self, base: u64) {
        self.mmio_base = Some(base);
        debug!("vgpu: register block MMIO base set to {:#x}", base);
    }

    pub fn mmio_base(&self) -> Option<u64> {
        self.mmio_base
    }

    pub fn mmio_size(&self) -> u64 {
        REGISTER_BLOCK_SIZE
    }

    /// Whether a guest physical address falls inside the programmed block
    pub fn handles_mmio(&self, addr: u64) -> bool {
        match self.mmio_base {
            Some(base) => addr >= base && addr - base < REGISTER_BLOCK_SIZE,
            None => false,
        }
    }

    /// Read the 32-bit register at `offset`
    pub fn read(&self, offset: u64) -> u32 {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        match lookup(offset) {
            Some(RegisterEntry {
                register,
                handler: Handler::Read(read),
            }) => {
                let value = read(self.bridge.identity());
                trace!("vgpu: read {} -> {:#x}", register, value);
                value
            }
            _ => {
                self.stats.unknown_reads.fetch_add(1, Ordering::Relaxed);
                warn!("vgpu: read from unknown register {:#x}", offset);
                UNKNOWN_REGISTER_VALUE
            }
        }
    }

    /// Write `value` to the register at `offset`; only the low 32 bits count
    pub fn write(&self, offset: u64, value: u64) {
        let value = value as u32;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        match lookup(offset) {
            Some(RegisterEntry {
                register,
                handler: Handler::Write(write),
            }) => {
                trace!("vgpu: write {} <- {:#x}", register, value);
                match register {
                    Register::ModInit => {
                        self.stats.resets.fetch_add(1, Ordering::Relaxed);
                    }
                    Register::ModExit => {
                        self.stats.exits.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
                write(self.bridge.as_ref(), value);
            }
            _ => {
                self.stats.unknown_writes.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "vgpu: write {:#x} to unknown register {:#x}",
                    value, offset
                );
            }
        }
    }

    /// MMIO bus read: fills up to 4 bytes, little-endian
    pub fn mmio_read(&self, offset: u64, data: &mut [u8]) {
        let bytes = self.read(offset).to_le_bytes();
        let len = data.len().min(REGISTER_WIDTH);
        data[..len].copy_from_slice(&bytes[..len]);
    }

    /// MMIO bus write: assembles up to 4 bytes, little-endian
    pub fn mmio_write(&self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut bytes = [0u8; REGISTER_WIDTH];
        let len = data.len().min(REGISTER_WIDTH);
        bytes[..len].copy_from_slice(&data[..len]);
        self.write(offset, u64::from(u32::from_le_bytes(bytes)));
    }

    pub fn stats(&self) -> RegisterStatsSnapshot {
        RegisterStatsSnapshot {
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            unknown_reads: self.stats.unknown_reads.load(Ordering::Relaxed),
            unknown_writes: self.stats.unknown_writes.load(Ordering::Relaxed),
            resets: self.stats.resets.load(Ordering::Relaxed),
            exits: self.stats.exits.load(Ordering::Relaxed),
        }
    }
}

//! Guest-visible contract of the vgpu device
//!
//! These tests drive a realized device only through its public surface:
//! - Register reads and writes as the guest driver issues them
//! - Window placement for different VM identities
//! - Failure modes at realize time

use std::sync::Arc;
use std::thread;

use vgpu_bridge::prelude::*;
use vgpu_protocol::{bar, join_phys};

fn config() -> VgpuConfig {
    VgpuConfig::new().dstore_size(0x10_0000).zcopy_size(0x40_0000)
}

fn realize(host: &Arc<FixedHost>) -> VgpuDevice {
    VgpuDevice::realize(&config(), host.clone()).unwrap()
}

fn readable_values(device: &VgpuDevice) -> Vec<u32> {
    [
        regs::VM_ID,
        regs::ZERO_COPY,
        regs::ZERO_COPY_PHYS,
        regs::ZERO_COPY_PHYS_HIGH,
    ]
    .iter()
    .map(|offset| device.registers().read(*offset))
    .collect()
}

// =============================================================================
// SCENARIOS
// =============================================================================

/// vm 3 without zero-copy lands in the third slot and reports no capability
#[test]
fn test_scenario_without_zero_copy() {
    let host = Arc::new(FixedHost::new(3).arena_base(0x1000_0000));
    let device = realize(&host);

    assert_eq!(device.windows().dstore().host_addr(), 0x1020_0000);
    assert_eq!(device.registers().read(regs::ZERO_COPY), 0);
    assert_eq!(device.registers().read(regs::ZERO_COPY_PHYS), 0);
    assert_eq!(device.registers().read(regs::ZERO_COPY_PHYS_HIGH), 0);
    assert!(device.windows().zcopy().is_none());
    assert!(device.bars().iter().all(|b| b.index != bar::ZCOPY));
}

/// A 33-bit physical base is split across the two PHYS registers
#[test]
fn test_scenario_with_zero_copy() {
    let host = Arc::new(
        FixedHost::new(1)
            .arena_base(0x1000_0000)
            .zero_copy(0x1_2345_6789, 0x7f12_0000_0000),
    );
    let device = realize(&host);

    assert_eq!(device.registers().read(regs::ZERO_COPY), 1);
    assert_eq!(device.registers().read(regs::ZERO_COPY_PHYS), 0x2345_6789);
    assert_eq!(device.registers().read(regs::ZERO_COPY_PHYS_HIGH), 0x0000_0001);
    assert_eq!(
        join_phys(
            device.registers().read(regs::ZERO_COPY_PHYS),
            device.registers().read(regs::ZERO_COPY_PHYS_HIGH)
        ),
        0x1_2345_6789
    );

    let zcopy = device.windows().zcopy().unwrap();
    assert_eq!(zcopy.host_addr(), 0x7f12_0000_0000);
    assert_eq!(zcopy.backing(), WindowBacking::GlobalPool);
}

// =============================================================================
// WINDOW PLACEMENT
// =============================================================================

/// Consecutive VM ids get adjacent, disjoint dstore windows
#[test]
fn test_dstore_windows_one_slot_apart() {
    let devices: Vec<VgpuDevice> = (1..=8)
        .map(|id| realize(&Arc::new(FixedHost::new(id).arena_base(0x4000_0000))))
        .collect();

    for pair in devices.windows(2) {
        let (a, b) = (pair[0].windows().dstore(), pair[1].windows().dstore());
        assert_eq!(b.host_addr() - a.host_addr(), 0x10_0000);
        assert_eq!(a.host_range().end, b.host_range().start);
    }
    for (i, a) in devices.iter().enumerate() {
        for b in &devices[i + 1..] {
            let (ra, rb) = (
                a.windows().dstore().host_range(),
                b.windows().dstore().host_range(),
            );
            assert!(ra.end <= rb.start || rb.end <= ra.start);
        }
    }
}

/// Non-positive ids never alias another VM's slot
#[test]
fn test_invalid_vm_id_rejected() {
    for id in [0, -3] {
        let host = Arc::new(FixedHost::new(id).arena_base(0x1000_0000));
        let err = VgpuDevice::realize(&config(), host).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{}", err);
    }
}

/// The dstore arena is mandatory
#[test]
fn test_missing_arena_fails_realize() {
    let host = Arc::new(FixedHost::new(1).zero_copy(0x1000, 0x2000));
    assert!(matches!(
        VgpuDevice::realize(&config(), host),
        Err(Error::ArenaUnavailable)
    ));
}

/// Zero-copy without a pool mapping is reported as absent
#[test]
fn test_zero_copy_without_pool_is_not_fatal() {
    let host = Arc::new(
        FixedHost::new(2)
            .arena_base(0x1000_0000)
            .zero_copy_without_pool(0x8000_0000),
    );
    let device = realize(&host);
    assert!(device.windows().zcopy().is_none());
    assert!(device.bars().iter().all(|b| b.index != bar::ZCOPY));
    assert_eq!(device.registers().read(regs::ZERO_COPY), 0);
    assert_eq!(device.registers().read(regs::ZERO_COPY_PHYS), 0);
    assert_eq!(device.registers().read(regs::ZERO_COPY_PHYS_HIGH), 0);
}

/// ZERO_COPY reads 1 exactly when the zcopy BAR is exposed
#[test]
fn test_capability_matches_zcopy_window() {
    let hosts = [
        FixedHost::new(1).arena_base(0),
        FixedHost::new(1).arena_base(0).zero_copy(0x8000_0000, 0x7f00_0000_0000),
        FixedHost::new(1).arena_base(0).zero_copy_without_pool(0x8000_0000),
        FixedHost::new(1).arena_base(0).zero_copy(0x8000_0000, u64::MAX - 0xfff),
    ];
    for host in hosts {
        let device = realize(&Arc::new(host));
        let exposed = device.windows().zcopy().is_some();
        assert_eq!(device.registers().read(regs::ZERO_COPY) == 1, exposed);
        assert_eq!(device.bar(bar::ZCOPY).is_ok(), exposed);
    }
}

/// Host that denies zero-copy but still reports a physical base
struct StalePhysHost;

impl AcceleratorHost for StalePhysHost {
    fn get_vm_id(&self) -> i64 {
        4
    }
    fn get_zcopy_capability(&self) -> bool {
        false
    }
    fn get_zcopy_physical_base(&self) -> u64 {
        0x1_2345_6789
    }
    fn get_zcopy_pool_base(&self) -> Option<u64> {
        Some(0x7f00_0000_0000)
    }
    fn get_shared_memory_arena_base(&self) -> Option<u64> {
        Some(0x1000_0000)
    }
    fn notify_vm_reset(&self) {}
    fn notify_vm_exit(&self) {}
}

/// A disabled capability never leaks the host's physical base
#[test]
fn test_disabled_capability_reads_zero_phys() {
    let device = VgpuDevice::realize(&config(), Arc::new(StalePhysHost)).unwrap();
    assert_eq!(device.registers().read(regs::ZERO_COPY), 0);
    assert_eq!(device.registers().read(regs::ZERO_COPY_PHYS), 0);
    assert_eq!(device.registers().read(regs::ZERO_COPY_PHYS_HIGH), 0);
    assert!(device.windows().zcopy().is_none());
}

// =============================================================================
// REGISTER SEMANTICS
// =============================================================================

/// Reads are idempotent for the whole device lifetime
#[test]
fn test_reads_are_idempotent() {
    let host = Arc::new(FixedHost::new(4).arena_base(0).zero_copy(0xabcd_0000, 0));
    let device = realize(&host);
    let first = readable_values(&device);
    for _ in 0..32 {
        assert_eq!(readable_values(&device), first);
    }
}

/// Each MOD_INIT/MOD_EXIT write produces exactly one notification
#[test]
fn test_notifications_are_one_to_one() {
    let host = Arc::new(FixedHost::new(2).arena_base(0).zero_copy(0x1_0000_0000, 0));
    let device = realize(&host);
    let before = readable_values(&device);

    for n in 1..=3 {
        device.registers().write(regs::MOD_INIT, 1);
        assert_eq!(host.reset_count(), n);
        assert_eq!(readable_values(&device), before);
    }
    device.registers().write(regs::MOD_EXIT, 1);
    assert_eq!(host.exit_count(), 1);
    assert_eq!(host.reset_count(), 3);
    assert_eq!(readable_values(&device), before);
}

/// Undefined offsets read the sentinel and swallow writes
#[test]
fn test_unknown_offsets_degrade() {
    let host = Arc::new(FixedHost::new(2).arena_base(0));
    let device = realize(&host);
    let before = readable_values(&device);

    for offset in (0x18..0x100).step_by(4).chain([0x1, 0x3, 0x7, 0xfff]) {
        assert_eq!(device.registers().read(offset), UNKNOWN_REGISTER_VALUE);
        device.registers().write(offset, u64::MAX);
    }

    assert_eq!(host.reset_count(), 0);
    assert_eq!(host.exit_count(), 0);
    assert_eq!(readable_values(&device), before);

    let stats = device.registers().stats();
    assert_eq!(stats.unknown_reads, stats.unknown_writes);
    assert_eq!(stats.resets + stats.exits, 0);
}

/// Byte-level MMIO access is little-endian
#[test]
fn test_mmio_byte_access() {
    let host = Arc::new(FixedHost::new(0x0102_0304).arena_base(0));
    let device = realize(&host);

    let mut data = [0u8; 4];
    device.mmio_read(regs::VM_ID, &mut data);
    assert_eq!(data, [0x04, 0x03, 0x02, 0x01]);

    device.mmio_write(regs::MOD_EXIT, &1u32.to_le_bytes());
    assert_eq!(host.exit_count(), 1);
}

/// vCPU threads may hit the register block concurrently
#[test]
fn test_concurrent_access() {
    let host = Arc::new(FixedHost::new(7).arena_base(0));
    let device = Arc::new(realize(&host));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                for _ in 0..100 {
                    assert_eq!(device.registers().read(regs::VM_ID), 7);
                    device.registers().write(regs::MOD_INIT, 1);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(host.reset_count(), 400);
    assert_eq!(device.registers().stats().resets, 400);
}

// =============================================================================
// RESET
// =============================================================================

/// Framework reset keeps identity and windows
#[test]
fn test_framework_reset_keeps_state() {
    let host = Arc::new(FixedHost::new(5).arena_base(0x1000_0000).zero_copy(0x9000, 0xa000));
    let mut device = realize(&host);
    let layout_before = serde_json::to_value(device.layout()).unwrap();

    device.reset();

    assert_eq!(device.reset_count(), 1);
    assert_eq!(serde_json::to_value(device.layout()).unwrap(), layout_before);
    assert_eq!(host.reset_count(), 0);
}

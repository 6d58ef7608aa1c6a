//! Per-VM partitioning of the shared memory arena

use serde::Serialize;

use crate::{Error, Result};

/// One VM's slice of the arena, relative to the arena base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    /// 1-based slot index (the VM id)
    pub index: u32,
    pub offset: u64,
    pub size: u64,
}

impl Slot {
    /// Offset one past the last byte of the slot
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// A host arena split into equal, disjoint, 1-indexed slots
///
/// Every [`Slot`] handed out satisfies `offset == (index - 1) * slot_size`
/// and lies entirely inside the arena (when its capacity is known) and inside
/// the 64-bit address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedArena {
    base: u64,
    slot_size: u64,
    capacity: Option<u32>,
}

impl SharedArena {
    pub fn new(base: u64, slot_size: u64, capacity: Option<u32>) -> Result<Self> {
        if slot_size == 0 {
            return Err(Error::Memory("arena slot size must be non-zero".into()));
        }
        let arena = Self {
            base,
            slot_size,
            capacity,
        };
        if let Some(capacity) = capacity {
            if capacity == 0 {
                return Err(Error::Memory("arena has no slots".into()));
            }
            // The last slot bounds every other one.
            arena.slot(capacity)?;
        }
        Ok(arena)
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    pub fn capacity(&self) -> Option<u32> {
        self.capacity
    }

    /// Slot `index` (1-based)
    pub fn slot(&self, index: u32) -> Result<Slot> {
        if index == 0 {
            return Err(Error::Memory("arena slots are 1-based; index 0 is invalid".into()));
        }
        if let Some(capacity) = self.capacity {
            if index > capacity {
                return Err(Error::Memory(format!(
                    "slot {} out of bounds: arena holds {} slots",
                    index, capacity
                )));
            }
        }

        let offset = u64::from(index - 1)
            .checked_mul(self.slot_size)
            .ok_or_else(|| Error::Memory(format!("slot {} offset overflows", index)))?;
        self.base
            .checked_add(offset)
            .and_then(|start| start.checked_add(self.slot_size))
            .ok_or_else(|| {
                Error::Memory(format!(
                    "slot {} ({:#x} + {:#x}) exceeds the address space",
                    index, self.base, offset
                ))
            })?;

        Ok(Slot {
            index,
            offset,
            size: self.slot_size,
        })
    }

    /// Host address of slot `index`
    pub fn slot_base(&self, index: u32) -> Result<u64> {
        Ok(self.base + self.slot(index)?.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_layout() {
        let arena = SharedArena::new(0x1000_0000, 0x10_0000, None).unwrap();
        let slot = arena.slot(3).unwrap();
        assert_eq!(slot.offset, 0x20_0000);
        assert_eq!(slot.size, 0x10_0000);
        assert_eq!(arena.slot_base(3).unwrap(), 0x1020_0000);
        assert_eq!(arena.slot_base(1).unwrap(), 0x1000_0000);
    }

    #[test]
    fn test_adjacent_slots_are_one_slot_apart() {
        let arena = SharedArena::new(0x4000_0000, 0x8000, Some(64)).unwrap();
        for index in 1..64 {
            let a = arena.slot(index).unwrap();
            let b = arena.slot(index + 1).unwrap();
            assert_eq!(b.offset - a.offset, arena.slot_size());
            assert_eq!(a.end(), b.offset);
            assert!(!a.overlaps(&b));
        }
    }

    #[test]
    fn test_slots_never_overlap() {
        let arena = SharedArena::new(0, 0x1000, Some(16)).unwrap();
        for i in 1..=16 {
            for j in 1..=16 {
                let (a, b) = (arena.slot(i).unwrap(), arena.slot(j).unwrap());
                assert_eq!(a.overlaps(&b), i == j);
            }
        }
    }

    #[test]
    fn test_index_zero_rejected() {
        let arena = SharedArena::new(0x1000, 0x1000, None).unwrap();
        assert!(arena.slot(0).is_err());
    }

    #[test]
    fn test_capacity_enforced() {
        let arena = SharedArena::new(0x1000, 0x1000, Some(4)).unwrap();
        assert!(arena.slot(4).is_ok());
        assert!(arena.slot(5).is_err());
    }

    #[test]
    fn test_address_overflow_rejected() {
        let arena = SharedArena::new(u64::MAX - 0x1fff, 0x1000, None).unwrap();
        assert!(arena.slot(1).is_ok());
        assert!(arena.slot(2).is_err());
        assert!(SharedArena::new(u64::MAX - 0x1fff, 0x1000, Some(3)).is_err());
    }

    #[test]
    fn test_invalid_arena() {
        assert!(SharedArena::new(0x1000, 0, None).is_err());
        assert!(SharedArena::new(0x1000, 0x1000, Some(0)).is_err());
    }
}

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[allow(unused)]
#[macro_use]
extern crate log;

use proc::ProcId;

pub mod region;

pub use region::RegionTable;

pub const PAGE_SIZE: usize = 4096;

/// Number of region slots per process.
pub const NR_PREGIONS: usize = 3;

#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
#[repr(usize)]
pub enum RegionSlot {
    Text = 0,
    Data = 1,
    Heap = 2,
}

impl RegionSlot {
    pub const ALL: [RegionSlot; NR_PREGIONS] = [RegionSlot::Text, RegionSlot::Data, RegionSlot::Heap];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Opaque handle to a memory region owned by the region collaborator.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct RegionId(pub usize);

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum RegionError {
    NoSuchRegion,
    SlotInUse,
    NotAttached,
    NoMemory,
}

/// The memory-region services consumed by the process tables.
pub trait RegionManager: Send {
    /// Allocate a fresh region of `size` bytes, unattached.
    fn alloc_region(&mut self, size: usize) -> Result<RegionId, RegionError>;
    /// Attach `region` to `slot` of `pid` at virtual address `start`.
    fn attach_region(
        &mut self,
        pid: ProcId,
        slot: RegionSlot,
        start: usize,
        region: RegionId,
    ) -> Result<(), RegionError>;
    /// Detach whatever is attached at `slot`, freeing the region once unreferenced.
    fn detach_region(&mut self, pid: ProcId, slot: RegionSlot) -> Result<RegionId, RegionError>;
    /// Grow (or shrink, for negative `delta`) the region at `slot`. Returns the new size.
    fn grow_region(&mut self, pid: ProcId, slot: RegionSlot, delta: isize) -> Result<usize, RegionError>;
    /// Make `pid`'s address space the active one on the calling core.
    fn install_page_directory(&mut self, pid: ProcId);
}

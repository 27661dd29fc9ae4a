use alloc::vec::Vec;

use hashbrown::HashMap;
use proc::ProcId;

use crate::{RegionError, RegionId, RegionManager, RegionSlot, NR_PREGIONS, PAGE_SIZE};

#[derive(Debug, Clone)]
pub struct Region {
    pub size: usize,
    /// Number of process slots this region is attached to.
    pub refs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub region: RegionId,
    pub start: usize,
}

/// In-memory region bookkeeping: sizes, attachments and the active page directory.
pub struct RegionTable {
    regions: Vec<Option<Region>>,
    attached: HashMap<ProcId, [Option<Attachment>; NR_PREGIONS]>,
    installed: Option<ProcId>,
    limit: usize,
    used: usize,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// A table that refuses to hold more than `limit` bytes in total.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            regions: Vec::new(),
            attached: HashMap::new(),
            installed: None,
            limit,
            used: 0,
        }
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0).and_then(|r| r.as_ref())
    }

    pub fn attachment(&self, pid: ProcId, slot: RegionSlot) -> Option<Attachment> {
        self.attached.get(&pid).and_then(|s| s[slot.index()])
    }

    /// The process whose page directory is active.
    pub fn installed(&self) -> Option<ProcId> {
        self.installed
    }

    pub fn live_regions(&self) -> usize {
        self.regions.iter().filter(|r| r.is_some()).count()
    }

    fn round_up(size: usize) -> usize {
        (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }

    fn charge(&mut self, bytes: usize) -> Result<(), RegionError> {
        match self.used.checked_add(bytes) {
            Some(total) if total <= self.limit => {
                self.used = total;
                Ok(())
            }
            _ => Err(RegionError::NoMemory),
        }
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionManager for RegionTable {
    fn alloc_region(&mut self, size: usize) -> Result<RegionId, RegionError> {
        let size = Self::round_up(size);
        self.charge(size)?;
        let region = Region { size, refs: 0 };
        let id = match self.regions.iter().position(|r| r.is_none()) {
            Some(i) => {
                self.regions[i] = Some(region);
                i
            }
            None => {
                self.regions.push(Some(region));
                self.regions.len() - 1
            }
        };
        trace!("alloc region {} ({} bytes)", id, size);
        Ok(RegionId(id))
    }

    fn attach_region(
        &mut self,
        pid: ProcId,
        slot: RegionSlot,
        start: usize,
        region: RegionId,
    ) -> Result<(), RegionError> {
        if self.attachment(pid, slot).is_some() {
            return Err(RegionError::SlotInUse);
        }
        let r = self
            .regions
            .get_mut(region.0)
            .and_then(|r| r.as_mut())
            .ok_or(RegionError::NoSuchRegion)?;
        r.refs += 1;
        self.attached.entry(pid).or_insert([None; NR_PREGIONS])[slot.index()] =
            Some(Attachment { region, start });
        Ok(())
    }

    fn detach_region(&mut self, pid: ProcId, slot: RegionSlot) -> Result<RegionId, RegionError> {
        let slots = self.attached.get_mut(&pid).ok_or(RegionError::NotAttached)?;
        let attachment = slots[slot.index()].take().ok_or(RegionError::NotAttached)?;
        if slots.iter().all(|s| s.is_none()) {
            self.attached.remove(&pid);
        }
        let id = attachment.region;
        let entry = self.regions.get_mut(id.0).ok_or(RegionError::NoSuchRegion)?;
        if let Some(region) = entry.as_mut() {
            region.refs -= 1;
            if region.refs == 0 {
                self.used -= region.size;
                *entry = None;
                trace!("free region {}", id.0);
            }
        }
        Ok(id)
    }

    fn grow_region(&mut self, pid: ProcId, slot: RegionSlot, delta: isize) -> Result<usize, RegionError> {
        let id = self.attachment(pid, slot).ok_or(RegionError::NotAttached)?.region;
        let size = self.region(id).ok_or(RegionError::NoSuchRegion)?.size;
        let new_size = if delta >= 0 {
            let grown = Self::round_up(size + delta as usize);
            self.charge(grown - size)?;
            grown
        } else {
            let shrink = delta.unsigned_abs();
            if shrink > size {
                return Err(RegionError::NoMemory);
            }
            let shrunk = Self::round_up(size - shrink);
            self.used -= size - shrunk;
            shrunk
        };
        if let Some(region) = self.regions[id.0].as_mut() {
            region.size = new_size;
        }
        Ok(new_size)
    }

    fn install_page_directory(&mut self, pid: ProcId) {
        self.installed = Some(pid);
    }
}

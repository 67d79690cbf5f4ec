//! Two-level address spaces for SimulatedKernel
//!
//! Each environment owns a page directory of [`NPDENTRIES`] entries; a
//! present directory entry owns a page table of [`NPTENTRIES`] entries. Leaf
//! entries hold a [`Frame`] handle, so the frame's reference count is always
//! the number of leaf entries that map it. Directory entries at and above
//! `UTOP` are kernel-shared and never hold user mappings.
//!
//! Page tables and the directory itself are allocated from the same
//! [`PhysMem`] pool as user pages, so building a table can fail with
//! [`SysError::NoMem`] like any other allocation.

use crate::phys::{Frame, FrameNumber, PhysMem};
use core_types::{PteFlags, VirtAddr, NPDENTRIES, NPTENTRIES, PDXSHIFT, PGSHIFT, PGSIZE, ULIM, UTOP};
use kernel_api::SysError;

/// A present leaf mapping
#[derive(Debug, Clone)]
pub struct Pte {
    frame: Frame,
    flags: PteFlags,
}

impl Pte {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Flags including `PRESENT`
    pub fn flags(&self) -> PteFlags {
        self.flags
    }
}

struct PageTable {
    /// Frame the table itself lives in
    _backing: Frame,
    entries: Vec<Option<Pte>>,
}

enum Pde {
    Absent,
    Table(Box<PageTable>),
    /// Shared kernel mappings above the user ceiling
    Kernel,
}

/// Counts reported when an address space is torn down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownStats {
    pub pages: usize,
    pub tables: usize,
}

/// One environment's page directory and its page tables
pub struct AddressSpace {
    root: Frame,
    dir: Vec<Pde>,
}

impl AddressSpace {
    /// Allocates an empty directory with the kernel region pre-populated
    pub fn new(phys: &mut PhysMem) -> Result<Self, SysError> {
        let root = phys.alloc(true).ok_or(SysError::NoMem)?;
        let dir = (0..NPDENTRIES)
            .map(|pdx| {
                if pdx >= UTOP.pdx() {
                    Pde::Kernel
                } else {
                    Pde::Absent
                }
            })
            .collect();
        Ok(Self { root, dir })
    }

    /// Frame holding the page directory
    pub fn root(&self) -> FrameNumber {
        self.root.number()
    }

    /// Whether the directory entry covering `va` is present
    pub fn pde_present(&self, va: VirtAddr) -> bool {
        !matches!(self.dir[va.pdx()], Pde::Absent)
    }

    /// Leaf entry for `va`, without creating anything
    pub fn lookup(&self, va: VirtAddr) -> Option<&Pte> {
        match &self.dir[va.pdx()] {
            Pde::Table(table) => table.entries[va.ptx()].as_ref(),
            Pde::Absent | Pde::Kernel => None,
        }
    }

    /// Leaf slot for `va`, allocating its page table if needed
    fn walk_create(&mut self, va: VirtAddr, phys: &mut PhysMem) -> Result<&mut Option<Pte>, SysError> {
        let pde = &mut self.dir[va.pdx()];
        if let Pde::Absent = pde {
            let backing = phys.alloc(true).ok_or(SysError::NoMem)?;
            *pde = Pde::Table(Box::new(PageTable {
                _backing: backing,
                entries: vec![None; NPTENTRIES],
            }));
        }
        match pde {
            Pde::Table(table) => Ok(&mut table.entries[va.ptx()]),
            Pde::Absent | Pde::Kernel => Err(SysError::Inval),
        }
    }

    /// Maps `frame` at `va` with `flags | PRESENT`
    ///
    /// Whatever was mapped at `va` before is unmapped. The new handle is
    /// stored before the old one is dropped, so remapping a frame onto its
    /// own address never frees it. On error nothing changes and `frame` is
    /// released by the caller's drop.
    pub fn insert(
        &mut self,
        phys: &mut PhysMem,
        va: VirtAddr,
        frame: Frame,
        flags: PteFlags,
    ) -> Result<(), SysError> {
        let slot = self.walk_create(va, phys)?;
        let _old = slot.replace(Pte {
            frame,
            flags: flags | PteFlags::PRESENT,
        });
        Ok(())
    }

    /// Unmaps `va`, returning the old entry
    ///
    /// Dropping the returned entry releases the frame reference.
    pub fn remove(&mut self, va: VirtAddr) -> Option<Pte> {
        match &mut self.dir[va.pdx()] {
            Pde::Table(table) => table.entries[va.ptx()].take(),
            Pde::Absent | Pde::Kernel => None,
        }
    }

    /// Every user mapping in ascending address order
    pub fn mappings(&self) -> impl Iterator<Item = (VirtAddr, &Pte)> + '_ {
        self.dir.iter().enumerate().flat_map(|(pdx, pde)| {
            let entries: &[Option<Pte>] = match pde {
                Pde::Table(table) => &table.entries,
                Pde::Absent | Pde::Kernel => &[],
            };
            entries.iter().enumerate().filter_map(move |(ptx, pte)| {
                let va = ((pdx as u32) << PDXSHIFT) | ((ptx as u32) << PGSHIFT);
                pte.as_ref().map(|pte| (VirtAddr(va), pte))
            })
        })
    }

    pub fn mapped_pages(&self) -> usize {
        self.mappings().count()
    }

    pub fn table_count(&self) -> usize {
        self.dir
            .iter()
            .filter(|pde| matches!(pde, Pde::Table(_)))
            .count()
    }

    /// Checks that every page of `[va, va + len)` is below `ULIM` and
    /// mapped with at least `perm | PRESENT`
    ///
    /// On failure returns the first offending address: `va` itself when the
    /// first page is bad, else the start of the bad page.
    pub fn check_user_range(&self, va: VirtAddr, len: u32, perm: PteFlags) -> Result<(), VirtAddr> {
        let need = perm | PteFlags::PRESENT;
        let end = va.as_u32().checked_add(len).ok_or(va)?;
        let mut page = va.round_down().as_u32();
        while page < end {
            let bad = page >= ULIM.as_u32()
                || !self
                    .lookup(VirtAddr(page))
                    .is_some_and(|pte| pte.flags.contains(need));
            if bad {
                return Err(VirtAddr(page.max(va.as_u32())));
            }
            page = match page.checked_add(PGSIZE) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(())
    }

    /// Copies out of mapped pages, ignoring permission bits
    ///
    /// Fails with the first unmapped address.
    pub fn read_bytes(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), VirtAddr> {
        let mut done = 0;
        while done < buf.len() {
            let cur = va.checked_add(done as u32).ok_or(va)?;
            let chunk = (PGSIZE as usize - cur.page_offset()).min(buf.len() - done);
            let pte = self.lookup(cur).ok_or(cur)?;
            pte.frame.read(cur.page_offset(), &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Copies into mapped pages, ignoring permission bits
    pub fn write_bytes(&self, va: VirtAddr, bytes: &[u8]) -> Result<(), VirtAddr> {
        let mut done = 0;
        while done < bytes.len() {
            let cur = va.checked_add(done as u32).ok_or(va)?;
            let chunk = (PGSIZE as usize - cur.page_offset()).min(bytes.len() - done);
            let pte = self.lookup(cur).ok_or(cur)?;
            pte.frame.write(cur.page_offset(), &bytes[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Releases every mapping, page table and the directory
    pub fn teardown(self) -> TeardownStats {
        let stats = TeardownStats {
            pages: self.mapped_pages(),
            tables: self.table_count(),
        };
        drop(self);
        stats
    }
}

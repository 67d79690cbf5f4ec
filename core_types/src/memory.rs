//! # Memory Layout
//!
//! Virtual memory layout of every environment and the [`VirtAddr`] type.
//!
//! ```text
//!    4 Gig -------->  +------------------------------+
//!                     :     kernel (not user-visible) :
//!    ULIM      ---->  +------------------------------+ 0xef800000
//!                     |  Cur. page table (user R-)   |
//!    UVPT      ---->  +------------------------------+ 0xef400000
//!                     |        RO PAGES              |
//!    UPAGES    ---->  +------------------------------+ 0xef000000
//!                     |        RO ENVS               |
//!    UTOP,UENVS --->  +------------------------------+ 0xeec00000
//!    UXSTACKTOP       |   User exception stack (RW)  |
//!                     +------------------------------+ 0xeebff000
//!                     |        empty guard page      |
//!    USTACKTOP ---->  +------------------------------+ 0xeebfe000
//!                     |   Normal user stack (RW)     |
//!                     +------------------------------+
//!                     :              .               :
//!    UTEXT     ---->  +------------------------------+ 0x00800000
//!    PFTEMP    ---->  |   fault handler scratch page | 0x007ff000
//!                     :                              :
//!    UTEMP     ---->  +------------------------------+ 0x00400000
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Bytes mapped by a page
pub const PGSIZE: u32 = 4096;
/// log2(PGSIZE)
pub const PGSHIFT: u32 = 12;
/// Bytes mapped by one page directory entry
pub const PTSIZE: u32 = PGSIZE * NPTENTRIES as u32;
/// Offset of the directory index in a linear address
pub const PDXSHIFT: u32 = 22;
/// Page directory entries per directory
pub const NPDENTRIES: usize = 1024;
/// Page table entries per page table
pub const NPTENTRIES: usize = 1024;

/// Top of user-accessible memory; everything above belongs to the kernel
pub const ULIM: VirtAddr = VirtAddr(0xef80_0000);
/// Read-only view of the current page table
pub const UVPT: VirtAddr = VirtAddr(ULIM.0 - PTSIZE);
/// Read-only copies of the physical page descriptors
pub const UPAGES: VirtAddr = VirtAddr(UVPT.0 - PTSIZE);
/// Read-only copies of the environment table
pub const UENVS: VirtAddr = VirtAddr(UPAGES.0 - PTSIZE);
/// Top of user-writable memory. The user ceiling for every syscall.
pub const UTOP: VirtAddr = UENVS;
/// Top of the one-page user exception stack
pub const UXSTACKTOP: VirtAddr = UTOP;
/// Top of the normal user stack; one guard page below the exception stack
pub const USTACKTOP: VirtAddr = VirtAddr(UTOP.0 - 2 * PGSIZE);
/// Where user programs are linked
pub const UTEXT: VirtAddr = VirtAddr(2 * PTSIZE);
/// Scratch region for temporary user mappings
pub const UTEMP: VirtAddr = VirtAddr(PTSIZE);
/// Scratch page used by the copy-on-write fault handler
pub const PFTEMP: VirtAddr = VirtAddr(UTEMP.0 + PTSIZE - PGSIZE);

/// A 32-bit virtual address
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VirtAddr(pub u32);

impl VirtAddr {
    /// The null address
    pub const NULL: VirtAddr = VirtAddr(0);

    /// Creates an address from a raw word
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw word
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Page directory index
    pub const fn pdx(self) -> usize {
        ((self.0 >> PDXSHIFT) & 0x3ff) as usize
    }

    /// Page table index
    pub const fn ptx(self) -> usize {
        ((self.0 >> PGSHIFT) & 0x3ff) as usize
    }

    /// Offset within the page
    pub const fn page_offset(self) -> usize {
        (self.0 & (PGSIZE - 1)) as usize
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PGSIZE == 0
    }

    pub const fn round_down(self) -> Self {
        Self(self.0 & !(PGSIZE - 1))
    }

    /// Rounds up to the next page boundary, `None` on overflow
    pub fn round_up(self) -> Option<Self> {
        self.0
            .checked_add(PGSIZE - 1)
            .map(|raw| Self(raw & !(PGSIZE - 1)))
    }

    pub fn checked_add(self, bytes: u32) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Strictly below the user ceiling
    pub const fn is_user(self) -> bool {
        self.0 < UTOP.0
    }

    /// Start of the page directory region containing this address
    pub const fn table_base(self) -> Self {
        Self(self.0 & !(PTSIZE - 1))
    }

    /// True for addresses inside the single exception-stack page
    pub const fn is_exception_stack(self) -> bool {
        self.0 >= UXSTACKTOP.0 - PGSIZE && self.0 < UXSTACKTOP.0
    }
}

/// Wraps at 4 GiB like the address arithmetic of the machine; range checks
/// use `checked_add` on the raw value instead
impl Add<u32> for VirtAddr {
    type Output = VirtAddr;

    fn add(self, rhs: u32) -> VirtAddr {
        VirtAddr(self.0.wrapping_add(rhs))
    }
}

impl Sub<u32> for VirtAddr {
    type Output = VirtAddr;

    fn sub(self, rhs: u32) -> VirtAddr {
        VirtAddr(self.0.wrapping_sub(rhs))
    }
}

impl From<u32> for VirtAddr {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

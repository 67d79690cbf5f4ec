//! Page-table entry permission bits

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Flags stored in the low 12 bits of a page-table entry.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
    pub struct PteFlags: u32 {
        const PRESENT = 0x001;
        const WRITABLE = 0x002;
        const USER = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED = 0x020;
        const DIRTY = 0x040;
        const PAGE_SIZE = 0x080;
        const GLOBAL = 0x100;
        /// Bits the hardware ignores and leaves to software
        const AVAIL = 0xe00;
        /// Copy-on-write; one of the software-available bits
        const COW = 0x800;
    }
}

impl PteFlags {
    /// Bits a user environment may pass in a permission argument
    pub const SYSCALL: PteFlags = PteFlags::AVAIL
        .union(PteFlags::PRESENT)
        .union(PteFlags::WRITABLE)
        .union(PteFlags::USER);

    /// Bits every user permission argument must carry
    pub const REQUIRED: PteFlags = PteFlags::PRESENT.union(PteFlags::USER);

    /// `P | U`
    pub const fn user_read() -> Self {
        Self::REQUIRED
    }

    /// `P | U | W`
    pub const fn user_write() -> Self {
        Self::REQUIRED.union(Self::WRITABLE)
    }

    /// `P | U | COW`
    pub const fn user_cow() -> Self {
        Self::REQUIRED.union(Self::COW)
    }

    /// Checks a permission argument received from user space
    ///
    /// It must carry `P | U`, nothing outside [`PteFlags::SYSCALL`], and must
    /// not be both writable and copy-on-write.
    pub fn is_valid_user_perm(self) -> bool {
        self.contains(Self::REQUIRED)
            && Self::SYSCALL.contains(self)
            && !self.contains(Self::WRITABLE | Self::COW)
    }

    pub fn is_cow(self) -> bool {
        self.contains(Self::COW)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }
}

impl fmt::Display for PteFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.contains(PteFlags::COW) { "C" } else { "-" },
            if self.contains(PteFlags::USER) { "U" } else { "-" },
            if self.contains(PteFlags::WRITABLE) { "W" } else { "-" },
            if self.contains(PteFlags::PRESENT) { "P" } else { "-" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_user_perms() {
        assert!(PteFlags::user_read().is_valid_user_perm());
        assert!(PteFlags::user_write().is_valid_user_perm());
        assert!(PteFlags::user_cow().is_valid_user_perm());
        assert!((PteFlags::user_read() | PteFlags::from_bits_retain(0x200)).is_valid_user_perm());
    }

    #[test]
    fn test_missing_required_bits() {
        assert!(!PteFlags::PRESENT.is_valid_user_perm());
        assert!(!(PteFlags::USER | PteFlags::WRITABLE).is_valid_user_perm());
    }

    #[test]
    fn test_extraneous_bits_rejected() {
        assert!(!(PteFlags::user_read() | PteFlags::GLOBAL).is_valid_user_perm());
        assert!(!(PteFlags::user_read() | PteFlags::DIRTY).is_valid_user_perm());
        assert!(!PteFlags::from_bits_retain(0x1005).is_valid_user_perm());
    }

    #[test]
    fn test_writable_and_cow_rejected() {
        let both = PteFlags::user_write() | PteFlags::COW;
        assert!(!both.is_valid_user_perm());
    }

    #[test]
    fn test_display() {
        assert_eq!(PteFlags::user_cow().to_string(), "CU-P");
        assert_eq!(PteFlags::user_write().to_string(), "-UWP");
    }
}

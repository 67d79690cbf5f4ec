//! Physical frame pool
//!
//! Stands in for the physical page allocator. Frames are handed out as
//! [`Frame`] handles: cloning a handle is the reference-count increment,
//! dropping one is the decrement, and the drop of the last handle puts the
//! frame back on the free list. Every path that unmaps a page (explicit
//! unmap, remapping over an old page, environment teardown) therefore frees
//! through the same single decrement.

use crate::fault_injection::FaultInjector;
use core_types::{PGSHIFT, PGSIZE};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

const PAGE_BYTES: usize = PGSIZE as usize;

/// Index of a physical frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(pub u32);

impl FrameNumber {
    /// Physical address of the frame
    pub fn paddr(self) -> u32 {
        self.0 << PGSHIFT
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame:{:#x}", self.paddr())
    }
}

struct FreeFrame {
    number: FrameNumber,
    /// Contents left behind by the previous owner; `None` until first use
    data: Option<Vec<u8>>,
}

struct FramePool {
    free: Vec<FreeFrame>,
    total: usize,
}

struct FrameInner {
    number: FrameNumber,
    data: RefCell<Vec<u8>>,
    pool: Weak<RefCell<FramePool>>,
}

impl Drop for FrameInner {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let data = std::mem::take(self.data.get_mut());
            pool.borrow_mut().free.push(FreeFrame {
                number: self.number,
                data: Some(data),
            });
        }
    }
}

/// Shared handle to an allocated physical frame
#[derive(Clone)]
pub struct Frame(Rc<FrameInner>);

impl Frame {
    pub fn number(&self) -> FrameNumber {
        self.0.number
    }

    /// Number of live handles, i.e. how many mappings share this frame
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn same_frame(&self, other: &Frame) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        let data = self.0.data.borrow();
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.0.data.borrow_mut();
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy of the whole page
    pub fn contents(&self) -> Vec<u8> {
        self.0.data.borrow().clone()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("number", &self.number())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// The simulated physical memory
pub struct PhysMem {
    pool: Rc<RefCell<FramePool>>,
    injector: Option<FaultInjector>,
}

impl PhysMem {
    /// Creates a pool of `frames` free frames
    ///
    /// Frames are handed out lowest number first, and a freed frame is the
    /// next one handed out.
    pub fn new(frames: usize) -> Self {
        let free = (0..frames as u32)
            .rev()
            .map(|n| FreeFrame {
                number: FrameNumber(n),
                data: None,
            })
            .collect();
        Self {
            pool: Rc::new(RefCell::new(FramePool {
                free,
                total: frames,
            })),
            injector: None,
        }
    }

    pub fn set_fault_injector(&mut self, injector: FaultInjector) {
        self.injector = Some(injector);
    }

    pub fn fault_injector(&self) -> Option<&FaultInjector> {
        self.injector.as_ref()
    }

    /// Allocates a frame with a reference count of one
    ///
    /// With `zero` unset the frame keeps whatever its previous owner left.
    pub fn alloc(&mut self, zero: bool) -> Option<Frame> {
        if let Some(injector) = self.injector.as_mut() {
            if injector.should_fail_frame_alloc() {
                log::debug!("frame allocation failed by fault injection");
                return None;
            }
        }

        let FreeFrame { number, data } = self.pool.borrow_mut().free.pop()?;
        let data = match data {
            Some(mut data) => {
                if zero {
                    data.fill(0);
                }
                data
            }
            None => vec![0; PAGE_BYTES],
        };

        Some(Frame(Rc::new(FrameInner {
            number,
            data: RefCell::new(data),
            pool: Rc::downgrade(&self.pool),
        })))
    }

    pub fn free_count(&self) -> usize {
        self.pool.borrow().free.len()
    }

    pub fn total(&self) -> usize {
        self.pool.borrow().total
    }

    pub fn in_use(&self) -> usize {
        self.total() - self.free_count()
    }
}

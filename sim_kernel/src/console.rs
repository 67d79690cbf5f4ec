//! Console device
//!
//! The kernel only needs two things from a console: a sink for `cputs` and a
//! non-blocking character source for `cgetc`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Character device used by the console syscalls
pub trait Console {
    fn write(&mut self, bytes: &[u8]);

    /// Next buffered input character, if any
    fn read_nonblocking(&mut self) -> Option<u8>;
}

/// In-memory console: output accumulates, input is queued by the harness
#[derive(Debug, Default)]
pub struct BufferConsole {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues characters for later `cgetc` calls
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Console for BufferConsole {
    fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn read_nonblocking(&mut self) -> Option<u8> {
        // zero means "nothing buffered" on the wire
        while let Some(c) = self.input.pop_front() {
            if c != 0 {
                return Some(c);
            }
        }
        None
    }
}

/// Lets a harness keep a handle on the console it gave the kernel
impl<C: Console + ?Sized> Console for Rc<RefCell<C>> {
    fn write(&mut self, bytes: &[u8]) {
        self.borrow_mut().write(bytes);
    }

    fn read_nonblocking(&mut self) -> Option<u8> {
        self.borrow_mut().read_nonblocking()
    }
}

//! Deterministic fault injection for testing
//!
//! This module lets tests make the simulated physical allocator run dry at an
//! exact point, so every no-memory path in the kernel and in the user library
//! can be exercised without actually exhausting the frame pool.
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: Faults fire on an exact allocation count
//! - **Composable**: A plan may hold several faults; any one firing fails the allocation
//! - **Test-focused**: Not intended for production use
//!
//! ## Example
//!
//! ```
//! use sim_kernel::fault_injection::{FaultPlan, FrameFault};
//!
//! let plan = FaultPlan::new()
//!     .with_frame_fault(FrameFault::FailAfter { successes: 3 });
//! ```

/// A fault to inject into physical frame allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    /// Fail the next N allocations, then recover
    FailNext { count: usize },

    /// Let N allocations succeed, then fail every one after
    FailAfter { successes: usize },
}

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    frame_faults: Vec<FrameFault>,
}

impl FaultPlan {
    /// Creates a new empty fault plan
    pub fn new() -> Self {
        Self {
            frame_faults: Vec::new(),
        }
    }

    /// Adds a frame allocation fault to the plan
    pub fn with_frame_fault(mut self, fault: FrameFault) -> Self {
        self.frame_faults.push(fault);
        self
    }

    /// Returns the frame faults
    pub fn frame_faults(&self) -> &[FrameFault] {
        &self.frame_faults
    }
}

/// Applies a [`FaultPlan`] to the allocator
#[derive(Debug)]
pub struct FaultInjector {
    fail_next: usize,
    fail_after: Option<usize>,
    allocations_seen: usize,
    injected: usize,
}

impl FaultInjector {
    /// Creates a new fault injector with the given plan
    pub fn new(plan: FaultPlan) -> Self {
        let mut injector = Self {
            fail_next: 0,
            fail_after: None,
            allocations_seen: 0,
            injected: 0,
        };

        for fault in plan.frame_faults() {
            match *fault {
                FrameFault::FailNext { count } => {
                    injector.fail_next += count;
                }
                FrameFault::FailAfter { successes } => {
                    injector.fail_after = Some(
                        injector
                            .fail_after
                            .map_or(successes, |current| current.min(successes)),
                    );
                }
            }
        }

        injector
    }

    /// Decides whether the allocation being attempted should fail
    pub fn should_fail_frame_alloc(&mut self) -> bool {
        let attempt = self.allocations_seen;
        self.allocations_seen += 1;

        let fail = if self.fail_next > 0 {
            self.fail_next -= 1;
            true
        } else {
            matches!(self.fail_after, Some(limit) if attempt >= limit)
        };

        if fail {
            self.injected += 1;
        }
        fail
    }

    /// Number of allocations this injector has failed so far
    pub fn injected_count(&self) -> usize {
        self.injected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_plan_never_fails() {
        let mut injector = FaultInjector::new(FaultPlan::new());
        for _ in 0..100 {
            assert!(!injector.should_fail_frame_alloc());
        }
        assert_eq!(injector.injected_count(), 0);
    }

    #[test]
    fn test_fail_next() {
        let plan = FaultPlan::new().with_frame_fault(FrameFault::FailNext { count: 2 });
        let mut injector = FaultInjector::new(plan);
        assert!(injector.should_fail_frame_alloc());
        assert!(injector.should_fail_frame_alloc());
        assert!(!injector.should_fail_frame_alloc());
        assert_eq!(injector.injected_count(), 2);
    }

    #[test]
    fn test_fail_after() {
        let plan = FaultPlan::new().with_frame_fault(FrameFault::FailAfter { successes: 2 });
        let mut injector = FaultInjector::new(plan);
        assert!(!injector.should_fail_frame_alloc());
        assert!(!injector.should_fail_frame_alloc());
        assert!(injector.should_fail_frame_alloc());
        assert!(injector.should_fail_frame_alloc());
    }

    #[test]
    fn test_fail_after_takes_tightest_limit() {
        let plan = FaultPlan::new()
            .with_frame_fault(FrameFault::FailAfter { successes: 5 })
            .with_frame_fault(FrameFault::FailAfter { successes: 1 });
        let mut injector = FaultInjector::new(plan);
        assert!(!injector.should_fail_frame_alloc());
        assert!(injector.should_fail_frame_alloc());
    }
}

//! Fault Recovery Tests
//!
//! Validates that running out of frames partway through an operation
//! leaves no leaked frames, no half-built environments and no broken
//! accounting behind.

use core_types::{EnvId, PteFlags, VirtAddr, PGSIZE, PTSIZE, UTEXT};
use kernel_api::{SysError, Syscall};
use sim_kernel::fault_injection::{FaultPlan, FrameFault};
use sim_kernel::test_utils::{with_fault_plan, TestKernel};
use tests_resilience::{check_frame_accounting, spawn_with_data, test_bootstrap, DATA};
use user_lib::{fork, ForkError, ForkOutcome};

fn fail_next(count: usize) -> FaultPlan {
    FaultPlan::new().with_frame_fault(FrameFault::FailNext { count })
}

/// Test: Creating an environment without memory leaves nothing behind
#[test]
fn test_create_env_rolls_back() {
    // zero successes fails the directory, one fails the stack page
    for successes in 0..2 {
        with_fault_plan(
            FaultPlan::new().with_frame_fault(FrameFault::FailAfter { successes }),
            |t| {
                assert_eq!(t.kernel.create_env(), Err(SysError::NoMem));
                assert_eq!(t.kernel.phys().in_use(), 0);
                assert!(t.kernel.env_summaries().is_empty());
                assert_eq!(t.kernel.envs().free_slots(), t.kernel.envs().capacity());
            },
        );
    }
}

/// Test: Exofork without memory reports NoMem and keeps the slot free
#[test]
fn test_exofork_rolls_back() {
    let mut t = test_bootstrap();
    let parent = t.spawn();
    let free_slots = t.kernel.envs().free_slots();
    let in_use = t.kernel.phys().in_use();

    let mut t = t.with_fault_plan(fail_next(1));
    assert_eq!(t.call(parent, Syscall::Exofork), Err(SysError::NoMem));
    assert_eq!(t.kernel.envs().free_slots(), free_slots);
    assert_eq!(t.kernel.phys().in_use(), in_use);

    // recovered allocator: the same call now works
    let child = t.exofork(parent);
    assert_eq!(t.kernel.env(child).unwrap().parent(), parent);
}

/// Test: A failed table allocation maps nothing
#[test]
fn test_page_alloc_without_table() {
    let mut t = test_bootstrap();
    let env = t.spawn();
    let in_use = t.kernel.phys().in_use();
    let far = VirtAddr(UTEXT.0 + 4 * PTSIZE);

    // the page itself succeeds, its page table does not
    let mut t = t.with_fault_plan(FaultPlan::new().with_frame_fault(FrameFault::FailAfter { successes: 1 }));
    let ret = t.call(env, Syscall::PageAlloc { env: EnvId::CURRENT, va: far, perm: PteFlags::user_write() });
    assert_eq!(ret, Err(SysError::NoMem));
    assert!(t.kernel.page(env, far).is_none());
    assert_eq!(t.kernel.phys().in_use(), in_use);
    check_frame_accounting(&t.kernel).unwrap();
}

/// Test: Fork under memory pressure either completes or cleans up
///
/// This validates that for every allocation fork makes:
/// 1. A failure there surfaces as an error, never a panic
/// 2. No half-built child is left in the table
/// 3. The parent's data survives and is still writable afterwards
/// 4. Frame accounting holds
#[test]
fn test_fork_failure_at_every_allocation() {
    let mut completed = false;
    for successes in 0..16 {
        let mut t = test_bootstrap();
        let parent = spawn_with_data(&mut t, b"precious");
        t.write(parent, DATA + PGSIZE - 4, b"tail");

        let mut t = t.with_fault_plan(FaultPlan::new().with_frame_fault(FrameFault::FailAfter { successes }));
        let result = fork(&mut t.kernel.run(parent).unwrap());
        let mut t: TestKernel = t.with_fault_plan(FaultPlan::new());

        match result {
            Ok(ForkOutcome::Parent { child }) => {
                assert!(t.kernel.env(child).is_some());
                completed = true;
            }
            Ok(ForkOutcome::Child) => panic!("parent took the child branch"),
            Err(err) => {
                assert!(
                    matches!(
                        err,
                        ForkError::Handler(SysError::NoMem)
                            | ForkError::Exofork(SysError::NoMem)
                            | ForkError::Duppage { source: SysError::NoMem, .. }
                            | ForkError::ExceptionStack(SysError::NoMem)
                    ),
                    "unexpected failure with {} successes: {:?}",
                    successes,
                    err
                );
                assert_eq!(t.kernel.env_summaries().len(), 1);
            }
        }
        check_frame_accounting(&t.kernel).expect("accounting after fork attempt");

        assert_eq!(t.kernel.peek(parent, DATA, 8).unwrap(), b"precious".to_vec());
        t.write(parent, DATA, b"PRECIOUS");
        assert_eq!(t.kernel.peek(parent, DATA, 8).unwrap(), b"PRECIOUS".to_vec());
        if completed {
            break;
        }
    }
    assert!(completed, "fork never succeeded");
}

/// Test: A COW fault that can't get a frame kills only the faulting env
#[test]
fn test_cow_fault_without_memory() {
    let mut t = test_bootstrap();
    let parent = spawn_with_data(&mut t, b"data");
    let child = match fork(&mut t.kernel.run(parent).unwrap()).unwrap() {
        ForkOutcome::Parent { child } => child,
        ForkOutcome::Child => unreachable!(),
    };

    let mut t = t.with_fault_plan(fail_next(1));
    let result = kernel_api::UserView::write_mem(&mut t.kernel.run(child).unwrap(), DATA, b"x");
    assert!(result.is_err());
    assert!(t.kernel.env(child).is_none());

    assert_eq!(t.kernel.page(parent, DATA).unwrap().refs, 1);
    assert_eq!(t.kernel.peek(parent, DATA, 4).unwrap(), b"data".to_vec());
    check_frame_accounting(&t.kernel).unwrap();
}

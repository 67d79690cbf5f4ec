//! Property Tests
//!
//! Randomized checks of the permission rules and of frame accounting under
//! arbitrary sequences of mapping syscalls.

use core_types::{EnvId, PteFlags, VirtAddr, PGSIZE, UTEXT};
use kernel_api::{SysError, Syscall};
use proptest::prelude::*;
use tests_resilience::{check_frame_accounting, test_bootstrap};

fn arb_perm() -> impl Strategy<Value = PteFlags> {
    prop_oneof![
        Just(PteFlags::user_read()),
        Just(PteFlags::user_write()),
        Just(PteFlags::user_cow()),
        (0u32..0x1000).prop_map(PteFlags::from_bits_retain),
    ]
}

/// One mapping operation; environments and pages are small indices
#[derive(Debug, Clone)]
enum Op {
    Alloc { env: usize, page: u32, perm: PteFlags },
    Map { src: usize, src_page: u32, dst: usize, dst_page: u32, perm: PteFlags },
    Unmap { env: usize, page: u32 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, 0u32..4, arb_perm()).prop_map(|(env, page, perm)| Op::Alloc { env, page, perm }),
        (0usize..3, 0u32..4, 0usize..3, 0u32..4, arb_perm()).prop_map(
            |(src, src_page, dst, dst_page, perm)| Op::Map { src, src_page, dst, dst_page, perm }
        ),
        (0usize..3, 0u32..4).prop_map(|(env, page)| Op::Unmap { env, page }),
    ]
}

fn page(n: u32) -> VirtAddr {
    VirtAddr(UTEXT.0 + n * PGSIZE)
}

proptest! {
    #[test]
    fn perm_validation_matches_rule(bits in 0u32..0x1000) {
        let perm = PteFlags::from_bits_retain(bits);
        let mut t = test_bootstrap();
        let env = t.spawn();
        let ret = t.call(env, Syscall::PageAlloc { env: EnvId::CURRENT, va: UTEXT, perm });

        let valid = perm.contains(PteFlags::PRESENT | PteFlags::USER)
            && PteFlags::SYSCALL.contains(perm)
            && !perm.contains(PteFlags::WRITABLE | PteFlags::COW);
        prop_assert_eq!(ret.is_ok(), valid);
        if valid {
            prop_assert_eq!(t.kernel.page(env, UTEXT).map(|p| p.flags), Some(perm));
        } else {
            prop_assert_eq!(ret, Err(SysError::Inval));
            prop_assert!(t.kernel.page(env, UTEXT).is_none());
        }
    }

    #[test]
    fn mapping_never_adds_write(perm in arb_perm()) {
        let mut t = test_bootstrap();
        let env = t.spawn();
        t.call_ok(env, Syscall::PageAlloc { env: EnvId::CURRENT, va: page(0), perm: PteFlags::user_read() });

        let ret = t.call(env, Syscall::PageMap {
            src_env: EnvId::CURRENT,
            src_va: page(0),
            dst_env: EnvId::CURRENT,
            dst_va: page(1),
            perm,
        });
        if ret.is_ok() {
            prop_assert!(!t.kernel.page(env, page(1)).unwrap().flags.is_writable());
        }
        if perm.is_writable() {
            prop_assert_eq!(ret, Err(SysError::Inval));
        }
    }

    #[test]
    fn alloc_then_unmap_leaves_nothing(n in 0u32..64, perm in arb_perm()) {
        let mut t = test_bootstrap();
        let env = t.spawn();
        if t.call(env, Syscall::PageAlloc { env: EnvId::CURRENT, va: page(n), perm }).is_ok() {
            t.call_ok(env, Syscall::PageUnmap { env: EnvId::CURRENT, va: page(n) });
        }
        prop_assert!(t.kernel.page(env, page(n)).is_none());
    }

    #[test]
    fn refcounts_track_mappings(ops in prop::collection::vec(arb_op(), 1..40)) {
        let mut t = test_bootstrap();
        let parent = t.spawn();
        let envs = [parent, t.exofork(parent), t.exofork(parent)];

        for op in ops {
            // every operation is issued by the parent, which may act on all three
            let call = match op {
                Op::Alloc { env, page: n, perm } => Syscall::PageAlloc { env: envs[env], va: page(n), perm },
                Op::Map { src, src_page, dst, dst_page, perm } => Syscall::PageMap {
                    src_env: envs[src],
                    src_va: page(src_page),
                    dst_env: envs[dst],
                    dst_va: page(dst_page),
                    perm,
                },
                Op::Unmap { env, page: n } => Syscall::PageUnmap { env: envs[env], va: page(n) },
            };
            let _ = t.call(parent, call);
            if let Err(msg) = check_frame_accounting(&t.kernel) {
                return Err(TestCaseError::fail(msg));
            }
        }

        for env in envs {
            t.kernel.env_destroy(env, EnvId::CURRENT);
        }
        prop_assert_eq!(t.kernel.phys().in_use(), 0);
    }
}

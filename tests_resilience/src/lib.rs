//! Resilience Test Utilities
//!
//! This crate provides shared utilities for resilience and integration tests.
//!
//! ## Test Philosophy
//!
//! - **Safety under faults**: The kernel keeps its invariants when allocation
//!   fails halfway through an operation
//! - **Deterministic failures**: All faults are reproducible via FaultPlan
//! - **No stale access**: An identifier outlived by its environment names
//!   nothing, even after the slot is reused
//! - **Accounting**: Every frame is owned by exactly the mappings that refer
//!   to it

use core_types::{EnvId, PteFlags, VirtAddr, UTEXT};
use kernel_api::{Syscalls, UserView};
use sim_kernel::test_utils::TestKernel;
use sim_kernel::SimulatedKernel;
use std::collections::BTreeMap;

/// First data page every test program uses
pub const DATA: VirtAddr = UTEXT;

/// Bootstrap helper for tests
///
/// A small kernel with the user library's fault upcall loaded.
pub fn test_bootstrap() -> TestKernel {
    let mut t = TestKernel::new();
    t.kernel.load_user_text(user_lib::user_text());
    t
}

/// Boots an environment with `contents` in a writable page at [`DATA`]
pub fn spawn_with_data(t: &mut TestKernel, contents: &[u8]) -> EnvId {
    let env = t.spawn();
    let mut user = match t.kernel.run(env) {
        Ok(user) => user,
        Err(err) => panic!("[{}] cannot run: {}", env, err),
    };
    if let Err(err) = user.sys_page_alloc(EnvId::CURRENT, DATA, PteFlags::user_write()) {
        panic!("[{}] page_alloc failed: {}", env, err);
    }
    if let Err(err) = user.write_mem(DATA, contents) {
        panic!("[{}] store failed: {}", env, err);
    }
    env
}

/// Counts how many live mappings refer to each frame
pub fn mapping_counts(kernel: &SimulatedKernel) -> BTreeMap<sim_kernel::FrameNumber, usize> {
    let mut counts = BTreeMap::new();
    for env in kernel.envs().iter() {
        let Some(space) = env.space() else { continue };
        for (_, pte) in space.mappings() {
            *counts.entry(pte.frame().number()).or_insert(0) += 1;
        }
    }
    counts
}

/// Checks frame accounting across every live environment
///
/// Each mapped frame's reference count equals the number of mappings to it,
/// and every frame in use is either mapped, a page table or a directory.
pub fn check_frame_accounting(kernel: &SimulatedKernel) -> Result<(), String> {
    let counts = mapping_counts(kernel);
    let mut structural = 0;
    for env in kernel.envs().iter() {
        let Some(space) = env.space() else { continue };
        structural += space.table_count() + 1;
        for (va, pte) in space.mappings() {
            let refs = pte.frame().ref_count();
            let expected = counts.get(&pte.frame().number()).copied().unwrap_or(0);
            if refs != expected {
                return Err(format!(
                    "[{}] frame {} at {} has {} refs but {} mappings",
                    env.id(),
                    pte.frame().number(),
                    va,
                    refs,
                    expected
                ));
            }
        }
    }
    let in_use = kernel.phys().in_use();
    if in_use != counts.len() + structural {
        return Err(format!(
            "{} frames in use, {} mapped and {} structural",
            in_use,
            counts.len(),
            structural
        ));
    }
    Ok(())
}

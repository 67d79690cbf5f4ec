//! Scheduling policy
//!
//! ## Philosophy
//!
//! - **Mechanism, not policy**: The kernel owns context switching; a
//!   [`Scheduler`] only picks who runs next.
//! - **Determinism first**: Same table + same current environment => same pick.
//! - **No hidden yields**: The kernel asks for a pick only on an explicit
//!   yield or when the running environment blocks or dies.

use crate::env::EnvTable;
use core_types::{EnvId, EnvStatus};

/// Picks the next environment to run
pub trait Scheduler {
    /// Chooses among the table's environments
    ///
    /// `current` is the environment that was running, if any. Returning it
    /// means it keeps the CPU. `None` means nothing can run.
    fn pick_next(&mut self, envs: &EnvTable, current: Option<EnvId>) -> Option<EnvId>;
}

/// Circular scan starting just after the current environment's slot
///
/// Takes the first `Runnable` slot. If none is found and the current
/// environment is still `Running`, it keeps running.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl Scheduler for RoundRobin {
    fn pick_next(&mut self, envs: &EnvTable, current: Option<EnvId>) -> Option<EnvId> {
        let capacity = envs.capacity();
        let start = current.map_or(0, |id| id.index() + 1);

        let runnable = (0..capacity)
            .map(|offset| (start + offset) % capacity.max(1))
            .filter_map(|index| envs.slot(index))
            .find(|env| env.status() == EnvStatus::Runnable)
            .map(|env| env.id());

        runnable.or_else(|| {
            current.filter(|id| {
                envs.get(*id)
                    .is_some_and(|env| env.status() == EnvStatus::Running)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys::PhysMem;

    fn table_with(n: usize) -> (PhysMem, EnvTable, Vec<EnvId>) {
        let mut phys = PhysMem::new(64);
        let mut envs = EnvTable::new(8);
        let ids = (0..n)
            .map(|_| envs.alloc(EnvId::CURRENT, &mut phys).unwrap())
            .collect();
        (phys, envs, ids)
    }

    #[test]
    fn test_nothing_runnable() {
        let (_phys, envs, _) = table_with(2);
        assert_eq!(RoundRobin.pick_next(&envs, None), None);
    }

    #[test]
    fn test_scan_starts_after_current() {
        let (_phys, mut envs, ids) = table_with(3);
        for id in &ids {
            envs.get_mut(*id).unwrap().set_status(EnvStatus::Runnable);
        }
        envs.get_mut(ids[1]).unwrap().set_status(EnvStatus::Running);

        assert_eq!(RoundRobin.pick_next(&envs, Some(ids[1])), Some(ids[2]));
        assert_eq!(RoundRobin.pick_next(&envs, Some(ids[2])), Some(ids[0]));
        assert_eq!(RoundRobin.pick_next(&envs, None), Some(ids[0]));
    }

    #[test]
    fn test_current_keeps_running_when_alone() {
        let (_phys, mut envs, ids) = table_with(2);
        let env = envs.get_mut(ids[0]).unwrap();
        env.set_status(EnvStatus::Runnable);
        env.set_status(EnvStatus::Running);
        assert_eq!(RoundRobin.pick_next(&envs, Some(ids[0])), Some(ids[0]));
    }

    #[test]
    fn test_blocked_current_not_picked() {
        let (_phys, mut envs, ids) = table_with(1);
        assert_eq!(RoundRobin.pick_next(&envs, Some(ids[0])), None);
        envs.get_mut(ids[0]).unwrap().set_status(EnvStatus::Runnable);
        assert_eq!(RoundRobin.pick_next(&envs, Some(ids[0])), Some(ids[0]));
    }
}

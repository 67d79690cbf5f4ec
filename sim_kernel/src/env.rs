//! Environment registry
//!
//! A fixed-capacity table of environment slots plus a free list. Slot `i`
//! always holds the environment whose id has index `i`; the generation bits
//! of the id change every time the slot is reused, so a stale id never
//! resolves to the slot's new occupant.

use crate::address_space::{AddressSpace, TeardownStats};
use crate::phys::PhysMem;
use core_types::{EnvId, EnvStatus, PteFlags, Trapframe, VirtAddr};
use kernel_api::{EnvInfo, SysError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Receiver-side IPC state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IpcMailbox {
    /// Blocked in receive and willing to accept one message
    pub recving: bool,
    /// Where a transferred page should land; at or above `UTOP` means none
    pub dstva: VirtAddr,
    /// Sender of the last delivered message, zero while waiting
    pub from: EnvId,
    pub value: u32,
    /// Permissions of the transferred page, empty if none was sent
    pub perm: PteFlags,
}

/// One environment slot
pub struct Env {
    id: EnvId,
    parent: EnvId,
    status: EnvStatus,
    runs: u32,
    pub(crate) tf: Trapframe,
    pub(crate) space: Option<AddressSpace>,
    pub(crate) pgfault_upcall: Option<VirtAddr>,
    pub(crate) ipc: IpcMailbox,
}

impl Env {
    fn vacant() -> Self {
        Self {
            id: EnvId::CURRENT,
            parent: EnvId::CURRENT,
            status: EnvStatus::Free,
            runs: 0,
            tf: Trapframe::default(),
            space: None,
            pgfault_upcall: None,
            ipc: IpcMailbox::default(),
        }
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn parent(&self) -> EnvId {
        self.parent
    }

    pub fn status(&self) -> EnvStatus {
        self.status
    }

    /// Times this environment has been scheduled in
    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn tf(&self) -> &Trapframe {
        &self.tf
    }

    pub fn space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }

    pub fn pgfault_upcall(&self) -> Option<VirtAddr> {
        self.pgfault_upcall
    }

    pub fn ipc(&self) -> &IpcMailbox {
        &self.ipc
    }

    pub fn is_alive(&self) -> bool {
        self.status.is_alive()
    }

    pub(crate) fn set_status(&mut self, next: EnvStatus) {
        if self.status == next {
            return;
        }
        if !self.status.can_transition_to(next) {
            log::error!(
                "[{}] illegal status transition {} -> {}",
                self.id,
                self.status,
                next
            );
        }
        debug_assert!(self.status.can_transition_to(next));
        self.status = next;
    }

    pub(crate) fn mark_run(&mut self) {
        self.set_status(EnvStatus::Running);
        self.runs = self.runs.wrapping_add(1);
    }

    /// Snapshot as exposed to user code through the read-only table
    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            id: self.id,
            parent: self.parent,
            status: self.status,
            runs: self.runs,
            pgfault_upcall: self.pgfault_upcall,
            ipc_recving: self.ipc.recving,
            ipc_dstva: self.ipc.dstva,
            ipc_from: self.ipc.from,
            ipc_value: self.ipc.value,
            ipc_perm: self.ipc.perm,
        }
    }
}

/// Fixed-size table of environment slots
pub struct EnvTable {
    slots: Vec<Env>,
    /// Free slot indices; freed slots go to the front
    free: VecDeque<usize>,
}

impl EnvTable {
    /// Creates a table of `capacity` free slots, handed out lowest first
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Env::vacant()).collect(),
            free: (0..capacity).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Occupant of slot `index`, live or not
    pub fn slot(&self, index: usize) -> Option<&Env> {
        self.slots.get(index)
    }

    /// Live environment with exactly this id
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots
            .get(id.index())
            .filter(|env| env.is_alive() && env.id == id)
    }

    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(id.index())
            .filter(|env| env.is_alive() && env.id == id)
    }

    /// Live environments in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.slots.iter().filter(|env| env.is_alive())
    }

    /// Resolves `id` on behalf of `caller`
    ///
    /// Zero names the caller. Anything else must name a live environment
    /// with a matching generation. With `check_perm`, the target must also
    /// be the caller or one of its direct children.
    pub fn resolve(&self, id: EnvId, caller: EnvId, check_perm: bool) -> Result<EnvId, SysError> {
        if id.is_current_alias() {
            return self.get(caller).map(Env::id).ok_or(SysError::BadEnv);
        }

        let env = self.get(id).ok_or(SysError::BadEnv)?;
        if check_perm && env.id != caller && env.parent != caller {
            log::debug!("[{}] no permission over {}", caller, id);
            return Err(SysError::BadEnv);
        }
        Ok(env.id)
    }

    /// Takes a free slot for a new environment
    ///
    /// The new environment has a fresh address space, a zeroed trap frame
    /// and status `NotRunnable`.
    pub fn alloc(&mut self, parent: EnvId, phys: &mut PhysMem) -> Result<EnvId, SysError> {
        let index = *self.free.front().ok_or(SysError::NoFreeEnv)?;
        let space = AddressSpace::new(phys)?;
        self.free.pop_front();

        let slot = &mut self.slots[index];
        let id = EnvId::next_for_slot(slot.id, index);
        *slot = Env {
            id,
            parent,
            status: EnvStatus::Free,
            runs: 0,
            tf: Trapframe::default(),
            space: Some(space),
            pgfault_upcall: None,
            ipc: IpcMailbox::default(),
        };
        slot.set_status(EnvStatus::NotRunnable);

        log::info!("[{}] new env {}", parent, id);
        Ok(id)
    }

    /// Tears `id` down and returns its slot to the front of the free list
    ///
    /// Passes through `Dying` so no observer sees a half-freed environment
    /// as alive.
    pub fn free(&mut self, id: EnvId, by: EnvId) -> Option<TeardownStats> {
        let index = id.index();
        let env = self.get_mut(id)?;
        env.set_status(EnvStatus::Dying);
        let stats = env.space.take().map(AddressSpace::teardown).unwrap_or_default();
        env.pgfault_upcall = None;
        env.ipc = IpcMailbox::default();
        env.set_status(EnvStatus::Free);
        self.free.push_front(index);

        log::info!(
            "[{}] free env {} ({} pages, {} tables)",
            by,
            id,
            stats.pages,
            stats.tables
        );
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (PhysMem, EnvTable) {
        (PhysMem::new(64), EnvTable::new(4))
    }

    #[test]
    fn test_alloc_is_not_runnable() {
        let (mut phys, mut envs) = setup();
        let id = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        let env = envs.get(id).unwrap();
        assert_eq!(env.status(), EnvStatus::NotRunnable);
        assert_eq!(env.parent(), EnvId::CURRENT);
        assert!(env.space().is_some());
        assert_eq!(id.index(), 0);
    }

    #[test]
    fn test_table_full() {
        let (mut phys, mut envs) = setup();
        for _ in 0..4 {
            envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        }
        assert_eq!(
            envs.alloc(EnvId::CURRENT, &mut phys),
            Err(SysError::NoFreeEnv)
        );
    }

    #[test]
    fn test_alloc_without_memory_keeps_slot_free() {
        let mut phys = PhysMem::new(0);
        let mut envs = EnvTable::new(2);
        assert_eq!(envs.alloc(EnvId::CURRENT, &mut phys), Err(SysError::NoMem));
        assert_eq!(envs.free_slots(), 2);
    }

    #[test]
    fn test_freed_slot_reused_with_new_generation() {
        let (mut phys, mut envs) = setup();
        let a = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        let _b = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        envs.free(a, a).unwrap();

        let c = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert!(envs.get(a).is_none());
        assert_eq!(envs.resolve(a, c, false), Err(SysError::BadEnv));
    }

    #[test]
    fn test_free_releases_memory() {
        let (mut phys, mut envs) = setup();
        let a = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        assert_eq!(phys.in_use(), 1);
        envs.free(a, a).unwrap();
        assert_eq!(phys.in_use(), 0);
        assert_eq!(envs.slot(a.index()).unwrap().status(), EnvStatus::Free);
        assert!(envs.free(a, a).is_none());
    }

    #[test]
    fn test_resolve_current_alias() {
        let (mut phys, mut envs) = setup();
        let a = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        assert_eq!(envs.resolve(EnvId::CURRENT, a, true), Ok(a));
    }

    #[test]
    fn test_resolve_permission() {
        let (mut phys, mut envs) = setup();
        let parent = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        let child = envs.alloc(parent, &mut phys).unwrap();
        let grandchild = envs.alloc(child, &mut phys).unwrap();
        let stranger = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();

        assert_eq!(envs.resolve(child, parent, true), Ok(child));
        assert_eq!(envs.resolve(parent, parent, true), Ok(parent));
        assert_eq!(
            envs.resolve(grandchild, parent, true),
            Err(SysError::BadEnv)
        );
        assert_eq!(envs.resolve(parent, child, true), Err(SysError::BadEnv));
        assert_eq!(envs.resolve(stranger, parent, false), Ok(stranger));
    }

    #[test]
    fn test_info_reflects_mailbox() {
        let (mut phys, mut envs) = setup();
        let a = envs.alloc(EnvId::CURRENT, &mut phys).unwrap();
        let env = envs.get_mut(a).unwrap();
        env.ipc.recving = true;
        env.ipc.value = 9;
        let info = envs.get(a).unwrap().info();
        assert!(info.ipc_recving);
        assert_eq!(info.ipc_value, 9);
        assert_eq!(info.id, a);
    }
}

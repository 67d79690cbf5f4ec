//! Syscall ABI contract tests
//!
//! Opcode numbers and the position of every argument word are what compiled
//! user programs depend on.

use kernel_api::SyscallNo;

/// Every opcode with its number (stable contract)
pub const OPCODES: [(SyscallNo, u32, &str); 14] = [
    (SyscallNo::Cputs, 0, "cputs"),
    (SyscallNo::Cgetc, 1, "cgetc"),
    (SyscallNo::GetEnvId, 2, "getenvid"),
    (SyscallNo::EnvDestroy, 3, "env_destroy"),
    (SyscallNo::PageAlloc, 4, "page_alloc"),
    (SyscallNo::PageMap, 5, "page_map"),
    (SyscallNo::PageUnmap, 6, "page_unmap"),
    (SyscallNo::Exofork, 7, "exofork"),
    (SyscallNo::EnvSetStatus, 8, "env_set_status"),
    (SyscallNo::EnvSetPgfaultUpcall, 9, "env_set_pgfault_upcall"),
    (SyscallNo::Yield, 10, "yield"),
    (SyscallNo::IpcTrySend, 11, "ipc_try_send"),
    (SyscallNo::IpcRecv, 12, "ipc_recv"),
    (SyscallNo::EnvSetTrapframe, 13, "env_set_trapframe"),
];

// ===== Contract Tests =====

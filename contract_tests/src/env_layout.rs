//! Environment record contract tests
//!
//! Identifier bit layout, status numbers, and the trap-frame images the
//! kernel writes into user memory.

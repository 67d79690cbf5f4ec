//! Address-space layout contract tests
//!
//! User programs are linked against these addresses.

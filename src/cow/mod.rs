//! Copy-on-write fork
//!
//! Three pieces, each built on the one before:
//!
//! - **pgfault**: the user-level page fault handler. A write to a page
//!   marked `PTE_COW` is resolved by copying the page into a fresh frame
//!   and mapping it privately writable in place of the shared one.
//! - **duppage**: maps one page of the caller into a child. Writable and
//!   copy-on-write pages become copy-on-write in *both* environments;
//!   everything else is shared as is.
//! - **fork**: creates the child, duplicates every user page below the
//!   exception stack, gives the child its own exception stack and fault
//!   upcall, then marks it runnable.
//!
//! At no point may two environments hold a writable, non-COW mapping of
//! the same frame.

pub mod duppage;
pub mod fork;
pub mod pgfault;

#[cfg(test)]
pub(crate) mod mock;

pub use duppage::duppage;
pub use fork::{fork, sfork};
pub use pgfault::pgfault;

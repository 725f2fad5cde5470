//! Synchronisation primitives used by the virtual memory subsystem.
//!
//! The kernel embedding this crate is expected to run the VM managers with interrupts enabled
//! and no cooperative yielding inside their critical sections (see the locking protocol in
//! [`crate::frame`]). [`spin`] gives us a `no_std`-friendly mutex without pulling in an
//! architecture-specific interrupt-disabling primitive, which this crate has no business owning.

/// The lock type guarding every shared table in this crate: the frame table, the swap area, and
/// each process's page/mmap tables.
pub type Mutex<T> = spin::Mutex<T>;
/// A guard returned by locking a [`Mutex`].
pub type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;

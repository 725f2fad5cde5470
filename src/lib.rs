//! Demand-paged virtual memory for a teaching kernel.
//!
//! This crate implements the four cooperating managers that back a process's user address space
//! with physical frames on demand: a per-process supplemental page table ([`page`]), a global
//! frame table with two-handed CLOCK eviction ([`frame`]), a global swap area ([`swap`]), and a
//! per-process memory-mapped file table ([`mmap`]). [`space::AddressSpace`] bundles one
//! process's page and mmap tables together with its hardware page table handle and shared
//! references to the global frame table and swap area, and is where page-fault handling is
//! dispatched from.
//!
//! The crate never touches a physical allocator, an MMU, a block device, or a filesystem
//! directly: it depends on the narrow traits in [`hal`], which the embedding kernel implements.
//! This is what lets the crate build `no_std` for a real target while also compiling as an
//! ordinary hosted crate under `cargo test`, exercised against the in-memory fakes in
//! [`mock`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod addr;
pub mod config;
pub mod error;
pub mod frame;
pub mod hal;
pub mod logger;
pub mod mmap;
#[cfg(test)]
pub mod mock;
pub mod page;
pub mod print;
pub mod space;
pub mod swap;
pub mod sync;

/// The size, in bytes, of a single page of virtual or physical memory.
///
/// Fixed for the whole crate: every on-disk and in-memory layout here (the swap bitmap, mmap
/// region page counts, frame records) is derived from this one constant, so it is not part of
/// [`config::VmConfig`].
pub const PAGE_SIZE: usize = 4096;

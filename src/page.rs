//! The supplemental page table: per-process storage mapping a user page to where its contents
//! currently live.
//!
//! This module only owns the storage and the `Page`/`PageOrigin` types. The operations that
//! drive a page through its lifecycle (`load`, `unload`, `clear`, ...) need the hardware page
//! table, the frame table and the swap area besides this storage, so they live on
//! [`crate::space::AddressSpace`], which bundles all of it together.

use crate::{
	addr::{KAddr, VirtAddr},
	error::{Errno, VmResult},
	mmap::MapId,
	swap::SwapId,
};
use alloc::collections::BTreeMap;
use core::mem;

/// Where a non-resident page's authoritative contents currently live, or how to produce them if
/// they do not exist yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PageOrigin {
	/// A freshly zeroed page with no prior contents.
	Zero,
	/// A zeroed stack page. Equivalent to `Zero` on load; kept distinct only for diagnostics.
	Stack,
	/// Backed by a byte range of an mmap region.
	File { map_id: MapId, intra_offset: usize },
	/// Backed by a slot in the swap area.
	Swap { swap_id: SwapId },
}

/// A single user page tracked by a process's supplemental page table.
#[derive(Debug)]
pub struct Page {
	uaddr: VirtAddr,
	writable: bool,
	origin: PageOrigin,
	/// `Some` iff the page is currently resident, i.e. mapped into the hardware page table.
	kaddr: Option<KAddr>,
}

impl Page {
	/// The page's address.
	pub fn uaddr(&self) -> VirtAddr {
		self.uaddr
	}

	/// Whether userspace may write to this page.
	pub fn writable(&self) -> bool {
		self.writable
	}

	/// Where this page's contents come from (or, while resident, came from).
	pub fn origin(&self) -> PageOrigin {
		self.origin
	}

	/// The frame backing this page, if resident.
	pub fn kaddr(&self) -> Option<KAddr> {
		self.kaddr
	}

	/// Whether this page is currently mapped into the hardware page table.
	pub fn is_resident(&self) -> bool {
		self.kaddr.is_some()
	}
}

/// Storage for one process's supplemental page table.
pub struct SupplementalPageTable {
	pages: crate::sync::Mutex<BTreeMap<VirtAddr, Page>>,
}

impl SupplementalPageTable {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self {
			pages: crate::sync::Mutex::new(BTreeMap::new()),
		}
	}

	/// Tells whether a page is registered at `uaddr`.
	pub fn exists(&self, uaddr: VirtAddr) -> bool {
		self.pages.lock().contains_key(&uaddr)
	}

	/// Registers a new page at `uaddr` with the given origin, failing if one already exists.
	pub fn insert(&self, uaddr: VirtAddr, writable: bool, origin: PageOrigin) -> VmResult<()> {
		let mut pages = self.pages.lock();
		if pages.contains_key(&uaddr) {
			return Err(Errno::AlreadyMapped);
		}
		pages.insert(
			uaddr,
			Page {
				uaddr,
				writable,
				origin,
				kaddr: None,
			},
		);
		Ok(())
	}

	/// Registers `n` consecutive pages of origin `origin_for(i)` starting at `uaddr`, rolling
	/// back any already-inserted page if a later one fails.
	pub fn insert_run(
		&self,
		uaddr: VirtAddr,
		writable: bool,
		n: usize,
		origin_for: impl Fn(usize) -> PageOrigin,
	) -> VmResult<()> {
		for i in 0..n {
			let page_uaddr = uaddr + i * crate::PAGE_SIZE;
			if let Err(e) = self.insert(page_uaddr, writable, origin_for(i)) {
				for j in 0..i {
					self.remove(uaddr + j * crate::PAGE_SIZE);
				}
				return Err(e);
			}
		}
		Ok(())
	}

	/// Removes and returns the page at `uaddr`, if any.
	pub fn remove(&self, uaddr: VirtAddr) -> Option<Page> {
		self.pages.lock().remove(&uaddr)
	}

	/// Runs `f` with a reference to the page at `uaddr`, if registered.
	pub fn with<R>(&self, uaddr: VirtAddr, f: impl FnOnce(&Page) -> R) -> Option<R> {
		self.pages.lock().get(&uaddr).map(f)
	}

	/// Marks the page at `uaddr` resident at `kaddr`, replacing its origin (used after `load`).
	pub fn mark_resident(&self, uaddr: VirtAddr, kaddr: KAddr) {
		if let Some(page) = self.pages.lock().get_mut(&uaddr) {
			page.kaddr = Some(kaddr);
		}
	}

	/// Marks the page at `uaddr` non-resident, recording its new origin (used after `unload`).
	pub fn mark_nonresident(&self, uaddr: VirtAddr, origin: PageOrigin) -> Option<PageOrigin> {
		let mut pages = self.pages.lock();
		let page = pages.get_mut(&uaddr)?;
		page.kaddr = None;
		Some(mem::replace(&mut page.origin, origin))
	}

	/// Returns every registered address, for teardown/iteration purposes.
	pub fn addresses(&self) -> alloc::vec::Vec<VirtAddr> {
		self.pages.lock().keys().copied().collect()
	}
}

impl Default for SupplementalPageTable {
	fn default() -> Self {
		Self::new()
	}
}

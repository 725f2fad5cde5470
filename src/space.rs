//! `AddressSpace`: one process's supplemental page table and mmap table, bundled with its
//! hardware page table handle and shared references to the global frame table and swap area.
//!
//! This is where page-fault handling, load/unload and mmap teardown are orchestrated; the
//! storage types in [`crate::page`] and [`crate::mmap`] know nothing about the frame table, the
//! swap area, or hardware page table flags.

use crate::{
	addr::VirtAddr,
	config::VmConfig,
	error::VmResult,
	frame::{FrameTable, PageOwner},
	hal::{FileHandle, HardwarePageTable, PteFlags},
	mmap::{MapId, MmapTable},
	page::{PageOrigin, SupplementalPageTable},
	swap::SwapArea,
};
use alloc::sync::Arc;

/// The outcome of dispatching a page fault to [`AddressSpace::handle_fault`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultOutcome {
	/// The fault was serviced; the faulting instruction may be retried.
	Handled,
	/// The fault was not a legitimate demand-paging or stack-growth request; the owning process
	/// must be terminated.
	Kill,
}

/// One process's virtual memory state.
pub struct AddressSpace {
	hal: Arc<dyn HardwarePageTable>,
	pages: SupplementalPageTable,
	mmaps: MmapTable,
	frames: Arc<FrameTable>,
	swap: Arc<SwapArea>,
	config: VmConfig,
}

impl AddressSpace {
	/// Creates a fresh, empty address space.
	pub fn new(
		hal: Arc<dyn HardwarePageTable>,
		frames: Arc<FrameTable>,
		swap: Arc<SwapArea>,
		config: VmConfig,
	) -> Arc<Self> {
		Arc::new(Self {
			hal,
			pages: SupplementalPageTable::new(),
			mmaps: MmapTable::new(),
			frames,
			swap,
			config,
		})
	}

	/// Registers a single zero-fill page at `uaddr`.
	pub fn add_zero(&self, uaddr: VirtAddr, writable: bool) -> VmResult<()> {
		self.pages
			.insert(uaddr.page_round_down(), writable, PageOrigin::Zero)
	}

	/// Registers `n` consecutive zero-fill pages starting at `uaddr`.
	pub fn add_zeros(&self, uaddr: VirtAddr, n: usize, writable: bool) -> VmResult<()> {
		self.pages
			.insert_run(uaddr.page_round_down(), writable, n, |_| PageOrigin::Zero)
	}

	/// Registers `n` consecutive stack pages starting at `uaddr`.
	pub fn add_stack(&self, uaddr: VirtAddr, n: usize, writable: bool) -> VmResult<()> {
		self.pages
			.insert_run(uaddr.page_round_down(), writable, n, |_| PageOrigin::Stack)
	}

	/// Registers a memory-mapped file region and returns its id.
	#[allow(clippy::too_many_arguments)]
	pub fn add_mmap(
		&self,
		file: Arc<dyn FileHandle>,
		file_offset: u64,
		size: usize,
		start_uaddr: VirtAddr,
		writable: bool,
		writeback: bool,
	) -> VmResult<MapId> {
		self.mmaps
			.add(&self.pages, file, file_offset, size, start_uaddr, writable, writeback)
	}

	/// Tells whether a page is registered at `uaddr`.
	pub fn exists(&self, uaddr: VirtAddr) -> bool {
		self.pages.exists(uaddr.page_round_down())
	}

	/// Reads the hardware dirty bit for `uaddr`. `false` for a non-resident page.
	pub fn dirty(&self, uaddr: VirtAddr) -> bool {
		self.hal
			.flags(uaddr.page_round_down())
			.is_some_and(|f| f.contains(PteFlags::DIRTY))
	}

	/// Reads the hardware accessed bit for `uaddr`. `false` for a non-resident page.
	pub fn accessed(&self, uaddr: VirtAddr) -> bool {
		self.hal
			.flags(uaddr.page_round_down())
			.is_some_and(|f| f.contains(PteFlags::ACCESSED))
	}

	/// Sets or clears the hardware accessed bit for `uaddr`.
	pub fn set_accessed(&self, uaddr: VirtAddr, accessed: bool) {
		self.hal.set_accessed(uaddr.page_round_down(), accessed);
	}

	/// Loads the registered, non-resident page at `uaddr`, allocating a frame for it (evicting a
	/// victim elsewhere if needed) and installing its hardware mapping.
	///
	/// # Panics
	/// Panics if no page is registered at `uaddr`, or if it is already resident: both are
	/// caller bugs (the page-fault handler only calls this after confirming both).
	pub fn load(self: &Arc<Self>, uaddr: VirtAddr) -> VmResult<()> {
		let uaddr = uaddr.page_round_down();
		let (origin, writable) = self
			.pages
			.with(uaddr, |p| {
				assert!(!p.is_resident(), "load on an already-resident page");
				(p.origin(), p.writable())
			})
			.expect("load on an unregistered page");

		let kaddr = self.frames.frame_alloc(uaddr, self.clone());
		let fill = match origin {
			PageOrigin::Zero | PageOrigin::Stack => Ok(()),
			PageOrigin::File {
				map_id,
				intra_offset,
			} => unsafe { self.mmaps.load(map_id, intra_offset, kaddr) },
			PageOrigin::Swap { swap_id } => {
				unsafe { self.swap.swap_in(swap_id, kaddr) };
				Ok(())
			}
		};
		if let Err(e) = fill {
			self.frames.frame_free(kaddr);
			return Err(e);
		}

		self.hal
			.set_page(uaddr, kaddr, writable)
			.expect("hardware page table ran out of paging structures while loading a page");
		self.pages.mark_resident(uaddr, kaddr);
		// Only now is the page actually resident: before this point its frame was pinned against
		// eviction (see `FrameTable::frame_alloc`), since `unload`-ing it earlier would have found
		// no hardware mapping and no filled contents to save.
		self.frames.unpin(kaddr);
		crate::println!("vm: loaded page {:?} -> frame {:?}", uaddr, kaddr);
		Ok(())
	}

	/// Removes the page at `uaddr`, releasing whatever resource currently backs it (its frame,
	/// its swap slot, or flushing it to its file if it is a dirty writeback mapping).
	pub fn clear(&self, uaddr: VirtAddr) {
		let uaddr = uaddr.page_round_down();
		let Some(page) = self.pages.with(uaddr, |p| {
			(p.origin(), p.writable(), p.kaddr())
		}) else {
			return;
		};
		let (origin, writable, kaddr) = page;
		if let Some(kaddr) = kaddr {
			if let PageOrigin::File {
				map_id,
				intra_offset,
			} = origin
			{
				if writable && self.dirty(uaddr) && self.mmaps.writeback_enabled(map_id) {
					unsafe { self.mmaps.write_back(map_id, intra_offset, kaddr) }
						.expect("mmap writeback failed during clear");
				}
			}
			self.hal.clear_page(uaddr);
			self.frames.frame_free(kaddr);
		} else if let PageOrigin::Swap { swap_id } = origin {
			self.swap.discard(swap_id);
		}
		self.pages.remove(uaddr);
	}

	/// Removes mmap region `map_id`, flushing dirty writeback pages first and clearing every
	/// page it covers.
	pub fn mmap_remove(&self, map_id: MapId) {
		for uaddr in self.mmaps.covered_addresses(map_id) {
			self.clear(uaddr);
		}
		self.mmaps.delete(map_id);
	}

	/// Classifies and services a page fault at `fault_uaddr`, given the faulting thread's
	/// current stack pointer. Growing the stack and loading a freshly-registered page both count
	/// as "handled".
	pub fn handle_fault(self: &Arc<Self>, fault_uaddr: VirtAddr, esp: VirtAddr) -> FaultOutcome {
		let page_uaddr = fault_uaddr.page_round_down();
		if self.pages.exists(page_uaddr) {
			return match self.load(page_uaddr) {
				Ok(()) => FaultOutcome::Handled,
				Err(_) => FaultOutcome::Kill,
			};
		}
		if self.config.in_stack_growth_window(fault_uaddr, esp) {
			if self.add_stack(page_uaddr, 1, true).is_err() {
				return FaultOutcome::Kill;
			}
			return match self.load(page_uaddr) {
				Ok(()) => FaultOutcome::Handled,
				Err(_) => FaultOutcome::Kill,
			};
		}
		crate::println!("vm: killing process on unhandled fault at {:?}", fault_uaddr);
		FaultOutcome::Kill
	}

	/// Tears down this address space: clears every registered page (which also removes mmap
	/// region bookkeeping where regions no longer cover any page) then deletes leftover region
	/// bookkeeping, flushing dirty writeback pages on the way.
	pub fn teardown(&self) {
		for map_id in self.mmaps.all_ids() {
			self.mmap_remove(map_id);
		}
		for uaddr in self.pages.addresses() {
			self.clear(uaddr);
		}
	}
}

impl PageOwner for AddressSpace {
	fn accessed(&self, uaddr: VirtAddr) -> bool {
		AddressSpace::accessed(self, uaddr)
	}

	fn clear_accessed(&self, uaddr: VirtAddr) {
		self.hal.clear_accessed(uaddr.page_round_down());
	}

	fn dirty(&self, uaddr: VirtAddr) -> bool {
		AddressSpace::dirty(self, uaddr)
	}

	/// Detaches the resident page at `uaddr`, called by [`FrameTable::evict`] with the frame
	/// table's lock held.
	fn unload(&self, uaddr: VirtAddr) {
		let uaddr = uaddr.page_round_down();
		let (origin, writable, kaddr) = self
			.pages
			.with(uaddr, |p| (p.origin(), p.writable(), p.kaddr()))
			.expect("unload called on an untracked page");
		let kaddr = kaddr.expect("unload called on a non-resident page");
		let was_dirty = self.dirty(uaddr);

		self.hal.clear_page(uaddr);

		let new_origin = match origin {
			PageOrigin::File {
				map_id,
				intra_offset,
			} => {
				if writable && was_dirty && self.mmaps.writeback_enabled(map_id) {
					unsafe { self.mmaps.write_back(map_id, intra_offset, kaddr) }
						.expect("mmap writeback failed during eviction");
				}
				PageOrigin::File {
					map_id,
					intra_offset,
				}
			}
			PageOrigin::Zero | PageOrigin::Stack | PageOrigin::Swap { .. } => {
				let swap_id = unsafe { self.swap.swap_out(kaddr) };
				PageOrigin::Swap { swap_id }
			}
		};
		self.pages.mark_nonresident(uaddr, new_origin);
	}
}

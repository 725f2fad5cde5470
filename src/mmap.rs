//! The per-process memory-mapped file table.
//!
//! This module owns region bookkeeping and the byte-level load/write-back of a single page.
//! Deciding *when* to write a page back (is it resident, is it dirty) needs the hardware page
//! table, which this module has no handle to; that decision is made by
//! [`crate::space::AddressSpace`], which drives this table alongside the supplemental page
//! table and the frame table.

use crate::{
	addr::{KAddr, VirtAddr},
	error::{Errno, VmResult},
	hal::FileHandle,
	page::{PageOrigin, SupplementalPageTable},
	sync::Mutex,
	PAGE_SIZE,
};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::{cmp::min, slice};

/// Identifies one mmap region within a single process. Ids are process-local and dense starting
/// from 1.
pub type MapId = u32;

/// A single memory-mapped file region.
struct MmapRegion {
	file: Arc<dyn FileHandle>,
	file_offset: u64,
	size: usize,
	start_uaddr: VirtAddr,
	writeback: bool,
}

impl MmapRegion {
	fn page_count(&self) -> usize {
		self.size.div_ceil(PAGE_SIZE)
	}
}

/// A process's table of mmap regions.
pub struct MmapTable {
	regions: Mutex<BTreeMap<MapId, MmapRegion>>,
	next_id: Mutex<MapId>,
}

impl MmapTable {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self {
			regions: Mutex::new(BTreeMap::new()),
			next_id: Mutex::new(1),
		}
	}

	/// Validates and registers a new mapping of `size` bytes of `file` starting at
	/// `file_offset`, covering the page run starting at `start_uaddr` in the supplemental page
	/// table `pages`.
	///
	/// On success every covered page is registered in `pages` with a `File` origin; on failure
	/// no page is left registered and no region is recorded.
	#[allow(clippy::too_many_arguments)]
	pub fn add(
		&self,
		pages: &SupplementalPageTable,
		file: Arc<dyn FileHandle>,
		file_offset: u64,
		size: usize,
		start_uaddr: VirtAddr,
		writable: bool,
		writeback: bool,
	) -> VmResult<MapId> {
		if !start_uaddr.is_page_aligned() || size == 0 {
			return Err(Errno::InvalidArgument);
		}
		let map_id = {
			let mut next = self.next_id.lock();
			let id = *next;
			*next += 1;
			id
		};
		let page_count = size.div_ceil(PAGE_SIZE);
		pages.insert_run(start_uaddr, writable, page_count, |i| PageOrigin::File {
			map_id,
			intra_offset: i * PAGE_SIZE,
		})?;
		self.regions.lock().insert(
			map_id,
			MmapRegion {
				file,
				file_offset,
				size,
				start_uaddr,
				writeback,
			},
		);
		Ok(map_id)
	}

	/// Loads the page at `intra_offset` bytes into the region `map_id` into the frame at
	/// `kaddr`, zero-filling any tail beyond the region's last byte.
	///
	/// # Safety
	/// `kaddr` must point to a valid, writable, page-sized frame for the duration of the call.
	pub unsafe fn load(&self, map_id: MapId, intra_offset: usize, kaddr: KAddr) -> VmResult<()> {
		let (file, offset, len) = {
			let regions = self.regions.lock();
			let region = regions.get(&map_id).ok_or(Errno::NoSuchMapping)?;
			let len = min(PAGE_SIZE, region.size.saturating_sub(intra_offset));
			(region.file.clone(), region.file_offset + intra_offset as u64, len)
		};
		let buf = slice::from_raw_parts_mut(kaddr.0 as *mut u8, PAGE_SIZE);
		buf.fill(0);
		file.file_read_at(&mut buf[..len], offset).map_err(|_| Errno::Io)?;
		Ok(())
	}

	/// Writes the page at `intra_offset` bytes into region `map_id` back to its file, truncating
	/// to the region's final byte as `load` does.
	///
	/// # Safety
	/// `kaddr` must point to a valid, readable, page-sized frame for the duration of the call.
	pub unsafe fn write_back(&self, map_id: MapId, intra_offset: usize, kaddr: KAddr) -> VmResult<()> {
		let (file, offset, len) = {
			let regions = self.regions.lock();
			let region = regions.get(&map_id).ok_or(Errno::NoSuchMapping)?;
			let len = min(PAGE_SIZE, region.size.saturating_sub(intra_offset));
			(region.file.clone(), region.file_offset + intra_offset as u64, len)
		};
		let buf = slice::from_raw_parts(kaddr.0 as *const u8, PAGE_SIZE);
		file.file_write_at(&buf[..len], offset).map_err(|_| Errno::Io)?;
		Ok(())
	}

	/// Whether dirty pages of `map_id` should be flushed back to their file on eviction/unmap.
	pub fn writeback_enabled(&self, map_id: MapId) -> bool {
		self.regions
			.lock()
			.get(&map_id)
			.map(|r| r.writeback)
			.unwrap_or(false)
	}

	/// Every user address covered by `map_id`, in order.
	pub fn covered_addresses(&self, map_id: MapId) -> Vec<VirtAddr> {
		let regions = self.regions.lock();
		let Some(region) = regions.get(&map_id) else {
			return Vec::new();
		};
		(0..region.page_count())
			.map(|i| region.start_uaddr + i * PAGE_SIZE)
			.collect()
	}

	/// Removes and returns ownership of region `map_id`'s bookkeeping; the caller is responsible
	/// for having already flushed and cleared every covered page.
	pub fn delete(&self, map_id: MapId) {
		self.regions.lock().remove(&map_id);
	}

	/// Every region id currently registered, for process teardown.
	pub fn all_ids(&self) -> Vec<MapId> {
		self.regions.lock().keys().copied().collect()
	}
}

impl Default for MmapTable {
	fn default() -> Self {
		Self::new()
	}
}

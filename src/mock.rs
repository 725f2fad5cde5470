//! In-memory fakes of the four [`crate::hal`] traits, used to exercise the managers on a hosted
//! target without a bootloader, an emulator, or real hardware.
//!
//! Only compiled for tests (see the `#[cfg(test)]` on this module's declaration in `lib.rs`).

use crate::{
	addr::{KAddr, VirtAddr},
	hal::{BlockDevice, BlockIoError, FileHandle, HardwarePageTable, PhysFrameAllocator, PteFlags},
	sync::Mutex,
	PAGE_SIZE,
};
use alloc::{collections::BTreeMap, vec, vec::Vec};
use core::cell::UnsafeCell;
use core::cmp::min;

/// A fixed-size pool of page-sized buffers handed out as physical frames.
///
/// Backed by one contiguous allocation that is never resized after construction, so addresses
/// handed out stay valid for the mock's whole lifetime; the free list is the only thing that
/// needs a lock.
pub struct MockFrameAllocator {
	arena: Box<[UnsafeCell<[u8; PAGE_SIZE]>]>,
	free: Mutex<Vec<usize>>,
}

// SAFETY: access to a given arena slot is exclusive at all times because a slot only ever hands
// out its `KAddr` while off the free list, and this mock is only ever used single-threaded in
// tests.
unsafe impl Sync for MockFrameAllocator {}

impl MockFrameAllocator {
	/// Builds a pool of `capacity` zeroed frames.
	pub fn new(capacity: usize) -> Self {
		let arena: Box<[UnsafeCell<[u8; PAGE_SIZE]>]> = (0..capacity)
			.map(|_| UnsafeCell::new([0u8; PAGE_SIZE]))
			.collect::<Vec<_>>()
			.into_boxed_slice();
		let free = (0..capacity).rev().collect();
		Self {
			arena,
			free: Mutex::new(free),
		}
	}

	fn kaddr_of(&self, idx: usize) -> KAddr {
		KAddr(self.arena[idx].get() as usize)
	}

	fn index_of(&self, kaddr: KAddr) -> usize {
		let base = self.arena.as_ptr() as usize;
		(kaddr.0 - base) / PAGE_SIZE
	}
}

impl PhysFrameAllocator for MockFrameAllocator {
	fn alloc_user_frame(&self) -> Option<KAddr> {
		let idx = self.free.lock().pop()?;
		let kaddr = self.kaddr_of(idx);
		unsafe { core::ptr::write_bytes(kaddr.0 as *mut u8, 0, PAGE_SIZE) };
		Some(kaddr)
	}

	fn free_user_frame(&self, kaddr: KAddr) {
		let idx = self.index_of(kaddr);
		self.free.lock().push(idx);
	}
}

struct PteState {
	kaddr: KAddr,
	writable: bool,
	accessed: bool,
	dirty: bool,
}

/// A hardware page table backed by a plain map instead of real multi-level page-table walks.
pub struct MockHardwarePageTable {
	entries: Mutex<BTreeMap<VirtAddr, PteState>>,
}

impl MockHardwarePageTable {
	/// Creates an empty page table.
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(BTreeMap::new()),
		}
	}

	/// Simulates a user memory access at `uaddr`, the way real hardware would set A (and D, for
	/// a write) on the next access after either bit was cleared.
	///
	/// # Panics
	/// Panics if `uaddr` is not currently mapped.
	pub fn touch(&self, uaddr: VirtAddr, write: bool) {
		let mut entries = self.entries.lock();
		let e = entries
			.get_mut(&uaddr)
			.expect("touch on an address with no hardware mapping");
		e.accessed = true;
		if write {
			e.dirty = true;
		}
	}
}

impl Default for MockHardwarePageTable {
	fn default() -> Self {
		Self::new()
	}
}

impl HardwarePageTable for MockHardwarePageTable {
	fn set_page(&self, uaddr: VirtAddr, kaddr: KAddr, writable: bool) -> Option<()> {
		self.entries.lock().insert(
			uaddr,
			PteState {
				kaddr,
				writable,
				accessed: false,
				dirty: false,
			},
		);
		Some(())
	}

	fn clear_page(&self, uaddr: VirtAddr) {
		self.entries.lock().remove(&uaddr);
	}

	fn flags(&self, uaddr: VirtAddr) -> Option<PteFlags> {
		self.entries.lock().get(&uaddr).map(|e| {
			let mut flags = PteFlags::PRESENT | PteFlags::USER;
			flags.set(PteFlags::WRITABLE, e.writable);
			flags.set(PteFlags::ACCESSED, e.accessed);
			flags.set(PteFlags::DIRTY, e.dirty);
			flags
		})
	}

	fn kaddr_of(&self, uaddr: VirtAddr) -> Option<KAddr> {
		self.entries.lock().get(&uaddr).map(|e| e.kaddr)
	}

	fn clear_accessed(&self, uaddr: VirtAddr) {
		if let Some(e) = self.entries.lock().get_mut(&uaddr) {
			e.accessed = false;
		}
	}

	fn set_accessed(&self, uaddr: VirtAddr, accessed: bool) {
		if let Some(e) = self.entries.lock().get_mut(&uaddr) {
			e.accessed = accessed;
		}
	}
}

/// A block device backed by a single in-memory buffer.
pub struct MockBlockDevice {
	sector_size: usize,
	data: Mutex<Vec<u8>>,
}

impl MockBlockDevice {
	/// Creates a device of `sector_count` sectors of `sector_size` bytes each, zeroed.
	pub fn new(sector_size: usize, sector_count: u64) -> Self {
		Self {
			sector_size,
			data: Mutex::new(vec![0u8; sector_size * sector_count as usize]),
		}
	}
}

impl BlockDevice for MockBlockDevice {
	fn block_read(&self, sector: u64, buf: &mut [u8]) -> Result<(), BlockIoError> {
		let data = self.data.lock();
		let start = sector as usize * self.sector_size;
		let end = start + buf.len();
		if end > data.len() {
			return Err(BlockIoError);
		}
		buf.copy_from_slice(&data[start..end]);
		Ok(())
	}

	fn block_write(&self, sector: u64, buf: &[u8]) -> Result<(), BlockIoError> {
		let mut data = self.data.lock();
		let start = sector as usize * self.sector_size;
		let end = start + buf.len();
		if end > data.len() {
			return Err(BlockIoError);
		}
		data[start..end].copy_from_slice(buf);
		Ok(())
	}

	fn sector_size(&self) -> usize {
		self.sector_size
	}

	fn sector_count(&self) -> u64 {
		(self.data.lock().len() / self.sector_size) as u64
	}
}

/// A file handle backed by a single in-memory buffer.
pub struct MockFile {
	data: Mutex<Vec<u8>>,
}

impl MockFile {
	/// Creates a file with the given initial contents.
	pub fn new(data: Vec<u8>) -> Self {
		Self {
			data: Mutex::new(data),
		}
	}

	/// Returns a snapshot of the file's current contents, for test assertions.
	pub fn contents(&self) -> Vec<u8> {
		self.data.lock().clone()
	}
}

impl FileHandle for MockFile {
	fn file_read_at(&self, buf: &mut [u8], off: u64) -> Result<usize, BlockIoError> {
		let data = self.data.lock();
		let off = off as usize;
		if off >= data.len() {
			return Ok(0);
		}
		let n = min(buf.len(), data.len() - off);
		buf[..n].copy_from_slice(&data[off..off + n]);
		Ok(n)
	}

	fn file_write_at(&self, buf: &[u8], off: u64) -> Result<(), BlockIoError> {
		let mut data = self.data.lock();
		let off = off as usize;
		if data.len() < off + buf.len() {
			data.resize(off + buf.len(), 0);
		}
		data[off..off + buf.len()].copy_from_slice(buf);
		Ok(())
	}
}

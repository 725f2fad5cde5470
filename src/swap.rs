//! The swap area: a bitmap of page-sized slots over a block device.
//!
//! There is no overcommit policy here. If the bitmap has no clear bit, [`SwapArea::swap_out`]
//! panics: by the time a page reaches eviction, the kernel has already decided it must go
//! somewhere, and this crate has no OOM-killer to hand the failure to (see the error handling
//! notes in the crate root).

use crate::{addr::KAddr, hal::BlockDevice, sync::Mutex, PAGE_SIZE};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::slice;

/// Identifies a single page-sized slot in the swap area.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SwapId(usize);

/// A bitmap-backed allocator of page-sized slots on a block device.
///
/// Owns its device through an `Arc` for the same reason [`crate::frame::FrameTable`] owns its
/// allocator that way: this is a shared singleton, not something scoped to one stack frame.
pub struct SwapArea {
	device: Arc<dyn BlockDevice>,
	sectors_per_slot: usize,
	/// `true` at index `i` iff slot `i` currently holds live page contents.
	bitmap: Mutex<Vec<bool>>,
}

impl SwapArea {
	/// Builds a swap area spanning the whole of `device`.
	///
	/// # Panics
	/// Panics if the page size is not a multiple of the device's sector size.
	pub fn new(device: Arc<dyn BlockDevice>) -> Self {
		let sector_size = device.sector_size();
		assert_eq!(
			PAGE_SIZE % sector_size,
			0,
			"swap device sector size must divide the page size"
		);
		let sectors_per_slot = PAGE_SIZE / sector_size;
		let slot_count = (device.sector_count() as usize) / sectors_per_slot;
		Self {
			device,
			sectors_per_slot,
			bitmap: Mutex::new(vec![false; slot_count]),
		}
	}

	/// The total number of slots this swap area can hold.
	pub fn slot_count(&self) -> usize {
		self.bitmap.lock().len()
	}

	/// The number of slots currently holding live contents.
	pub fn used_count(&self) -> usize {
		self.bitmap.lock().iter().filter(|b| **b).count()
	}

	fn slot_range(&self, slot: usize) -> (u64, usize) {
		(
			(slot * self.sectors_per_slot) as u64,
			self.sectors_per_slot,
		)
	}

	fn write_slot(&self, slot: usize, buf: &[u8]) {
		let (start, count) = self.slot_range(slot);
		let sector_size = self.device.sector_size();
		for i in 0..count {
			let chunk = &buf[i * sector_size..(i + 1) * sector_size];
			self.device
				.block_write(start + i as u64, chunk)
				.expect("swap device write failed");
		}
	}

	fn read_slot(&self, slot: usize, buf: &mut [u8]) {
		let (start, count) = self.slot_range(slot);
		let sector_size = self.device.sector_size();
		for i in 0..count {
			let chunk = &mut buf[i * sector_size..(i + 1) * sector_size];
			self.device
				.block_read(start + i as u64, chunk)
				.expect("swap device read failed");
		}
	}

	/// Writes the page at `kaddr` out to a fresh slot and returns its id.
	///
	/// # Safety
	/// `kaddr` must point to a valid, readable, page-sized frame for the duration of the call.
	///
	/// # Panics
	/// Panics if every slot is in use.
	pub unsafe fn swap_out(&self, kaddr: KAddr) -> SwapId {
		let slot = {
			let mut bitmap = self.bitmap.lock();
			let slot = bitmap
				.iter()
				.position(|used| !used)
				.expect("swap area exhausted");
			bitmap[slot] = true;
			slot
		};
		let buf = slice::from_raw_parts(kaddr.0 as *const u8, PAGE_SIZE);
		self.write_slot(slot, buf);
		SwapId(slot)
	}

	/// Reads slot `id` back into the frame at `kaddr` and releases the slot.
	///
	/// # Safety
	/// `kaddr` must point to a valid, writable, page-sized frame for the duration of the call.
	///
	/// # Panics
	/// Panics if `id` does not currently hold live contents.
	pub unsafe fn swap_in(&self, id: SwapId, kaddr: KAddr) {
		{
			let bitmap = self.bitmap.lock();
			assert!(bitmap[id.0], "swap_in on a slot that holds no data");
		}
		let buf = slice::from_raw_parts_mut(kaddr.0 as *mut u8, PAGE_SIZE);
		self.read_slot(id.0, buf);
		self.bitmap.lock()[id.0] = false;
	}

	/// Releases slot `id` without reading it back, e.g. when a page is discarded outright.
	pub fn discard(&self, id: SwapId) {
		let mut bitmap = self.bitmap.lock();
		assert!(bitmap[id.0], "discard on a slot that holds no data");
		bitmap[id.0] = false;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock::MockBlockDevice;

	#[test]
	fn out_then_in_round_trips() {
		let dev: Arc<dyn crate::hal::BlockDevice> =
			Arc::new(MockBlockDevice::new(512, 4 * (PAGE_SIZE / 512) as u64));
		let swap = SwapArea::new(dev);
		assert_eq!(swap.slot_count(), 4);

		let mut page = vec![0u8; PAGE_SIZE];
		page[0] = 0xAA;
		let kaddr = KAddr(page.as_mut_ptr() as usize);
		let id = unsafe { swap.swap_out(kaddr) };
		assert_eq!(swap.used_count(), 1);

		let mut out = vec![0u8; PAGE_SIZE];
		let out_kaddr = KAddr(out.as_mut_ptr() as usize);
		unsafe { swap.swap_in(id, out_kaddr) };
		assert_eq!(out[0], 0xAA);
		assert_eq!(swap.used_count(), 0);
	}

	#[test]
	#[should_panic(expected = "swap area exhausted")]
	fn exhaustion_panics() {
		let dev: Arc<dyn crate::hal::BlockDevice> =
			Arc::new(MockBlockDevice::new(512, (PAGE_SIZE / 512) as u64));
		let swap = SwapArea::new(dev);
		let mut page = vec![0u8; PAGE_SIZE];
		let kaddr = KAddr(page.as_mut_ptr() as usize);
		unsafe {
			swap.swap_out(kaddr);
			swap.swap_out(kaddr);
		}
	}
}

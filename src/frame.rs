//! The global frame table and two-handed CLOCK eviction.
//!
//! A frame record back-points to the page it backs through a [`PageOwner`] trait object rather
//! than a concrete address space, so the frame table never needs to be generic over every
//! process's particular [`crate::hal::HardwarePageTable`] implementation; see the crate-level
//! design notes for why this cycle is broken this way.

use crate::{addr::VirtAddr, addr::KAddr, hal::PhysFrameAllocator, sync::Mutex};
use alloc::{sync::Arc, vec::Vec};

/// The hooks [`FrameTable::evict`] needs from whatever owns a resident page: enough to read its
/// hardware A/D bits and to detach it from its process when chosen as a victim.
///
/// Implemented by [`crate::space::AddressSpace`].
pub trait PageOwner: Send + Sync {
	/// Reads the hardware accessed bit for `uaddr`.
	fn accessed(&self, uaddr: VirtAddr) -> bool;

	/// Clears the hardware accessed bit for `uaddr`.
	fn clear_accessed(&self, uaddr: VirtAddr);

	/// Reads the hardware dirty bit for `uaddr`.
	fn dirty(&self, uaddr: VirtAddr) -> bool;

	/// Detaches the resident page at `uaddr`: clears its hardware mapping, writes its contents
	/// out to whichever backing store it now belongs in (swap, or its file for a dirty
	/// writeback mapping), and marks it non-resident. Called with the frame table's lock held.
	fn unload(&self, uaddr: VirtAddr);
}

struct FrameRecord {
	kaddr: KAddr,
	uaddr: VirtAddr,
	owner: Arc<dyn PageOwner>,
	/// `true` while the page is still being loaded: its contents are not filled in yet and it has
	/// no hardware mapping, so `owner.accessed`/`owner.dirty` both read `false` for it regardless
	/// of its real state. `evict` must never choose a pinned record.
	pinned: bool,
}

/// The global table of resident user frames and the two-handed CLOCK eviction policy over them.
///
/// Owns its allocator through an `Arc` rather than a borrowed reference: the frame table, the
/// swap area and every process's address space are meant to be constructed once by the
/// embedding kernel and shared, and a plain lifetime-scoped reference here would force this
/// crate's test harness (and every `AddressSpace`, which must hand the frame table an
/// `Arc<dyn PageOwner>` pointing at itself) into the same borrowed lifetime, which does not
/// work once the table is asked to outlive a single stack frame.
pub struct FrameTable {
	allocator: Arc<dyn PhysFrameAllocator>,
	records: Mutex<Vec<FrameRecord>>,
}

impl FrameTable {
	/// Creates an empty frame table backed by `allocator`.
	pub fn new(allocator: Arc<dyn PhysFrameAllocator>) -> Self {
		Self {
			allocator,
			records: Mutex::new(Vec::new()),
		}
	}

	/// The number of frames currently tracked.
	pub fn resident_count(&self) -> usize {
		self.records.lock().len()
	}

	/// Allocates a frame to back the page at `uaddr`, owned by `owner`, evicting a victim if the
	/// physical allocator is out of free frames.
	///
	/// The returned frame is recorded pinned: `evict` will not consider it until the caller calls
	/// [`Self::unpin`], once the page's contents are filled and it is actually resident. Without
	/// this, a concurrent `evict` could pick the frame while it is still mid-load (its owner
	/// reports `accessed == false` and `dirty == false` before a hardware mapping even exists for
	/// it) and call [`PageOwner::unload`] on a page that was never made resident.
	///
	/// # Panics
	/// Panics if the physical allocator is still out of frames immediately after an eviction:
	/// by construction eviction always frees exactly one frame, so this indicates a logic bug
	/// (e.g. a leaked frame record) rather than legitimate memory pressure.
	pub fn frame_alloc(&self, uaddr: VirtAddr, owner: Arc<dyn PageOwner>) -> KAddr {
		let kaddr = match self.allocator.alloc_user_frame() {
			Some(kaddr) => kaddr,
			None => {
				self.evict();
				self.allocator
					.alloc_user_frame()
					.expect("physical allocator exhausted immediately after an eviction")
			}
		};
		self.records.lock().push(FrameRecord {
			kaddr,
			uaddr,
			owner,
			pinned: true,
		});
		kaddr
	}

	/// Unpins a frame previously returned by [`Self::frame_alloc`], making it eligible for
	/// eviction again. Callers must only do this once the page is actually resident.
	///
	/// # Panics
	/// Panics if `kaddr` is not currently tracked by this table.
	pub fn unpin(&self, kaddr: KAddr) {
		let mut records = self.records.lock();
		let record = records
			.iter_mut()
			.find(|r| r.kaddr == kaddr)
			.expect("unpin on a frame the table is not tracking");
		record.pinned = false;
	}

	/// Releases a frame previously returned by [`Self::frame_alloc`] back to the physical
	/// allocator.
	///
	/// # Panics
	/// Panics if `kaddr` is not currently tracked by this table.
	pub fn frame_free(&self, kaddr: KAddr) {
		let mut records = self.records.lock();
		let idx = records
			.iter()
			.position(|r| r.kaddr == kaddr)
			.expect("frame_free on a frame the table is not tracking");
		records.remove(idx);
		drop(records);
		self.allocator.free_user_frame(kaddr);
	}

	/// Runs two-handed CLOCK to pick a victim frame, detaches it from its owning page via
	/// [`PageOwner::unload`], and returns the now-free frame to the physical allocator.
	///
	/// The table's lock is held across victim selection and the call to `unload`, so two
	/// concurrent evictions can never choose the same victim.
	///
	/// # Panics
	/// Panics if the frame table is empty: eviction is only ever requested because the physical
	/// allocator just reported exhaustion, so an empty table at that point is a logic bug. Also
	/// panics if every resident frame is currently pinned by a concurrent `frame_alloc`/`load`,
	/// since no frame could be chosen as a victim and the scan below would otherwise spin forever.
	pub fn evict(&self) -> KAddr {
		let mut records = self.records.lock();
		assert!(
			!records.is_empty(),
			"eviction requested but no frame is resident"
		);
		assert!(
			records.iter().any(|r| !r.pinned),
			"eviction requested but every resident frame is pinned by a concurrent load"
		);
		let victim_idx = loop {
			if let Some(i) = records
				.iter()
				.position(|r| !r.pinned && !r.owner.accessed(r.uaddr) && !r.owner.dirty(r.uaddr))
			{
				break i;
			}
			if let Some(i) = records.iter().position(|r| {
				if r.pinned {
					false
				} else if r.owner.accessed(r.uaddr) {
					r.owner.clear_accessed(r.uaddr);
					false
				} else {
					true
				}
			}) {
				break i;
			}
		};
		let victim = records.remove(victim_idx);
		crate::println!(
			"vm: evicting frame {:?} (uaddr {:?})",
			victim.kaddr,
			victim.uaddr
		);
		victim.owner.unload(victim.uaddr);
		drop(records);
		self.allocator.free_user_frame(victim.kaddr);
		victim.kaddr
	}
}

//! Crate-wide recoverable error type.
//!
//! The fatal conditions of this subsystem (swap exhaustion, physical allocator exhaustion after
//! an eviction) are not represented here: they are logic-level invariant violations this crate
//! has no policy to recover from, and stay as panics. `Errno` covers the paths a caller is
//! expected to actually handle: a bad registration, a bad argument, or a collaborator (block
//! device, file) reporting failure.

use core::fmt;

/// A recoverable error produced by the virtual memory subsystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Errno {
	/// A page already exists for the given address.
	AlreadyMapped,
	/// An argument given to a registration call is invalid (misaligned address, zero size,
	/// negative offset, reserved file descriptor, ...).
	InvalidArgument,
	/// A collaborator (block device or file handle) reported an I/O failure.
	Io,
	/// The identifier given does not refer to a live mmap region.
	NoSuchMapping,
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::AlreadyMapped => "a page is already registered at this address",
			Self::InvalidArgument => "invalid argument",
			Self::Io => "I/O error",
			Self::NoSuchMapping => "no such mmap region",
		};
		f.write_str(s)
	}
}

/// The result type used throughout this crate for recoverable failures.
pub type VmResult<T> = Result<T, Errno>;

/// Builds a `Err(Errno::$variant)`, mirroring the call-site ergonomics of returning a bare error
/// code.
#[macro_export]
macro_rules! errno {
	($variant:ident) => {
		Err($crate::error::Errno::$variant)
	};
}

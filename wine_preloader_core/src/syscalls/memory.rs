// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Virtual memory syscalls

use crate::Result;

/// Virtual memory operations needed to reserve address ranges
///
/// Addresses are plain integers; the preloader never dereferences the ranges
/// it reserves.
pub trait VirtualMemory {
    /// Host page size in bytes
    fn page_size(&self) -> u64;

    /// Map `size` bytes of inaccessible anonymous private memory
    ///
    /// Maps to `mmap(addr, size, PROT_NONE, MAP_PRIVATE | MAP_ANON)`, with
    /// `MAP_FIXED` added when `fixed` is set. Without `fixed` the address is
    /// only a hint and the host may place the mapping elsewhere; the actual
    /// address is returned.
    fn reserve(&mut self, address: u64, size: u64, fixed: bool) -> Result<u64>;

    /// Remove a mapping
    ///
    /// Maps to `munmap()`
    fn unmap(&mut self, address: u64, size: u64) -> Result<()>;

    /// Report page residency of a range
    ///
    /// Maps to `mincore()`: one byte per page is written to `pages`, bit 0 set
    /// when the page is resident. Fails when part of the range is unmapped.
    fn residency(&mut self, address: u64, size: u64, pages: &mut [u8]) -> Result<()>;
}


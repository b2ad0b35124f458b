// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Anonymous `PROT_NONE` mappings through libc

use core::ffi::c_void;

use wine_preloader_core::Result;
use wine_preloader_core::syscalls::VirtualMemory;

use crate::PlatformError;

const DEFAULT_PAGE_SIZE: u64 = 0x1000;

/// Host virtual memory
#[derive(Debug, Clone, Copy)]
pub struct UnixVirtualMemory {
    page_size: u64,
}

impl UnixVirtualMemory {
    pub fn new() -> Self {
        // SAFETY: sysconf has no preconditions
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            page_size: u64::try_from(page_size)
                .ok()
                .filter(|&size| size > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }
}

impl Default for UnixVirtualMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_ptr(address: u64) -> *mut c_void {
    address as usize as *mut c_void
}

#[allow(clippy::cast_possible_truncation)]
fn as_len(size: u64) -> usize {
    size as usize
}

impl VirtualMemory for UnixVirtualMemory {
    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn reserve(&mut self, address: u64, size: u64, fixed: bool) -> Result<u64> {
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANON;
        if fixed {
            flags |= libc::MAP_FIXED;
        }

        // SAFETY: the mapping is inaccessible and only ever placed over
        // ranges the preloader owns or has checked to be empty
        let mapped = unsafe {
            libc::mmap(as_ptr(address), as_len(size), libc::PROT_NONE, flags, -1, 0)
        };
        if mapped == libc::MAP_FAILED {
            return Err(PlatformError::last_os_error("mmap").into());
        }
        Ok(mapped as u64)
    }

    fn unmap(&mut self, address: u64, size: u64) -> Result<()> {
        // SAFETY: callers only unmap ranges returned by `reserve`
        let result = unsafe { libc::munmap(as_ptr(address), as_len(size)) };
        if result != 0 {
            return Err(PlatformError::last_os_error("munmap").into());
        }
        Ok(())
    }

    fn residency(&mut self, address: u64, size: u64, pages: &mut [u8]) -> Result<()> {
        let needed = as_len(size.div_ceil(self.page_size));
        if pages.len() < needed {
            return Err(PlatformError::Syscall {
                call: "mincore",
                source: std::io::Error::from_raw_os_error(libc::EINVAL),
            }
            .into());
        }

        // SAFETY: `pages` holds one byte for every page of the range
        let result = unsafe {
            libc::mincore(as_ptr(address) as _, as_len(size), pages.as_mut_ptr().cast())
        };
        if result != 0 {
            return Err(PlatformError::last_os_error("mincore").into());
        }
        Ok(())
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_page_size() {
        let memory = UnixVirtualMemory::new();
        assert!(memory.page_size().is_power_of_two());
        assert!(memory.page_size() >= 0x1000);
    }

    #[test]
    fn test_reserve_probe_and_unmap() {
        let mut memory = UnixVirtualMemory::new();
        let page = memory.page_size();

        let address = memory.reserve(0, 4 * page, false).unwrap();
        assert_ne!(address, 0);

        let mut pages = [0u8; 4];
        memory.residency(address, 4 * page, &mut pages).unwrap();
        // nothing was ever touched
        assert!(pages.iter().all(|page| page & 1 == 0));

        memory.unmap(address, 4 * page).unwrap();
    }

    #[test]
    fn test_residency_rejects_short_buffer() {
        let mut memory = UnixVirtualMemory::new();
        let page = memory.page_size();
        let mut pages = [0u8; 1];
        assert!(memory.residency(0x1000_0000, 2 * page, &mut pages).is_err());
    }
}

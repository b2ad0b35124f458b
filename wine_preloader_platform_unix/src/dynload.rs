// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host dynamic loader (`dlopen` and friends)

use core::ffi::{CStr, c_void};
use std::ffi::CString;

use wine_preloader_core::Result;
use wine_preloader_core::syscalls::{DynamicLoader, LibraryHandle};

use crate::PlatformError;

/// Loads binaries through the host's `libdl`
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixDynamicLoader;

impl UnixDynamicLoader {
    pub fn new() -> Self {
        Self
    }
}

fn c_string(value: &str) -> core::result::Result<CString, PlatformError> {
    CString::new(value).map_err(|_| PlatformError::InvalidCString(value.to_string()))
}

/// Text of the most recent `dl*` failure
fn last_dl_error() -> String {
    // SAFETY: dlerror returns NULL or a NUL-terminated string that stays
    // valid until the next dl* call on this thread
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return "unknown dynamic loader error".to_string();
    }
    // SAFETY: checked for NULL above
    unsafe { CStr::from_ptr(message) }
        .to_string_lossy()
        .into_owned()
}

#[allow(clippy::cast_possible_truncation)]
fn handle_ptr(handle: LibraryHandle) -> *mut c_void {
    handle.0 as usize as *mut c_void
}

impl DynamicLoader for UnixDynamicLoader {
    fn open(&mut self, path: &str) -> Result<LibraryHandle> {
        let c_path = c_string(path)?;

        // SAFETY: c_path is a valid C string; running the binary's
        // initializers is the point of loading it
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(PlatformError::Dlopen {
                path: path.to_string(),
                reason: last_dl_error(),
            }
            .into());
        }
        Ok(LibraryHandle(handle as u64))
    }

    fn symbol(&mut self, handle: LibraryHandle, name: &str) -> Option<u64> {
        let c_name = c_string(name).ok()?;

        // SAFETY: handle came from dlopen and c_name is a valid C string
        let address = unsafe { libc::dlsym(handle_ptr(handle), c_name.as_ptr()) };
        (!address.is_null()).then_some(address as u64)
    }

    fn image_base_of(&mut self, address: u64) -> Option<u64> {
        // SAFETY: Dl_info is plain data; dladdr fills it in on success
        let mut info: libc::Dl_info = unsafe { core::mem::zeroed() };

        // SAFETY: dladdr only inspects the loader's own bookkeeping
        #[allow(clippy::cast_possible_truncation)]
        let found = unsafe { libc::dladdr(address as usize as *const c_void, &mut info) };
        if found == 0 || info.dli_fbase.is_null() {
            return None;
        }
        Some(info.dli_fbase as u64)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_binary() {
        let mut loader = UnixDynamicLoader::new();
        let error = loader.open("/nonexistent/wine_preloader/wine").unwrap_err();
        assert!(error.to_string().starts_with("/nonexistent/wine_preloader/wine: "));
    }

    #[test]
    fn test_open_rejects_nul() {
        let mut loader = UnixDynamicLoader::new();
        assert!(loader.open("wine\0loader").is_err());
    }

    #[test]
    fn test_image_base_of_own_function() {
        let mut loader = UnixDynamicLoader::new();
        let address = test_image_base_of_own_function as usize as u64;
        let base = loader.image_base_of(address).unwrap();
        assert!(base <= address);
    }

    #[test]
    fn test_image_base_of_unmapped_address() {
        let mut loader = UnixDynamicLoader::new();
        assert_eq!(loader.image_base_of(0x10), None);
    }
}

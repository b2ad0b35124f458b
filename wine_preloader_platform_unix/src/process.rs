// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Handing the process over to the loaded binary

use core::ffi::{c_char, c_int};
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStringExt;

use wine_preloader_core::PreloadTable;
use wine_preloader_core::reserve::WinePreloadInfo;

use crate::{PlatformError, Result};

/// C `main(argc, argv, envp)`
type MainFn = unsafe extern "C" fn(c_int, *const *const c_char, *const *const c_char) -> c_int;

/// Print `message` to stderr and exit with status 1
///
/// Uses raw `write(2)` and `_exit(2)`: the process may be half set up, with
/// reservations in place and a foreign binary loaded, so no destructors or
/// buffered streams are involved.
pub fn fatal_error(message: &str) -> ! {
    let mut line = Vec::with_capacity(message.len() + 1);
    line.extend_from_slice(message.as_bytes());
    if !message.ends_with('\n') {
        line.push(b'\n');
    }

    let mut written = 0;
    while written < line.len() {
        // SAFETY: the buffer is valid for the given length
        let result = unsafe {
            libc::write(
                libc::STDERR_FILENO,
                line[written..].as_ptr().cast(),
                line.len() - written,
            )
        };
        match usize::try_from(result) {
            Ok(count) if count > 0 => written += count,
            _ => break,
        }
    }

    // SAFETY: _exit has no preconditions
    unsafe { libc::_exit(1) }
}

/// Store the reservation table in the loaded binary's `wine_main_preload_info`
///
/// The exported array is leaked; it has to outlive the preloader.
///
/// # Safety
///
/// `slot` must be the address of a writable pointer-sized variable, as
/// returned by `dlsym` for `wine_main_preload_info`.
pub unsafe fn install_preload_info(slot: u64, table: &PreloadTable) -> *const WinePreloadInfo {
    let info: &'static mut [WinePreloadInfo] = Box::leak(table.to_ffi().into_boxed_slice());
    let array = info.as_ptr();

    #[allow(clippy::cast_possible_truncation)]
    let slot = slot as usize as *mut *const WinePreloadInfo;
    // SAFETY: guaranteed by the caller
    unsafe { slot.write(array) };
    array
}

fn c_strings(values: impl IntoIterator<Item = OsString>) -> Result<Vec<CString>> {
    values
        .into_iter()
        .map(|value| {
            CString::new(value.into_vec()).map_err(|e| {
                PlatformError::InvalidCString(String::from_utf8_lossy(&e.into_vec()).into_owned())
            })
        })
        .collect()
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(core::iter::once(core::ptr::null()))
        .collect()
}

/// Call a C `main` with the given arguments and the current environment
///
/// Returns `main`'s exit status.
///
/// # Safety
///
/// `entry` must be the address of a function with the C `main` signature
/// in a binary that has been fully loaded and initialized.
pub unsafe fn call_main(entry: u64, args: &[OsString]) -> Result<i32> {
    let argv = c_strings(args.iter().cloned())?;
    let envp = c_strings(std::env::vars_os().map(|(key, value)| {
        let mut pair = key;
        pair.push("=");
        pair.push(value);
        pair
    }))?;

    let argv_ptrs = null_terminated(&argv);
    let envp_ptrs = null_terminated(&envp);
    let argc = c_int::try_from(argv.len()).map_err(|_| PlatformError::Syscall {
        call: "main",
        source: std::io::Error::from_raw_os_error(libc::E2BIG),
    })?;

    #[allow(clippy::cast_possible_truncation)]
    // SAFETY: guaranteed by the caller
    let main: MainFn = unsafe { core::mem::transmute::<usize, MainFn>(entry as usize) };
    // SAFETY: argv and envp are NULL-terminated and outlive the call
    Ok(unsafe { main(argc, argv_ptrs.as_ptr(), envp_ptrs.as_ptr()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wine_preloader_core::PreloadRegion;

    #[test]
    fn test_install_preload_info() {
        let table = PreloadTable::from_entries([
            PreloadRegion::new(0x1_0000, 0x10_0000),
            PreloadRegion::new(0x7ff0_0000, 0xf_0000),
        ]);
        let mut slot: *const WinePreloadInfo = core::ptr::null();

        let array = unsafe { install_preload_info(&raw mut slot as usize as u64, &table) };

        assert_eq!(slot, array);
        let entries = unsafe { core::slice::from_raw_parts(slot, 3) };
        assert_eq!(entries[0].addr as usize, 0x1_0000);
        assert_eq!(entries[1].size, 0xf_0000);
        assert_eq!(entries[2].size, 0);
        assert!(entries[2].addr.is_null());
    }

    extern "C" fn count_args(
        argc: c_int,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> c_int {
        // SAFETY: call_main passes NULL-terminated arrays
        unsafe {
            assert!((*argv.add(argc as usize)).is_null());
            assert!(!envp.is_null());
            let first = core::ffi::CStr::from_ptr(*argv.add(1));
            assert_eq!(first.to_bytes(), b"notepad.exe");
        }
        argc + 40
    }

    #[test]
    fn test_call_main() {
        let args = [OsString::from("wine"), OsString::from("notepad.exe")];
        let status = unsafe { call_main(count_args as usize as u64, &args) }.unwrap();
        assert_eq!(status, 42);
    }

    #[test]
    fn test_call_main_rejects_nul() {
        let args = [OsString::from("wi\0ne")];
        assert!(unsafe { call_main(count_args as usize as u64, &args) }.is_err());
    }
}

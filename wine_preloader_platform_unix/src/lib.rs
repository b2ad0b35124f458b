// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Unix platform implementation for the Wine preloader
//!
//! This crate implements the core syscall traits on top of libc. It is the
//! only place that talks to the host directly:
//! - `mmap`/`munmap`/`mincore` for reservations ([`UnixVirtualMemory`])
//! - `dlopen`/`dlsym`/`dladdr` for loading the real binary ([`UnixDynamicLoader`])
//! - image discovery through the host loader ([`self_image_range`], [`binary_entry_point`])
//! - the hand-off and the fatal exit path ([`process`])

extern crate std;

pub mod dynload;
pub mod image;
pub mod memory;
pub mod process;

use std::io;

use thiserror::Error;
use wine_preloader_core::PreloaderError;

pub use dynload::UnixDynamicLoader;
pub use image::{binary_entry_point, self_image_range};
pub use memory::UnixVirtualMemory;
pub use process::{call_main, fatal_error, install_preload_info};

use wine_preloader_core::syscalls::{DynamicLoader, LibraryHandle, VirtualMemory};

/// Platform errors
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{call} failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{path}: {reason}")]
    Dlopen { path: String, reason: String },

    #[error("invalid C string {0:?}")]
    InvalidCString(String),
}

impl PlatformError {
    /// Capture `errno` for a failed call
    pub(crate) fn last_os_error(call: &'static str) -> Self {
        PlatformError::Syscall {
            call,
            source: io::Error::last_os_error(),
        }
    }
}

impl From<PlatformError> for PreloaderError {
    fn from(error: PlatformError) -> Self {
        match error {
            PlatformError::Syscall { call, source } => PreloaderError::Syscall {
                call,
                reason: source.to_string(),
            },
            PlatformError::Dlopen { path, reason } => PreloaderError::Loader { path, reason },
            PlatformError::InvalidCString(value) => PreloaderError::Loader {
                path: value,
                reason: "contains a NUL byte".to_string(),
            },
        }
    }
}

pub type Result<T> = core::result::Result<T, PlatformError>;

/// The host as seen by the preloader: memory and dynamic loader together
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPlatform {
    memory: UnixVirtualMemory,
    loader: UnixDynamicLoader,
}

impl UnixPlatform {
    pub fn new() -> Self {
        Self {
            memory: UnixVirtualMemory::new(),
            loader: UnixDynamicLoader::new(),
        }
    }
}

impl VirtualMemory for UnixPlatform {
    fn page_size(&self) -> u64 {
        self.memory.page_size()
    }

    fn reserve(&mut self, address: u64, size: u64, fixed: bool) -> wine_preloader_core::Result<u64> {
        self.memory.reserve(address, size, fixed)
    }

    fn unmap(&mut self, address: u64, size: u64) -> wine_preloader_core::Result<()> {
        self.memory.unmap(address, size)
    }

    fn residency(
        &mut self,
        address: u64,
        size: u64,
        pages: &mut [u8],
    ) -> wine_preloader_core::Result<()> {
        self.memory.residency(address, size, pages)
    }
}

impl DynamicLoader for UnixPlatform {
    fn open(&mut self, path: &str) -> wine_preloader_core::Result<LibraryHandle> {
        self.loader.open(path)
    }

    fn symbol(&mut self, handle: LibraryHandle, name: &str) -> Option<u64> {
        self.loader.symbol(handle, name)
    }

    fn image_base_of(&mut self, address: u64) -> Option<u64> {
        self.loader.image_base_of(address)
    }
}

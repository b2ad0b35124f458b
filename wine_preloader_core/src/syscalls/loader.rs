// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Dynamic loader interface

use crate::Result;

/// Opaque handle to a library opened through [`DynamicLoader::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryHandle(pub u64);

/// Host dynamic loader
///
/// Maps to `dlopen()` / `dlsym()` / `dladdr()`.
pub trait DynamicLoader {
    /// Load a binary with all symbols resolved immediately (`RTLD_NOW`)
    fn open(&mut self, path: &str) -> Result<LibraryHandle>;

    /// Look up an exported symbol, `None` when absent
    fn symbol(&mut self, handle: LibraryHandle, name: &str) -> Option<u64>;

    /// Base address of the image containing `address`
    fn image_base_of(&mut self, address: u64) -> Option<u64>;
}

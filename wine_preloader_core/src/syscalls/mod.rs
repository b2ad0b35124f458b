// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host syscall interface
//!
//! The preloader cannot assume a particular libc. Everything it needs from the
//! host goes through these traits, implemented by the platform layer
//! (`wine_preloader_platform_unix`) and by in-memory fakes in tests.

pub mod loader;
pub mod memory;

pub use loader::{DynamicLoader, LibraryHandle};
pub use memory::VirtualMemory;

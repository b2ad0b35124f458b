// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Executable image inspection
//!
//! The preloader reads just enough of two formats:
//! - Mach-O, for its own segment range and for the entry point of the binary
//!   it loads
//! - PE, for the address range a Windows executable wants, which becomes the
//!   `WINEPRELOADRESERVE` override

pub mod macho;
pub mod pe;

pub use macho::{MachImage, Segment};
pub use pe::{PeImage, PeSection};

/// A half-open address range occupied by a loaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRange {
    pub start: u64,
    pub end: u64,
}

impl ImageRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub const fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub const fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    /// Smallest range covering both
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// How control is transferred to a loaded binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// A C `main(argc, argv, envp, apple)` style function (`LC_MAIN`, or an
    /// exported `main` symbol)
    Main(u64),
    /// A raw process entry expecting the initial kernel stack layout
    /// (`LC_UNIXTHREAD`)
    UnixThread(u64),
}

impl EntryPoint {
    pub const fn address(&self) -> u64 {
        match self {
            EntryPoint::Main(address) | EntryPoint::UnixThread(address) => *address,
        }
    }
}

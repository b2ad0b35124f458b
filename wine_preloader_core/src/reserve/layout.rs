// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Fixed reservation layouts per host

use super::region::{PreloadRegion, PreloadTable};

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    MacOs,
    Linux,
}

/// Host CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostArch {
    X86,
    X86_64,
    Aarch64,
}

// x86_64 and aarch64 hosts share the low part of the layout.
const DOS_AREA: PreloadRegion = PreloadRegion::new(0x0001_0000, 0x0010_0000);
const LOW_MEMORY: PreloadRegion = PreloadRegion::new(0x0011_0000, 0x67ef_0000);
const SHARED_USER_DATA: PreloadRegion = PreloadRegion::new(0x7ff0_0000, 0x000f_0000);

/// The reservations required on a given host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadLayout {
    /// Regions reserved for the lifetime of the process
    pub regions: Vec<PreloadRegion>,
    /// Region held only while the binary is being loaded, so the host linker
    /// does not place libraries where builtin DLLs go
    pub transient: Option<PreloadRegion>,
}

impl PreloadLayout {
    /// Layout for an explicit host
    pub fn for_target(os: HostOs, arch: HostArch) -> Self {
        match (os, arch) {
            (HostOs::MacOs, HostArch::X86) => Self {
                regions: vec![
                    PreloadRegion::new(0x0000_0000, 0x0000_1000), // first page
                    PreloadRegion::new(0x0000_1000, 0x0000_f000), // low 64k
                    DOS_AREA,
                    LOW_MEMORY,
                    PreloadRegion::new(0x7f00_0000, 0x0300_0000), // top-down + shared heap
                ],
                transient: Some(PreloadRegion::new(0x7a00_0000, 0x0200_0000)),
            },
            (HostOs::MacOs, _) => Self {
                regions: vec![
                    DOS_AREA,
                    LOW_MEMORY,
                    SHARED_USER_DATA,
                    // Rosetta claims the 4GB line unless it is taken first
                    PreloadRegion::new(0x0001_0000_0000, 0x1400_0000),
                    PreloadRegion::new(0x7ff0_0000_0000, 0x01ff_0000),
                ],
                transient: None,
            },
            (HostOs::Linux, HostArch::X86) => Self {
                regions: vec![
                    PreloadRegion::new(0x0000_0000, 0x0001_0000), // low 64k
                    DOS_AREA,
                    LOW_MEMORY,
                    PreloadRegion::new(0x7f00_0000, 0x0300_0000),
                ],
                transient: None,
            },
            (HostOs::Linux, _) => Self {
                regions: vec![
                    DOS_AREA,
                    LOW_MEMORY,
                    SHARED_USER_DATA,
                    PreloadRegion::new(0x7fff_fe00_0000, 0x01ff_0000),
                ],
                transient: None,
            },
        }
    }

    /// Layout for the host this crate was compiled for
    pub fn host() -> Self {
        let os = if cfg!(target_os = "macos") {
            HostOs::MacOs
        } else {
            HostOs::Linux
        };
        let arch = if cfg!(target_arch = "x86") {
            HostArch::X86
        } else if cfg!(target_arch = "aarch64") {
            HostArch::Aarch64
        } else {
            HostArch::X86_64
        };
        Self::for_target(os, arch)
    }

    /// Build the reservation table from this layout
    pub fn table(&self) -> PreloadTable {
        PreloadTable::from_entries(self.regions.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts_are_sorted_and_disjoint() {
        for os in [HostOs::MacOs, HostOs::Linux] {
            for arch in [HostArch::X86, HostArch::X86_64, HostArch::Aarch64] {
                let layout = PreloadLayout::for_target(os, arch);
                for pair in layout.regions.windows(2) {
                    assert!(pair[0].end() <= pair[1].address, "{os:?}/{arch:?}: {pair:?}");
                }
                assert!(layout.regions.iter().all(|r| r.size % 0x1000 == 0));
            }
        }
    }

    #[test]
    fn test_macos_reserves_4gb_line() {
        let layout = PreloadLayout::for_target(HostOs::MacOs, HostArch::X86_64);
        assert!(layout.regions.iter().any(|r| r.address == 0x1_0000_0000));
        assert!(layout.transient.is_none());
    }

    #[test]
    fn test_i386_macos_has_zero_page_and_transient() {
        let layout = PreloadLayout::for_target(HostOs::MacOs, HostArch::X86);
        assert!(layout.regions[0].is_zero_page());
        assert!(layout.transient.is_some());
    }

    #[test]
    fn test_table_matches_layout() {
        let layout = PreloadLayout::host();
        assert_eq!(layout.table().as_slice(), layout.regions.as_slice());
    }
}

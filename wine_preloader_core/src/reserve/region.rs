// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Preload regions and the ordered reservation table

use core::ffi::c_void;
use core::fmt;

use super::parse::ReserveRange;
use crate::image::ImageRange;

/// Highest address still considered part of the low-memory reservations
/// that an override range may not overlap.
pub const LOW_MEMORY_LIMIT: u64 = 0x0011_0000;

/// An address range to reserve before the real binary is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadRegion {
    /// Start address (0 is the zero page)
    pub address: u64,
    /// Size in bytes (0 marks the end of a raw table)
    pub size: u64,
}

impl PreloadRegion {
    /// Create a new region
    pub const fn new(address: u64, size: u64) -> Self {
        Self { address, size }
    }

    /// The zero-sized end-of-list marker
    pub const fn sentinel() -> Self {
        Self::new(0, 0)
    }

    /// Whether this is the end-of-list marker
    pub const fn is_sentinel(&self) -> bool {
        self.size == 0
    }

    /// One past the last byte of the region
    pub const fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    /// Whether the region covers the zero page
    pub const fn is_zero_page(&self) -> bool {
        self.address < 0x1000
    }
}

impl fmt::Display for PreloadRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.address, self.end())
    }
}

/// C layout of one entry of the table handed to the loaded binary through
/// `wine_main_preload_info`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinePreloadInfo {
    pub addr: *mut c_void,
    pub size: usize,
}

/// Why an override range was not installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveRejection {
    /// The range overlaps the preloader's own segments
    OverlapsPreloader { range: ReserveRange, preloader: ImageRange },
    /// The range lies entirely inside or below the low-memory reservations
    InsideLowMemory { range: ReserveRange },
}

impl fmt::Display for ReserveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReserveRejection::OverlapsPreloader { range, preloader } => write!(
                f,
                "WINEPRELOADRESERVE range {:#x}-{:#x} overlaps preloader {:#x}-{:#x}",
                range.start, range.end, preloader.start, preloader.end
            ),
            ReserveRejection::InsideLowMemory { range } => write!(
                f,
                "WINEPRELOADRESERVE range {:#x}-{:#x} lies within the low memory area",
                range.start, range.end
            ),
        }
    }
}

/// Ordered table of regions to reserve
///
/// The table is consumed once by the reservation pass; regions that could not
/// be reserved are removed so that what remains matches the host mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadTable {
    regions: Vec<PreloadRegion>,
}

impl PreloadTable {
    /// Build a table from raw entries, stopping at the first zero-sized one
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = PreloadRegion>,
    {
        Self {
            regions: entries
                .into_iter()
                .take_while(|region| !region.is_sentinel())
                .collect(),
        }
    }

    /// Number of live regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the table has no live regions
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Get a region by index
    pub fn get(&self, index: usize) -> Option<&PreloadRegion> {
        self.regions.get(index)
    }

    /// Iterate over live regions in table order
    pub fn iter(&self) -> impl Iterator<Item = &PreloadRegion> {
        self.regions.iter()
    }

    /// Live regions as a slice
    pub fn as_slice(&self) -> &[PreloadRegion] {
        &self.regions
    }

    /// Remove the region at `index`, shifting the following entries down
    pub fn remove(&mut self, index: usize) -> Option<PreloadRegion> {
        (index < self.regions.len()).then(|| self.regions.remove(index))
    }

    /// Append a region after the existing entries
    ///
    /// Zero-sized regions are ignored since they would terminate the exported
    /// table early.
    pub fn push(&mut self, region: PreloadRegion) {
        if !region.is_sentinel() {
            self.regions.push(region);
        }
    }

    /// Splice an override range into the table
    ///
    /// Returns the region that was installed, `Ok(None)` for an empty range,
    /// or the reason the range was rejected.
    pub fn install_reserve(
        &mut self,
        range: ReserveRange,
        preloader: Option<ImageRange>,
    ) -> Result<Option<PreloadRegion>, ReserveRejection> {
        if range.is_empty() {
            return Ok(None);
        }

        if let Some(preloader) = preloader {
            if range.end > preloader.start && range.start <= preloader.end {
                return Err(ReserveRejection::OverlapsPreloader { range, preloader });
            }
        }

        let mut start = range.start;
        for low in self
            .regions
            .iter()
            .take_while(|region| region.address <= LOW_MEMORY_LIMIT)
        {
            if range.end <= low.end() {
                return Err(ReserveRejection::InsideLowMemory { range });
            }
            if start < low.end() {
                start = low.end();
            }
        }

        let region = PreloadRegion::new(start, range.end - start);
        self.push(region);
        Ok(Some(region))
    }

    /// Build the C array handed to the loaded binary, terminated by `{0, 0}`
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_ffi(&self) -> Vec<WinePreloadInfo> {
        self.regions
            .iter()
            .chain(core::iter::once(&PreloadRegion::sentinel()))
            .map(|region| WinePreloadInfo {
                addr: region.address as usize as *mut c_void,
                size: region.size as usize,
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a PreloadTable {
    type Item = &'a PreloadRegion;
    type IntoIter = core::slice::Iter<'a, PreloadRegion>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_like() -> PreloadTable {
        PreloadTable::from_entries([
            PreloadRegion::new(0x0001_0000, 0x0010_0000),
            PreloadRegion::new(0x0011_0000, 0x67ef_0000),
            PreloadRegion::new(0x7ff0_0000, 0x000f_0000),
        ])
    }

    #[test]
    fn test_from_entries_stops_at_sentinel() {
        let table = PreloadTable::from_entries([
            PreloadRegion::new(0x1000, 0x1000),
            PreloadRegion::sentinel(),
            PreloadRegion::new(0x5000, 0x1000),
        ]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut table = linux_like();
        let removed = table.remove(1).unwrap();
        assert_eq!(removed.address, 0x0011_0000);
        assert_eq!(table.get(0).unwrap().address, 0x0001_0000);
        assert_eq!(table.get(1).unwrap().address, 0x7ff0_0000);
        assert!(table.remove(5).is_none());

        let ffi = table.to_ffi();
        assert_eq!(ffi.len(), 3);
        assert_eq!(ffi[2], WinePreloadInfo { addr: core::ptr::null_mut(), size: 0 });
    }

    #[test]
    fn test_install_reserve_appends() {
        let mut table = linux_like();
        let installed = table
            .install_reserve(ReserveRange::new(0x1_4000_0000, 0x1_4010_0000), None)
            .unwrap()
            .unwrap();
        assert_eq!(installed, PreloadRegion::new(0x1_4000_0000, 0x10_0000));
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(3), Some(&installed));
    }

    #[test]
    fn test_install_reserve_overlapping_preloader() {
        let mut table = linux_like();
        let preloader = ImageRange::new(0x7c00_0000, 0x7c40_0000);
        let result =
            table.install_reserve(ReserveRange::new(0x7bf0_0000, 0x7c10_0000), Some(preloader));
        assert!(matches!(
            result,
            Err(ReserveRejection::OverlapsPreloader { .. })
        ));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_install_reserve_inside_low_memory() {
        let mut table = linux_like();
        let result = table.install_reserve(ReserveRange::new(0x1_0000, 0x2_0000), None);
        assert!(matches!(result, Err(ReserveRejection::InsideLowMemory { .. })));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_install_reserve_clips_low_memory_start() {
        let mut table = PreloadTable::from_entries([PreloadRegion::new(0x1_0000, 0x10_0000)]);
        let installed = table
            .install_reserve(ReserveRange::new(0x10_0000, 0x20_0000), None)
            .unwrap()
            .unwrap();
        assert_eq!(installed.address, 0x11_0000);
        assert_eq!(installed.end(), 0x20_0000);
    }

    #[test]
    fn test_install_empty_range_is_noop() {
        let mut table = linux_like();
        assert_eq!(table.install_reserve(ReserveRange::empty(), None), Ok(None));
        assert_eq!(table.len(), 3);
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Reserving table regions in the host address space

use super::region::{PreloadRegion, PreloadTable};
use crate::syscalls::VirtualMemory;

/// Pages covered by one `mincore` probe
const PROBE_BLOCK_PAGES: u64 = 1024;

/// Outcome of reserving a whole table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationReport {
    /// Regions that are now mapped, in table order
    pub reserved: Vec<PreloadRegion>,
    /// Regions that could not be mapped and were removed from the table
    pub dropped: Vec<PreloadRegion>,
}

impl ReservationReport {
    /// Warning lines for dropped regions, skipping the zero page
    pub fn warnings(&self) -> impl Iterator<Item = String> + '_ {
        self.dropped
            .iter()
            .filter(|region| !region.is_zero_page())
            .map(|region| format!("preloader: Warning: failed to reserve range {region}"))
    }
}

/// Check whether nothing is currently mapped in `region`
///
/// Probes in blocks of [`PROBE_BLOCK_PAGES`] pages. A failing probe means part
/// of the block is unmapped, which counts as empty.
pub fn is_region_empty<M: VirtualMemory + ?Sized>(memory: &mut M, region: &PreloadRegion) -> bool {
    let page_size = memory.page_size();
    let block = PROBE_BLOCK_PAGES * page_size;
    let mut pages = [0u8; PROBE_BLOCK_PAGES as usize];

    let mut pos = 0;
    while pos < region.size {
        let size = block.min(region.size - pos);
        #[allow(clippy::cast_possible_truncation)]
        let count = size.div_ceil(page_size) as usize;
        if memory
            .residency(region.address + pos, size, &mut pages[..count])
            .is_ok()
            && pages[..count].iter().any(|page| page & 1 != 0)
        {
            return false;
        }
        pos += size;
    }
    true
}

/// Reserve a single region with an inaccessible mapping
///
/// The zero page is always mapped with `MAP_FIXED`. Other addresses are first
/// passed as a hint; some hosts ignore the hint, so when the mapping lands
/// elsewhere and the target range is empty the call is retried with
/// `MAP_FIXED`.
pub fn map_region<M: VirtualMemory + ?Sized>(memory: &mut M, region: &PreloadRegion) -> bool {
    let mut fixed = region.address == 0;

    loop {
        if let Ok(actual) = memory.reserve(region.address, region.size, fixed) {
            if actual == region.address {
                return true;
            }
            let _ = memory.unmap(actual, region.size);
        }
        if fixed || !is_region_empty(memory, region) {
            return false;
        }
        fixed = true;
    }
}

/// Reserve every region of `table` in order
///
/// Regions that cannot be mapped are removed from the table; this never
/// fails as a whole.
pub fn reserve_all<M: VirtualMemory + ?Sized>(
    memory: &mut M,
    table: &mut PreloadTable,
) -> ReservationReport {
    let mut report = ReservationReport::default();
    let mut i = 0;

    while let Some(region) = table.get(i).copied() {
        if map_region(memory, &region) {
            report.reserved.push(region);
            i += 1;
        } else {
            table.remove(i);
            report.dropped.push(region);
        }
    }

    report
}

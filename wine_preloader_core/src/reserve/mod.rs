// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Address-space reservation
//!
//! Before the real binary is mapped, the ranges listed in a [`PreloadTable`]
//! are occupied with `PROT_NONE` mappings so that the host allocator cannot
//! hand them out. The table starts from a fixed per-host [`PreloadLayout`] and
//! may be extended once with the range given in `WINEPRELOADRESERVE`.

pub mod layout;
pub mod map;
pub mod parse;
pub mod region;

pub use layout::{HostArch, HostOs, PreloadLayout};
pub use map::{ReservationReport, is_region_empty, map_region, reserve_all};
pub use parse::{RESERVE_ENV_VAR, ReserveRange};
pub use region::{PreloadRegion, PreloadTable, ReserveRejection, WinePreloadInfo};

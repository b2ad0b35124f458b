// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! `WINEPRELOADRESERVE` parsing and formatting

use crate::{PreloaderError, Result};

/// Name of the environment variable carrying the override range
pub const RESERVE_ENV_VAR: &str = "WINEPRELOADRESERVE";

/// A page-aligned address range requested through `WINEPRELOADRESERVE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReserveRange {
    pub start: u64,
    pub end: u64,
}

impl ReserveRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// The no-op range (start = end = 0)
    pub const fn empty() -> Self {
        Self::new(0, 0)
    }

    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub const fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Round `start` down and `end` up to `page_size`
    ///
    /// Returns `None` when rounding `end` overflows. An inverted or empty
    /// range becomes [`ReserveRange::empty`].
    pub fn aligned(start: u64, end: u64, page_size: u64) -> Option<Self> {
        let page_mask = page_size - 1;
        let start = start & !page_mask;
        let end = end.checked_add(page_mask)? & !page_mask;
        if end <= start {
            return Some(Self::empty());
        }
        Some(Self::new(start, end))
    }

    /// Parse a `start-end` hex range
    ///
    /// The start is rounded down and the end rounded up to `page_size`. A lone
    /// value is only accepted when it is zero. An inverted or empty range
    /// parses to [`ReserveRange::empty`].
    pub fn parse(value: &str, page_size: u64) -> Result<Self> {
        let invalid = || PreloaderError::InvalidReserve(value.to_string());
        let mut result: u64 = 0;
        let mut start: Option<u64> = None;

        for c in value.chars() {
            if c == '-' {
                if start.is_some() {
                    return Err(invalid());
                }
                start = Some(result);
                result = 0;
                continue;
            }
            let digit = c.to_digit(16).ok_or_else(invalid)?;
            result = result
                .checked_mul(16)
                .and_then(|r| r.checked_add(u64::from(digit)))
                .ok_or_else(invalid)?;
        }

        let Some(start) = start else {
            // single value '0' is allowed
            return if result == 0 { Ok(Self::empty()) } else { Err(invalid()) };
        };

        Self::aligned(start, result, page_size).ok_or_else(invalid)
    }

    /// Format as the value of `WINEPRELOADRESERVE`
    ///
    /// Each bound is printed as its high half followed by the zero-padded low
    /// 32 bits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_env_value(&self) -> String {
        format!(
            "{:x}{:08x}-{:x}{:08x}",
            (self.start >> 32) as u32,
            self.start as u32,
            (self.end >> 32) as u32,
            self.end as u32
        )
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Preloader configuration

use crate::image::PeImage;
use crate::reserve::{RESERVE_ENV_VAR, ReserveRange};
use crate::tracing::{FilterRule, TraceCategory, TraceConfig, TraceFilter};
use crate::{PreloaderError, Result};
use std::path::PathBuf;

/// Everything that influences a preloader run besides the binary itself
#[derive(Debug, Clone, Default)]
pub struct PreloaderConfig {
    /// Raw `WINEPRELOADRESERVE` value
    pub reserve: Option<String>,
    /// PE image to derive the override range from when `reserve` is unset
    pub pe_image: Option<PathBuf>,
    /// Syscall tracing
    pub trace: TraceConfig,
    /// Glob restricting traced function names
    pub trace_pattern: Option<String>,
    /// Categories restricting traced calls
    pub trace_categories: Vec<TraceCategory>,
    /// Print the reservation table to stderr
    pub verbose: bool,
    /// Stop after reserving, without loading the binary
    pub dry_run: bool,
}

impl PreloaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick up `WINEPRELOADRESERVE` from a set of environment variables
    pub fn from_env<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let reserve = vars
            .into_iter()
            .find(|(key, _)| key.as_ref() == RESERVE_ENV_VAR)
            .map(|(_, value)| value.into());
        Self {
            reserve,
            ..Self::default()
        }
    }

    pub fn with_reserve(mut self, value: impl Into<String>) -> Self {
        self.reserve = Some(value.into());
        self
    }

    pub fn with_pe_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.pe_image = Some(path.into());
        self
    }

    pub fn with_trace(mut self, trace: TraceConfig) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_trace_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.trace_pattern = Some(pattern.into());
        self
    }

    pub fn with_trace_category(mut self, category: TraceCategory) -> Self {
        if !self.trace_categories.contains(&category) {
            self.trace_categories.push(category);
        }
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Build the trace filter from the pattern and category settings
    pub fn trace_filter(&self) -> TraceFilter {
        let mut filter = TraceFilter::new();
        if let Some(pattern) = &self.trace_pattern {
            filter = filter.add_rule(FilterRule::Pattern(pattern.clone()));
        }
        if !self.trace_categories.is_empty() {
            filter = filter.add_rule(FilterRule::Category(self.trace_categories.clone()));
        }
        filter
    }

    /// Resolve the override range
    ///
    /// An explicit `WINEPRELOADRESERVE` value wins over `pe_image`; with
    /// neither set the range is empty.
    pub fn reserve_range(&self, page_size: u64) -> Result<ReserveRange> {
        if let Some(value) = &self.reserve {
            return ReserveRange::parse(value, page_size);
        }
        let Some(path) = &self.pe_image else {
            return Ok(ReserveRange::empty());
        };
        let data = std::fs::read(path).map_err(|e| PreloaderError::Loader {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        PeImage::parse(&data)?.reserve_range(page_size)
    }
}

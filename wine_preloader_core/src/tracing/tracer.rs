// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Event sink shared by every traced call

use std::io::{self, Write};
use std::sync::Mutex;

use super::config::{TraceConfig, TraceFormat};
use super::event::TraceEvent;
use super::filter::TraceFilter;
use super::formatter::TraceFormatter;

/// Writes filtered, formatted trace events to the configured output
///
/// A disabled tracer never opens its output.
pub struct Tracer {
    enabled: bool,
    filter: TraceFilter,
    formatter: Box<dyn TraceFormatter + Send + Sync>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl Tracer {
    pub fn new(config: TraceConfig, filter: TraceFilter) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = if config.enabled {
            config.output.open()?
        } else {
            Box::new(io::sink())
        };

        Ok(Self {
            enabled: config.enabled,
            filter,
            formatter: config.format.formatter(config.include_timestamps),
            writer: Mutex::new(writer),
        })
    }

    /// A tracer that drops everything
    pub fn disabled() -> Self {
        let sink: Box<dyn Write + Send> = Box::new(io::sink());
        Self {
            enabled: false,
            filter: TraceFilter::default(),
            formatter: TraceFormat::Text.formatter(false),
            writer: Mutex::new(sink),
        }
    }

    /// Record one event if it passes the filter
    ///
    /// Write errors are dropped; a broken trace output must not change the
    /// reservation.
    pub fn trace(&self, event: TraceEvent) {
        if !self.enabled || !self.filter.should_trace(&event) {
            return;
        }

        if let Ok(mut writer) = self.writer.lock() {
            let _ = self.formatter.format(&event, &mut **writer);
            let _ = writer.flush();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::{FilterRule, TraceCategory, TraceOutput};

    #[test]
    fn test_tracer_disabled() {
        assert!(!Tracer::disabled().is_enabled());
    }

    #[test]
    fn test_disabled_tracer_leaves_output_alone() {
        let path = std::env::temp_dir().join("wine_preloader_tracer_never_opened.txt");
        let _ = std::fs::remove_file(&path);

        let config = TraceConfig::default().with_output(TraceOutput::File(path.clone()));
        let tracer = Tracer::new(config, TraceFilter::default()).unwrap();
        tracer.trace(TraceEvent::call("mmap", TraceCategory::Reserve));

        assert!(!tracer.is_enabled());
        assert!(!path.exists());
    }

    #[test]
    fn test_tracer_writes_filtered_events_to_file() {
        let path = std::env::temp_dir().join("wine_preloader_tracer_unit.txt");
        let _ = std::fs::remove_file(&path);

        let config = TraceConfig::enabled()
            .with_timestamps(false)
            .with_output(TraceOutput::File(path.clone()));
        let filter = TraceFilter::new().add_rule(FilterRule::Category(vec![TraceCategory::Reserve]));
        let tracer = Tracer::new(config, filter).unwrap();

        tracer.trace(TraceEvent::call("mmap", TraceCategory::Reserve));
        tracer.trace(TraceEvent::call("mincore", TraceCategory::Probe));
        drop(tracer);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "CALL   mmap()\n");
        let _ = std::fs::remove_file(&path);
    }
}

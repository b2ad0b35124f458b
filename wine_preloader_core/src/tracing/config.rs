// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Tracing configuration

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use super::formatter::{JsonFormatter, TextFormatter, TraceFormatter};

/// Trace output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceFormat {
    /// One `CALL`/`RETURN` line per event
    #[default]
    Text,
    /// JSON Lines
    Json,
}

impl TraceFormat {
    /// Formatter writing events in this format
    pub fn formatter(self, timestamps: bool) -> Box<dyn TraceFormatter + Send + Sync> {
        match self {
            TraceFormat::Text => Box::new(TextFormatter::new(timestamps)),
            TraceFormat::Json => Box::new(JsonFormatter::new(timestamps)),
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFormat::Text => f.write_str("text"),
            TraceFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(TraceFormat::Text),
            "json" => Ok(TraceFormat::Json),
            _ => Err(format!("Unknown trace format: {s}. Valid options: text, json")),
        }
    }
}

/// Trace output destination
///
/// Stdout belongs to the program the preloader hands off to, so traces go to
/// stderr unless asked otherwise.
#[derive(Debug, Clone, Default)]
pub enum TraceOutput {
    #[default]
    Stderr,
    Stdout,
    /// Created (or truncated) when the tracer starts
    File(PathBuf),
}

impl TraceOutput {
    /// Open the destination for writing
    pub fn open(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(match self {
            TraceOutput::Stderr => Box::new(io::stderr()),
            TraceOutput::Stdout => Box::new(io::stdout()),
            TraceOutput::File(path) => Box::new(BufWriter::new(File::create(path)?)),
        })
    }
}

/// Syscall tracing configuration
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub enabled: bool,
    pub format: TraceFormat,
    pub output: TraceOutput,
    /// Prefix each event with its wall-clock time
    pub include_timestamps: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: TraceFormat::default(),
            output: TraceOutput::default(),
            include_timestamps: true,
        }
    }
}

impl TraceConfig {
    /// Tracing on, text to stderr, with timestamps
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: TraceFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TraceOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_timestamps(mut self, enable: bool) -> Self {
        self.include_timestamps = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disabled_on_stderr() {
        let config = TraceConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.format, TraceFormat::Text);
        assert!(matches!(config.output, TraceOutput::Stderr));
        assert!(config.include_timestamps);
    }

    #[test]
    fn test_builder() {
        let config = TraceConfig::enabled()
            .with_format(TraceFormat::Json)
            .with_output(TraceOutput::File("trace.log".into()))
            .with_timestamps(false);
        assert!(config.enabled);
        assert_eq!(config.format, TraceFormat::Json);
        assert!(matches!(config.output, TraceOutput::File(_)));
        assert!(!config.include_timestamps);
    }

    #[test]
    fn test_format_names() {
        assert_eq!("json".parse::<TraceFormat>(), Ok(TraceFormat::Json));
        assert_eq!(TraceFormat::Text.to_string(), "text");
        assert!("xml".parse::<TraceFormat>().is_err());
    }

    #[test]
    fn test_file_output_is_created_on_open() {
        let path = std::env::temp_dir().join("wine_preloader_trace_output_open.txt");
        let _ = std::fs::remove_file(&path);

        let mut writer = TraceOutput::File(path.clone()).open().unwrap();
        writer.write_all(b"CALL   mmap()\n").unwrap();
        drop(writer);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "CALL   mmap()\n");
        let _ = std::fs::remove_file(&path);
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace event formatters

use super::event::{EventType, TraceEvent};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::SystemTime;

/// Trait for formatting trace events
pub trait TraceFormatter {
    /// Write one event, newline terminated
    fn format(&self, event: &TraceEvent, writer: &mut dyn Write) -> io::Result<()>;
}

/// Human-readable output, one line per event:
/// `[1700000000.123] CALL   mmap(addr=0x10000, size=0x100000, fixed=false)`
#[derive(Debug, Default)]
pub struct TextFormatter {
    timestamps: bool,
}

impl TextFormatter {
    pub fn new(timestamps: bool) -> Self {
        Self { timestamps }
    }

    fn format_timestamp(timestamp: SystemTime) -> String {
        match timestamp.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(duration) => format!("{}.{:03}", duration.as_secs(), duration.subsec_millis()),
            Err(_) => "0.000".to_string(),
        }
    }
}

impl TraceFormatter for TextFormatter {
    fn format(&self, event: &TraceEvent, writer: &mut dyn Write) -> io::Result<()> {
        let mut line = String::new();

        if self.timestamps {
            let _ = write!(line, "[{}] ", Self::format_timestamp(event.timestamp));
        }

        let _ = write!(
            line,
            "{:<6} {}({})",
            event.event_type,
            event.function,
            event.args.as_deref().unwrap_or("")
        );
        if let Some(ret) = &event.return_value {
            let _ = write!(line, " -> {ret}");
        }

        writeln!(writer, "{line}")
    }
}

/// JSON Lines output, one object per event
#[derive(Debug, Default)]
pub struct JsonFormatter {
    timestamps: bool,
}

impl JsonFormatter {
    pub fn new(timestamps: bool) -> Self {
        Self { timestamps }
    }

    fn escape_json_string(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
                c => out.push(c),
            }
        }
        out
    }
}

impl TraceFormatter for JsonFormatter {
    fn format(&self, event: &TraceEvent, writer: &mut dyn Write) -> io::Result<()> {
        let mut fields: Vec<String> = Vec::new();

        if self.timestamps {
            let timestamp = match event.timestamp.duration_since(SystemTime::UNIX_EPOCH) {
                Ok(duration) => format!("{}.{:09}", duration.as_secs(), duration.subsec_nanos()),
                Err(_) => "0.0".to_string(),
            };
            fields.push(format!("\"timestamp\":{timestamp}"));
        }

        let event_type = match event.event_type {
            EventType::Call => "call",
            EventType::Return => "return",
        };
        fields.push(format!("\"event\":\"{event_type}\""));
        fields.push(format!("\"category\":\"{}\"", event.category));
        fields.push(format!(
            "\"function\":\"{}\"",
            Self::escape_json_string(&event.function)
        ));
        if let Some(args) = &event.args {
            fields.push(format!("\"args\":\"{}\"", Self::escape_json_string(args)));
        }
        if let Some(ret) = &event.return_value {
            fields.push(format!("\"return\":\"{}\"", Self::escape_json_string(ret)));
        }

        writeln!(writer, "{{{}}}", fields.join(","))
    }
}

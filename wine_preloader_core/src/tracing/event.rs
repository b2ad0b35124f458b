// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace event definitions

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Category of a traced host call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceCategory {
    /// Address-space reservation (`mmap`)
    Reserve,
    /// Mapping removal (`munmap`)
    Release,
    /// Residency probes (`mincore`)
    Probe,
    /// Dynamic loader calls (`dlopen`, `dlsym`, `dladdr`)
    Loader,
}

impl fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceCategory::Reserve => write!(f, "reserve"),
            TraceCategory::Release => write!(f, "release"),
            TraceCategory::Probe => write!(f, "probe"),
            TraceCategory::Loader => write!(f, "loader"),
        }
    }
}

impl FromStr for TraceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserve" => Ok(TraceCategory::Reserve),
            "release" => Ok(TraceCategory::Release),
            "probe" => Ok(TraceCategory::Probe),
            "loader" => Ok(TraceCategory::Loader),
            _ => Err(format!(
                "Unknown category: {s}. Valid options: reserve, release, probe, loader"
            )),
        }
    }
}

/// Trace event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Call started
    Call,
    /// Call returned
    Return,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Call => f.pad("CALL"),
            EventType::Return => f.pad("RETURN"),
        }
    }
}

/// A traced host call
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub timestamp: SystemTime,
    pub event_type: EventType,
    pub category: TraceCategory,
    /// Host function name
    pub function: String,
    /// Arguments, already formatted
    pub args: Option<String>,
    /// Return value, already formatted
    pub return_value: Option<String>,
}

impl TraceEvent {
    /// Create a new call event
    pub fn call(function: &str, category: TraceCategory) -> Self {
        Self::new(EventType::Call, function, category)
    }

    /// Create a new return event
    pub fn return_event(function: &str, category: TraceCategory) -> Self {
        Self::new(EventType::Return, function, category)
    }

    fn new(event_type: EventType, function: &str, category: TraceCategory) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            category,
            function: function.to_string(),
            args: None,
            return_value: None,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: String) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn with_return_value(mut self, return_value: String) -> Self {
        self.return_value = Some(return_value);
        self
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host syscall tracing
//!
//! Wraps the platform in [`TracedPlatform`] so every `mmap`, `munmap`,
//! `mincore` and `dl*` call made while reserving memory and loading the real
//! binary can be inspected.

pub mod config;
pub mod event;
pub mod filter;
pub mod formatter;
pub mod tracer;
pub mod wrapper;

pub use config::{TraceConfig, TraceFormat, TraceOutput};
pub use event::{EventType, TraceCategory, TraceEvent};
pub use filter::{FilterRule, TraceFilter};
pub use formatter::{JsonFormatter, TextFormatter, TraceFormatter};
pub use tracer::Tracer;
pub use wrapper::TracedPlatform;

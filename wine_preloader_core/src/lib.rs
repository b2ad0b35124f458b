// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Platform-independent core of the Wine preloader.
//!
//! The preloader runs before the real Wine loader binary is mapped. Its job is
//! to occupy the virtual-address ranges that the Windows memory layout needs
//! (DOS area, shared user data, the 4GB line, the top-down heap) with
//! `PROT_NONE` mappings, load the real binary, hand it the reservation table,
//! and jump to its entry point.
//!
//! This crate contains everything that does not touch the host directly:
//! - the reservation table and the `WINEPRELOADRESERVE` override ([`reserve`])
//! - the reservation algorithm, generic over the syscall traits in [`syscalls`]
//! - Mach-O and PE header inspection ([`image`])
//! - the module table used for image bookkeeping ([`modules`])
//! - syscall tracing ([`tracing`]) and configuration ([`config`])

pub mod config;
pub mod image;
pub mod modules;
pub mod reserve;
pub mod syscalls;
pub mod tracing;

use thiserror::Error;

// Re-export commonly used types
pub use config::PreloaderConfig;
pub use image::{EntryPoint, ImageRange};
pub use reserve::{PreloadLayout, PreloadRegion, PreloadTable, ReserveRange};

/// Errors produced by the preloader core
#[derive(Debug, Error)]
pub enum PreloaderError {
    #[error("invalid WINEPRELOADRESERVE value '{0}'")]
    InvalidReserve(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("{call} failed: {reason}")]
    Syscall { call: &'static str, reason: String },

    #[error("{path}: {reason}")]
    Loader { path: String, reason: String },

    #[error("{0}: could not find entry point")]
    MissingEntryPoint(String),
}

pub type Result<T> = core::result::Result<T, PreloaderError>;

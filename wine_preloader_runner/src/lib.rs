// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Wine preloader
//!
//! Reserves the address ranges Wine needs before the real loader binary is
//! mapped, loads that binary, hands it the reservation table and calls its
//! entry point.

use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use wine_preloader_core::modules::{ModuleKind, ModuleTable};
use wine_preloader_core::reserve::{ReserveRejection, map_region, reserve_all};
use wine_preloader_core::syscalls::{DynamicLoader, LibraryHandle, VirtualMemory};
use wine_preloader_core::tracing::{
    TraceCategory, TraceConfig, TraceFormat, TraceOutput, TracedPlatform, Tracer,
};
use wine_preloader_core::{
    EntryPoint, ImageRange, PreloadLayout, PreloadTable, PreloaderConfig, PreloaderError,
};
use wine_preloader_platform_unix::{
    UnixPlatform, binary_entry_point, call_main, install_preload_info, self_image_range,
};

/// Symbol through which the loaded binary receives the reservation table
pub const PRELOAD_INFO_SYMBOL: &str = "wine_main_preload_info";

const USAGE: &str = "Usage: wine-preloader [OPTIONS] wine_binary [args]";

/// Reserve Wine's address ranges, then load and start the Wine loader
///
/// Options are only recognized before the binary; everything after it is
/// passed to the binary untouched.
#[derive(Parser, Debug)]
#[command(name = "wine-preloader", version)]
pub struct CliArgs {
    /// The binary to load (normally the Wine loader), followed by its arguments
    #[arg(
        value_name = "BINARY",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_hint = clap::ValueHint::CommandWithArguments
    )]
    pub command: Vec<OsString>,

    /// Print the reservation table and loaded modules to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Reserve the address ranges, print the table and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Reserve the range a PE executable wants when WINEPRELOADRESERVE is unset
    #[arg(long, value_name = "PATH")]
    pub pe_image: Option<PathBuf>,

    /// Trace host calls
    #[arg(long)]
    pub trace: bool,

    /// Trace output format (text or json)
    #[arg(long, default_value_t = TraceFormat::Text)]
    pub trace_format: TraceFormat,

    /// Trace output file (default: stderr)
    #[arg(long)]
    pub trace_output: Option<PathBuf>,

    /// Filter traced functions by pattern (e.g., "m*map")
    #[arg(long)]
    pub trace_filter: Option<String>,

    /// Filter traced calls by category (reserve, release, probe, loader)
    #[arg(long)]
    pub trace_category: Vec<TraceCategory>,
}

impl CliArgs {
    /// The binary to load
    pub fn binary(&self) -> Option<&OsStr> {
        self.command.first().map(OsString::as_os_str)
    }

    /// Arguments for the binary, not including the binary itself
    pub fn arguments(&self) -> &[OsString] {
        self.command.get(1..).unwrap_or_default()
    }

    /// Combine the command line with the environment
    pub fn config<I, K, V>(&self, vars: I) -> PreloaderConfig
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = PreloaderConfig::from_env(vars)
            .with_verbose(self.verbose)
            .with_dry_run(self.dry_run);

        if let Some(path) = &self.pe_image {
            config = config.with_pe_image(path);
        }

        if self.trace {
            let mut trace = TraceConfig::enabled().with_format(self.trace_format);
            if let Some(path) = &self.trace_output {
                trace = trace.with_output(TraceOutput::File(path.clone()));
            }
            config = config.with_trace(trace);
        }

        if let Some(pattern) = &self.trace_filter {
            config = config.with_trace_pattern(pattern);
        }
        for &category in &self.trace_category {
            config = config.with_trace_category(category);
        }
        config
    }
}

/// The bootstrap sequence, one step per method
///
/// Diagnostics (warnings and verbose output) go to `diagnostics`, which is
/// stderr in the real binary.
pub struct Preloader<P, W> {
    platform: P,
    config: PreloaderConfig,
    layout: PreloadLayout,
    table: PreloadTable,
    modules: ModuleTable,
    self_range: Option<ImageRange>,
    diagnostics: W,
}

impl<P, W> Preloader<P, W>
where
    P: VirtualMemory + DynamicLoader,
    W: Write,
{
    /// Set up a preloader whose own segments occupy `self_range`
    pub fn new(
        platform: P,
        config: PreloaderConfig,
        layout: PreloadLayout,
        self_range: Option<ImageRange>,
        diagnostics: W,
    ) -> Self {
        let mut modules = ModuleTable::new();
        if let Some(range) = self_range {
            let kind = if cfg!(target_os = "macos") {
                ModuleKind::MachO
            } else {
                ModuleKind::Elf
            };
            modules.add("wine-preloader", kind, range.start, range.size());
        }

        Self {
            table: layout.table(),
            platform,
            config,
            layout,
            modules,
            self_range,
            diagnostics,
        }
    }

    pub fn table(&self) -> &PreloadTable {
        &self.table
    }

    pub fn modules(&self) -> &ModuleTable {
        &self.modules
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn diagnostics(&self) -> &W {
        &self.diagnostics
    }

    fn warn(&mut self, message: &str) {
        let _ = writeln!(self.diagnostics, "preloader: Warning: {message}");
    }

    /// Apply the override range and reserve every region of the table
    ///
    /// Only a malformed `WINEPRELOADRESERVE` value is an error; regions that
    /// cannot be reserved are dropped with a warning. An override colliding
    /// with the preloader is reported, one swallowed by the low-memory areas
    /// only in verbose mode.
    pub fn reserve(&mut self) -> Result<&PreloadTable> {
        let range = self.config.reserve_range(self.platform.page_size())?;
        match self.table.install_reserve(range, self.self_range) {
            Err(rejection @ ReserveRejection::OverlapsPreloader { .. }) => {
                let _ = writeln!(self.diagnostics, "{rejection}");
            }
            Err(rejection) if self.config.verbose => {
                let _ = writeln!(self.diagnostics, "preloader: {rejection}");
            }
            _ => {}
        }

        let report = reserve_all(&mut self.platform, &mut self.table);
        for warning in report.warnings() {
            let _ = writeln!(self.diagnostics, "{warning}");
        }

        if self.config.verbose {
            for region in &self.table {
                let _ = writeln!(self.diagnostics, "preloader: reserved {region}");
            }
        }
        Ok(&self.table)
    }

    /// Load the binary with the transient region held
    pub fn load(&mut self, binary: &str) -> Result<LibraryHandle> {
        let transient = self
            .layout
            .transient
            .filter(|region| map_region(&mut self.platform, region));

        let opened = self.platform.open(binary);

        if let Some(region) = transient {
            let _ = self.platform.unmap(region.address, region.size);
        }

        opened.map_err(|e| match e {
            PreloaderError::Loader { path, reason } => {
                anyhow!("{path}: could not load binary: {reason}")
            }
            other => anyhow!("{binary}: could not load binary: {other}"),
        })
    }

    /// Hand the reservation table to the loaded binary
    ///
    /// Returns whether the binary exports [`PRELOAD_INFO_SYMBOL`].
    pub fn publish(&mut self, handle: LibraryHandle) -> bool {
        let Some(slot) = self.platform.symbol(handle, PRELOAD_INFO_SYMBOL) else {
            self.warn(&format!("{PRELOAD_INFO_SYMBOL} not found"));
            return false;
        };
        // SAFETY: dlsym resolved the binary's own pointer variable
        unsafe { install_preload_info(slot, &self.table) };
        true
    }

    /// Resolve the entry point and record the binary in the module table
    pub fn entry_point(&mut self, handle: LibraryHandle, binary: &str) -> Result<EntryPoint> {
        let entry = binary_entry_point(&mut self.platform, handle, binary)?;

        if let Some(base) = self.platform.image_base_of(entry.address()) {
            let kind = if cfg!(target_os = "macos") {
                ModuleKind::MachO
            } else {
                ModuleKind::Elf
            };
            // the extent of a dlopen'ed image is not known; record its base only
            let id = self.modules.add(binary, kind, base, 0);
            if self.config.verbose {
                if let Some(module) = self.modules.get(id) {
                    let _ = writeln!(
                        self.diagnostics,
                        "preloader: loaded {} ({}) at {:#x}, entry {:#x}",
                        module.base_name(),
                        module.kind,
                        module.base,
                        entry.address()
                    );
                }
            }
        }
        Ok(entry)
    }
}

/// Run the preloader; returns the exit status of the loaded binary
pub fn run(cli_args: CliArgs) -> Result<i32> {
    let config = cli_args.config(std::env::vars());
    let tracer = Arc::new(
        Tracer::new(config.trace.clone(), config.trace_filter())
            .context("failed to open trace output")?,
    );
    let platform = TracedPlatform::new(UnixPlatform::new(), tracer);

    let binary = match (cli_args.binary(), config.dry_run) {
        (Some(binary), _) => Some(
            binary
                .to_str()
                .ok_or_else(|| anyhow!("{}: not a valid path", binary.to_string_lossy()))?
                .to_string(),
        ),
        (None, true) => None,
        (None, false) => bail!(USAGE),
    };

    let mut preloader = Preloader::new(
        platform,
        config,
        PreloadLayout::host(),
        self_image_range(),
        std::io::stderr(),
    );

    let table = preloader.reserve()?;
    let Some(binary) = binary.filter(|_| !cli_args.dry_run) else {
        let mut stdout = std::io::stdout().lock();
        for region in table {
            writeln!(stdout, "{:#x} {:#x}", region.address, region.size)?;
        }
        return Ok(0);
    };

    let handle = preloader.load(&binary)?;
    preloader.publish(handle);

    match preloader.entry_point(handle, &binary)? {
        EntryPoint::Main(address) => {
            let mut argv = vec![OsString::from(&binary)];
            argv.extend_from_slice(cli_args.arguments());
            // SAFETY: the address is the loaded binary's main, resolved
            // after dlopen ran its initializers
            let status = unsafe { call_main(address, &argv) }?;
            Ok(status)
        }
        EntryPoint::UnixThread(address) => bail!(
            "{binary}: entry point {address:#x} expects a fresh process stack and cannot be called"
        ),
    }
}

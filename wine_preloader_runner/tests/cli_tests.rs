// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Command line parsing tests

use std::ffi::OsStr;

use clap::Parser;
use wine_preloader_core::tracing::{TraceCategory, TraceFormat, TraceOutput};
use wine_preloader_runner::CliArgs;

#[test]
fn test_binary_and_trailing_arguments() {
    let args = CliArgs::try_parse_from([
        "wine-preloader",
        "/usr/lib/wine/wine64",
        "notepad.exe",
        "--verbose",
        "-x",
    ])
    .unwrap();

    assert_eq!(args.binary(), Some(OsStr::new("/usr/lib/wine/wine64")));
    assert_eq!(arguments(&args), ["notepad.exe", "--verbose", "-x"]);
    // options after the binary belong to the binary
    assert!(!args.verbose);
}

fn arguments(args: &CliArgs) -> Vec<&str> {
    args.arguments().iter().map(|a| a.to_str().unwrap()).collect()
}

#[test]
fn test_options_right_after_binary_belong_to_binary() {
    let args = CliArgs::try_parse_from(["wine-preloader", "/usr/bin/wine", "--version"]).unwrap();
    assert_eq!(args.binary(), Some(OsStr::new("/usr/bin/wine")));
    assert_eq!(arguments(&args), ["--version"]);

    let args =
        CliArgs::try_parse_from(["wine-preloader", "/usr/bin/wine", "-v", "x.exe"]).unwrap();
    assert_eq!(arguments(&args), ["-v", "x.exe"]);
    assert!(!args.verbose);

    let args = CliArgs::try_parse_from(["wine-preloader", "/usr/bin/wine", "--dry-run"]).unwrap();
    assert_eq!(arguments(&args), ["--dry-run"]);
    assert!(!args.dry_run);
}

#[test]
fn test_preloader_options_before_binary() {
    let args = CliArgs::try_parse_from([
        "wine-preloader",
        "-v",
        "--trace",
        "/usr/bin/wine",
        "--trace",
        "-v",
    ])
    .unwrap();
    assert!(args.verbose);
    assert!(args.trace);
    assert_eq!(args.binary(), Some(OsStr::new("/usr/bin/wine")));
    assert_eq!(arguments(&args), ["--trace", "-v"]);
}

#[test]
fn test_binary_without_arguments() {
    let args = CliArgs::try_parse_from(["wine-preloader", "/usr/bin/wine"]).unwrap();
    assert_eq!(args.binary(), Some(OsStr::new("/usr/bin/wine")));
    assert!(args.arguments().is_empty());
}

#[test]
fn test_binary_is_optional_for_parsing() {
    let args = CliArgs::try_parse_from(["wine-preloader", "--dry-run"]).unwrap();
    assert!(args.binary().is_none());
    assert!(args.arguments().is_empty());
    assert!(args.dry_run);
}

#[test]
fn test_trace_options() {
    let args = CliArgs::try_parse_from([
        "wine-preloader",
        "--trace",
        "--trace-format",
        "json",
        "--trace-output",
        "/tmp/preloader-trace.json",
        "--trace-filter",
        "m*",
        "--trace-category",
        "probe",
        "--trace-category",
        "reserve",
        "/usr/lib/wine/wine64",
    ])
    .unwrap();

    let config = args.config(Vec::<(String, String)>::new());
    assert!(config.trace.enabled);
    assert_eq!(config.trace.format, TraceFormat::Json);
    assert!(matches!(config.trace.output, TraceOutput::File(_)));
    assert_eq!(config.trace_pattern.as_deref(), Some("m*"));
    assert_eq!(
        config.trace_categories,
        [TraceCategory::Probe, TraceCategory::Reserve]
    );
}

#[test]
fn test_trace_output_ignored_without_trace() {
    let args = CliArgs::try_parse_from([
        "wine-preloader",
        "--trace-output",
        "/tmp/preloader-trace.txt",
        "/usr/lib/wine/wine64",
    ])
    .unwrap();

    let config = args.config(Vec::<(String, String)>::new());
    assert!(!config.trace.enabled);
    assert!(matches!(config.trace.output, TraceOutput::Stderr));
}

#[test]
fn test_invalid_trace_category() {
    let result = CliArgs::try_parse_from([
        "wine-preloader",
        "--trace-category",
        "file_io",
        "/usr/lib/wine/wine64",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_invalid_trace_format() {
    let result = CliArgs::try_parse_from([
        "wine-preloader",
        "--trace-format",
        "xml",
        "/usr/lib/wine/wine64",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_config_reads_environment() {
    let args = CliArgs::try_parse_from([
        "wine-preloader",
        "-v",
        "--pe-image",
        "/tmp/app.exe",
        "/usr/lib/wine/wine64",
    ])
    .unwrap();

    let config = args.config([
        ("PATH", "/usr/bin"),
        ("WINEPRELOADRESERVE", "140000000-140032000"),
    ]);
    assert!(config.verbose);
    assert!(!config.dry_run);
    assert_eq!(config.reserve.as_deref(), Some("140000000-140032000"));
    assert_eq!(
        config.pe_image.as_deref(),
        Some(std::path::Path::new("/tmp/app.exe"))
    );
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! CLI entry point for the Wine preloader.

use clap::Parser;
use wine_preloader_platform_unix::fatal_error;
use wine_preloader_runner::CliArgs;

fn main() {
    let args = CliArgs::parse();

    match wine_preloader_runner::run(args) {
        Ok(status) => std::process::exit(status),
        Err(e) => fatal_error(&format!("{e:#}")),
    }
}

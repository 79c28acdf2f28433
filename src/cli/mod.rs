// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Command line interface (§6 operational surface).

mod config;
mod group;
mod process;
mod promote;
mod review;
mod scan;
mod staging;

use crate::{Config, PKG_NAME, PKG_VERSION};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use simplelog::{ConfigBuilder as LogConfigBuilder, WriteLogger};
use std::borrow::Cow;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use xdg::BaseDirectories;

/// Command line Arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command to run
    #[command(subcommand)]
    command: Commands,
    /// Path to configuration file.
    #[arg(short, long, required = false)]
    config_path: Option<PathBuf>,
}

/// Supported CLI Commands (§6): `scan`, `group`, `process`, `list-staging`, `get-staging`,
/// `approve`, `reject`, `promote`, plus `config` for inspecting the effective configuration.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Catalog an inbound directory tree into a fresh scan snapshot.
    Scan(scan::Args),
    /// Assign release-candidate groups to a scanned snapshot.
    Group(group::Args),
    /// Materialize a grouped snapshot's groups into staging.
    Process(process::Args),
    /// List staging items, optionally filtered by review status.
    ListStaging(staging::ListArgs),
    /// Show one staging item's full detail.
    GetStaging(staging::GetArgs),
    /// Approve a staging item for promotion.
    Approve(review::ApproveArgs),
    /// Reject a staging item.
    Reject(review::RejectArgs),
    /// Promote one or more approved staging items into the catalog.
    Promote(promote::Args),
    /// Show your current configuration.
    Config(config::Args),
}

/// Append a numeric suffix (e.g., `.1`) to a path.
fn append_numeric_suffix_to_path(base_path: impl AsRef<Path>, number: usize) -> PathBuf {
    let suffix: OsString = format!(".{number}").into();
    let new_extension = base_path.as_ref().extension().map_or_else(
        || OsString::from(&suffix),
        |ext| {
            let mut extension = ext.to_os_string();
            extension.push(&suffix);
            extension
        },
    );
    base_path.as_ref().with_extension(new_extension)
}

/// Rotate logfiles by renaming `<log>` to `<log>.0`, `<log>.1` to `<log>.2`, etc.
fn rotate_logfiles(base_path: impl AsRef<Path>) -> io::Result<()> {
    let paths_to_rename = (0..7)
        .rev()
        .map(|i| {
            (
                append_numeric_suffix_to_path(&base_path, i),
                append_numeric_suffix_to_path(&base_path, i + 1),
            )
        })
        .chain(std::iter::once((
            base_path.as_ref().to_path_buf(),
            append_numeric_suffix_to_path(&base_path, 0),
        )));
    for (old_path, new_path) in paths_to_rename {
        fs::rename(old_path, new_path).or_else(|err| match err.kind() {
            io::ErrorKind::NotFound => Ok(()),
            _ => Err(err),
        })?;
    }

    Ok(())
}

/// Main entry point.
///
/// # Errors
///
/// Can return errors if the command line arguments are incorrect or the executed commands lead to
/// an error.
///
/// # Panics
///
/// May panic if logging cannot be initialized.
pub fn main() -> crate::Result<()> {
    let args = Args::parse();

    let base_dirs = BaseDirectories::with_prefix(PKG_NAME)?;

    // Initialize logging
    let logfile_path = base_dirs.place_state_file(format!("{PKG_NAME}.log"))?;
    rotate_logfiles(&logfile_path)?;
    let logfile = File::create(logfile_path)?;
    WriteLogger::init(
        LevelFilter::Debug,
        LogConfigBuilder::new()
            .add_filter_ignore_str("symphonia_core::probe")
            .build(),
        logfile,
    )
    .expect("Failed to initialize logging");
    log::info!("Started {PKG_NAME} {PKG_VERSION}");

    // Load configuration: an explicit `--config-path` takes priority over the XDG-discovered
    // `config.toml`; whichever is found has any value it leaves unset filled in from the bundled
    // defaults (`Config::with_defaults`).
    let config_path: Option<Cow<'_, Path>> = args
        .config_path
        .as_deref()
        .map(Cow::from)
        .or_else(|| base_dirs.find_config_files("config.toml").last().map(Cow::from));
    let config = match config_path {
        Some(path) => Config::load_from_path(path)?.with_defaults(),
        None => Config::default(),
    };

    match args.command {
        Commands::Scan(cmd_args) => scan::run(&config, cmd_args),
        Commands::Group(cmd_args) => group::run(&config, cmd_args),
        Commands::Process(cmd_args) => process::run(&config, cmd_args),
        Commands::ListStaging(cmd_args) => staging::run_list(&config, cmd_args),
        Commands::GetStaging(cmd_args) => staging::run_get(&config, cmd_args),
        Commands::Approve(cmd_args) => review::run_approve(&config, cmd_args),
        Commands::Reject(cmd_args) => review::run_reject(&config, cmd_args),
        Commands::Promote(cmd_args) => promote::run(&config, cmd_args),
        Commands::Config(cmd_args) => config::run(&config, cmd_args),
    }
}

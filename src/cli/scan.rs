// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Module for the `scan` CLI subcommand (§6 `scan(inbound_root) -> scan_id`).

use crate::scan::{self, ScanOptions};
use crate::Config;
use clap::Parser;
use std::path::PathBuf;

/// Command line arguments for the `scan` CLI command.
#[derive(Parser, Debug)]
pub struct Args {
    /// Inbound directory tree to catalog.
    inbound_root: PathBuf,
}

/// Run the `scan` command: catalog every audio file under `inbound_root` into a fresh snapshot,
/// printing the assigned scan id to stdout on success.
///
/// # Errors
///
/// Returns an error if the snapshot database cannot be created or written to.
pub fn run(config: &Config, args: Args) -> crate::Result<()> {
    let scan_id = scan::new_scan_id();
    let snapshot_dir = config.scan_snapshot_dir();
    std::fs::create_dir_all(&snapshot_dir)?;
    let snapshot_path = config.scan_snapshot_path(&scan_id);
    let report = scan::run(config, &args.inbound_root, &snapshot_path, &scan_id, &ScanOptions::default())?;

    log::info!(
        "Scan {} found {} files, {} valid",
        report.scan_id,
        report.files_seen,
        report.files_valid
    );
    println!("{}", report.scan_id);

    Ok(())
}

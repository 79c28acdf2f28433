// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Module for the `group` CLI subcommand (§4.4 `group(scan_id)`).

use crate::grouping;
use crate::scan_store::ScanSnapshot;
use crate::Config;
use clap::Parser;

/// Command line arguments for the `group` CLI command.
#[derive(Parser, Debug)]
pub struct Args {
    /// Id of a previously completed scan.
    scan_id: String,
}

/// Run the `group` command: assign release-candidate groups to every valid record of a scan
/// snapshot, printing the number of groups formed.
///
/// # Errors
///
/// Returns an error if the snapshot does not exist or the grouping query fails.
pub fn run(config: &Config, args: Args) -> crate::Result<()> {
    let snapshot_path = config.scan_snapshot_path(&args.scan_id);
    let snapshot = ScanSnapshot::open(&snapshot_path, &args.scan_id)?;
    let group_count = grouping::run(&snapshot)?;
    log::info!("Scan {} grouped into {group_count} groups", args.scan_id);
    println!("{group_count}");
    Ok(())
}

// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Module for the `process` CLI subcommand (§4.6 `process(scan_id, options)`).

use crate::catalog::Catalog;
use crate::scan_store::ScanSnapshot;
use crate::staging::{self, StagingOptions};
use crate::Config;
use clap::Parser;

/// Command line arguments for the `process` CLI command.
#[derive(Parser, Debug)]
pub struct Args {
    /// Id of a previously grouped scan.
    scan_id: String,

    /// Overwrite an existing, conflicting staging directory instead of failing.
    #[arg(long)]
    force: bool,
}

/// Run the `process` command: materialize every group of a grouped scan snapshot into staging.
///
/// Per-group failures are reported to stdout/log and do not abort the rest of the batch (§5); the
/// command only returns an error for a condition affecting the whole run (snapshot missing, not
/// grouped yet, or the catalog database unreachable).
///
/// # Errors
///
/// Returns an error if the snapshot or catalog cannot be opened, or if the snapshot hasn't been
/// grouped.
pub fn run(config: &Config, args: Args) -> crate::Result<()> {
    let snapshot_path = config.scan_snapshot_path(&args.scan_id);
    let snapshot = ScanSnapshot::open(&snapshot_path, &args.scan_id)?;
    let catalog = Catalog::open(config.catalog_path())?;
    let options = StagingOptions { force: args.force };

    let outcome = staging::materialize_snapshot(&catalog, &snapshot, config, options)?;

    for group in &outcome.outcomes {
        match group {
            staging::GroupOutcome::Staged {
                group_id,
                staging_item_id,
                staging_path,
            } => println!("staged\t{group_id}\t{staging_item_id}\t{staging_path}"),
            staging::GroupOutcome::AlreadyStaged { group_id } => {
                println!("already-staged\t{group_id}");
            }
        }
    }
    for (group_id, reason) in &outcome.failures {
        log::warn!("group {group_id} failed to stage: {reason}");
        println!("failed\t{group_id}\t{reason}");
    }

    log::info!(
        "Processed scan {}: {} staged/already-staged, {} failed",
        args.scan_id,
        outcome.outcomes.len(),
        outcome.failures.len()
    );
    Ok(())
}

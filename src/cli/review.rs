// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Modules for the `approve` and `reject` CLI subcommands (§3 `StagingItem` review workflow).

use crate::catalog::{Catalog, StagingStatus};
use crate::Config;
use clap::Parser;

/// Command line arguments for the `approve` CLI command.
#[derive(Parser, Debug)]
pub struct ApproveArgs {
    /// Id of the staging item to approve.
    id: String,

    /// Identifier of the reviewer performing the approval.
    #[arg(long)]
    reviewer: Option<String>,
}

/// Run the `approve` command: mark a staging item approved, clearing it for promotion.
///
/// # Errors
///
/// Returns an error if the catalog database cannot be opened or updated.
pub fn run_approve(config: &Config, args: ApproveArgs) -> crate::Result<()> {
    let catalog = Catalog::open(config.catalog_path())?;
    let now = chrono::Utc::now().to_rfc3339();
    catalog.update_staging_status(&args.id, StagingStatus::Approved, args.reviewer.as_deref(), None, &now)?;
    log::info!("Approved staging item {}", args.id);
    Ok(())
}

/// Command line arguments for the `reject` CLI command.
#[derive(Parser, Debug)]
pub struct RejectArgs {
    /// Id of the staging item to reject.
    id: String,

    /// Human-readable reason, recorded on the item's notes.
    reason: String,

    /// Identifier of the reviewer performing the rejection.
    #[arg(long)]
    reviewer: Option<String>,
}

/// Run the `reject` command: mark a staging item rejected with a reason.
///
/// # Errors
///
/// Returns an error if the catalog database cannot be opened or updated.
pub fn run_reject(config: &Config, args: RejectArgs) -> crate::Result<()> {
    let catalog = Catalog::open(config.catalog_path())?;
    let now = chrono::Utc::now().to_rfc3339();
    catalog.update_staging_status(
        &args.id,
        StagingStatus::Rejected,
        args.reviewer.as_deref(),
        Some(&args.reason),
        &now,
    )?;
    log::info!("Rejected staging item {}: {}", args.id, args.reason);
    Ok(())
}

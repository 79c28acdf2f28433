// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Modules for the `list-staging` and `get-staging` CLI subcommands (§3 `StagingItem`, §6).

use crate::catalog::{Catalog, StagingFilter, StagingStatus};
use crate::Config;
use clap::Parser;

/// Command line arguments for the `list-staging` CLI command.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Restrict the listing to items with this review status (`pending-review`, `approved`,
    /// `rejected`, or `processing`).
    #[arg(long)]
    status: Option<String>,
}

/// Parse a CLI-facing status string (hyphenated) into a [`StagingStatus`].
fn parse_status(raw: &str) -> crate::Result<StagingStatus> {
    StagingStatus::from_str(&raw.replace('-', "_"))
        .ok_or_else(|| crate::ErrorType::Validation(format!("unknown staging status: {raw}")))
}

/// Run the `list-staging` command: print every staging item matching the optional status filter.
///
/// # Errors
///
/// Returns an error if the catalog database cannot be opened or queried, or the status filter is
/// unrecognized.
pub fn run_list(config: &Config, args: ListArgs) -> crate::Result<()> {
    let catalog = Catalog::open(config.catalog_path())?;
    let filter = StagingFilter {
        status: args.status.as_deref().map(parse_status).transpose()?,
    };
    let items = catalog.list_staging_items(filter)?;
    for item in items {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            item.id,
            item.status.as_str(),
            item.artist_name,
            item.album_name,
            item.track_count
        );
    }
    Ok(())
}

/// Command line arguments for the `get-staging` CLI command.
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Id of the staging item to show.
    id: String,
}

/// Run the `get-staging` command: print the full detail of one staging item.
///
/// # Errors
///
/// Returns an error if the catalog database cannot be opened, or no item with the given id
/// exists.
pub fn run_get(config: &Config, args: GetArgs) -> crate::Result<()> {
    let catalog = Catalog::open(config.catalog_path())?;
    let Some(item) = catalog.get_staging_item(&args.id)? else {
        return Err(crate::ErrorType::Validation(format!("no staging item with id {}", args.id)));
    };
    println!("id:              {}", item.id);
    println!("status:          {}", item.status.as_str());
    println!("artist:          {}", item.artist_name);
    println!("album:           {}", item.album_name);
    println!("track_count:     {}", item.track_count);
    println!("total_bytes:     {}", item.total_bytes);
    println!("staging_path:    {}", item.staging_path);
    println!("sidecar_path:    {}", item.sidecar_path);
    println!("processed_at:    {}", item.processed_at);
    println!("scan_id:         {}", item.scan_id.as_deref().unwrap_or("-"));
    println!("reviewer_id:     {}", item.reviewer_id.as_deref().unwrap_or("-"));
    println!("reviewed_at:     {}", item.reviewed_at.as_deref().unwrap_or("-"));
    println!("notes:           {}", item.notes.as_deref().unwrap_or("-"));
    Ok(())
}

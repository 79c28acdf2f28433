// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Module for the `promote` CLI subcommand (§4.8, §6 `promote(ids)`).

use crate::catalog::Catalog;
use crate::pathformat::PathFormatter;
use crate::promotion::{self, PromotionOptions, PromotionOutcome};
use crate::Config;
use clap::Parser;

/// Command line arguments for the `promote` CLI command.
#[derive(Parser, Debug)]
pub struct Args {
    /// Ids of one or more approved staging items to promote.
    #[arg(required = true)]
    ids: Vec<String>,

    /// Attach to this release-group id rather than letting the consolidator decide. Needed to
    /// retry an item that previously reported an ambiguous match.
    #[arg(long)]
    release_group: Option<i64>,
}

/// Run the `promote` command: attempt to promote each listed staging item into the catalog.
///
/// Per-item outcomes (promoted, ambiguous, rejected) are printed to stdout and do not cause the
/// command to fail (§7: a batch succeeds if at least one item succeeded, and an ambiguous or
/// rejected outcome is a structured result, not an error). Only a condition preventing every item
/// from being attempted (the catalog database is unreachable) returns an error.
///
/// # Errors
///
/// Returns an error if the catalog database or path formatter cannot be opened/built.
pub fn run(config: &Config, args: Args) -> crate::Result<()> {
    let catalog = Catalog::open(config.catalog_path())?;
    let formatter = PathFormatter::new(&config.paths)?;
    let options = PromotionOptions {
        release_group_id_override: args.release_group,
    };

    let results = promotion::promote_batch(&catalog, config, &formatter, &args.ids, options);
    for (id, result) in results {
        match result {
            Ok(PromotionOutcome::Promoted {
                release_id,
                release_group_id,
                production_path,
                track_count,
            }) => {
                println!("promoted\t{id}\t{release_id}\t{release_group_id}\t{track_count}\t{production_path}");
            }
            Ok(PromotionOutcome::Ambiguous(candidates)) => {
                println!("ambiguous\t{id}");
                for candidate in candidates {
                    println!(
                        "  candidate\trelease_group_id={}\tname={}\tsimilarity={:.3}",
                        candidate.release_group.id, candidate.release_group.name, candidate.similarity
                    );
                }
            }
            Ok(PromotionOutcome::Rejected { reason }) => {
                println!("rejected\t{id}\t{reason}");
            }
            Err(err) => {
                log::warn!("Promotion of staging item {id} failed: {err}");
                println!("error\t{id}\t{err}");
            }
        }
    }
    Ok(())
}

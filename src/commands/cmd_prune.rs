// snapkeep is a retention manager for tarsnap archives
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::Args;
use colored::Colorize;

use crate::{
    archiver::{Archive, Archiver},
    commands::{self, parse_now},
    config::Config,
    ui::{
        self,
        table::{Alignment, Table},
    },
    utils,
};

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct CmdArgs {
    /// Backup sets to evaluate (default: all)
    #[clap(value_parser)]
    pub sets: Vec<String>,

    /// Effective current time (%Y-%m-%dT%H:%M:%S; default is wallclock time)
    #[clap(long, value_parser = parse_now)]
    pub now: Option<DateTime<Local>>,

    /// Show which archives would be removed without removing them
    #[clap(long)]
    pub dry_run: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let (mut cfg, archiver) = commands::load_config(global_args)?;

    // Check the set names up front, so an unknown name cannot cost an
    // archiver round trip.
    for name in &args.sets {
        if cfg.find_set(name).is_none() {
            bail!("unknown backup set {name:?} for prune");
        }
    }

    let spinner = ui::cli::spinner("Listing archives...");
    let archives = cfg.list(&archiver);
    spinner.finish_and_clear();
    let archives = archives.context("listing archives")?;

    let chosen: Vec<Archive> = if args.sets.is_empty() {
        archives
    } else {
        let wanted: HashSet<&str> = args.sets.iter().map(String::as_str).collect();
        archives
            .into_iter()
            .filter(|a| wanted.contains(a.base.as_str()))
            .collect()
    };

    let now = args.now.unwrap_or_else(Local::now);
    prune_archives(&mut cfg, &archiver, &chosen, now, args.dry_run)
}

/// One prune cycle: computes the expired archives among `archives` as of
/// `now`, deletes them, and stamps the auto-prune sentinel. Shared with
/// the auto-prune path of the create command.
pub(crate) fn prune_archives(
    cfg: &mut Config,
    archiver: &dyn Archiver,
    archives: &[Archive],
    now: DateTime<Local>,
    dry_run: bool,
) -> Result<()> {
    let expired = cfg.find_expired(archives, now);
    if expired.is_empty() {
        ui::cli::log!("Nothing to prune");
        return Ok(());
    }

    let mut names: Vec<String> = expired.iter().map(|a| a.name.clone()).collect();
    names.sort();
    names.dedup();

    let mut table = Table::new_with_alignments(vec![Alignment::Left, Alignment::Left]);
    table.set_headers(vec!["Archive".bold().to_string(), "Date".bold().to_string()]);
    for archive in &expired {
        table.add_row(vec![
            archive.name.clone(),
            archive
                .created
                .format("%Y-%m-%d %H:%M:%S %Z")
                .to_string(),
        ]);
    }

    if dry_run {
        ui::cli::log!("{}\n{}", "Pruning would remove:".bold(), table.render());
        ui::cli::log!(
            "This would remove {}",
            utils::format_count(names.len(), "archive", "archives")
        );
        return Ok(());
    }

    archiver.delete(&names).context("deleting archives")?;

    // Repair the list cache.
    cfg.invalidate_list_cache();
    let _ = cfg.list(archiver);

    ui::cli::log!("{}\n{}", "Pruned:".bold(), table.render());
    ui::cli::log!(
        "Removed {}",
        utils::format_count(names.len(), "archive", "archives")
    );

    if let Err(err) = cfg.update_prune_timestamp() {
        ui::cli::log_warning(&format!("unable to update prune timestamp: {err:#}"));
    }
    Ok(())
}

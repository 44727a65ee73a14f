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

use std::{collections::HashSet, time::Instant};

use anyhow::{Result, anyhow, bail};
use chrono::Local;
use clap::Args;

use crate::{
    archiver::{self, Archiver},
    commands::{self, cmd_prune},
    config::{Backup, Config},
    ui, utils,
};

use super::GlobalArgs;

#[derive(Args, Debug, Default)]
pub struct CmdArgs {
    /// Backup sets to archive (default: every non-manual set)
    #[clap(value_parser)]
    pub sets: Vec<String>,

    /// Simulate creating archives
    #[clap(long)]
    pub dry_run: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let (mut cfg, archiver) = commands::load_config(global_args)?;
    let chosen: Vec<Backup> = choose_backups(&cfg, &args.sets)?
        .into_iter()
        .cloned()
        .collect();

    let start = Instant::now();
    let now = Local::now();
    // One tag for the whole cycle, so every set's archive shares it.
    let tag = archiver::format_tag(now);

    let mut nerrs = 0;
    for b in &chosen {
        let name = format!("{}{tag}", b.name);
        let opts = b.create_options(now, args.dry_run);
        match archiver.create(&name, &opts) {
            Ok(()) => ui::cli::log!("{name}"),
            Err(err) => {
                ui::cli::log_error(&format!("{name}: {err:#}"));
                nerrs += 1;
            }
        }
    }

    // Repair the list cache.
    cfg.invalidate_list_cache();
    let archives = cfg.list(&archiver).unwrap_or_default();

    if nerrs > 0 {
        bail!("{}", utils::format_count(nerrs, "error", "errors"));
    }
    ui::cli::log!(
        "Backups finished [{}s elapsed]",
        start.elapsed().as_secs()
    );

    if cfg.should_auto_prune() {
        ui::cli::log_status("Auto-pruning archives");
        cmd_prune::prune_archives(&mut cfg, &archiver, &archives, Local::now(), args.dry_run)?;
    }

    Ok(())
}

/// The backup sets named on the command line, or every non-manual set
/// when none were named. Unknown and repeated names are errors.
fn choose_backups<'a>(cfg: &'a Config, names: &[String]) -> Result<Vec<&'a Backup>> {
    if names.is_empty() {
        return Ok(cfg.backup.iter().filter(|b| !b.manual).collect());
    }

    let mut seen = HashSet::new();
    let mut sets = Vec::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            bail!("duplicate backup set {name:?}");
        }
        let set = cfg
            .find_set(name)
            .ok_or_else(|| anyhow!("no such backup set {name:?}"))?;
        sets.push(set);
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_sets() -> Config {
        let mut cfg = Config::default();
        for (name, manual) in [("docs", false), ("pics", false), ("scratch", true)] {
            cfg.backup.push(Backup {
                name: name.to_string(),
                manual,
                ..Default::default()
            });
        }
        cfg
    }

    #[test]
    fn test_choose_backups_default_skips_manual() {
        let cfg = config_with_sets();
        let names: Vec<&str> = choose_backups(&cfg, &[])
            .unwrap()
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(names, vec!["docs", "pics"]);
    }

    #[test]
    fn test_choose_backups_explicit_includes_manual() {
        let cfg = config_with_sets();
        let names: Vec<&str> = choose_backups(&cfg, &["scratch".to_string()])
            .unwrap()
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(names, vec!["scratch"]);
    }

    #[test]
    fn test_choose_backups_rejects_unknown_and_repeats() {
        let cfg = config_with_sets();
        assert!(choose_backups(&cfg, &["nonesuch".to_string()]).is_err());
        assert!(choose_backups(&cfg, &["docs".to_string(), "docs".to_string()]).is_err());
    }
}

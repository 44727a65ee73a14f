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

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::Args;

use crate::{
    archiver::{self, Archiver, ExtractOptions},
    commands::{self, cmd_find, parse_now},
    ui, utils,
};

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct CmdArgs {
    /// Directory to restore into (created if missing)
    #[clap(short = 'o', long = "output", value_parser)]
    pub output: PathBuf,

    /// Files or directories to restore. A path ending in "/" names a
    /// directory, restored with all its contents.
    #[clap(value_parser, required = true)]
    pub paths: Vec<String>,

    /// Restore from the most recent archive as of this time
    /// (%Y-%m-%dT%H:%M:%S; default is wallclock time)
    #[clap(long, value_parser = parse_now)]
    pub now: Option<DateTime<Local>>,

    /// Show what would be restored without extracting
    #[clap(long)]
    pub dry_run: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let (mut cfg, archiver) = commands::load_config(global_args)?;
    let now = args.now.unwrap_or_else(Local::now);

    // Locate the backup set for each requested path. This must be
    // unique or the restore is ambiguous.
    let mut need: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut slow: BTreeSet<String> = BTreeSet::new();
    for path in &args.paths {
        let abs = cmd_find::absolutize(path)?;
        let found = cfg.find_path(&abs);
        if found.is_empty() {
            bail!("no backups found for {path:?}");
        } else if found.len() > 1 {
            bail!("multiple backups found for {path:?}");
        }
        let set = found[0].backup.name.clone();

        // Fast reads avoid scanning the whole archive, but only work
        // when no directories or globs were requested.
        if path.ends_with('/') || utils::is_glob(path) {
            slow.insert(set.clone());
        }

        // Archives are created without absolute paths, so the query
        // path must lose its leading slash to match.
        let relative = found[0].relative.trim_start_matches('/').to_string();
        need.entry(set).or_default().push(relative);
    }

    ui::cli::log_status("Listing available archives");
    let spinner = ui::cli::spinner("Listing archives...");
    let archives = cfg.list(&archiver);
    spinner.finish_and_clear();
    let archives = archives.context("listing archives")?;

    create_output_dir(&args.output)?;

    for (set, mut paths) in need {
        paths.sort();
        paths.dedup();

        let Some(archive) = archiver::latest_as_of(&archives, &set, now) else {
            bail!("unable to find the latest {set:?} archive");
        };
        ui::cli::log_status(&format!(
            "Restoring from {:?}\n » {}",
            archive.name,
            paths.join("\n » ")
        ));
        if args.dry_run {
            ui::cli::log_status("[dry run, not restoring]");
            continue;
        }

        let opts = ExtractOptions {
            workdir: Some(args.output.clone()),
            include: paths,
            fast_read: !slow.contains(&set),
            restore_permissions: true,
        };
        archiver
            .extract(&archive.name, &opts)
            .with_context(|| format!("extracting from {:?}", archive.name))?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_output_dir(dir: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))
}

#[cfg(not(unix))]
fn create_output_dir(dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))
}

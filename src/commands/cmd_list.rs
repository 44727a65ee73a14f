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

use anyhow::{Context, Result};
use clap::Args;

use crate::{commands, config::matcher, ui};

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct CmdArgs {
    /// Globs selecting which archive names to show (default: all)
    #[clap(value_parser)]
    pub globs: Vec<String>,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let (mut cfg, archiver) = commands::load_config(global_args)?;

    let spinner = ui::cli::spinner("Listing archives...");
    let archives = cfg.list(&archiver);
    spinner.finish_and_clear();
    let archives = archives.context("listing archives")?;

    for archive in &archives {
        if matches_any(&archive.name, &args.globs) {
            ui::cli::log!("{}", archive.name);
        }
    }
    Ok(())
}

/// Reports whether `name` matches one of `globs`; no globs match
/// everything.
pub(crate) fn matches_any(name: &str, globs: &[String]) -> bool {
    globs.is_empty() || globs.iter().any(|g| matcher::path_matches_pattern(name, g))
}

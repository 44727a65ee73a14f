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

use crate::{
    commands,
    global::{self, defaults::VERBOSE_VERBOSITY},
    ui::table::{Alignment, Table},
};

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct CmdArgs {
    /// Paths to locate in the configured backup sets
    #[clap(value_parser, required = true)]
    pub paths: Vec<String>,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let (cfg, _archiver) = commands::load_config(global_args)?;

    let mut table = Table::new_with_alignments(vec![Alignment::Left, Alignment::Left]);
    for path in &args.paths {
        let abs = absolutize(path)?;
        let found = cfg.find_path(&abs);
        for bp in &found {
            table.add_row(vec![bp.relative.clone(), bp.backup.name.clone()]);
        }
        // Paths that match nothing are only worth a row when the user
        // asked for detail.
        if found.is_empty() && global::verbosity() >= VERBOSE_VERBOSITY {
            table.add_row(vec![path.clone(), "NONE".to_string()]);
        }
    }
    table.print();
    Ok(())
}

/// Resolves `path` against the current directory without touching the
/// filesystem, so nonexistent and glob-carrying paths stay usable.
pub(crate) fn absolutize(path: &str) -> Result<String> {
    if path.starts_with('/') {
        return Ok(path.to_string());
    }
    let abs = std::path::absolute(path)
        .with_context(|| format!("unable to resolve {path:?}"))?;
    let mut abs = abs.to_string_lossy().into_owned();
    // Keep a trailing slash; it distinguishes directory restores.
    if path.ends_with('/') && !abs.ends_with('/') {
        abs.push('/');
    }
    Ok(abs)
}

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
use colored::Colorize;

use crate::{
    archiver::{Archiver, Sizes},
    commands::{self, cmd_list},
    ui::{
        self,
        table::{Alignment, Table},
    },
    utils,
};

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct CmdArgs {
    /// Archives to evaluate, by name or glob (default: totals only)
    #[clap(value_parser)]
    pub archives: Vec<String>,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let (mut cfg, archiver) = commands::load_config(global_args)?;

    // Globs need the archive listing to expand; plain names go straight
    // to the archiver.
    let names: Vec<String> = if utils::has_glob(&args.archives) {
        let spinner = ui::cli::spinner("Listing archives...");
        let archives = cfg.list(&archiver);
        spinner.finish_and_clear();

        let mut names: Vec<String> = archives
            .context("listing archives")?
            .into_iter()
            .map(|a| a.name)
            .filter(|name| cmd_list::matches_any(name, &args.archives))
            .collect();
        names.sort();
        names
    } else {
        args.archives.clone()
    };

    let info = archiver.size(&names).context("reading stats")?;

    let mut table = Table::new_with_alignments(vec![
        Alignment::Left,
        Alignment::Right,
        Alignment::Right,
        Alignment::Right,
        Alignment::Right,
    ]);
    table.set_headers(vec![
        "Archive".bold().to_string(),
        "Raw".bold().to_string(),
        "Comp".bold().to_string(),
        "Uniq".bold().to_string(),
        "Incr".bold().to_string(),
    ]);
    table.add_row(size_row("TOTAL".bold().to_string(), &info.all));

    let mut subtotal = Sizes::default();
    let mut found = false;
    for name in &names {
        let Some(sizes) = info.archives.get(name) else {
            continue;
        };
        subtotal.accumulate(sizes);
        found = true;
        table.add_row(size_row(name.clone(), sizes));
    }
    if found {
        table.add_row(size_row("SUBTOTAL".bold().to_string(), &subtotal));
    }

    table.print();
    Ok(())
}

fn size_row(label: String, sizes: &Sizes) -> Vec<String> {
    vec![
        label,
        utils::format_size(sizes.input_bytes),
        utils::format_size(sizes.compressed_bytes),
        utils::format_size(sizes.unique_bytes),
        utils::format_size(sizes.compressed_unique_bytes),
    ]
}

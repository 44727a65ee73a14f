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

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use clap::{ArgGroup, Parser, Subcommand};

use crate::{
    archiver::tarsnap::Tarsnap,
    config::Config,
    global::{
        self,
        defaults::{DEFAULT_CONFIG_PATH, NOW_FORMAT, VERBOSE_VERBOSITY},
    },
    utils,
};

pub mod cmd_create;
pub mod cmd_find;
pub mod cmd_list;
pub mod cmd_prune;
pub mod cmd_restore;
pub mod cmd_size;

// CLI arguments
#[derive(Parser, Debug)]
#[clap(
    version = env!("CARGO_PKG_VERSION"), // Version from crate metadata
    about = "snapkeep backup retention manager",
)]
pub struct Cli {
    // Subcommand; creating backups is the default action.
    #[command(subcommand)]
    pub command: Option<Command>,

    // Global arguments
    #[clap(flatten)]
    pub global_args: GlobalArgs,
}

// List of commands
#[derive(Subcommand, Debug)]
pub enum Command {
    Create(cmd_create::CmdArgs),
    List(cmd_list::CmdArgs),
    Prune(cmd_prune::CmdArgs),
    Size(cmd_size::CmdArgs),
    Find(cmd_find::CmdArgs),
    Restore(cmd_restore::CmdArgs),
}

#[derive(Parser, Debug)]
#[clap(group = ArgGroup::new("verbosity_group").multiple(true))]
pub struct GlobalArgs {
    /// Configuration file
    #[clap(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Disable logging (verbosity = 0)
    #[clap(long, value_parser, group = "verbosity_group")]
    pub quiet: bool,

    /// Set the verbosity level [0-3]
    #[clap(short = 'v', long, value_parser, group = "verbosity_group")]
    pub verbosity: Option<u32>,
}

pub fn run(args: &Cli) -> Result<()> {
    match &args.command {
        Some(Command::Create(cmd_args)) => cmd_create::run(&args.global_args, cmd_args),
        Some(Command::List(cmd_args)) => cmd_list::run(&args.global_args, cmd_args),
        Some(Command::Prune(cmd_args)) => cmd_prune::run(&args.global_args, cmd_args),
        Some(Command::Size(cmd_args)) => cmd_size::run(&args.global_args, cmd_args),
        Some(Command::Find(cmd_args)) => cmd_find::run(&args.global_args, cmd_args),
        Some(Command::Restore(cmd_args)) => cmd_restore::run(&args.global_args, cmd_args),
        None => cmd_create::run(&args.global_args, &cmd_create::CmdArgs::default()),
    }
}

/// Loads the configuration named by the global arguments and builds the
/// archiver adapter from it. The directory holding the configuration
/// file is the fallback working directory.
pub(crate) fn load_config(global_args: &GlobalArgs) -> Result<(Config, Tarsnap)> {
    let path = PathBuf::from(utils::expand_env(&global_args.config));
    let path = std::path::absolute(&path)
        .with_context(|| format!("resolving {}", path.display()))?;

    let mut cfg = Config::load(&path).context("loading configuration")?;
    if cfg.verbose {
        global::raise_verbosity(VERBOSE_VERBOSITY);
    }
    if cfg.workdir.is_none() {
        cfg.workdir = path.parent().map(Path::to_path_buf);
    }

    let archiver = Tarsnap::from_config(&cfg);
    Ok((cfg, archiver))
}

/// Parses the "effective now" override used by prune and restore.
pub(crate) fn parse_now(s: &str) -> Result<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(s, NOW_FORMAT)
        .with_context(|| format!("invalid time {s:?} (expected {NOW_FORMAT})"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .with_context(|| format!("unrepresentable local time {s:?}"))
}

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

/// Default configuration file, expanded against the environment.
pub const DEFAULT_CONFIG_PATH: &str = "$HOME/.snapkeep";

/// Archiver binary used when the configuration does not name one.
pub const DEFAULT_TOOL: &str = "tarsnap";

/// Time fragment appended to archive names (after a leading dot).
pub const TAG_TIME_FORMAT: &str = "%Y%m%d-%H%M";

/// Creation timestamps as printed by `tarsnap --list-archives -v`.
pub const LIST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of the `--now` override accepted by prune and restore.
pub const NOW_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// -- Logging --
pub const DEFAULT_VERBOSITY: u32 = 1;
/// Verbosity level at which rule evaluations and subprocess command
/// lines are logged.
pub const VERBOSE_VERBOSITY: u32 = 2;

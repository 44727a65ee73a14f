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

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::archiver::Archive;
use crate::utils::json;

/// The data stored in the persistent archive list cache. The tag is the
/// archiver's cache token at the time the listing was taken; when the
/// current token differs the listing is stale.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ListCache {
    #[serde(rename = "cacheTag")]
    pub tag: String,

    #[serde(rename = "archiveList")]
    pub archives: Vec<Archive>,
}

impl ListCache {
    /// Reads a cache document from `path`.
    pub fn load_from(path: &Path) -> Result<ListCache> {
        json::load_json(path)
    }

    /// Writes the cache document to `path`, creating the parent
    /// directory if needed. The write is an atomic replace.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                create_private_dir(dir)?;
            }
        }
        json::save_json_atomic(self, path)
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

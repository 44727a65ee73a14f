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

pub mod tarsnap;

use std::{collections::HashMap, path::PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::global::defaults::TAG_TIME_FORMAT;

/// A single archive in the store. The name is `base` followed by `tag`,
/// where a well-formed tag is a dot and a timestamp fragment
/// (".YYYYMMDD-HHMM", local time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub name: String,
    pub base: String,
    pub tag: String,
    pub created: DateTime<Local>,
}

impl Archive {
    /// Splits `name` at its last dot into base and tag. A name without a
    /// dot has an empty tag and is never owned by a backup set.
    pub fn from_name(name: &str, created: DateTime<Local>) -> Self {
        let (base, tag) = match name.rsplit_once('.') {
            Some((base, _)) => (base, &name[base.len()..]),
            None => (name, ""),
        };
        Archive {
            name: name.to_string(),
            base: base.to_string(),
            tag: tag.to_string(),
            created,
        }
    }

    /// The creation time encoded in the tag, or `None` when the tag does
    /// not have the expected format.
    pub fn tag_time(&self) -> Option<DateTime<Local>> {
        parse_tag(&self.tag)
    }
}

/// Parses a ".YYYYMMDD-HHMM" tag fragment in the local time zone.
pub fn parse_tag(tag: &str) -> Option<DateTime<Local>> {
    let body = tag.strip_prefix('.')?;
    let naive = NaiveDateTime::parse_from_str(body, TAG_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Formats the archive tag for a creation moment.
pub fn format_tag(moment: DateTime<Local>) -> String {
    format!(".{}", moment.format(TAG_TIME_FORMAT))
}

/// Sorts archives nondecreasing by creation time, then by name.
pub fn sort_archives(archives: &mut [Archive]) {
    archives.sort_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// The most recent archive of `base` created at or before `now`.
pub fn latest_as_of<'a>(
    archives: &'a [Archive],
    base: &str,
    now: DateTime<Local>,
) -> Option<&'a Archive> {
    archives
        .iter()
        .filter(|a| a.base == base && a.created <= now)
        .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)))
}

/// Settings for creating a new archive.
#[derive(Debug, Default, Clone)]
pub struct CreateOptions {
    /// Directory to archive from; the adapter's default when unset.
    pub workdir: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Raw path substitution rules, passed through to the archiver.
    pub modify: Vec<String>,
    pub follow_symlinks: bool,
    pub store_access_time: bool,
    pub preserve_paths: bool,
    pub creation_time: Option<DateTime<Local>>,
    pub dry_run: bool,
}

/// Settings for extracting files from an archive.
#[derive(Debug, Default, Clone)]
pub struct ExtractOptions {
    /// Directory to restore into.
    pub workdir: Option<PathBuf>,
    pub include: Vec<String>,
    /// Stop reading the archive once every include has been seen.
    pub fast_read: bool,
    pub restore_permissions: bool,
}

/// Storage totals as reported by the archiver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    pub input_bytes: u64,
    pub compressed_bytes: u64,
    pub unique_bytes: u64,
    pub compressed_unique_bytes: u64,
}

impl Sizes {
    pub fn accumulate(&mut self, other: &Sizes) {
        self.input_bytes += other.input_bytes;
        self.compressed_bytes += other.compressed_bytes;
        self.unique_bytes += other.unique_bytes;
        self.compressed_unique_bytes += other.compressed_unique_bytes;
    }
}

#[derive(Debug, Default, Clone)]
pub struct SizeInfo {
    /// Totals over the whole store.
    pub all: Sizes,
    /// Per-archive statistics, keyed by archive name.
    pub archives: HashMap<String, Sizes>,
}

/// Abstraction of the external content-addressed archiver.
///
/// The engine needs exactly these operations; everything about storage,
/// transport and encryption stays behind this seam.
pub trait Archiver {
    /// All archives in the store, ordered by (created, name).
    fn list(&self) -> Result<Vec<Archive>>;

    /// An opaque token that changes exactly when the archive universe
    /// changes. Used to validate the persistent list cache.
    fn cache_tag(&self) -> Result<String>;

    /// Creates a new archive.
    fn create(&self, name: &str, opts: &CreateOptions) -> Result<()>;

    /// Removes the named archives.
    fn delete(&self, names: &[String]) -> Result<()>;

    /// Restores files from an archive.
    fn extract(&self, name: &str, opts: &ExtractOptions) -> Result<()>;

    /// Usage statistics, overall and for the named archives.
    fn size(&self, names: &[String]) -> Result<SizeInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(secs: i64) -> DateTime<Local> {
        Local.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_from_name() {
        let a = Archive::from_name("docs.20190320-1100", local(0));
        assert_eq!(a.base, "docs");
        assert_eq!(a.tag, ".20190320-1100");
        assert_eq!(a.name, "docs.20190320-1100");

        let b = Archive::from_name("dotted.name.20190320-1100", local(0));
        assert_eq!(b.base, "dotted.name");
        assert_eq!(b.tag, ".20190320-1100");

        let c = Archive::from_name("undotted", local(0));
        assert_eq!(c.base, "undotted");
        assert_eq!(c.tag, "");
        assert!(c.tag_time().is_none());
    }

    #[test]
    fn test_parse_tag() {
        assert!(parse_tag(".20190320-1100").is_some());
        assert!(parse_tag("20190320-1100").is_none());
        assert!(parse_tag(".2019-03-20").is_none());
        assert!(parse_tag(".20190320-1100x").is_none());
        assert!(parse_tag(".backup").is_none());
        assert!(parse_tag("").is_none());
    }

    #[test]
    fn test_tag_roundtrip() {
        let moment = Local.with_ymd_and_hms(2019, 3, 20, 11, 0, 0).unwrap();
        let tag = format_tag(moment);
        assert_eq!(tag, ".20190320-1100");
        assert_eq!(parse_tag(&tag), Some(moment));
    }

    #[test]
    fn test_sort_archives() {
        let mut archives = vec![
            Archive::from_name("b.20190320-1100", local(200)),
            Archive::from_name("a.20190320-1100", local(200)),
            Archive::from_name("c.20190318-1100", local(100)),
        ];
        sort_archives(&mut archives);
        let names: Vec<&str> = archives.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["c.20190318-1100", "a.20190320-1100", "b.20190320-1100"]
        );
    }

    #[test]
    fn test_latest_as_of() {
        let archives = vec![
            Archive::from_name("docs.20190318-1100", local(100)),
            Archive::from_name("docs.20190319-1100", local(200)),
            Archive::from_name("docs.20190320-1100", local(300)),
            Archive::from_name("pics.20190320-1200", local(400)),
        ];

        let latest = latest_as_of(&archives, "docs", local(250)).unwrap();
        assert_eq!(latest.name, "docs.20190319-1100");

        let latest = latest_as_of(&archives, "docs", local(300)).unwrap();
        assert_eq!(latest.name, "docs.20190320-1100");

        assert!(latest_as_of(&archives, "docs", local(50)).is_none());
        assert!(latest_as_of(&archives, "video", local(500)).is_none());
    }
}

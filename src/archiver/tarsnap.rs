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
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, NaiveDateTime, TimeZone};

use crate::{
    archiver::{Archive, Archiver, CreateOptions, ExtractOptions, SizeInfo, Sizes, sort_archives},
    config::{Config, FlagRule},
    global::defaults::{DEFAULT_TOOL, LIST_TIME_FORMAT},
    ui,
};

/// Drives the tarsnap command-line tool as a subprocess. One invocation
/// per operation; stdout is parsed, stderr is surfaced in errors.
pub struct Tarsnap {
    tool: String,
    keyfile: Option<PathBuf>,
    cachedir: Option<PathBuf>,
    workdir: Option<PathBuf>,
    flags: Vec<FlagRule>,
}

impl Tarsnap {
    pub fn from_config(cfg: &Config) -> Self {
        Tarsnap {
            tool: cfg.tool.clone().unwrap_or_else(|| DEFAULT_TOOL.to_string()),
            keyfile: cfg.keyfile.clone(),
            cachedir: cfg.cachedir.clone(),
            workdir: cfg.workdir.clone(),
            flags: cfg.flags.clone(),
        }
    }

    /// Flags common to every invocation, plus the configured extras for
    /// this mode.
    fn base_args(&self, mode: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(keyfile) = &self.keyfile {
            args.push("--keyfile".to_string());
            args.push(keyfile.to_string_lossy().into_owned());
        }
        if let Some(cachedir) = &self.cachedir {
            args.push("--cachedir".to_string());
            args.push(cachedir.to_string_lossy().into_owned());
        }
        for rule in &self.flags {
            if rule.matches.is_empty() || rule.matches.iter().any(|m| m == mode) {
                args.extend(rule.flag.iter().cloned());
            }
        }
        args
    }

    fn run_tool(&self, args: &[String], workdir: Option<&Path>) -> Result<String> {
        ui::cli::verbose!(
            "+ [{}] {} {}",
            workdir.map_or_else(|| ".".to_string(), |d| d.display().to_string()),
            self.tool,
            args.join(" ")
        );

        let mut cmd = Command::new(&self.tool);
        cmd.args(args);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("running {:?}", self.tool))?;
        if !output.status.success() {
            bail!(
                "{} {}: {}",
                self.tool,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Archiver for Tarsnap {
    fn list(&self) -> Result<Vec<Archive>> {
        let mut args = self.base_args("list");
        args.push("--list-archives".to_string());
        args.push("-v".to_string());

        let out = self.run_tool(&args, None)?;
        parse_listing(&out)
    }

    fn cache_tag(&self) -> Result<String> {
        let Some(cachedir) = &self.cachedir else {
            bail!("no cache directory configured");
        };
        // The tarsnap cache keeps its archive directory in a file named
        // "directory"; its size and mtime change whenever the archive
        // universe does.
        let meta = std::fs::metadata(cachedir.join("directory"))
            .with_context(|| format!("reading cache state in {}", cachedir.display()))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .ok_or_else(|| anyhow!("cache state has no modification time"))?;
        Ok(format!("{}.{}", meta.len(), modified))
    }

    fn create(&self, name: &str, opts: &CreateOptions) -> Result<()> {
        let mut args = self.base_args("c");
        args.push("-c".to_string());
        args.push("-f".to_string());
        args.push(name.to_string());

        if opts.dry_run {
            args.push("--dry-run".to_string());
        }
        if let Some(moment) = opts.creation_time {
            args.push("--creationtime".to_string());
            args.push(moment.timestamp().to_string());
        }
        if opts.follow_symlinks {
            args.push("-L".to_string());
        }
        if opts.store_access_time {
            args.push("--store-atime".to_string());
        }
        if opts.preserve_paths {
            args.push("-P".to_string());
        }
        for rule in &opts.modify {
            args.push("-s".to_string());
            args.push(rule.clone());
        }
        for pattern in &opts.exclude {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        args.extend(opts.include.iter().cloned());

        let workdir = opts.workdir.as_deref().or(self.workdir.as_deref());
        self.run_tool(&args, workdir)?;
        Ok(())
    }

    fn delete(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = self.base_args("d");
        args.push("-d".to_string());
        for name in names {
            args.push("-f".to_string());
            args.push(name.clone());
        }
        self.run_tool(&args, None)?;
        Ok(())
    }

    fn extract(&self, name: &str, opts: &ExtractOptions) -> Result<()> {
        let mut args = self.base_args("x");
        args.push("-x".to_string());
        args.push("-f".to_string());
        args.push(name.to_string());

        if opts.fast_read {
            args.push("--fast-read".to_string());
        }
        if opts.restore_permissions {
            args.push("-p".to_string());
        }
        args.extend(opts.include.iter().cloned());

        self.run_tool(&args, opts.workdir.as_deref())?;
        Ok(())
    }

    fn size(&self, names: &[String]) -> Result<SizeInfo> {
        let mut args = self.base_args("print-stats");
        args.push("--print-stats".to_string());
        args.push("--no-humanize-numbers".to_string());
        for name in names {
            args.push("-f".to_string());
            args.push(name.clone());
        }

        let out = self.run_tool(&args, None)?;
        parse_stats(&out)
    }
}

/// Parses `tarsnap --list-archives -v` output: one archive per line,
/// name and creation timestamp separated by a tab.
fn parse_listing(text: &str) -> Result<Vec<Archive>> {
    let mut archives = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((name, stamp)) = line.rsplit_once('\t') else {
            bail!("malformed listing line {line:?}");
        };
        let naive = NaiveDateTime::parse_from_str(stamp.trim(), LIST_TIME_FORMAT)
            .with_context(|| format!("invalid creation time {:?}", stamp.trim()))?;
        let created = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| anyhow!("unrepresentable creation time {:?}", stamp.trim()))?;
        archives.push(Archive::from_name(name, created));
    }
    sort_archives(&mut archives);
    Ok(archives)
}

/// Parses `tarsnap --print-stats --no-humanize-numbers` output. Each
/// subject row carries total and compressed bytes and is followed by a
/// "(unique data)" row with the deduplicated figures.
fn parse_stats(text: &str) -> Result<SizeInfo> {
    let mut info = SizeInfo::default();
    let mut current: Option<(String, u64, u64)> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() || line.contains("Total size") {
            continue;
        }
        let Some((subject, input, compressed)) = split_stats_line(line) else {
            bail!("malformed stats line {line:?}");
        };

        if subject == "(unique data)" {
            let Some((name, total_input, total_compressed)) = current.take() else {
                bail!("stats line {line:?} has no subject");
            };
            let sizes = Sizes {
                input_bytes: total_input,
                compressed_bytes: total_compressed,
                unique_bytes: input,
                compressed_unique_bytes: compressed,
            };
            if name == "All archives" {
                info.all = sizes;
            } else {
                info.archives.insert(name, sizes);
            }
        } else {
            current = Some((subject, input, compressed));
        }
    }
    Ok(info)
}

/// Splits a stats row into its subject and two trailing byte counts.
fn split_stats_line(line: &str) -> Option<(String, u64, u64)> {
    let (head, compressed) = line.trim_end().rsplit_once(char::is_whitespace)?;
    let (subject, input) = head.trim_end().rsplit_once(char::is_whitespace)?;
    Some((
        subject.trim().to_string(),
        input.parse().ok()?,
        compressed.parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let out = "docs.20190320-1100\t2019-03-20 11:00:00\n\
                   pics.20190318-0400\t2019-03-18 04:00:00\n\
                   stray\t2019-01-01 00:00:00\n";
        let archives = parse_listing(out).unwrap();

        assert_eq!(archives.len(), 3);
        // Sorted by creation time.
        assert_eq!(archives[0].name, "stray");
        assert_eq!(archives[1].name, "pics.20190318-0400");
        assert_eq!(archives[2].name, "docs.20190320-1100");

        assert_eq!(archives[2].base, "docs");
        assert_eq!(archives[2].tag, ".20190320-1100");
        assert!(archives[2].tag_time().is_some());
        assert!(archives[0].tag_time().is_none());
    }

    #[test]
    fn test_parse_listing_malformed() {
        assert!(parse_listing("no-tab-here").is_err());
        assert!(parse_listing("name\tnot a date").is_err());
        assert!(parse_listing("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_stats() {
        let out = "                                       Total size  Compressed size\n\
                   All archives                            104491640         67559778\n\
                     (unique data)                          14830618          8270821\n\
                   docs.20190320-1100                        2097152          1048576\n\
                     (unique data)                            524288           262144\n";
        let info = parse_stats(out).unwrap();

        assert_eq!(info.all.input_bytes, 104_491_640);
        assert_eq!(info.all.compressed_bytes, 67_559_778);
        assert_eq!(info.all.unique_bytes, 14_830_618);
        assert_eq!(info.all.compressed_unique_bytes, 8_270_821);

        let docs = &info.archives["docs.20190320-1100"];
        assert_eq!(docs.input_bytes, 2_097_152);
        assert_eq!(docs.unique_bytes, 524_288);
    }

    #[test]
    fn test_parse_stats_malformed() {
        assert!(parse_stats("one two\n").is_err());
        assert!(parse_stats("  (unique data)  1  2\n").is_err());
    }

    #[test]
    fn test_flag_filtering() {
        let tarsnap = Tarsnap {
            tool: DEFAULT_TOOL.to_string(),
            keyfile: Some(PathBuf::from("/keys/tarsnap.key")),
            cachedir: None,
            workdir: None,
            flags: vec![
                FlagRule {
                    matches: vec!["c".to_string()],
                    flag: vec!["--checkpoint-bytes".to_string(), "128M".to_string()],
                },
                FlagRule {
                    matches: vec![],
                    flag: vec!["--quiet".to_string()],
                },
            ],
        };

        let create = tarsnap.base_args("c");
        assert_eq!(
            create,
            vec![
                "--keyfile",
                "/keys/tarsnap.key",
                "--checkpoint-bytes",
                "128M",
                "--quiet"
            ]
        );

        let list = tarsnap.base_args("list");
        assert_eq!(list, vec!["--keyfile", "/keys/tarsnap.key", "--quiet"]);
    }
}

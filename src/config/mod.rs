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

pub mod cache;
pub mod interval;
pub mod matcher;
pub mod policy;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use filetime::FileTime;
use serde::Deserialize;

use crate::{
    archiver::{Archive, Archiver, CreateOptions, sort_archives},
    config::{
        cache::ListCache,
        interval::Interval,
        policy::{Policy, normalize_and_sort},
    },
    ui, utils,
};

/// Settings for the snapkeep tool, parsed from the YAML configuration
/// file. Unknown fields are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// An ordered list of backup sets.
    #[serde(default)]
    pub backup: Vec<Backup>,

    /// Default expiration rules.
    #[serde(default)]
    pub expiration: Vec<Policy>,

    /// Named expiration rule sets.
    #[serde(default)]
    pub policy: BTreeMap<String, Vec<Policy>>,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,

    /// Cache archive listings in this file.
    #[serde(default)]
    pub list_cache: Option<PathBuf>,

    /// Automatic pruning after a create cycle.
    #[serde(default)]
    pub auto_prune: AutoPrune,

    // Settings for the archiver tool.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    #[serde(default)]
    pub cachedir: Option<PathBuf>,
    /// Extra archiver flags, filtered by subcommand. Opaque here; the
    /// adapter interprets the entries.
    #[serde(default)]
    pub flags: Vec<FlagRule>,

    #[serde(skip)]
    cached_list: Option<ListCache>,
}

/// Gate settings for automatic pruning. Only the sentinel file's
/// modification time is significant; an interval of zero prunes on
/// every create cycle.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoPrune {
    #[serde(default)]
    pub timestamp: Option<PathBuf>,
    #[serde(default)]
    pub interval: Option<Interval>,
}

/// An archiver flag entry: `flag` is appended to invocations whose mode
/// is listed in `match` (every mode when `match` is empty).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagRule {
    #[serde(default, rename = "match")]
    pub matches: Vec<String>,
    #[serde(default)]
    pub flag: Vec<String>,
}

/// The expiration policy a backup set names. The reserved strings
/// "default" and "none" and the empty string are resolved here, at the
/// interface layer; the engine only sees the variants.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum PolicyName {
    /// No policy named: the set's own rules, or the defaults.
    #[default]
    Unset,
    /// The default rules, extended by the set's own rules.
    Default,
    /// Only the set's own rules, even if empty.
    None,
    /// A named rule set, extended by the set's own rules.
    Named(String),
}

impl<'de> Deserialize<'de> for PolicyName {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "" => PolicyName::Unset,
            "default" => PolicyName::Default,
            "none" => PolicyName::None,
            _ => PolicyName::Named(s),
        })
    }
}

impl std::fmt::Display for PolicyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyName::Unset => write!(f, ""),
            PolicyName::Default => write!(f, "default"),
            PolicyName::None => write!(f, "none"),
            PolicyName::Named(name) => write!(f, "{name}"),
        }
    }
}

/// A collection of files to be backed up as a unit. The name is the base
/// name of the set's archives; a timestamp tag is appended to it to form
/// each complete archive name.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Backup {
    #[serde(default)]
    pub name: String,

    /// Expiration rules for this set.
    #[serde(default)]
    pub expiration: Vec<Policy>,

    /// Named expiration policy.
    #[serde(default)]
    pub policy: PolicyName,

    /// Expand shell globs in included paths at load time.
    #[serde(default)]
    pub glob_includes: bool,

    /// Skip this set in a bare create run; archive it only when it is
    /// named explicitly.
    #[serde(default)]
    pub manual: bool,

    // Archive creation settings.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub modify: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub store_access_time: bool,
    #[serde(default)]
    pub preserve_paths: bool,
}

impl Backup {
    /// Archiver options for creating one archive of this set.
    pub fn create_options(&self, creation_time: DateTime<Local>, dry_run: bool) -> CreateOptions {
        CreateOptions {
            workdir: self.workdir.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            modify: self.modify.clone(),
            follow_symlinks: self.follow_symlinks,
            store_access_time: self.store_access_time,
            preserve_paths: self.preserve_paths,
            creation_time: Some(creation_time),
            dry_run,
        }
    }
}

/// A path relative to a particular backup set.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupPath<'a> {
    pub relative: String,
    pub backup: &'a Backup,
}

impl Config {
    /// Decodes a configuration from YAML text and validates it.
    pub fn parse(text: &str) -> Result<Config> {
        let mut cfg: Config =
            serde_yaml::from_str(text).context("parsing configuration")?;
        cfg.finish()?;
        Ok(cfg)
    }

    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        Config::parse(&text)
    }

    /// Validation and normalization after the structural parse.
    fn finish(&mut self) -> Result<()> {
        normalize_and_sort(&mut self.expiration);
        for rules in self.policy.values_mut() {
            normalize_and_sort(rules);
        }

        expand_path(&mut self.workdir);
        expand_path(&mut self.keyfile);
        expand_path(&mut self.cachedir);
        expand_path(&mut self.list_cache);
        expand_path(&mut self.auto_prune.timestamp);

        let mut seen = HashSet::new();
        for b in &mut self.backup {
            if b.name.is_empty() {
                bail!("empty backup name");
            } else if !seen.insert(b.name.clone()) {
                bail!("repeated backup name {:?}", b.name);
            }
            if let PolicyName::Named(name) = &b.policy {
                if !self.policy.contains_key(name) {
                    bail!("backup {:?} names unknown policy {:?}", b.name, name);
                }
            }
            normalize_and_sort(&mut b.expiration);
            expand_path(&mut b.workdir);
            if b.glob_includes {
                expand_globs(b, self.workdir.as_deref());
            }
        }
        Ok(())
    }

    /// Returns the backup matching `name`, if any.
    pub fn find_set(&self, name: &str) -> Option<&Backup> {
        self.backup.iter().find(|b| b.name == name)
    }

    /// Reports the backup sets that claim `path`, along with the name
    /// the path has inside each set's archives.
    pub fn find_path(&self, path: &str) -> Vec<BackupPath<'_>> {
        let mut out = Vec::new();
        for b in &self.backup {
            let Some(mut rel) = matcher::contains_path(b, self.workdir.as_deref(), path) else {
                continue;
            };

            // Apply any substitution rules so the caller gets the name
            // that occurs in the archive.
            for raw in &b.modify {
                match matcher::Rule::parse(raw) {
                    Ok(rule) => {
                        if let Some(s) = rule.apply(&rel) {
                            rel = s;
                            break;
                        }
                    }
                    Err(err) => ui::cli::log_warning(&format!(
                        "invalid substitution rule {raw:?}: {err} [ignored]"
                    )),
                }
            }
            out.push(BackupPath {
                relative: rel,
                backup: b,
            });
        }
        out
    }

    /// The expiration rules in effect for `b`, freshly composed and in
    /// canonical order. An empty result retains everything.
    pub fn resolve_policy(&self, b: &Backup) -> Vec<Policy> {
        let mut rules = match &b.policy {
            PolicyName::None => b.expiration.clone(),
            PolicyName::Unset => {
                if b.expiration.is_empty() {
                    self.expiration.clone()
                } else {
                    b.expiration.clone()
                }
            }
            PolicyName::Default => {
                let mut rules = self.expiration.clone();
                rules.extend_from_slice(&b.expiration);
                rules
            }
            PolicyName::Named(name) => {
                let mut rules = self.policy.get(name).cloned().unwrap_or_default();
                rules.extend_from_slice(&b.expiration);
                rules
            }
        };
        normalize_and_sort(&mut rules);
        rules
    }

    /// Returns the archives in `archives` that are eligible for removal
    /// under the expiration rules in effect, given that `now` denotes
    /// the present moment.
    pub fn find_expired(&self, archives: &[Archive], now: DateTime<Local>) -> Vec<Archive> {
        ui::cli::verbose!(
            "Finding expired archives, {} inputs, current time {}",
            archives.len(),
            now
        );

        // Partition the archives by owning set. Archives whose tag does
        // not have the timestamp format belong to no set and are kept.
        let mut sets: HashMap<&str, Vec<&Archive>> = HashMap::new();
        for a in archives {
            if a.tag_time().is_none() {
                ui::cli::verbose!("Skipping archive {:?} (wrong name format)", a.name);
                continue;
            }
            sets.entry(a.base.as_str()).or_default().push(a);
        }

        let mut expired = Vec::new();
        for b in &self.backup {
            let rules = self.resolve_policy(b);
            if rules.is_empty() {
                ui::cli::verbose!("No expiration rules for {} [skipping]", b.name);
                continue;
            }
            let Some(owned) = sets.get(b.name.as_str()) else {
                continue;
            };
            ui::cli::verbose!("Applying {} expiration rules for {}", rules.len(), b.name);

            // Assign each archive to the first applicable rule in
            // canonical order. An archive with no applicable rule is
            // kept unconditionally.
            let mut batches: Vec<Vec<&Archive>> = vec![Vec::new(); rules.len()];
            for &a in owned {
                let age = Interval::between(a.created, now);
                if let Some(i) = rules.iter().position(|rule| rule.applies_to(age)) {
                    batches[i].push(a);
                }
            }

            for (rule, mut batch) in rules.iter().zip(batches) {
                if batch.is_empty() {
                    continue;
                }
                batch.sort_by(|x, y| {
                    x.created.cmp(&y.created).then_with(|| x.name.cmp(&y.name))
                });
                ui::cli::verbose!(":: {} ({} candidates)", rule, batch.len());
                expired.extend(rule.apply(&batch).into_iter().cloned());
            }
        }
        expired
    }

    /// Returns the known archives, ordered by (created, name), using the
    /// persistent cache when it is still valid for the archiver's
    /// current cache tag. Cache failures fall back to a live listing.
    pub fn list(&mut self, archiver: &dyn Archiver) -> Result<Vec<Archive>> {
        let Some(cache_path) = self.list_cache.clone() else {
            let mut archives = archiver.list()?;
            sort_archives(&mut archives);
            return Ok(archives);
        };

        let tag = match archiver.cache_tag() {
            Ok(tag) => Some(tag),
            Err(err) => {
                ui::cli::verbose!("No cache tag available: {err:#}");
                None
            }
        };

        if let (Some(tag), Some(cached)) = (&tag, &self.cached_list) {
            if &cached.tag == tag {
                return Ok(cached.archives.clone());
            }
        }

        if let Some(tag) = &tag {
            match ListCache::load_from(&cache_path) {
                Ok(mut cached) if &cached.tag == tag => {
                    // Loaded from outside; make sure the order holds.
                    sort_archives(&mut cached.archives);
                    let archives = cached.archives.clone();
                    self.cached_list = Some(cached);
                    return Ok(archives);
                }
                Ok(_) => ui::cli::verbose!("List cache is stale, refreshing"),
                Err(err) => ui::cli::verbose!("List cache unavailable: {err:#}"),
            }
        }

        let mut archives = archiver.list()?;
        sort_archives(&mut archives);
        let cached = ListCache {
            tag: tag.unwrap_or_default(),
            archives,
        };
        if let Err(err) = cached.save_to(&cache_path) {
            ui::cli::log_warning(&format!("writing list cache: {err:#}"));
        }
        let archives = cached.archives.clone();
        self.cached_list = Some(cached);
        Ok(archives)
    }

    /// Marks the cached list data as invalid, forcing an update the next
    /// time a listing is required.
    pub fn invalidate_list_cache(&mut self) {
        self.cached_list = None;
        if let Some(path) = &self.list_cache {
            let _ = std::fs::File::create(path).and_then(|f| f.set_len(0));
        }
    }

    /// Reports whether an automatic prune cycle is due: the sentinel
    /// file's age meets the configured interval. Sentinel problems are
    /// warnings; auto-prune simply does not run.
    pub fn should_auto_prune(&self) -> bool {
        let Some(path) = &self.auto_prune.timestamp else {
            return false;
        };
        if let Err(err) = ensure_sentinel(path) {
            ui::cli::log_warning(&format!("creating prune timestamp: {err}"));
            return false;
        }
        let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                ui::cli::log_warning(&format!("reading prune timestamp: {err}"));
                return false;
            }
        };
        let interval = self.auto_prune.interval.unwrap_or_default();
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age.as_secs() as i64 >= interval.seconds(),
            Err(_) => false, // sentinel from the future
        }
    }

    /// Stamps the auto-prune sentinel with the current wall-clock time.
    pub fn update_prune_timestamp(&self) -> Result<()> {
        let Some(path) = &self.auto_prune.timestamp else {
            return Ok(());
        };
        ensure_sentinel(path)?;
        filetime::set_file_mtime(path, FileTime::now())
            .with_context(|| format!("updating {}", path.display()))?;
        Ok(())
    }
}

fn expand_path(path: &mut Option<PathBuf>) {
    if let Some(p) = path {
        *p = PathBuf::from(utils::expand_env(&p.to_string_lossy()));
    }
}

/// Creates the sentinel file, empty and owner-only, if it is missing.
fn ensure_sentinel(path: &Path) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    match opts.open(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err),
    }
}

/// Expands filesystem globs in a backup's include list, relative to its
/// workdir (or the default). Matches under the workdir are stored
/// relative again, so the include entries stay archive-relative.
fn expand_globs(b: &mut Backup, default_workdir: Option<&Path>) {
    let base = b
        .workdir
        .clone()
        .or_else(|| default_workdir.map(Path::to_path_buf))
        .unwrap_or_default();

    let mut paths = Vec::new();
    for inc in &b.include {
        let full = if Path::new(inc).is_absolute() {
            PathBuf::from(inc)
        } else {
            base.join(inc)
        };
        let Ok(matches) = glob::glob(&full.to_string_lossy()) else {
            continue; // an unparseable pattern matches nothing
        };
        for path in matches.flatten() {
            let mut entry = path.to_string_lossy().into_owned();
            if !base.as_os_str().is_empty() {
                let prefix = format!("{}/", base.display());
                if let Some(rel) = entry.strip_prefix(&prefix) {
                    entry = rel.to_string();
                }
            }
            paths.push(entry);
        }
    }
    b.include = paths;
}

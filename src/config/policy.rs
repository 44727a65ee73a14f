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

use std::cmp::Reverse;

use serde::Deserialize;

use crate::archiver::Archive;
use crate::config::interval::{Interval, Sampling};
use crate::ui;

/// A rule for which archives to keep. When several rules could govern an
/// archive, the governing one is the first in canonical order whose
/// window spans the archive's age: the narrowest span between `after`
/// and `until` before present, inclusive, with ties broken in favor of
/// the window starting later.
///
/// For example, suppose X is an archive created 7 days before present,
/// and these rules are in effect:
///
///   P(after=1d, until=10d)
///   Q(after=4d, until=8d)
///   R(after=3d, until=6d)
///
/// X is governed by Q. R is ineligible because it does not span the age
/// of X, and Q is preferable to P because Q is only 4 days wide whereas
/// P is 9 days wide.
///
/// A rule with no `until` (or a raw value of 0) extends to +∞.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// The rule applies to archives created in the inclusive interval
    /// between `after` and `until` before present.
    #[serde(default, rename = "after")]
    pub min: Interval,
    #[serde(default, rename = "until")]
    pub max: Interval,

    /// If positive, keep up to this many of the most recent matching
    /// archives unconditionally.
    #[serde(default)]
    pub latest: u32,

    /// If set, retain this many samples per period within the window.
    /// Sample buckets are anchored to the Unix epoch so that they do not
    /// move over time, and the latest-created archive in each bucket is
    /// the one retained.
    #[serde(default)]
    pub sample: Option<Sampling>,
}

impl Policy {
    pub fn width(&self) -> Interval {
        self.max.saturating_sub(self.min)
    }

    /// Canonical ordering key: narrower windows first, then later
    /// starts. Sorting with this key is stable, so rules with identical
    /// windows keep their declaration order.
    pub fn sort_key(&self) -> (Interval, Reverse<Interval>) {
        (self.width(), Reverse(self.min))
    }

    pub fn applies_to(&self, age: Interval) -> bool {
        self.min <= age && age <= self.max
    }

    /// Returns the archives in `batch` that this rule expires. The batch
    /// must be ordered by creation time, oldest first.
    pub fn apply<'a>(&self, batch: &[&'a Archive]) -> Vec<&'a Archive> {
        let latest = self.latest as usize;
        if latest >= batch.len() {
            ui::cli::verbose!("+ keep {}, all candidates are recent", batch.len());
            return Vec::new();
        }
        let batch = &batch[..batch.len() - latest];
        if latest > 0 {
            ui::cli::verbose!("+ keep latest {}, {} left", latest, batch.len());
        }

        let Some(sample) = self.sample.filter(|s| s.count > 0) else {
            ui::cli::verbose!("- drop {}, no sampling is enabled", batch.len());
            return batch.to_vec();
        };
        if sample.period.is_zero() {
            ui::cli::verbose!("+ keep all {}, sample period is zero", batch.len());
            return Vec::new();
        }

        // The width of the scaled sampling bucket, where count/period =
        // 1/ival. A period shorter than the sample count floors to zero,
        // which is finer than our one-second resolution: keep everything.
        let ival = sample.period.seconds() / sample.count as i64;
        if ival == 0 {
            return Vec::new();
        }

        // Find the bucket containing the most recent entry in the
        // window; that entry is kept. Walking backward (the batch is in
        // ascending creation order), entries still in the current bucket
        // are dropped, and the first entry beyond it opens the next
        // bucket and is kept as that bucket's representative. Buckets
        // count from the epoch, so they do not shift as archives arrive.
        let (last, rest) = batch.split_last().unwrap();
        let mut base = ival * (last.created.timestamp() / ival);
        ui::cli::verbose!("+ keep {:?} by sampling rule {} [base {}]", last.name, sample, base);

        let mut drop = Vec::new();
        for a in rest.iter().rev() {
            if a.created.timestamp() >= base {
                ui::cli::verbose!("- drop {:?} by sampling rule {}", a.name, sample);
                drop.push(*a);
            } else {
                base -= ival;
                ui::cli::verbose!("+ keep {:?} by sampling rule {} [base {}]", a.name, sample, base);
            }
        }
        drop
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let max = if self.max == Interval::FOREVER {
            "∞".to_string()
        } else {
            self.max.to_string()
        };
        let sample = match &self.sample {
            Some(s) => s.to_string(),
            None => "none".to_string(),
        };
        write!(
            f,
            "rule [{}..{}] keep {} sample {}",
            self.min, max, self.latest, sample
        )
    }
}

/// Gives an unbounded upper end to rules with no explicit `until`, then
/// sorts into canonical order. Every rule list is run through here at
/// load time and after composition.
pub fn normalize_and_sort(rules: &mut [Policy]) {
    for rule in rules.iter_mut() {
        if rule.max.is_zero() {
            rule.max = Interval::FOREVER;
        }
    }
    rules.sort_by_key(Policy::sort_key);
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Local, TimeZone};

    fn days(n: i64) -> Interval {
        Interval::from_seconds(n * 86_400)
    }

    fn rule(min: Interval, max: Interval) -> Policy {
        Policy {
            min,
            max,
            ..Default::default()
        }
    }

    fn archive_at(base: &str, created: DateTime<Local>) -> Archive {
        Archive::from_name(
            &format!("{base}{}", crate::archiver::format_tag(created)),
            created,
        )
    }

    /// A batch of archives `spacing` apart, oldest first, the newest at
    /// `newest`.
    fn batch(base: &str, newest: DateTime<Local>, spacing: Interval, count: usize) -> Vec<Archive> {
        (0..count)
            .rev()
            .map(|k| {
                archive_at(
                    base,
                    newest - chrono::Duration::seconds(spacing.seconds() * k as i64),
                )
            })
            .collect()
    }

    #[test]
    fn test_order_is_total() {
        let rules = [
            rule(days(1), days(2)),
            rule(days(2), days(3)),
            rule(days(2), days(10)),
            rule(days(1), Interval::FOREVER),
            rule(days(0), Interval::FOREVER),
        ];
        for p in &rules {
            for q in &rules {
                let less = p.sort_key() < q.sort_key();
                let greater = q.sort_key() < p.sort_key();
                let tied = p.width() == q.width() && p.min == q.min;
                assert_eq!(!less && !greater, tied, "comparing {p} and {q}");
                assert!(!(less && greater), "comparing {p} and {q}");
            }
        }
    }

    #[test]
    fn test_order() {
        // (p, q, p sorts first)
        let tests = [
            // Ordering is irreflexive.
            (rule(days(1), days(2)), rule(days(1), days(2)), false),
            // Order is primarily by width, narrower first.
            (rule(days(2), days(10)), rule(days(2), days(3)), false),
            (rule(days(2), days(3)), rule(days(2), days(10)), true),
            // On a tie of widths, the later start comes first.
            (rule(days(1), days(3)), rule(days(2), days(4)), false),
            (rule(days(2), days(4)), rule(days(1), days(3)), true),
            // One right-unbounded window is narrower than another if it
            // starts later.
            (
                rule(days(0), Interval::FOREVER),
                rule(days(1), Interval::FOREVER),
                false,
            ),
            (
                rule(days(1), Interval::FOREVER),
                rule(days(0), Interval::FOREVER),
                true,
            ),
        ];
        for (p, q, want) in tests {
            assert_eq!(p.sort_key() < q.sort_key(), want, "comparing {p} and {q}");
        }
    }

    #[test]
    fn test_normalize_and_sort() {
        let mut rules = vec![
            rule(days(1), days(10)),
            rule(days(4), days(8)),
            rule(days(3), Interval::from_seconds(0)),
            rule(days(3), days(6)),
        ];
        normalize_and_sort(&mut rules);

        assert_eq!(rules[0], rule(days(3), days(6)));
        assert_eq!(rules[1], rule(days(4), days(8)));
        assert_eq!(rules[2], rule(days(1), days(10)));
        assert_eq!(rules[3], rule(days(3), Interval::FOREVER));
    }

    #[test]
    fn test_rule_selection_narrow_over_wide() {
        // The example from the Policy doc comment: an archive aged 7
        // days is governed by Q.
        let mut rules = vec![
            rule(days(1), days(10)), // P
            rule(days(4), days(8)),  // Q
            rule(days(3), days(6)),  // R
        ];
        normalize_and_sort(&mut rules);

        let age = days(7);
        let governing = rules.iter().find(|r| r.applies_to(age)).unwrap();
        assert_eq!(*governing, rule(days(4), days(8)));
    }

    #[test]
    fn test_apply_latest_only() {
        let now = Local.with_ymd_and_hms(2019, 3, 20, 12, 0, 0).unwrap();
        let archives = batch("docs", now, Interval::DAY, 4);
        let batch: Vec<&Archive> = archives.iter().collect();

        let policy = Policy {
            latest: 3,
            ..Default::default()
        };
        let dropped = policy.apply(&batch);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].name, archives[0].name); // the oldest

        let generous = Policy {
            latest: 4,
            ..Default::default()
        };
        assert!(generous.apply(&batch).is_empty());
    }

    #[test]
    fn test_apply_no_sampling_drops_rest() {
        let now = Local.with_ymd_and_hms(2019, 3, 20, 12, 0, 0).unwrap();
        let archives = batch("docs", now, Interval::DAY, 5);
        let batch: Vec<&Archive> = archives.iter().collect();

        let policy = Policy {
            latest: 2,
            ..Default::default()
        };
        let dropped = policy.apply(&batch);
        assert_eq!(dropped.len(), 3);

        let none = Policy {
            latest: 2,
            sample: Some("none".parse().unwrap()),
            ..Default::default()
        };
        assert_eq!(none.apply(&batch).len(), 3);
    }

    #[test]
    fn test_apply_sample_all_keeps_everything() {
        let now = Local.with_ymd_and_hms(2019, 3, 20, 12, 0, 0).unwrap();
        let archives = batch("docs", now, Interval::DAY, 5);
        let batch: Vec<&Archive> = archives.iter().collect();

        let policy = Policy {
            sample: Some("all".parse().unwrap()),
            ..Default::default()
        };
        assert!(policy.apply(&batch).is_empty());
    }

    #[test]
    fn test_apply_daily_sampling() {
        // Archives every 6 hours; a 1/day rule keeps the most recent
        // archive of each epoch-aligned day.
        let newest = Local.timestamp_opt(1_553_083_200, 0).unwrap(); // 2019-03-20T12:00:00Z
        let archives = batch("pics", newest, Interval::from_seconds(21_600), 13);
        let batch: Vec<&Archive> = archives.iter().collect();

        let policy = Policy {
            sample: Some("1/day".parse().unwrap()),
            ..Default::default()
        };
        let dropped = policy.apply(&batch);

        // The newest entry (12:00Z) shares its epoch day with the two
        // entries at 06:00Z and 00:00Z; each earlier day keeps its
        // latest (18:00Z) entry and drops the other three.
        let dropped_secs: Vec<i64> = dropped.iter().map(|a| a.created.timestamp()).collect();
        let expect: Vec<i64> = [1, 2, 4, 5, 6, 8, 9, 10, 12]
            .iter()
            .map(|k| newest.timestamp() - k * 21_600)
            .collect();
        assert_eq!(dropped_secs, expect);
    }

    #[test]
    fn test_apply_monotonic_in_latest() {
        let newest = Local.timestamp_opt(1_553_083_200, 0).unwrap();
        let archives = batch("pics", newest, Interval::from_seconds(21_600), 13);
        let batch: Vec<&Archive> = archives.iter().collect();

        let mut previous = usize::MAX;
        for latest in 0..=14 {
            let policy = Policy {
                latest,
                sample: Some("1/day".parse().unwrap()),
                ..Default::default()
            };
            let dropped = policy.apply(&batch).len();
            assert!(
                dropped <= previous.min(batch.len()),
                "latest {latest} dropped {dropped}"
            );
            previous = dropped;
        }
    }

    #[test]
    fn test_sampling_stable_under_new_arrivals() {
        // Adding a newer archive in a later epoch bucket must not change
        // which of the older archives are retained.
        let newest = Local.timestamp_opt(1_553_083_200, 0).unwrap();
        let archives = batch("pics", newest, Interval::from_seconds(21_600), 13);
        let policy = Policy {
            sample: Some("1/day".parse().unwrap()),
            ..Default::default()
        };

        let batch_before: Vec<&Archive> = archives.iter().collect();
        let before: Vec<String> = policy
            .apply(&batch_before)
            .iter()
            .map(|a| a.name.clone())
            .collect();

        let mut extended = archives.clone();
        extended.push(archive_at(
            "pics",
            newest + chrono::Duration::seconds(86_400),
        ));
        let batch_after: Vec<&Archive> = extended.iter().collect();
        let after: Vec<String> = policy
            .apply(&batch_after)
            .iter()
            .map(|a| a.name.clone())
            .collect();

        for name in &before {
            assert!(after.contains(name), "{name} no longer dropped");
        }
    }

    #[test]
    fn test_sub_second_sampling_keeps_everything() {
        let newest = Local.timestamp_opt(1_553_083_200, 0).unwrap();
        let archives = batch("pics", newest, Interval::HOUR, 4);
        let batch: Vec<&Archive> = archives.iter().collect();

        let policy = Policy {
            sample: Some(Sampling {
                count: 10,
                period: Interval::from_seconds(5),
            }),
            ..Default::default()
        };
        assert!(policy.apply(&batch).is_empty());
    }
}

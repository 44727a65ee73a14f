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

use std::{str::FromStr, sync::LazyLock};

use anyhow::{Error, Result, anyhow, bail};
use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Deserializer};

/// A time interval in whole seconds. Parsed from strings in the format
/// "d.dd unit" or "d unit", where unit is one of
///
///   s, sec, secs           -- seconds
///   h, hr, hrs             -- hours
///   d, day, days           -- days (defined as 24 hours)
///   w, wk, week, weeks     -- weeks (defined as 7 days)
///   m, mo, mon, month, months -- months (defined as 365.25/12 = 30.4375 days)
///   y, yr, year, years     -- years (defined as 365.25 days)
///
/// The space between the number and the unit is optional, and a missing
/// number means 1. Fractional values are permitted; results are rounded
/// toward zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval(i64);

impl Interval {
    pub const SECOND: Interval = Interval(1);
    pub const HOUR: Interval = Interval(3600);
    pub const DAY: Interval = Interval(24 * 3600);
    pub const WEEK: Interval = Interval(7 * 24 * 3600);
    /// 30.4375 days.
    pub const MONTH: Interval = Interval(2_629_800);
    /// 365.25 days.
    pub const YEAR: Interval = Interval(31_557_600);

    /// The effective upper bound of a right-unbounded policy window.
    pub const FOREVER: Interval = Interval(i64::MAX);

    pub const fn from_seconds(secs: i64) -> Self {
        Interval(secs)
    }

    pub const fn seconds(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Interval) -> Interval {
        Interval(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Interval) -> Interval {
        Interval(self.0.saturating_sub(other.0))
    }

    /// The signed interval from `earlier` to `later`. Negative when the
    /// arguments are reversed, e.g. an archive stamped after "now".
    pub fn between(earlier: DateTime<Local>, later: DateTime<Local>) -> Interval {
        Interval(later.timestamp() - earlier.timestamp())
    }
}

static INTERVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+|\d*\.\d+)?\s*([A-Za-z]+)\s*$").unwrap());

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let m = INTERVAL_RE
            .captures(s)
            .ok_or_else(|| anyhow!("invalid interval {s:?}"))?;

        let value = match m.get(1) {
            Some(num) => num
                .as_str()
                .parse::<f64>()
                .map_err(|e| anyhow!("invalid number: {e}"))?,
            None => 1.0,
        };

        let unit = match &m[2] {
            "s" | "sec" | "secs" => Interval::SECOND,
            "h" | "hr" | "hrs" => Interval::HOUR,
            "d" | "day" | "days" => Interval::DAY,
            "w" | "wk" | "week" | "weeks" => Interval::WEEK,
            "m" | "mo" | "mon" | "month" | "months" => Interval::MONTH,
            "y" | "yr" | "year" | "years" => Interval::YEAR,
            unknown => bail!("unknown unit {unknown:?}"),
        };

        // `as` saturates, so absurdly large values degrade to FOREVER.
        Ok(Interval((value * unit.0 as f64) as i64))
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Seconds with a unit, so the output parses back to the same
        // value. FOREVER included: its seconds overflow the float
        // parse, which saturates right back to FOREVER.
        write!(f, "{}s", self.0)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A rule for how frequently to sample a sequence of archives: keep
/// `count` samples per `period`. Parsed from "N/interval", with "none"
/// as an alias for 0/0 and "all" as an alias for 1/0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub count: u32,
    pub period: Interval,
}

impl FromStr for Sampling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => {
                return Ok(Sampling {
                    count: 0,
                    period: Interval::from_seconds(0),
                });
            }
            "all" => {
                return Ok(Sampling {
                    count: 1,
                    period: Interval::from_seconds(0),
                });
            }
            _ => {}
        }

        let Some((count, period)) = s.split_once('/') else {
            bail!("invalid sampling format: {s:?}");
        };
        let count = count
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| anyhow!("invalid sample count: {:?}", count.trim()))?;
        let period = period.trim().parse::<Interval>()?;

        Ok(Sampling { count, period })
    }
}

impl std::fmt::Display for Sampling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "none")
        } else if self.period.is_zero() {
            write!(f, "all")
        } else {
            write!(f, "{}/{}s", self.count, self.period.seconds())
        }
    }
}

impl<'de> Deserialize<'de> for Sampling {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        let tests = [
            ("1s", 1),
            ("30 secs", 30),
            ("1h", 3600),
            ("2 hrs", 7200),
            ("1 day", 86_400),
            ("10d", 864_000),
            ("w", 604_800),
            ("2.5 weeks", 1_512_000),
            ("1m", 2_629_800),
            ("20 months", 52_596_000),
            ("1y", 31_557_600),
            ("5.2 years", 164_099_520),
            (".5 days", 43_200),
        ];
        for (input, want) in tests {
            let got: Interval = input.parse().unwrap();
            assert_eq!(got.seconds(), want, "parse {input:?}");
        }
    }

    #[test]
    fn test_parse_interval_invalid() {
        for input in ["", "15", "bogus units", "1 parsec", "-3 days", "1.2.3h"] {
            assert!(input.parse::<Interval>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_interval_saturation() {
        assert_eq!(
            Interval::FOREVER.saturating_add(Interval::SECOND),
            Interval::FOREVER
        );
        assert_eq!(
            Interval::FOREVER.saturating_sub(Interval::DAY).seconds(),
            i64::MAX - 86_400
        );
    }

    #[test]
    fn test_interval_display_roundtrip() {
        let intervals = [
            Interval::from_seconds(0),
            Interval::SECOND,
            Interval::DAY,
            Interval::MONTH,
            Interval::from_seconds(123_456_789),
            Interval::FOREVER,
        ];
        for interval in intervals {
            let redisplayed: Interval = interval.to_string().parse().unwrap();
            assert_eq!(redisplayed, interval, "roundtrip {interval}");
        }
    }

    #[test]
    fn test_interval_between() {
        use chrono::TimeZone;

        let earlier = Local.timestamp_opt(1_000_000, 0).unwrap();
        let later = Local.timestamp_opt(1_000_600, 0).unwrap();
        assert_eq!(Interval::between(earlier, later).seconds(), 600);
        assert_eq!(Interval::between(later, earlier).seconds(), -600);
    }

    #[test]
    fn test_parse_sampling() {
        let tests = [
            ("none", 0, 0),
            ("all", 1, 0),
            ("3/week", 3, 604_800),
            ("20/2m", 20, 5_259_600),
            ("1 / 3 days", 1, 259_200),
            ("13 / 5.2 years", 13, 164_099_520),
        ];
        for (input, count, period) in tests {
            let got: Sampling = input.parse().unwrap();
            assert_eq!(
                got,
                Sampling {
                    count,
                    period: Interval::from_seconds(period)
                },
                "parse {input:?}"
            );
        }
    }

    #[test]
    fn test_parse_sampling_invalid() {
        for input in ["", "3", "/week", "0/week", "-1/week", "3/parsec", "x/1d"] {
            assert!(input.parse::<Sampling>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_sampling_display_roundtrip() {
        for input in ["none", "all", "3/week", "1 / 3 days"] {
            let sampling: Sampling = input.parse().unwrap();
            let redisplayed: Sampling = sampling.to_string().parse().unwrap();
            assert_eq!(redisplayed, sampling, "roundtrip {input:?}");
        }
    }
}

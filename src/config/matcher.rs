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

use anyhow::{Result, bail};
use regex::Regex;

use crate::config::Backup;

/// Converts a glob pattern into an anchored regex. The archiver allows
/// "**" and {a,b} notation, which plain shell matching does not, so the
/// translation is done by hand:
///
///   **      matches anything, including separators
///   *       matches anything except separators
///   ?       matches one non-separator
///   {a,b,c} matches any of the alternatives
///   [...]   character classes pass through
///
/// The result must match a complete directory name, but need not consume
/// the rest of the path.
pub fn compile(pat: &str) -> String {
    let mut cmp = String::from("^");
    let mut braces = 0;
    let mut star = false;
    let mut class = false;
    for ch in pat.chars() {
        // Handle "*" and "**". When a star arrives, check whether the
        // previous character was a star too.
        if ch == '*' && star {
            star = false;
            cmp.push_str(".*?"); // anything including separators
            continue;
        } else if ch == '*' {
            star = true; // not sure yet if we have * or **
            continue;
        }

        // Now ch != '*', so flush a buffered single star if there is one.
        if star {
            star = false;
            cmp.push_str("[^/]*");
        }

        if ch == '?' {
            cmp.push_str("[^/]");
        } else if ch == '{' {
            braces += 1;
            cmp.push_str("(?:");
        } else if ch == ',' && braces > 0 {
            cmp.push('|');
        } else if ch == '}' && braces > 0 {
            braces -= 1;
            cmp.push(')');
        } else if (ch == '[' && !class) || (ch == ']' && class) {
            class = !class;
            cmp.push(ch);
        } else {
            cmp.push_str(&regex::escape(&ch.to_string()));
        }
    }
    if star {
        cmp.push_str("[^/]*");
    }

    cmp.push_str("(?:/|$)");
    cmp
}

/// Reports whether `path` matches the glob `pat`. Patterns that do not
/// compile to a valid regex match nothing.
pub fn path_matches_pattern(path: &str, pat: &str) -> bool {
    match Regex::new(&compile(pat)) {
        Ok(re) => re.is_match(path),
        Err(_) => false,
    }
}

/// Reports whether `path` falls inside backup `b`, whose archives are
/// created relative to the backup's workdir (or `default_workdir`).
/// Returns the normalized relative path when it does.
pub fn contains_path(b: &Backup, default_workdir: Option<&Path>, path: &str) -> Option<String> {
    let base = b
        .workdir
        .as_deref()
        .or(default_workdir)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let needle = match path.strip_prefix(&format!("{base}/")) {
        Some(trimmed) if !base.is_empty() && path.starts_with('/') => trimmed,
        _ => path,
    };

    // The path is captured if it matches at least one inclusion and no
    // exclusion. Exclusions are checked first to short circuit.
    for ex in &b.exclude {
        if path_matches_pattern(needle, ex) {
            return None;
        }
    }
    for inc in &b.include {
        let matched = if b.glob_includes {
            path_matches_pattern(needle, inc)
        } else {
            needle == inc || needle.starts_with(&format!("{inc}/"))
        };
        if matched {
            return Some(needle.to_string());
        }
    }
    None
}

/// A path substitution rule in the archiver's "/pattern/replacement/"
/// notation, optionally followed by a "g" flag for global replacement.
/// Backreferences are written "\1".
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    replacement: String,
    global: bool,
}

impl Rule {
    pub fn parse(raw: &str) -> Result<Rule> {
        let Some(rest) = raw.strip_prefix('/') else {
            bail!("substitution rule must start with '/'");
        };

        let mut parts: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        for ch in rest.chars() {
            if quoted {
                if ch != '/' {
                    current.push('\\');
                }
                current.push(ch);
                quoted = false;
            } else if ch == '\\' {
                quoted = true;
            } else if ch == '/' && parts.len() < 2 {
                parts.push(std::mem::take(&mut current));
            } else {
                current.push(ch);
            }
        }
        if quoted {
            current.push('\\');
        }
        parts.push(current);
        if parts.len() != 3 {
            bail!("substitution rule needs three '/'-separated fields");
        }

        let pattern = Regex::new(&parts[0])?;
        let mut global = false;
        for flag in parts[2].chars() {
            match flag {
                'g' => global = true,
                // Print and symlink flags are accepted for compatibility
                // but have no effect on path lookup.
                'p' | 's' => {}
                other => bail!("unknown substitution flag {other:?}"),
            }
        }

        // Translate "\1" backreferences to the regex crate's "${1}".
        let mut replacement = String::new();
        let mut chars = parts[1].chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '\\' && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                replacement.push_str("${");
                replacement.push(chars.next().unwrap());
                replacement.push('}');
            } else if ch == '$' {
                replacement.push_str("$$");
            } else {
                replacement.push(ch);
            }
        }

        Ok(Rule {
            pattern,
            replacement,
            global,
        })
    }

    /// Applies the rule to `path`, returning the rewritten path if the
    /// pattern matched.
    pub fn apply(&self, path: &str) -> Option<String> {
        if !self.pattern.is_match(path) {
            return None;
        }
        let replaced = if self.global {
            self.pattern.replace_all(path, self.replacement.as_str())
        } else {
            self.pattern.replace(path, self.replacement.as_str())
        };
        Some(replaced.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_literals() {
        // Patterns without metacharacters match themselves.
        for pat in ["frob.cc", "bar/baz", "a-b_c"] {
            assert!(path_matches_pattern(pat, pat), "literal {pat:?}");
        }
        assert!(!path_matches_pattern("frob_cc", "frob.cc"));
    }

    #[test]
    fn test_compile_single_star() {
        assert!(path_matches_pattern("foo.txt", "*.txt"));
        assert!(!path_matches_pattern("dir/foo.txt", "*.txt"));
        assert!(path_matches_pattern("dir/foo.txt", "dir/*"));
        assert!(path_matches_pattern("dir/sub/foo.txt", "dir/*"));
    }

    #[test]
    fn test_compile_double_star() {
        assert!(path_matches_pattern("a/b/c/d.txt", "a/**/d.txt"));
        assert!(path_matches_pattern("bar/baz/nuut/deep/test.h", "bar/baz/nuut/**"));
    }

    #[test]
    fn test_compile_question_and_class() {
        assert!(path_matches_pattern("x/marks/the/spot", "?/marks/*/spot"));
        assert!(!path_matches_pattern("xy/marks/the/spot", "?/marks/*/spot"));
        assert!(path_matches_pattern("a1", "a[0-9]"));
        assert!(!path_matches_pattern("ax", "a[0-9]"));
    }

    #[test]
    fn test_compile_braces() {
        assert!(path_matches_pattern("img.png", "img.{png,jpg}"));
        assert!(path_matches_pattern("img.jpg", "img.{png,jpg}"));
        assert!(!path_matches_pattern("img.gif", "img.{png,jpg}"));
        // Commas outside braces are literal.
        assert!(path_matches_pattern("a,b", "a,b"));
    }

    #[test]
    fn test_compile_matches_directory_boundary() {
        // A pattern matches a complete leading directory, not a prefix
        // of a name.
        assert!(path_matches_pattern("dir/inside", "dir"));
        assert!(!path_matches_pattern("directory", "dir"));
    }

    #[test]
    fn test_rule_parse_and_apply() {
        let rule = Rule::parse("/^old/new/").unwrap();
        assert_eq!(rule.apply("old/file").unwrap(), "new/file");
        assert!(rule.apply("other/file").is_none());

        let global = Rule::parse("/o/0/g").unwrap();
        assert_eq!(global.apply("foo/boo").unwrap(), "f00/b00");

        let non_global = Rule::parse("/o/0/").unwrap();
        assert_eq!(non_global.apply("foo/boo").unwrap(), "f0o/boo");
    }

    #[test]
    fn test_rule_backreference() {
        let rule = Rule::parse(r"/^home\/([^\/]*)/users\/\1/").unwrap();
        assert_eq!(rule.apply("home/rooty/notes").unwrap(), "users/rooty/notes");
    }

    #[test]
    fn test_rule_parse_errors() {
        assert!(Rule::parse("no-slash").is_err());
        assert!(Rule::parse("/unterminated").is_err());
        assert!(Rule::parse("/a/b/x").is_err());
        assert!(Rule::parse("/(/b/").is_err());
    }
}

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

/// "Visible" length of a string, ignoring ANSI escape codes so that
/// colored cells do not skew column widths.
fn visible_len(s: &str) -> usize {
    let mut len = 0;
    let mut in_escape = false;
    for c in s.chars() {
        if in_escape {
            if c == 'm' {
                in_escape = false;
            }
        } else if c == '\x1b' {
            in_escape = true;
        } else {
            len += 1;
        }
    }
    len
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

/// A helper struct to construct aligned column output.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    alignments: Vec<Alignment>,
    padding: usize,
}

impl Table {
    pub fn new_with_alignments(alignments: Vec<Alignment>) -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
            alignments,
            padding: 3,
        }
    }

    pub fn set_headers(&mut self, headers: Vec<String>) {
        self.headers = headers;
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_widths(&self) -> Vec<usize> {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0);

        let mut widths = vec![0; columns];
        for row in std::iter::once(&self.headers).chain(self.rows.iter()) {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(visible_len(cell));
            }
        }
        widths
    }

    fn render_row(&self, row: &[String], widths: &[usize], out: &mut String) {
        for (i, cell) in row.iter().enumerate() {
            let fill = widths[i].saturating_sub(visible_len(cell));
            let (left, right) = match self.alignments.get(i).unwrap_or(&Alignment::Left) {
                Alignment::Left => (0, fill),
                Alignment::Center => (fill / 2, fill - fill / 2),
                Alignment::Right => (fill, 0),
            };
            out.push_str(&" ".repeat(left));
            out.push_str(cell);
            if i + 1 < row.len() {
                out.push_str(&" ".repeat(right + self.padding));
            }
        }
        out.push('\n');
    }

    pub fn render(&self) -> String {
        let widths = self.column_widths();
        let mut out = String::new();
        if !self.headers.is_empty() {
            self.render_row(&self.headers, &widths, &mut out);
        }
        for row in &self.rows {
            self.render_row(row, &widths, &mut out);
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_len() {
        assert_eq!(visible_len("plain"), 5);
        assert_eq!(visible_len("\x1b[1;33mbold\x1b[0m"), 4);
    }

    #[test]
    fn test_render_alignments() {
        let mut table = Table::new_with_alignments(vec![
            Alignment::Left,
            Alignment::Center,
            Alignment::Right,
        ]);
        table.set_headers(vec!["a".into(), "bb".into(), "c".into()]);
        table.add_row(vec!["xxx".into(), "y".into(), "zz".into()]);

        let rendered = table.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "a     bb    c");
        assert_eq!(lines[1], "xxx   y    zz");
    }

    #[test]
    fn test_ragged_rows() {
        let mut table = Table::new_with_alignments(vec![Alignment::Left]);
        table.add_row(vec!["one".into()]);
        table.add_row(vec!["two".into(), "extra".into()]);
        let rendered = table.render();
        assert_eq!(rendered.lines().count(), 2);
    }
}

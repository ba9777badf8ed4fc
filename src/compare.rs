//! Byte Comparison and Hex Rendering
//!
//! Fixed 16-byte rows labeled by offset:
//!
//! ```text
//! 0000: 48 65 6c 6c 6f 0a                                |Hello.|
//! ```
//!
//! [`dump`] renders one buffer. [`diff`] renders `actual` against `expected`,
//! flags differing bytes in both columns, and follows every row that has a
//! difference with the expected row, unflagged.
//!
//! Everything here is pure: callers decide where the lines go.

use std::fmt::Write as _;

/// Bytes per rendered row
pub const ROW_WIDTH: usize = 16;

const ESC_RED: &str = "\x1b[31m";
const ESC_RESET: &str = "\x1b[0m";

/// How differing bytes are made visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Highlight {
    /// Red ANSI escapes around flagged cells
    #[default]
    Ansi,
    /// `*` marker in place of the cell separator (hex) or the character (ASCII)
    Plain,
}

impl Highlight {
    pub fn from_color(color: bool) -> Self {
        if color {
            Highlight::Ansi
        } else {
            Highlight::Plain
        }
    }
}

#[inline]
fn printable(byte: u8) -> char {
    if (0x20..0x7f).contains(&byte) {
        byte as char
    } else {
        '.'
    }
}

/// Render one row; bit `i` of `flags` marks cell `i` as differing.
fn render_cells(offset: usize, bytes: &[u8], flags: u16, highlight: Highlight) -> String {
    debug_assert!(bytes.len() <= ROW_WIDTH);
    let flagged = |i: usize| flags & (1 << i) != 0;

    let mut line = String::with_capacity(80);
    let _ = write!(line, "{offset:04x}:");

    for (i, byte) in bytes.iter().enumerate() {
        let _ = match (flagged(i), highlight) {
            (false, _) => write!(line, " {byte:02x}"),
            (true, Highlight::Ansi) => write!(line, " {ESC_RED}{byte:02x}{ESC_RESET}"),
            (true, Highlight::Plain) => write!(line, "*{byte:02x}"),
        };
    }
    for _ in bytes.len()..ROW_WIDTH {
        line.push_str("   ");
    }

    line.push_str(" |");
    for (i, byte) in bytes.iter().enumerate() {
        let c = printable(*byte);
        match (flagged(i), highlight) {
            (false, _) => line.push(c),
            (true, Highlight::Ansi) => {
                let _ = write!(line, "{ESC_RED}{c}{ESC_RESET}");
            }
            (true, Highlight::Plain) => line.push('*'),
        }
    }
    line.push('|');
    line
}

/// Render a single unflagged row.
pub fn render_row(offset: usize, bytes: &[u8]) -> String {
    render_cells(offset, bytes, 0, Highlight::Plain)
}

/// Render a whole buffer, one line per 16-byte row.
pub fn dump(buf: &[u8]) -> Vec<String> {
    buf.chunks(ROW_WIDTH)
        .enumerate()
        .map(|(i, row)| render_row(i * ROW_WIDTH, row))
        .collect()
}

/// One compared row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRow<'a> {
    pub offset: usize,
    pub actual: &'a [u8],
    pub expected: &'a [u8],
    /// Bit `i` set when `actual[i] != expected[i]`
    pub flags: u16,
}

impl DiffRow<'_> {
    /// Number of differing bytes in this row
    #[inline]
    pub fn mismatches(&self) -> usize {
        self.flags.count_ones() as usize
    }

    #[inline]
    pub fn is_flagged(&self, cell: usize) -> bool {
        cell < ROW_WIDTH && self.flags & (1 << cell) != 0
    }

    pub fn render(&self, highlight: Highlight) -> String {
        render_cells(self.offset, self.actual, self.flags, highlight)
    }
}

/// Row-by-row comparison of two buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<'a> {
    rows: Vec<DiffRow<'a>>,
}

impl<'a> Diff<'a> {
    pub fn rows(&self) -> &[DiffRow<'a>] {
        &self.rows
    }

    /// Total differing bytes across all rows
    pub fn mismatches(&self) -> usize {
        self.rows.iter().map(DiffRow::mismatches).sum()
    }

    pub fn is_match(&self) -> bool {
        self.rows.iter().all(|row| row.flags == 0)
    }

    /// Absolute offset of the first differing byte
    pub fn first_mismatch(&self) -> Option<usize> {
        self.rows
            .iter()
            .find(|row| row.flags != 0)
            .map(|row| row.offset + row.flags.trailing_zeros() as usize)
    }

    /// Full diagnostic listing: every row, plus the expected row under each
    /// row that differs.
    pub fn lines(&self, highlight: Highlight) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            lines.push(row.render(highlight));
            if row.flags != 0 {
                lines.push("Expected:".to_string());
                lines.push(render_row(row.offset, row.expected));
            }
        }
        lines
    }
}

/// Compare the common prefix of `actual` and `expected`.
pub fn diff<'a>(actual: &'a [u8], expected: &'a [u8]) -> Diff<'a> {
    let len = actual.len().min(expected.len());
    let rows = actual[..len]
        .chunks(ROW_WIDTH)
        .zip(expected[..len].chunks(ROW_WIDTH))
        .enumerate()
        .map(|(i, (actual, expected))| {
            let flags = actual
                .iter()
                .zip(expected)
                .enumerate()
                .filter(|(_, (a, e))| a != e)
                .fold(0u16, |mask, (cell, _)| mask | (1 << cell));
            DiffRow {
                offset: i * ROW_WIDTH,
                actual,
                expected,
                flags,
            }
        })
        .collect();
    Diff { rows }
}

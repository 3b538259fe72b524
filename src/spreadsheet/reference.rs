//! A1-style cell and range references.
//!
//! All coordinates in this crate are 1-based, matching what users see in a
//! spreadsheet application and what the remote workbook service expects in
//! range addresses.

use regex::Regex;
use serde::Serialize;
use std::fmt::Display;
use std::sync::OnceLock;
use thiserror::Error;

/// Largest column number a worksheet can address (`XFD`).
pub const MAX_COLUMN: u32 = 16_384;
/// Largest row number a worksheet can address.
pub const MAX_ROW: u32 = 1_048_576;

/// Errors related to A1 reference parsing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("Invalid cell reference '{0}'")]
    CellFormatError(String),

    #[error("Invalid range format '{0}'")]
    RangeFormatError(String),

    #[error("Invalid merge range template '{0}', expected '<column>:<column>'")]
    ColumnTemplateError(String),

    #[error("Coordinate ({0}, {1}) is outside the worksheet grid")]
    OutOfBoundsError(u32, u32),
}

fn cell_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]+)$").expect("Hardcode regex pattern"))
}

/// Converts a 1-based column number to its letters (1 => "A", 28 => "AB").
pub fn col_to_letters(col: u32) -> String {
    let mut column = col;
    let mut letters = String::new();
    while column > 0 {
        column -= 1;
        let digit = char::from_u32(65 + column % 26).expect("Hardcode letters");
        column /= 26;
        letters.insert(0, digit);
    }
    letters
}

/// Converts column letters to a 1-based column number, case-insensitive.
pub fn letters_to_col(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col = 0u32;
    for character in letters.chars() {
        if !character.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (character.to_ascii_uppercase() as u32 - 64);
    }
    (col <= MAX_COLUMN).then_some(col)
}

/// Splits an optional sheet qualifier from an address.
///
/// `"Sheet1!B5"` yields `(Some("Sheet1"), "B5")`, quoted names such as
/// `"'My Sheet'!A1"` are unquoted (doubled quotes are kept as-is).
pub fn split_sheet(address: &str) -> (Option<&str>, &str) {
    match address.rfind('!') {
        Some(index) => {
            let sheet = &address[..index];
            let sheet = sheet
                .strip_prefix('\'')
                .and_then(|sheet| sheet.strip_suffix('\''))
                .unwrap_or(sheet);
            (Some(sheet), &address[index + 1..])
        }
        None => (None, address),
    }
}

/// Prefixes a local address with a sheet name, quoting names that need it.
pub fn qualify(sheet: &str, local: &str) -> String {
    let plain = sheet.chars().all(|character| character.is_alphanumeric() || character == '_');
    if plain && !sheet.is_empty() {
        format!("{sheet}!{local}")
    } else {
        format!("'{}'!{local}", sheet.replace('\'', "''"))
    }
}

/// An absolute, 1-based cell coordinate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Result<Self, ReferenceError> {
        if row == 0 || col == 0 || row > MAX_ROW || col > MAX_COLUMN {
            Err(ReferenceError::OutOfBoundsError(row, col))
        } else {
            Ok(CellRef { row, col })
        }
    }

    /// Parses `"B5"`, `"$B$5"` or `"b5"`.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let error = || ReferenceError::CellFormatError(reference.to_owned());
        let captures = cell_pattern().captures(reference.trim()).ok_or_else(error)?;
        let col = letters_to_col(&captures[1]).ok_or_else(error)?;
        let row = captures[2].parse::<u32>().map_err(|_| error())?;
        CellRef::new(row, col).map_err(|_| error())
    }
}

impl Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), self.row)
    }
}

/// A rectangular block of cells, inclusive on both corners.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    /// Creates a range, normalizing the corners to top-left / bottom-right.
    pub fn new(a: CellRef, b: CellRef) -> Self {
        CellRange {
            start: CellRef { row: a.row.min(b.row), col: a.col.min(b.col) },
            end: CellRef { row: a.row.max(b.row), col: a.col.max(b.col) },
        }
    }

    pub fn single(cell: CellRef) -> Self {
        CellRange { start: cell, end: cell }
    }

    /// Parses `"B2:C2"` or a single cell `"B2"`; a sheet qualifier is ignored.
    pub fn parse(range: &str) -> Result<Self, ReferenceError> {
        let (_, local) = split_sheet(range.trim());
        let error = |_| ReferenceError::RangeFormatError(range.to_owned());
        match local.split_once(':') {
            Some((start, end)) => Ok(CellRange::new(
                CellRef::parse(start).map_err(error)?,
                CellRef::parse(end).map_err(error)?,
            )),
            None => Ok(CellRange::single(CellRef::parse(local).map_err(error)?)),
        }
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        self.start.row <= row && row <= self.end.row && self.start.col <= col && col <= self.end.col
    }

    pub fn intersects(&self, other: &CellRange) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn row_count(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn col_count(&self) -> u32 {
        self.end.col - self.start.col + 1
    }
}

impl Display for CellRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// A same-row column pair such as `"A:C"`, instantiated per row to build merges.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpan {
    pub first: u32,
    pub last: u32,
}

impl ColumnSpan {
    pub fn parse(template: &str) -> Result<Self, ReferenceError> {
        let error = || ReferenceError::ColumnTemplateError(template.to_owned());
        let (first, last) = template.trim().split_once(':').ok_or_else(error)?;
        let first = letters_to_col(first.trim().trim_start_matches('$')).ok_or_else(error)?;
        let last = letters_to_col(last.trim().trim_start_matches('$')).ok_or_else(error)?;
        Ok(ColumnSpan { first: first.min(last), last: first.max(last) })
    }

    /// Expands the template to an absolute range on `row`.
    pub fn at_row(&self, row: u32) -> CellRange {
        CellRange {
            start: CellRef { row, col: self.first },
            end: CellRef { row, col: self.last },
        }
    }
}

use crate::spreadsheet::reference::CellRef;
use crate::spreadsheet::value::CellValue;
use serde::Deserialize;
use std::fmt::Display;

/// Read model of a sheet's populated cell grid.
///
/// `origin_row` / `origin_col` are the 0-based offsets of the grid's top-left
/// cell, which is how the remote service reports `rowIndex` / `columnIndex`
/// for a used range. Rows may be ragged.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UsedRangeSnapshot {
    #[serde(rename = "rowIndex", default)]
    pub origin_row: u32,
    #[serde(rename = "columnIndex", default)]
    pub origin_col: u32,
    #[serde(default)]
    pub values: Vec<Vec<CellValue>>,
}

/// Absolute 1-based position of a resolved marker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MarkerMatch {
    pub row: u32,
    pub col: u32,
}

impl MarkerMatch {
    pub fn anchor(&self) -> CellRef {
        CellRef { row: self.row, col: self.col }
    }
}

impl Display for MarkerMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

impl UsedRangeSnapshot {
    pub fn new(origin_row: u32, origin_col: u32, values: Vec<Vec<CellValue>>) -> Self {
        UsedRangeSnapshot { origin_row, origin_col, values }
    }

    /// Returns the first cell, in row-major order, whose text contains `marker`.
    ///
    /// Matching is a case-sensitive substring test, so a marker such as
    /// `"Total"` also matches `"Subtotal"` when that label comes first.
    pub fn find(&self, marker: &str) -> Option<MarkerMatch> {
        self.matches(marker).next()
    }

    /// Number of cells that would match `marker`; more than one means `find` is ambiguous.
    pub fn count_matches(&self, marker: &str) -> usize {
        self.matches(marker).count()
    }

    /// Value at an absolute 1-based coordinate, `Empty` outside the grid.
    pub fn value_at(&self, row: u32, col: u32) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        if row <= self.origin_row || col <= self.origin_col {
            return &EMPTY;
        }
        let local_row = (row - self.origin_row - 1) as usize;
        let local_col = (col - self.origin_col - 1) as usize;
        self.values
            .get(local_row)
            .and_then(|cells| cells.get(local_col))
            .unwrap_or(&EMPTY)
    }

    fn matches<'a>(&'a self, marker: &'a str) -> impl Iterator<Item = MarkerMatch> + 'a {
        self.values.iter().enumerate().flat_map(move |(row_index, cells)| {
            cells.iter().enumerate().filter_map(move |(col_index, cell)| {
                if marker.is_empty() {
                    return None;
                }
                cell.as_text()
                    .filter(|text| text.contains(marker))
                    .map(|_| MarkerMatch {
                        row: self.origin_row + row_index as u32 + 1,
                        col: self.origin_col + col_index as u32 + 1,
                    })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> CellValue {
        CellValue::Text(value.to_owned())
    }

    #[test]
    fn first_match_wins_in_row_major_order() {
        // Matches at (2,3) and (5,1).
        let snapshot = UsedRangeSnapshot::new(0, 0, vec![
            vec![text("Header")],
            vec![text(""), CellValue::Empty, text("Pagos:")],
            vec![],
            vec![],
            vec![text("Pagos: extra")],
        ]);
        assert_eq!(snapshot.find("Pagos:"), Some(MarkerMatch { row: 2, col: 3 }));
        assert_eq!(snapshot.count_matches("Pagos:"), 2);
    }

    #[test]
    fn origin_offsets_are_added() {
        let snapshot = UsedRangeSnapshot::new(9, 3, vec![vec![text("DATOS DEL CLIENTE:")]]);
        assert_eq!(snapshot.find("CLIENTE"), Some(MarkerMatch { row: 10, col: 4 }));
        assert_eq!(snapshot.value_at(10, 4), &text("DATOS DEL CLIENTE:"));
        assert_eq!(snapshot.value_at(1, 1), &CellValue::Empty);
    }

    #[test]
    fn absence_and_case_sensitivity() {
        let snapshot = UsedRangeSnapshot::new(0, 0, vec![vec![text("total"), CellValue::Number(42.0)]]);
        assert_eq!(snapshot.find("Total"), None);
        assert_eq!(snapshot.find("42"), Some(MarkerMatch { row: 1, col: 2 }));
        assert_eq!(snapshot.find(""), None);
    }

    #[test]
    fn substring_hazard_is_preserved() {
        let snapshot = UsedRangeSnapshot::new(0, 0, vec![vec![text("Subtotal")], vec![text("Total")]]);
        assert_eq!(snapshot.find("Total"), Some(MarkerMatch { row: 2, col: 1 }));
        assert_eq!(snapshot.find("total"), Some(MarkerMatch { row: 1, col: 1 }));
    }

    #[test]
    fn deserializes_remote_used_range() {
        let snapshot: UsedRangeSnapshot = serde_json::from_str(
            r#"{"address":"Sheet1!B3:C4","rowIndex":2,"columnIndex":1,"values":[["SEGUIMIENTO",""],["",7]]}"#,
        ).unwrap();
        assert_eq!(snapshot.find("SEGUIMIENTO"), Some(MarkerMatch { row: 3, col: 2 }));
        assert_eq!(snapshot.value_at(4, 3), &CellValue::Number(7.0));
    }
}

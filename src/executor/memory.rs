use crate::error::SheetMarkerError;
use crate::executor::ResolvedSheet;
use crate::executor::WriteExecutor;
use crate::executor::WriteOutcome;
use crate::planner::WritePlan;
use crate::spreadsheet::reference::split_sheet;
use crate::spreadsheet::reference::CellRef;
use crate::spreadsheet::value::CellValue;
use crate::spreadsheet::worksheet::Worksheet;
use crate::spreadsheet::xlsx::Workbook;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Lifecycle of an in-memory document. Saving consumes the executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutorState {
    Loaded,
    Writing(String),
}

/// Backend that edits a fully loaded `.xlsx` document and serializes it on save.
///
/// Writes inside a merged region land on the region's top-left cell. Table
/// writes insert extra rows below the first template row and copy its
/// styles, row height and single-row merges onto them.
pub struct InMemoryExecutor {
    workbook: Workbook,
    state: ExecutorState,
}

impl InMemoryExecutor {
    pub fn load(bytes: &[u8]) -> Result<Self, SheetMarkerError> {
        let workbook = Workbook::load(bytes)?;
        Ok(InMemoryExecutor { workbook, state: ExecutorState::Loaded })
    }

    pub fn state(&self) -> &ExecutorState {
        &self.state
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    /// Writes explicit `"B3"` / `"Sheet!B3"` addresses; unqualified ones target the first sheet.
    pub fn write_cells(&mut self, cells: &BTreeMap<String, CellValue>) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut outcome = WriteOutcome::new(None);
        let mut rows = Vec::new();
        for (address, value) in cells {
            let (sheet, local) = split_sheet(address);
            let target = match CellRef::parse(local) {
                Ok(target) => target,
                Err(error) => {
                    warn!(address = %address, error = %error, "Skipping invalid cell address");
                    outcome.errors.insert(address.to_owned(), error.to_string());
                    continue;
                }
            };
            let worksheet = match self.workbook.sheet_mut(sheet) {
                Ok(worksheet) => worksheet,
                Err(error) => {
                    outcome.errors.insert(address.to_owned(), error.to_string());
                    continue;
                }
            };
            self.state = ExecutorState::Writing(worksheet.name.to_owned());
            let written = worksheet.set_value(target, value);
            rows.push((worksheet.name.to_owned(), written.row));
            outcome.cells_affected += 1;
        }
        rows.sort();
        rows.dedup();
        outcome.rows_affected = rows.len();
        Ok(outcome.finish(started))
    }

    /// Serializes the edited document. The executor cannot be reused afterwards.
    pub fn save(self) -> Result<Vec<u8>, SheetMarkerError> {
        let bytes = self.workbook.save()?;
        info!(bytes = bytes.len(), "Document saved");
        Ok(bytes)
    }

    fn begin(&mut self, plan: &WritePlan) -> Result<&mut Worksheet, SheetMarkerError> {
        self.state = ExecutorState::Writing(plan.section.to_owned());
        self.workbook.sheet_mut(Some(&plan.sheet))
    }
}

/// Writes the supplied cells of `plan`, skipping gaps. Returns cells written.
fn write_planned(worksheet: &mut Worksheet, plan: &WritePlan) -> usize {
    let mut written = 0;
    for cell in plan.cells() {
        worksheet.set_value(cell.cell, cell.value);
        written += 1;
    }
    written
}

fn apply_merges(worksheet: &mut Worksheet, plan: &WritePlan) {
    for merge in &plan.merges {
        if worksheet.add_merge(*merge) {
            debug!(sheet = %worksheet.name, range = %merge, "Merged");
        }
    }
}

impl WriteExecutor for InMemoryExecutor {
    fn snapshot(&mut self, sheet: Option<&str>) -> Result<ResolvedSheet, SheetMarkerError> {
        let name = self.workbook.sheet(sheet)?.name.to_owned();
        let snapshot = self.workbook.used_range(Some(&name))?;
        Ok(ResolvedSheet { name, snapshot })
    }

    fn write_record(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut outcome = WriteOutcome::start(plan);
        let worksheet = self.begin(plan)?;
        outcome.cells_affected = write_planned(worksheet, plan);
        outcome.rows_affected = usize::from(outcome.cells_affected > 0);
        Ok(outcome.finish(started))
    }

    fn write_table(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut outcome = WriteOutcome::start(plan);
        let rows = plan.row_count() as u32;
        if rows == 0 {
            return Ok(outcome.finish(started));
        }
        let worksheet = self.begin(plan)?;
        let template_row = plan.origin.row;
        if rows > 1 {
            worksheet.insert_rows(template_row + 1, rows - 1);
            for row in template_row + 1..template_row + rows {
                worksheet.copy_row_layout(template_row, row);
            }
        }
        outcome.cells_affected = write_planned(worksheet, plan);
        outcome.rows_affected = rows as usize;
        apply_merges(worksheet, plan);
        Ok(outcome.finish(started))
    }

    fn insert_rows(&mut self, plan: &WritePlan) -> Result<WriteOutcome, SheetMarkerError> {
        let started = Instant::now();
        let mut outcome = WriteOutcome::start(plan);
        let rows = plan.row_count() as u32;
        if rows == 0 {
            return Ok(outcome.finish(started));
        }
        let worksheet = self.begin(plan)?;
        let at = plan.origin.row;
        worksheet.insert_rows(at, rows);
        for row in at..at + rows {
            worksheet.copy_row_layout(at + rows, row);
        }
        outcome.cells_affected = write_planned(worksheet, plan);
        outcome.rows_affected = rows as usize;
        apply_merges(worksheet, plan);
        Ok(outcome.finish(started))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;
    use crate::planner::PlanData;
    use crate::schema::DataType;
    use crate::schema::SectionSchema;
    use crate::schema::Template;
    use crate::spreadsheet::fixture;
    use crate::spreadsheet::reference::CellRange;
    use crate::spreadsheet::value::Record;

    const INVOICE_ROWS: &str = concat!(
        r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#,
        r#"<row r="2"><c r="A2" s="1" t="s"><v>1</v></c><c r="B2" s="2"/><c r="C2" s="2"/></row>"#,
        r#"<row r="4"><c r="A4" t="s"><v>2</v></c></row>"#,
        r#"<row r="5" ht="18" customHeight="1"><c r="A5" s="2"/><c r="B5" s="2"/><c r="C5" s="2"/></row>"#,
        r#"<row r="6"><c r="A6" t="s"><v>3</v></c><c r="C6"><f>SUM(C5:C5)</f></c></row>"#,
    );

    fn invoice() -> InMemoryExecutor {
        let bytes = fixture::workbook_with_merges(
            &[("Factura", INVOICE_ROWS, &["B2:C2", "A5:B5"][..])],
            &["FACTURA", "Cliente:", "Pagos:", "Total"],
        );
        InMemoryExecutor::load(&bytes).unwrap()
    }

    fn template() -> Template {
        Template::new(vec![
            SectionSchema::new("cliente", "Cliente:").offsets(0, 1).field("nombre", 0, DataType::Text).field("rut", 1, DataType::Text),
            SectionSchema::new("pagos", "Pagos:")
                .table()
                .offsets(1, 0)
                .field("concepto", 0, DataType::Text)
                .field("monto", 2, DataType::Number)
                .merge("A:B"),
        ]).unwrap()
    }

    fn record(pairs: &[(&str, CellValue)]) -> Record {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    fn planned(executor: &mut InMemoryExecutor, key: &str, rows: &[Record]) -> WritePlan {
        let template = template();
        let section = template.section(key).unwrap();
        let sheet = executor.snapshot(section.sheet_name.as_deref()).unwrap();
        let anchor = sheet.snapshot.find(&section.marker_text);
        let data = if section.is_table { PlanData::Table(rows) } else { PlanData::Record(&rows[0]) };
        plan(section, &sheet.name, anchor, data).unwrap()
    }

    fn cell(executor: &InMemoryExecutor, reference: &str) -> CellValue {
        executor.workbook().value(None, CellRef::parse(reference).unwrap()).unwrap()
    }

    #[test]
    fn record_write_redirects_into_merge_anchor() {
        let mut executor = invoice();
        let rows = vec![record(&[("nombre", CellValue::from("ACME")), ("rut", CellValue::from("76.123.456-7"))])];
        let plan = planned(&mut executor, "cliente", &rows);
        assert_eq!(plan.local_address(), "B2:C2");

        let outcome = executor.write_record(&plan).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.cells_affected, 2);
        // C2 lies inside B2:C2, so the second value lands on B2 as well.
        assert_eq!(cell(&executor, "B2"), CellValue::from("76.123.456-7"));
        assert_eq!(cell(&executor, "C2"), CellValue::Empty);
        assert_eq!(executor.workbook().merges(None).unwrap().iter().filter(|merge| merge.to_string() == "B2:C2").count(), 1);
        assert_eq!(executor.state(), &ExecutorState::Writing("cliente".into()));
    }

    #[test]
    fn table_write_inserts_styled_rows_and_applies_merges() {
        let mut executor = invoice();
        let rows: Vec<Record> = ["Anticipo", "Cuota 1", "Cuota 2"]
            .iter()
            .enumerate()
            .map(|(index, concepto)| record(&[("concepto", CellValue::from(*concepto)), ("monto", CellValue::Number(100.0 * (index + 1) as f64))]))
            .collect();
        let plan = planned(&mut executor, "pagos", &rows);
        assert_eq!(plan.local_address(), "A5:C7");

        let outcome = executor.write_table(&plan).unwrap();
        assert!(outcome.is_success());
        assert_eq!((outcome.rows_affected, outcome.cells_affected), (3, 6));
        assert_eq!(cell(&executor, "A6"), CellValue::from("Cuota 1"));
        assert_eq!(cell(&executor, "C7"), CellValue::Number(300.0));
        // The label below the template row moved down by the two inserted rows.
        assert_eq!(cell(&executor, "A8"), CellValue::from("Total"));

        let merges = executor.workbook().merges(None).unwrap();
        for range in ["A5:B5", "A6:B6", "A7:B7", "B2:C2"] {
            assert_eq!(merges.iter().filter(|merge| **merge == CellRange::parse(range).unwrap()).count(), 1, "{range}");
        }

        let saved = executor.save().unwrap();
        let reloaded = InMemoryExecutor::load(&saved).unwrap();
        assert_eq!(reloaded.workbook().value(None, CellRef::parse("A8").unwrap()).unwrap(), CellValue::from("Total"));
    }

    #[test]
    fn table_write_leaves_unmapped_and_absent_cells_untouched() {
        const ROWS: &str = concat!(
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#,
            r#"<row r="2"><c r="A2" s="2"/><c r="B2" s="2" t="s"><v>1</v></c><c r="C2" s="2"><v>42</v></c></row>"#,
        );
        let bytes = fixture::workbook(&[("Detalle", ROWS)], &["Items:", "nota fija"]);
        let mut executor = InMemoryExecutor::load(&bytes).unwrap();
        let template = Template::new(vec![SectionSchema::new("items", "Items:")
            .table()
            .offsets(1, 0)
            .field("concepto", 0, DataType::Text)
            .field("monto", 2, DataType::Number)]).unwrap();
        let section = template.section("items").unwrap();
        let rows = vec![
            record(&[("concepto", CellValue::from("Sin monto"))]),
            record(&[("concepto", CellValue::from("Con monto")), ("monto", CellValue::Number(7.0))]),
        ];
        let sheet = executor.snapshot(None).unwrap();
        let plan = plan(section, &sheet.name, sheet.snapshot.find("Items:"), PlanData::Table(&rows)).unwrap();
        assert_eq!(plan.local_address(), "A2:C3");

        let outcome = executor.write_table(&plan).unwrap();
        assert_eq!(outcome.cells_affected, 3);
        assert_eq!(cell(&executor, "A2"), CellValue::from("Sin monto"));
        // B has no field and the first record has no "monto": both keep their template values.
        assert_eq!(cell(&executor, "B2"), CellValue::from("nota fija"));
        assert_eq!(cell(&executor, "C2"), CellValue::Number(42.0));
        assert_eq!(cell(&executor, "B3"), CellValue::Empty);
        assert_eq!(cell(&executor, "C3"), CellValue::Number(7.0));
    }

    #[test]
    fn insert_rows_pushes_existing_rows_down() {
        let mut executor = invoice();
        let rows = vec![record(&[("concepto", CellValue::from("Extra"))]), record(&[("monto", CellValue::Number(5.0))])];
        let plan = planned(&mut executor, "pagos", &rows);
        let outcome = executor.insert_rows(&plan).unwrap();

        assert_eq!(outcome.rows_affected, 2);
        assert_eq!(outcome.cells_affected, 2);
        assert_eq!(cell(&executor, "A5"), CellValue::from("Extra"));
        assert_eq!(cell(&executor, "C6"), CellValue::Number(5.0));
        // The original template row now sits at row 7 with its merge.
        let merges = executor.workbook().merges(None).unwrap();
        assert!(merges.contains(&CellRange::parse("A7:B7").unwrap()));
        assert!(merges.contains(&CellRange::parse("A5:B5").unwrap()));
        assert_eq!(cell(&executor, "A8"), CellValue::from("Total"));
    }

    #[test]
    fn empty_table_is_a_no_op_success() {
        let mut executor = invoice();
        let template = template();
        let section = template.section("pagos").unwrap();
        let plan = plan(section, "Factura", Some(crate::spreadsheet::snapshot::MarkerMatch { row: 4, col: 1 }), PlanData::Table(&[])).unwrap();
        let outcome = executor.write_table(&plan).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.rows_affected, 0);
        assert_eq!(executor.state(), &ExecutorState::Loaded);
    }

    #[test]
    fn explicit_cells_accept_sheet_prefixes_and_report_bad_addresses() {
        let mut executor = invoice();
        let cells: BTreeMap<String, CellValue> = [
            ("Factura!D1".to_owned(), CellValue::from("F-001")),
            ("C2".to_owned(), CellValue::from("ACME")),
            ("nope".to_owned(), CellValue::from("x")),
            ("Otra!A1".to_owned(), CellValue::from("x")),
        ].into_iter().collect();
        let outcome = executor.write_cells(&cells).unwrap();

        assert_eq!(outcome.cells_affected, 2);
        assert_eq!(outcome.rows_affected, 2);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.status, crate::executor::OutcomeStatus::Partial);
        assert_eq!(cell(&executor, "D1"), CellValue::from("F-001"));
        assert_eq!(cell(&executor, "B2"), CellValue::from("ACME"));
    }

    #[test]
    fn written_values_are_found_at_planned_coordinates_after_save() {
        let mut executor = invoice();
        let rows = vec![record(&[("nombre", CellValue::from("ACME")), ("rut", CellValue::from("=\"76\"&\"-7\""))])];
        let plan = planned(&mut executor, "cliente", &rows);
        executor.write_record(&plan).unwrap();
        let reloaded = InMemoryExecutor::load(&executor.save().unwrap()).unwrap();
        let snapshot = reloaded.workbook().used_range(Some("Factura")).unwrap();
        // Both fields target B2:C2; the merge keeps the last value on its anchor.
        assert_eq!(snapshot.value_at(2, 2), &CellValue::from("=\"76\"&\"-7\""));
        assert_eq!(snapshot.find("Cliente:").map(|m| (m.row, m.col)), Some((2, 1)));
    }
}

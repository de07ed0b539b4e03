use crate::error::Result;
use crate::models::SeriesMatrix;
use rust_xlsxwriter::{Workbook, Worksheet};
use std::path::Path;
use tracing::debug;

/// Lay out named matrices as sheets of one workbook. Each sheet has a `date`
/// column followed by one column per label; undefined cells stay blank.
pub fn series_workbook<S: AsRef<str>>(sheets: &[(S, &SeriesMatrix)]) -> Result<Workbook> {
    let mut workbook = Workbook::new();

    for (name, matrix) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(name.as_ref())?;
        fill_sheet(worksheet, matrix)?;
    }

    Ok(workbook)
}

pub fn write_series_workbook<S, P>(sheets: &[(S, &SeriesMatrix)], output_path: P) -> Result<()>
where
    S: AsRef<str>,
    P: AsRef<Path>,
{
    let mut workbook = series_workbook(sheets)?;
    workbook.save(output_path.as_ref())?;
    debug!("Saved workbook {}", output_path.as_ref().display());
    Ok(())
}

fn fill_sheet(worksheet: &mut Worksheet, matrix: &SeriesMatrix) -> Result<()> {
    worksheet.set_column_width(0, 12)?;
    worksheet.write_string(0, 0, "date")?;
    for (j, label) in matrix.columns.iter().enumerate() {
        worksheet.write_string(0, (j + 1) as u16, label.as_str())?;
    }

    for (i, date) in matrix.dates.iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet.write_string(row, 0, date.format("%Y-%m-%d").to_string())?;
        for j in 0..matrix.columns.len() {
            let v = matrix.get(i, j);
            if !v.is_nan() {
                worksheet.write_number(row, (j + 1) as u16, v)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;

    #[test]
    fn writes_every_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let m = SeriesMatrix::new(
            vec![d(2), d(3)],
            vec!["EWMA_Volatility".to_string()],
            array![[0.3], [f64::NAN]],
        )
        .unwrap();
        let path = dir.path().join("ts.xlsx");
        write_series_workbook(&[("Original_TS", &m), ("Rolling_21D", &m), ("Daily_Change", &m)], &path)
            .unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn sheets_keep_their_order_and_names() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let m = SeriesMatrix::new(vec![d(2)], vec!["FEB24".to_string()], array![[0.4]]).unwrap();
        let names = ["Original_TS".to_string(), "Rolling_5D".to_string(), "Daily_Change".to_string()];
        let sheets: Vec<(&String, &SeriesMatrix)> = names.iter().map(|n| (n, &m)).collect();

        let mut workbook = series_workbook(&sheets).unwrap();
        for (i, name) in names.iter().enumerate() {
            assert_eq!(&workbook.worksheet_from_index(i).unwrap().name(), name);
        }
        assert!(workbook.worksheet_from_index(3).is_err());
    }
}

//! CSV/TSV ingestion into rectangular string tables.
use std::path::Path;

use anyhow::{Context, Result};

use crate::data::ClassificationData;
use crate::error::GestureError;

/// Reads a delimited text file into rows of fields.
///
/// Every row must have the same number of fields; a ragged file is a data
/// error naming the offending line.
pub fn read_delimited<P: AsRef<Path>>(path: P, delimiter: u8, has_headers: bool) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .trim(csv::Trim::All)
        .from_path(&path)
        .map_err(|e| GestureError::Io(format!("Failed to open {}: {}", path.as_ref().display(), e)))?;

    let mut table = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| GestureError::Data(format!("row {}: {}", i + 1, e)))?;
        table.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }
    Ok(table)
}

/// Converts a string table into labelled static samples.
///
/// # Arguments
///
/// * `table` - Rows as returned by [`read_delimited`].
/// * `label_column` - Column holding the integer class label; every other
///   column is a feature.
pub fn classification_data_from_table(table: &[Vec<String>], label_column: usize) -> Result<ClassificationData> {
    let Some(first) = table.first() else {
        return Err(GestureError::Data("table is empty".to_string()).into());
    };
    if label_column >= first.len() {
        return Err(GestureError::Configuration(format!(
            "label column {} is out of range for {} columns",
            label_column,
            first.len()
        ))
        .into());
    }

    let mut data = ClassificationData::new(first.len() - 1);
    for (row_idx, row) in table.iter().enumerate() {
        let label: u32 = row[label_column].parse().map_err(|_| {
            GestureError::Data(format!(
                "row {}: class label '{}' is not a non-negative integer",
                row_idx, row[label_column]
            ))
        })?;
        if label == crate::data::NULL_CLASS_LABEL {
            data.set_allow_null_gesture_class(true);
        }
        let features = row
            .iter()
            .enumerate()
            .filter(|(c, _)| *c != label_column)
            .map(|(c, field)| {
                field.parse::<f64>().map_err(|_| {
                    GestureError::Data(format!("row {}, column {}: '{}' is not a number", row_idx, c, field))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        data.add_sample(label, features)
            .with_context(|| format!("Failed to add row {}", row_idx))?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_tsv_with_label_first() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1\t0.5\t0.25").unwrap();
        writeln!(file, "2\t1.5\t-3").unwrap();
        let table = read_delimited(file.path(), b'\t', false).unwrap();
        assert_eq!(table.len(), 2);

        let data = classification_data_from_table(&table, 0).unwrap();
        assert_eq!(data.num_dimensions(), 2);
        assert_eq!(data.class_labels(), vec![1, 2]);
        assert_eq!(data.samples()[1].data, vec![1.5, -3.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1,0.5").unwrap();
        writeln!(file, "2,1.5,9").unwrap();
        assert!(read_delimited(file.path(), b',', false).is_err());
    }

    #[test]
    fn non_numeric_feature_names_row() {
        let table = vec![vec!["1".to_string(), "abc".to_string()]];
        let err = classification_data_from_table(&table, 0).unwrap_err();
        assert!(err.to_string().contains("row 0, column 1"));
    }
}

//! Participant/session/diagnosis tables.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One row of a population table. Extra columns in the file are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    pub participant_id: String,
    pub session_id: String,
    pub diagnosis: String,
}

/// Position of `diagnosis` in the configured label list.
pub fn label_index(diagnoses: &[String], diagnosis: &str) -> Option<usize> {
    diagnoses.iter().position(|d| d == diagnosis)
}

/// Reads every row of a tab-separated table.
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<SampleRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_ref())?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

/// Loads the rows whose diagnosis belongs to `diagnoses`.
///
/// With `baseline`, only the earliest session of each participant is kept
/// (`ses-M<months>` ids compare by month count).
pub fn load_table(path: impl AsRef<Path>, diagnoses: &[String], baseline: bool) -> Result<Vec<SampleRow>> {
    let path = path.as_ref();
    if diagnoses.is_empty() {
        return Err(Error::Config("at least one diagnosis label is required".into()));
    }

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for row in read_rows(path)? {
        if !seen.insert((row.participant_id.clone(), row.session_id.clone())) {
            return Err(Error::Data(format!(
                "{}: duplicated image {} {}",
                path.display(),
                row.participant_id,
                row.session_id
            )));
        }
        if label_index(diagnoses, &row.diagnosis).is_some() {
            rows.push(row);
        }
    }

    if baseline {
        rows = keep_baseline(rows);
    }

    if rows.is_empty() {
        return Err(Error::Config(format!(
            "{} holds no rows with diagnoses {:?}",
            path.display(),
            diagnoses
        )));
    }
    Ok(rows)
}

/// Sort key of a session id: months since baseline, then the raw id.
/// Ids without a month count sort after every `ses-M<n>`.
fn session_key(session_id: &str) -> (u64, &str) {
    let months = session_id
        .strip_prefix("ses-M")
        .and_then(|m| m.parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (months, session_id)
}

fn keep_baseline(rows: Vec<SampleRow>) -> Vec<SampleRow> {
    let mut first: BTreeMap<&str, &str> = BTreeMap::new();
    for row in &rows {
        let entry = first.entry(row.participant_id.as_str()).or_insert(row.session_id.as_str());
        if session_key(&row.session_id) < session_key(*entry) {
            *entry = row.session_id.as_str();
        }
    }
    let keep: HashSet<(String, String)> = first
        .into_iter()
        .map(|(p, s)| (p.to_string(), s.to_string()))
        .collect();
    rows.into_iter()
        .filter(|r| keep.contains(&(r.participant_id.clone(), r.session_id.clone())))
        .collect()
}

/// Writes rows as a tab-separated table with the three mandatory columns,
/// creating missing parent directories.
pub fn write_table(path: impl AsRef<Path>, rows: &[SampleRow]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn labels(l: &[&str]) -> Vec<String> {
        l.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn filters_by_diagnosis_and_ignores_extra_columns() {
        let file = table(
            "participant_id\tsession_id\tdiagnosis\tage\n\
             sub-01\tses-M00\tAD\t71\n\
             sub-02\tses-M00\tMCI\t68\n\
             sub-03\tses-M00\tCN\t70\n",
        );
        let rows = load_table(file.path(), &labels(&["AD", "CN"]), false).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].participant_id, "sub-03");
    }

    #[test]
    fn baseline_keeps_the_first_session() {
        let file = table(
            "participant_id\tsession_id\tdiagnosis\n\
             sub-01\tses-M12\tAD\n\
             sub-01\tses-M00\tAD\n\
             sub-02\tses-M06\tCN\n",
        );
        let rows = load_table(file.path(), &labels(&["AD", "CN"]), true).unwrap();
        let sessions: Vec<_> = rows.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(sessions, vec!["ses-M00", "ses-M06"]);
    }

    #[test]
    fn baseline_compares_month_counts() {
        let file = table(
            "participant_id\tsession_id\tdiagnosis\n\
             sub-01\tses-M100\tAD\n\
             sub-01\tses-M12\tAD\n\
             sub-02\tses-M108\tCN\n\
             sub-02\tses-M24\tCN\n",
        );
        let rows = load_table(file.path(), &labels(&["AD", "CN"]), true).unwrap();
        let sessions: Vec<_> = rows.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(sessions, vec!["ses-M12", "ses-M24"]);
    }

    #[test]
    fn duplicated_image_is_a_data_error() {
        let file = table(
            "participant_id\tsession_id\tdiagnosis\n\
             sub-01\tses-M00\tAD\n\
             sub-01\tses-M00\tAD\n",
        );
        let err = load_table(file.path(), &labels(&["AD"]), false).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn written_tables_land_in_fresh_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log_dir/CNN/fold_0/train.tsv");
        let rows = vec![SampleRow {
            participant_id: "sub-01".into(),
            session_id: "ses-M00".into(),
            diagnosis: "AD".into(),
        }];
        write_table(&path, &rows).unwrap();
        assert_eq!(read_rows(&path).unwrap(), rows);
    }

    #[test]
    fn missing_mandatory_column_fails() {
        let file = table("participant_id\tsession_id\nsub-01\tses-M00\n");
        assert!(load_table(file.path(), &labels(&["AD"]), false).is_err());
    }
}

//! Append-only CSV history of every evaluated candidate.

use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::{Configuration, ParamValue, Parameter},
    error::{ExploreError, Result},
    metrics::TrialResult,
};

pub const HEADER: [&str; 10] = [
    "Iteration",
    "Parameter",
    "Value",
    "EDP",
    "Energy",
    "CPI",
    "Leakage",
    "RuntimeDynamic",
    "Improved",
    "Configuration",
];

pub struct TrialRecord<'a> {
    pub iteration: u64,
    pub parameter: Parameter,
    pub value: &'a ParamValue,
    pub result: &'a TrialResult,
    pub improved: bool,
    pub configuration: &'a Configuration,
}

pub struct Ledger<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
    last_iteration: u64,
}

impl Ledger<File> {
    /// Opens `path` for appending, writing the header only if the file is new or empty.
    /// Iterations continue after the highest one already recorded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ExploreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ExploreError::io(path, e))?;
        let is_empty = file
            .metadata()
            .map_err(|e| ExploreError::io(path, e))?
            .len()
            == 0;

        let mut ledger = Self::from_writer(file, is_empty)?;
        if !is_empty {
            ledger.last_iteration = last_iteration(path)?;
        }
        Ok(ledger)
    }
}

impl<W: Write> Ledger<W> {
    pub fn from_writer(inner: W, write_header: bool) -> Result<Self> {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        let mut ledger = Self {
            writer,
            rows: 0,
            last_iteration: 0,
        };
        if write_header {
            ledger.writer.write_record(HEADER)?;
            ledger.flush()?;
        }
        Ok(ledger)
    }

    /// Writes one row and flushes it, so the row survives an abort of the next trial.
    pub fn append(&mut self, record: &TrialRecord<'_>) -> Result<()> {
        let result = record.result;
        let row = [
            record.iteration.to_string(),
            record.parameter.to_string(),
            record.value.to_string(),
            number(result.edp()),
            number(result.energy()),
            number(result.cpi()),
            number(result.total_leakage()),
            number(result.runtime_dynamic()),
            if record.improved { "YES" } else { "NO" }.to_string(),
            record.configuration.to_json()?,
        ];
        self.writer.write_record(&row)?;
        self.flush()?;
        self.rows += 1;
        self.last_iteration = self.last_iteration.max(record.iteration);
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn next_iteration(&self) -> u64 {
        self.last_iteration + 1
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()).into())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

// Only the first column is read, so a row cut short by an aborted run does not block a restart.
fn last_iteration(path: &Path) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut last = 0;
    for record in reader.records() {
        let record = record?;
        if let Some(iteration) = record.get(0).and_then(|f| f.trim().parse::<u64>().ok()) {
            last = last.max(iteration);
        }
    }
    Ok(last)
}

fn number(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "NaN".to_string(),
    }
}

/// A ledger row read back from disk. Unmeasured fields come back as NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(rename = "Iteration")]
    pub iteration: u64,
    #[serde(rename = "Parameter")]
    pub parameter: String,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "EDP")]
    pub edp: f64,
    #[serde(rename = "Energy")]
    pub energy: f64,
    #[serde(rename = "CPI")]
    pub cpi: f64,
    #[serde(rename = "Leakage")]
    pub leakage: f64,
    #[serde(rename = "RuntimeDynamic")]
    pub runtime_dynamic: f64,
    #[serde(rename = "Improved")]
    pub improved: String,
    #[serde(rename = "Configuration")]
    pub configuration: String,
}

impl LedgerRecord {
    pub fn is_improvement(&self) -> bool {
        self.improved == "YES"
    }
}

pub fn read_ledger(path: impl AsRef<Path>) -> Result<Vec<LedgerRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ExploreError::io(path, e))?;
    read_records(file)
}

pub fn read_records<R: Read>(reader: R) -> Result<Vec<LedgerRecord>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExplorerConfig;

    fn row<'a>(
        iteration: u64,
        value: &'a ParamValue,
        result: &'a TrialResult,
        configuration: &'a Configuration,
    ) -> TrialRecord<'a> {
        TrialRecord {
            iteration,
            parameter: Parameter::L1iSize,
            value,
            result,
            improved: result.is_measured(),
            configuration,
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let config = ExplorerConfig::default().baseline;
        let value = ParamValue::from("32kB");
        let measured = TrialResult::from_readings(Some(2.0), Some(0.5), Some(1.5));
        let failed = TrialResult::unmeasurable("power tool exited with 1");

        let mut ledger = Ledger::from_writer(Vec::new(), true).unwrap();
        ledger.append(&row(1, &value, &measured, &config)).unwrap();
        ledger.append(&row(2, &value, &failed, &config)).unwrap();
        assert_eq!(ledger.rows(), 2);

        let text = String::from_utf8(ledger.into_inner().unwrap()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER.join(","));
        assert!(lines[1].starts_with("1,l1i_size,32kB,8,4,2,0.5,1.5,YES,"));
        assert!(lines[2].starts_with("2,l1i_size,32kB,NaN,NaN,NaN,NaN,NaN,NO,"));
    }

    #[test]
    fn reads_back_with_nan() {
        let config = ExplorerConfig::default().baseline;
        let value = ParamValue::Int(6);
        let measured = TrialResult::from_readings(Some(1.0), Some(1.0), Some(1.0));
        let partial = TrialResult::from_readings(Some(1.25), None, Some(1.0));

        let mut ledger = Ledger::from_writer(Vec::new(), true).unwrap();
        ledger.append(&row(1, &value, &measured, &config)).unwrap();
        ledger.append(&row(2, &value, &partial, &config)).unwrap();
        let bytes = ledger.into_inner().unwrap();

        let records = read_records(bytes.as_slice()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].edp, 2.0);
        assert!(records[0].is_improvement());
        assert_eq!(records[1].cpi, 1.25);
        assert!(records[1].edp.is_nan());
        assert!(records[1].leakage.is_nan());
        assert!(!records[1].is_improvement());
        let blob: Configuration = serde_json::from_str(&records[1].configuration).unwrap();
        assert_eq!(blob, config);
    }

    #[test]
    fn reopening_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.csv");
        let config = ExplorerConfig::default().baseline;
        let value = ParamValue::Int(2);
        let result = TrialResult::from_readings(Some(1.0), Some(1.0), Some(1.0));

        Ledger::open(&path)
            .unwrap()
            .append(&row(1, &value, &result, &config))
            .unwrap();
        Ledger::open(&path)
            .unwrap()
            .append(&row(2, &value, &result, &config))
            .unwrap();

        let records = read_ledger(&path).unwrap();
        let iterations: Vec<_> = records.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![1, 2]);
    }

    #[test]
    fn reopening_continues_after_last_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let config = ExplorerConfig::default().baseline;
        let value = ParamValue::Int(2);
        let result = TrialResult::from_readings(Some(1.0), Some(1.0), Some(1.0));

        let mut ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.next_iteration(), 1);
        ledger.append(&row(1, &value, &result, &config)).unwrap();
        ledger.append(&row(2, &value, &result, &config)).unwrap();
        assert_eq!(ledger.next_iteration(), 3);
        drop(ledger);

        // a row cut short by a crash
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"3,l1i_size\n").unwrap();
        drop(file);

        assert_eq!(Ledger::open(&path).unwrap().next_iteration(), 4);
    }
}

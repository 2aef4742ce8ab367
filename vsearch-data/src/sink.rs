use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use vsearch_core::TrialResult;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("data file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The existing file's header does not name the columns the run-number
    /// scan needs.
    #[error("data file {0} has no subject/run columns in its header")]
    MissingColumns(PathBuf),
}

/// Column order of the output file. The run-number scan looks columns up by
/// name, so old files keep working if columns are ever appended.
pub const HEADER: [&str; 15] = [
    "subject",
    "run",
    "block",
    "trial",
    "target_present",
    "set_size",
    "radius_px",
    "fixation_ms",
    "feedback_ms",
    "response_timeout_ms",
    "pressed_key",
    "correct",
    "response_time_ms",
    "timed_out",
    "timestamp",
];

/// Append-only trial store: one CSV row per trial, header written when the
/// file is first created. Opening the sink derives the run number for the
/// subject by scanning every existing row once.
pub struct CsvSink {
    path: PathBuf,
    file: File,
    run: u32,
}

impl CsvSink {
    pub fn open(path: &Path, subject: &str) -> Result<Self> {
        let run = next_run_number(path, subject)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| DataError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let len = file
            .metadata()
            .map_err(|source| DataError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if len == 0 {
            writeln!(file, "{}", HEADER.join(",")).map_err(|source| DataError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        debug!(path = %path.display(), subject, run, "data sink opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            run,
        })
    }

    /// Run number assigned to this session's rows.
    pub fn run_number(&self) -> u32 {
        self.run
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, result: &TrialResult) -> Result<()> {
        writeln!(self.file, "{}", format_row(result)).map_err(|source| DataError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn format_row(r: &TrialResult) -> String {
    let fields: [String; 15] = [
        r.subject.clone(),
        r.run.to_string(),
        r.block.to_string(),
        r.trial.to_string(),
        r.target_present.to_string(),
        r.set_size.to_string(),
        r.radius_px.to_string(),
        r.fixation_ms.to_string(),
        r.feedback_ms.to_string(),
        r.response_timeout_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default(),
        r.pressed_key.clone().unwrap_or_default(),
        r.correct.to_string(),
        r.response_time_ms
            .map(|ms| format!("{ms:.3}"))
            .unwrap_or_default(),
        r.timed_out.to_string(),
        r.timestamp.to_rfc3339(),
    ];
    fields.join(",")
}

/// max(run) + 1 over this subject's existing rows; 0 for a fresh file or a
/// new subject.
fn next_run_number(path: &Path, subject: &str) -> Result<u32> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => line.map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?,
        None => return Ok(0),
    };
    let columns: Vec<&str> = header.split(',').collect();
    let subject_col = columns.iter().position(|&c| c == "subject");
    let run_col = columns.iter().position(|&c| c == "run");
    let (Some(subject_col), Some(run_col)) = (subject_col, run_col) else {
        return Err(DataError::MissingColumns(path.to_path_buf()));
    };

    let mut max_run: Option<u32> = None;
    for (number, line) in lines.enumerate() {
        let line = line.map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let parsed = fields
            .get(subject_col)
            .filter(|&&s| s == subject)
            .and_then(|_| fields.get(run_col));
        match parsed {
            Some(run) => match run.parse::<u32>() {
                Ok(run) => max_run = Some(max_run.map_or(run, |m| m.max(run))),
                Err(_) => warn!(line = number + 2, "skipping row with unparsable run number"),
            },
            None if fields.len() <= subject_col.max(run_col) => {
                warn!(line = number + 2, "skipping malformed row");
            }
            None => {} // another subject's row
        }
    }
    Ok(max_run.map_or(0, |m| m + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;

    fn unique_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "vsearch_data_{}_{}.csv",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        path
    }

    fn result(subject: &str, run: u32, trial: usize) -> TrialResult {
        TrialResult {
            subject: subject.into(),
            run,
            block: 1,
            trial,
            target_present: trial % 2 == 0,
            set_size: 8,
            radius_px: 220.0,
            fixation_ms: 2000,
            feedback_ms: 3000,
            response_timeout_ms: None,
            pressed_key: Some("x".into()),
            correct: true,
            response_time_ms: Some(512.25),
            timed_out: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn fresh_file_gets_header_and_run_zero() {
        let path = unique_path("fresh");
        let mut sink = CsvSink::open(&path, "s01").unwrap();
        assert_eq!(sink.run_number(), 0);
        sink.append(&result("s01", 0, 1)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), HEADER.join(","));
        let row = lines.next().unwrap();
        assert_eq!(row.split(',').count(), HEADER.len());
        assert!(row.starts_with("s01,0,1,1,"));
        assert_eq!(lines.next(), None);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn header_is_written_once_across_reopens() {
        let path = unique_path("reopen");
        {
            let mut sink = CsvSink::open(&path, "s01").unwrap();
            sink.append(&result("s01", 0, 1)).unwrap();
        }
        {
            let mut sink = CsvSink::open(&path, "s01").unwrap();
            sink.append(&result("s01", sink.run_number(), 1)).unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.lines().filter(|l| l.starts_with("subject,")).count(),
            1
        );
        assert_eq!(text.lines().count(), 3);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn run_number_increments_per_subject() {
        let path = unique_path("runs");
        {
            let mut sink = CsvSink::open(&path, "s01").unwrap();
            assert_eq!(sink.run_number(), 0);
            for trial in 1..=3 {
                sink.append(&result("s01", 0, trial)).unwrap();
            }
        }
        {
            let sink = CsvSink::open(&path, "s01").unwrap();
            assert_eq!(sink.run_number(), 1);
        }
        {
            // A different subject starts from 0 in the same file.
            let mut sink = CsvSink::open(&path, "s02").unwrap();
            assert_eq!(sink.run_number(), 0);
            sink.append(&result("s02", 0, 1)).unwrap();
        }
        {
            // s01's runs are untouched by s02's rows.
            let mut sink = CsvSink::open(&path, "s01").unwrap();
            assert_eq!(sink.run_number(), 1);
            sink.append(&result("s01", 1, 1)).unwrap();
        }
        {
            let sink = CsvSink::open(&path, "s01").unwrap();
            assert_eq!(sink.run_number(), 2);
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let path = unique_path("malformed");
        {
            let mut sink = CsvSink::open(&path, "s01").unwrap();
            sink.append(&result("s01", 4, 1)).unwrap();
        }
        // Truncated garbage row and a row with a bad run field.
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("s01\n");
        text.push_str("s01,notanumber,1,1,true,8,220,2000,3000,,x,true,1.0,false,now\n");
        fs::write(&path, text).unwrap();

        let sink = CsvSink::open(&path, "s01").unwrap();
        assert_eq!(sink.run_number(), 5);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn timeout_rows_have_empty_optional_fields() {
        let path = unique_path("timeout");
        let mut sink = CsvSink::open(&path, "s01").unwrap();
        let mut r = result("s01", 0, 1);
        r.pressed_key = None;
        r.correct = false;
        r.response_time_ms = None;
        r.timed_out = true;
        r.response_timeout_ms = Some(4000);
        sink.append(&r).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let row: Vec<&str> = text.lines().nth(1).unwrap().split(',').collect();
        let col = |name: &str| HEADER.iter().position(|&h| h == name).unwrap();
        assert_eq!(row[col("pressed_key")], "");
        assert_eq!(row[col("response_time_ms")], "");
        assert_eq!(row[col("timed_out")], "true");
        assert_eq!(row[col("response_timeout_ms")], "4000");
        fs::remove_file(&path).unwrap();
    }
}

//! Append-only, date-partitioned attendance ledger.
//!
//! One CSV file per calendar day at `<ledger_dir>/<YYYY-MM-DD>_attendance.csv`.
//! The header row is written only when the file is empty at open time. Each
//! row is written with a single `write_all` and flushed before `append`
//! returns. The ledger never reads its own history to deduplicate; that is
//! the cooldown tracker's job.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HEADER: [&str; 3] = ["Timestamp", "Name", "Status"];
pub const STATUS_PRESENT: &str = "Present";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const LINE_END: &str = "\r\n";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ledger row {row}: {reason}")]
    Malformed { row: usize, reason: String },
    #[error("ledger already closed")]
    Closed,
}

impl LedgerError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub timestamp: NaiveDateTime,
    pub name: String,
    pub status: String,
}

impl AttendanceRecord {
    pub fn present(name: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            name: name.into(),
            status: STATUS_PRESENT.to_string(),
        }
    }

    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    fn to_row(&self) -> String {
        encode_row(&[&self.timestamp_string(), &self.name, &self.status])
    }
}

/// Ledger file path for `date` under `dir`.
pub fn ledger_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}_attendance.csv", date.format(DATE_FORMAT)))
}

/// Open handle to one day's ledger file. Single writer: `append` takes `&mut self`.
#[derive(Debug)]
pub struct Ledger {
    file: Option<File>,
    path: PathBuf,
    created: bool,
    rows_written: usize,
}

impl Ledger {
    /// Open (creating if needed) the ledger for `date` in `dir`.
    ///
    /// The directory is created if missing. The header is written iff the
    /// file is empty right after opening.
    pub fn open(dir: &Path, date: NaiveDate) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir).map_err(|e| LedgerError::io(dir, e))?;
        let path = ledger_path(dir, date);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LedgerError::io(&path, e))?;

        let len = file
            .metadata()
            .map_err(|e| LedgerError::io(&path, e))?
            .len();

        let created = len == 0;
        if created {
            file.write_all(encode_row(&HEADER).as_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| LedgerError::io(&path, e))?;
            tracing::info!(path = %path.display(), "created new attendance log");
        } else {
            tracing::info!(path = %path.display(), bytes = len, "appending to existing attendance log");
        }

        Ok(Self {
            file: Some(file),
            path,
            created,
            rows_written: 0,
        })
    }

    /// Wrap an already-open handle, skipping the header.
    #[cfg(test)]
    pub(crate) fn from_file(path: PathBuf, file: File) -> Self {
        Self {
            file: Some(file),
            path,
            created: false,
            rows_written: 0,
        }
    }

    /// Open the ledger, run `f`, then close it on every exit path.
    ///
    /// An error from `f` takes precedence over an error from closing.
    pub fn scoped<T, E, F>(dir: &Path, date: NaiveDate, f: F) -> Result<T, E>
    where
        E: From<LedgerError>,
        F: FnOnce(&mut Ledger) -> Result<T, E>,
    {
        let mut ledger = Ledger::open(dir, date)?;
        let result = f(&mut ledger);
        let closed = ledger.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::warn!(error = %close_err, "ledger close failed after earlier error");
                Err(e)
            }
        }
    }

    /// Append one row and flush it to the OS before returning.
    pub fn append(&mut self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let file = self.file.as_mut().ok_or(LedgerError::Closed)?;
        file.write_all(record.to_row().as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| LedgerError::io(&self.path, e))?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flush and sync the file, releasing the handle.
    pub fn close(mut self) -> Result<(), LedgerError> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<(), LedgerError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .and_then(|_| file.sync_all())
                .map_err(|e| LedgerError::io(&self.path, e))?;
            tracing::info!(path = %self.path.display(), rows = self.rows_written, "attendance log closed");
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if this open wrote the header (the file was empty).
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            tracing::warn!(error = %e, "ledger close on drop failed");
        }
    }
}

/// Read back a ledger file for display. The header row is skipped.
pub fn read_records(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let text = std::fs::read_to_string(path).map_err(|e| LedgerError::io(path, e))?;
    let rows = parse_rows(&text)?;

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        if i == 0 && row.iter().map(String::as_str).eq(HEADER) {
            continue;
        }
        let [ts, name, status]: [String; 3] =
            row.try_into().map_err(|r: Vec<String>| LedgerError::Malformed {
                row: i + 1,
                reason: format!("expected 3 fields, got {}", r.len()),
            })?;
        let timestamp = NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).map_err(|e| {
            LedgerError::Malformed {
                row: i + 1,
                reason: format!("bad timestamp {ts:?}: {e}"),
            }
        })?;
        records.push(AttendanceRecord {
            timestamp,
            name,
            status,
        });
    }
    Ok(records)
}

/// Encode one CSV row. Fields containing a comma, quote, CR or LF are quoted
/// with inner quotes doubled.
fn encode_row(fields: &[&str]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        if field.contains([',', '"', '\r', '\n']) {
            line.push('"');
            line.push_str(&field.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(field);
        }
    }
    line.push_str(LINE_END);
    line
}

/// Split CSV text into rows of fields, honouring quoted fields.
fn parse_rows(text: &str) -> Result<Vec<Vec<String>>, LedgerError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(LedgerError::Malformed {
            row: rows.len() + 1,
            reason: "unterminated quoted field".into(),
        });
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        date().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_ledger_path_pattern() {
        let path = ledger_path(Path::new("logs"), date());
        assert_eq!(path, PathBuf::from("logs/2024-03-01_attendance.csv"));
    }

    #[test]
    fn test_fresh_file_gets_one_header_before_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        assert!(ledger.created());
        ledger
            .append(&AttendanceRecord::present("alice", at(9, 0, 0)))
            .unwrap();
        let path = ledger.path().to_path_buf();
        ledger.close().unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            text,
            "Timestamp,Name,Status\r\n2024-03-01 09:00:00,alice,Present\r\n"
        );
    }

    #[test]
    fn test_reopen_non_empty_never_rewrites_header() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ledger = Ledger::open(dir.path(), date()).unwrap();
            ledger
                .append(&AttendanceRecord::present("alice", at(9, 0, 0)))
                .unwrap();
            ledger.close().unwrap();
        }
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        assert!(!ledger.created());
        ledger
            .append(&AttendanceRecord::present("bob", at(9, 5, 0)))
            .unwrap();
        ledger.close().unwrap();

        let text = std::fs::read_to_string(ledger_path(dir.path(), date())).unwrap();
        assert_eq!(text.matches("Timestamp,Name,Status").count(), 1);
        assert!(text.starts_with("Timestamp,Name,Status\r\n"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_open_existing_empty_file_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(ledger_path(dir.path(), date()), b"").unwrap();
        let ledger = Ledger::open(dir.path(), date()).unwrap();
        assert!(ledger.created());
        ledger.close().unwrap();
        let text = std::fs::read_to_string(ledger_path(dir.path(), date())).unwrap();
        assert_eq!(text, "Timestamp,Name,Status\r\n");
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let ledger = Ledger::open(&nested, date()).unwrap();
        assert!(ledger.path().exists());
    }

    #[test]
    fn test_rows_visible_before_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        ledger
            .append(&AttendanceRecord::present("alice", at(9, 0, 0)))
            .unwrap();
        let records = read_records(ledger.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(ledger.rows_written(), 1);
    }

    #[test]
    fn test_scoped_closes_on_error_path() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<(), LedgerError> = Ledger::scoped(dir.path(), date(), |ledger| {
            ledger.append(&AttendanceRecord::present("alice", at(9, 0, 0)))?;
            Err(LedgerError::Malformed {
                row: 0,
                reason: "forced".into(),
            })
        });
        assert!(matches!(result, Err(LedgerError::Malformed { .. })));
        let records = read_records(&ledger_path(dir.path(), date())).unwrap();
        assert_eq!(records, vec![AttendanceRecord::present("alice", at(9, 0, 0))]);
    }

    #[test]
    fn test_names_with_commas_and_quotes_survive() {
        let dir = tempfile::tempdir().unwrap();
        let tricky = "Doe, \"JD\" John";
        Ledger::scoped(dir.path(), date(), |ledger| {
            ledger.append(&AttendanceRecord::present(tricky, at(10, 0, 0)))
        })
        .unwrap();

        let text = std::fs::read_to_string(ledger_path(dir.path(), date())).unwrap();
        assert!(text.contains("\"Doe, \"\"JD\"\" John\""));
        let records = read_records(&ledger_path(dir.path(), date())).unwrap();
        assert_eq!(records[0].name, tricky);
    }

    #[test]
    fn test_read_records_rejects_bad_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Timestamp,Name,Status\r\nyesterday,alice,Present\r\n").unwrap();
        let err = read_records(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { row: 2, .. }));
    }

    #[test]
    fn test_read_records_rejects_short_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        std::fs::write(&path, "Timestamp,Name,Status\nalice\n").unwrap();
        assert!(matches!(
            read_records(&path),
            Err(LedgerError::Malformed { row: 2, .. })
        ));
    }

    #[test]
    fn test_append_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        ledger.close_inner().unwrap();
        assert!(matches!(
            ledger.append(&AttendanceRecord::present("alice", at(9, 0, 0))),
            Err(LedgerError::Closed)
        ));
    }
}

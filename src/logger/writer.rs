//! # Partitioned Log Writer
//!
//! Appends readings to a date-partitioned text tree:
//!
//! ```text
//! <base>/<YYYY>/<MonthName>/Week-<WW>/Day-<DD>.txt
//! ```
//!
//! The week is the ISO-8601 week number. Each day file starts with a single
//! `#` header line written when the file is created; after that every call
//! appends exactly one line:
//!
//! ```text
//! HH:MM:SS:ffffff\t<v1>\t<v2>\t...\t<v12>\n
//! ```
//!
//! Values use 6 decimals; missing readings are written as `nan`.

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::LogError;
use crate::reading::ReadingVector;

/// Unit of every logged value
pub const UNITS: &str = "uT";

/// Day file for a timestamp under `base`
///
/// # Examples
///
/// ```
/// use chrono::{Local, TimeZone};
/// use magnetometer_daq::logger::writer::partition_path;
/// use std::path::Path;
///
/// let ts = Local.with_ymd_and_hms(2024, 10, 17, 9, 30, 0).unwrap();
/// let path = partition_path(Path::new("logs"), &ts);
/// assert_eq!(path, Path::new("logs/2024/October/Week-42/Day-17.txt"));
/// ```
pub fn partition_path(base: &Path, timestamp: &DateTime<Local>) -> PathBuf {
    base.join(timestamp.format("%Y").to_string())
        .join(timestamp.format("%B").to_string())
        .join(format!("Week-{}", timestamp.format("%V")))
        .join(format!("Day-{}.txt", timestamp.format("%d")))
}

/// Header written once at the top of a new day file
pub fn header_line(timestamp: &DateTime<Local>) -> String {
    format!(
        "# Magnetometer readings for {} (units: {})\n",
        timestamp.format("%Y-%m-%d"),
        UNITS
    )
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{:.6}", value)
    }
}

/// One tab-separated record line, newline-terminated
pub fn format_record(reading: &ReadingVector) -> String {
    let mut line = reading.timestamp.format("%H:%M:%S:%6f").to_string();
    for &value in &reading.values {
        line.push('\t');
        line.push_str(&format_value(value));
    }
    line.push('\n');
    line
}

/// Append one reading to its day file, creating directories and the header
/// as needed
///
/// Blocking; callers on an async runtime should run it on the blocking pool.
///
/// # Returns
///
/// * `Result<PathBuf>` - The day file that was written
///
/// # Errors
///
/// - `CreateDir`: a partition directory could not be created
/// - `Write`: the day file could not be opened or appended to
pub fn append_reading(base: &Path, reading: &ReadingVector) -> Result<PathBuf, LogError> {
    let path = partition_path(base, &reading.timestamp);

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| LogError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let write_err = |source| LogError::Write {
        path: path.clone(),
        source,
    };

    let record = format_record(reading);
    match OpenOptions::new().append(true).create_new(true).open(&path) {
        Ok(mut file) => {
            let mut contents = header_line(&reading.timestamp);
            contents.push_str(&record);
            file.write_all(contents.as_bytes()).map_err(write_err)?;
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let mut file = OpenOptions::new().append(true).open(&path).map_err(write_err)?;
            file.write_all(record.as_bytes()).map_err(write_err)?;
        }
        Err(e) => return Err(write_err(e)),
    }

    Ok(path)
}

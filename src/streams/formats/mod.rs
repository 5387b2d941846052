//! # File Formats
//!
//! Concrete [`RecordSource`] and [`RecordSink`] implementations, selected at
//! runtime by [`FileFormat`].
//!
//! | Tag                  | Source        | Sink                   |
//! |----------------------|---------------|------------------------|
//! | `csv`                | [`CsvSource`] | [`CsvSink`]            |
//! | `json`               | [`JsonSource`] (top-level array) | [`JsonSink`] (array) |
//! | `jsonl` / `ndjson`   | [`JsonSource`] (one object per line) | [`JsonSink`] (lines) |
//! | `parquet`            | [`ParquetSource`] | [`ParquetSink`] (batched) |

pub mod columnar;
pub mod delimited;
pub mod json;

pub use columnar::{ParquetSink, ParquetSource};
pub use delimited::{CsvSink, CsvSource};
pub use json::{JsonLayout, JsonSink, JsonSource};

use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::Record;
use crate::streams::{ColumnIndex, ColumnTypes, FileHandle, RecordSink, RecordSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
    JsonLines,
    Parquet,
}

impl FileFormat {
    pub fn open_source(&self, handle: &FileHandle) -> Result<Box<dyn RecordSource>> {
        Ok(match self {
            Self::Csv => Box::new(CsvSource::open(handle)?),
            Self::Json => Box::new(JsonSource::open(handle, JsonLayout::Array)?),
            Self::JsonLines => Box::new(JsonSource::open(handle, JsonLayout::Lines)?),
            Self::Parquet => Box::new(ParquetSource::open(handle)?),
        })
    }

    /// Open a sink. CSV columns and the parquet schema come from the first
    /// record written.
    pub fn open_sink(&self, handle: &FileHandle) -> Result<Box<dyn RecordSink>> {
        Ok(match self {
            Self::Csv => Box::new(CsvSink::open(handle, None)?),
            Self::Json => Box::new(JsonSink::open(handle, JsonLayout::Array)?),
            Self::JsonLines => Box::new(JsonSink::open(handle, JsonLayout::Lines)?),
            Self::Parquet => Box::new(ParquetSink::open(handle)?),
        })
    }
}

impl FromStr for FileFormat {
    type Err = PipelineError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" | "jsonlines" => Ok(Self::JsonLines),
            "parquet" | "pq" => Ok(Self::Parquet),
            other => Err(PipelineError::UnsupportedFormat(format!(
                "unknown format tag `{other}`"
            ))),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
            Self::Parquet => write!(f, "parquet"),
        }
    }
}

/// Skips the first `start` records of a source and stops after `limit`.
pub struct SliceSource<S> {
    inner: S,
    start: usize,
    limit: Option<usize>,
    emitted: usize,
}

impl<S: RecordSource> SliceSource<S> {
    pub fn new(inner: S, start: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            inner,
            start: start.unwrap_or(0),
            limit,
            emitted: 0,
        }
    }
}

impl<S: RecordSource> RecordSource for SliceSource<S> {
    fn init_stream(&mut self) -> Result<()> {
        self.inner.init_stream()?;
        let mut skipped = 0;
        while skipped < self.start {
            if self.inner.next_record()?.is_none() {
                break;
            }
            skipped += 1;
        }
        debug!(skipped, limit = ?self.limit, "Sliced record source");
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }
        let record = self.inner.next_record()?;
        if record.is_some() {
            self.emitted += 1;
        }
        Ok(record)
    }

    fn columns(&self) -> &ColumnIndex {
        self.inner.columns()
    }

    fn types(&self) -> &ColumnTypes {
        self.inner.types()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_tags() {
        assert_eq!("csv".parse::<FileFormat>().unwrap(), FileFormat::Csv);
        assert_eq!("JSON".parse::<FileFormat>().unwrap(), FileFormat::Json);
        assert_eq!("ndjson".parse::<FileFormat>().unwrap(), FileFormat::JsonLines);
        assert_eq!("jsonl".parse::<FileFormat>().unwrap(), FileFormat::JsonLines);
        assert_eq!("Parquet".parse::<FileFormat>().unwrap(), FileFormat::Parquet);
        assert_eq!(FileFormat::Parquet.to_string(), "parquet");
        assert!(matches!(
            "xlsx".parse::<FileFormat>(),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_slice_applies_start_and_limit() {
        let data = "n\n0\n1\n2\n3\n4\n";
        let mut source = SliceSource::new(CsvSource::from_reader(data.as_bytes()), Some(1), Some(2));
        source.init_stream().unwrap();

        let mut seen = Vec::new();
        while let Some(record) = source.next_record().unwrap() {
            seen.push(record["n"].clone());
        }
        assert_eq!(seen, vec![json!(1), json!(2)]);
        assert_eq!(source.columns()["n"], 0);
    }

    #[test]
    fn test_slice_past_the_end_is_empty() {
        let data = "n\n0\n1\n";
        let mut source = SliceSource::new(CsvSource::from_reader(data.as_bytes()), Some(5), None);
        source.init_stream().unwrap();
        assert!(source.next_record().unwrap().is_none());
    }
}

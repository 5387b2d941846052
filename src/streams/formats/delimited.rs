//! Comma-separated values.
//!
//! The source treats the first row as the header and infers one
//! [`ColumnType`] per column from the first data row. Rows shorter than the
//! header are logged and the missing columns left out of the record.

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde_json::Value;
use std::io::{Read, Write};
use tracing::{debug, error, warn};

use crate::error::{PipelineError, Result};
use crate::models::{Record, TaskDefinition};
use crate::streams::file::{FileHandle, FileWriter};
use crate::streams::schema::{index_columns, ColumnIndex, ColumnType, ColumnTypes};
use crate::streams::{RecordSink, RecordSource};

pub struct CsvSource {
    reader: csv::Reader<Box<dyn Read + Send>>,
    names: Vec<String>,
    columns: ColumnIndex,
    types: ColumnTypes,
    first: Option<StringRecord>,
    initialized: bool,
}

impl CsvSource {
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        Self {
            reader: ReaderBuilder::new()
                .has_headers(true)
                .flexible(true)
                .from_reader(reader),
            names: Vec::new(),
            columns: ColumnIndex::new(),
            types: ColumnTypes::new(),
            first: None,
            initialized: false,
        }
    }

    pub fn open(handle: &FileHandle) -> Result<Self> {
        Ok(Self::from_reader(handle.open_read()?))
    }

    fn convert(&self, row: &StringRecord) -> Result<Record> {
        let mut record = Record::new();
        for (position, name) in self.names.iter().enumerate() {
            let Some(raw) = row.get(position) else {
                error!(column = %name, index = position, "Column has no value at index");
                continue;
            };
            let column_type = self.types.get(name).copied().unwrap_or(ColumnType::String);
            record.insert(name.clone(), column_type.parse(name, raw)?);
        }
        Ok(record)
    }
}

impl RecordSource for CsvSource {
    fn init_stream(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.names = self.reader.headers()?.iter().map(str::to_string).collect();
        self.columns = index_columns(self.names.iter().cloned());

        let mut first = StringRecord::new();
        if self.reader.read_record(&mut first)? {
            for (position, name) in self.names.iter().enumerate() {
                let column_type = first
                    .get(position)
                    .map(ColumnType::infer)
                    .unwrap_or(ColumnType::String);
                debug!(column = %name, inferred = %column_type, "Inferred column type");
                self.types.insert(name.clone(), column_type);
            }
            self.first = Some(first);
        } else {
            warn!(columns = self.names.len(), "CSV source has no data rows");
            for name in &self.names {
                self.types.insert(name.clone(), ColumnType::String);
            }
        }

        self.initialized = true;
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        if !self.initialized {
            return Err(PipelineError::Source(
                "CSV source read before init_stream".to_string(),
            ));
        }

        let row = match self.first.take() {
            Some(row) => row,
            None => {
                let mut row = StringRecord::new();
                if !self.reader.read_record(&mut row)? {
                    return Ok(None);
                }
                row
            }
        };
        self.convert(&row).map(Some)
    }

    fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    fn types(&self) -> &ColumnTypes {
        &self.types
    }
}

/// Writes a header row then one row per task payload.
///
/// Columns are either given up front or taken from the keys of the first
/// record. Fields missing from a record are written empty.
pub struct CsvSink<W: Write> {
    writer: Option<csv::Writer<W>>,
    columns: Option<Vec<String>>,
    header_written: bool,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W, columns: Option<Vec<String>>) -> Self {
        Self {
            writer: Some(WriterBuilder::new().has_headers(false).from_writer(writer)),
            columns,
            header_written: false,
        }
    }
}

impl CsvSink<FileWriter> {
    pub fn open(handle: &FileHandle, columns: Option<Vec<String>>) -> Result<Self> {
        Ok(Self::new(handle.open_write()?, columns))
    }
}

impl<W: Write + Send + 'static> RecordSink for CsvSink<W> {
    fn init_stream(&mut self) -> Result<()> {
        if let (Some(writer), Some(columns)) = (self.writer.as_mut(), self.columns.as_ref()) {
            if !self.header_written {
                writer.write_record(columns)?;
                self.header_written = true;
            }
        }
        Ok(())
    }

    fn write(&mut self, task: &TaskDefinition) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::Sink("CSV sink written after close".to_string()))?;
        let columns = self
            .columns
            .get_or_insert_with(|| task.data.keys().cloned().collect());

        if !self.header_written {
            writer.write_record(columns.iter())?;
            self.header_written = true;
        }
        writer.write_record(
            columns
                .iter()
                .map(|column| task.data.get(column).map(render_cell).unwrap_or_default()),
        )?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let mut inner = writer
                .into_inner()
                .map_err(|e| PipelineError::Sink(format!("CSV sink flush failed: {}", e.error())))?;
            inner.flush()?;
            debug!("CSV sink closed");
        }
        Ok(())
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

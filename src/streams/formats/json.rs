//! JSON array and JSON-lines sources and sinks.

use serde::Deserialize;
use serde_json::{Deserializer, Value};
use std::io::{ErrorKind, Read, Write};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{Record, TaskDefinition};
use crate::streams::file::{FileHandle, FileWriter};
use crate::streams::schema::{index_columns, types_of_record, ColumnIndex, ColumnTypes};
use crate::streams::{RecordSink, RecordSource};

/// How records are laid out in a JSON file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonLayout {
    /// One top-level array of objects
    Array,
    /// One object per line
    Lines,
}

type RecordIter = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// Reads objects from a JSON array or from JSON lines.
///
/// Both layouts are decoded lazily, one record per `next_record`.
/// Whole-valued floats are narrowed to integers so `2.0` reads back as `2`.
pub struct JsonSource {
    layout: JsonLayout,
    reader: Option<Box<dyn Read + Send>>,
    records: Option<RecordIter>,
    first: Option<Record>,
    columns: ColumnIndex,
    types: ColumnTypes,
}

impl JsonSource {
    pub fn from_reader(reader: impl Read + Send + 'static, layout: JsonLayout) -> Self {
        Self {
            layout,
            reader: Some(Box::new(reader)),
            records: None,
            first: None,
            columns: ColumnIndex::new(),
            types: ColumnTypes::new(),
        }
    }

    pub fn open(handle: &FileHandle, layout: JsonLayout) -> Result<Self> {
        Ok(Self::from_reader(handle.open_read()?, layout))
    }
}

impl RecordSource for JsonSource {
    fn init_stream(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };

        let mut records: RecordIter = match self.layout {
            JsonLayout::Array => Box::new(
                ArrayElements::new(reader).map(|item| item.and_then(into_record)),
            ),
            JsonLayout::Lines => Box::new(
                Deserializer::from_reader(reader)
                    .into_iter::<Value>()
                    .map(|item| item.map_err(PipelineError::from).and_then(into_record)),
            ),
        };

        self.first = records.next().transpose()?;
        if let Some(first) = &self.first {
            self.columns = index_columns(first.keys().cloned());
            self.types = types_of_record(first);
        }
        self.records = Some(records);
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        if let Some(first) = self.first.take() {
            return Ok(Some(first));
        }
        match self.records.as_mut() {
            Some(records) => records.next().transpose(),
            None => Err(PipelineError::Source(
                "JSON source read before init_stream".to_string(),
            )),
        }
    }

    fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    fn types(&self) -> &ColumnTypes {
        &self.types
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayPosition {
    BeforeOpen,
    AfterOpen,
    AfterElement,
    Closed,
}

/// Pulls the elements of a top-level JSON array from a reader one at a time.
///
/// Separators are consumed here; each element is handed to its own
/// `serde_json` deserializer. An object element ends on its closing brace, so
/// nothing past it is read.
struct ArrayElements<R> {
    reader: R,
    position: ArrayPosition,
}

impl<R: Read> ArrayElements<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            position: ArrayPosition::BeforeOpen,
        }
    }

    /// Next byte that is not JSON whitespace
    fn next_token(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) if matches!(byte[0], b' ' | b'\t' | b'\n' | b'\r') => continue,
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn element(&mut self, first: u8) -> Result<Value> {
        let first = [first];
        let mut deserializer = Deserializer::from_reader(first.as_slice().chain(&mut self.reader));
        Ok(Value::deserialize(&mut deserializer)?)
    }

    fn advance(&mut self) -> Result<Option<Value>> {
        match self.position {
            ArrayPosition::Closed => Ok(None),
            ArrayPosition::BeforeOpen => match self.next_token()? {
                Some(b'[') => {
                    self.position = ArrayPosition::AfterOpen;
                    self.advance()
                }
                other => Err(malformed("`[`", other)),
            },
            ArrayPosition::AfterOpen => match self.next_token()? {
                Some(b']') => {
                    self.position = ArrayPosition::Closed;
                    Ok(None)
                }
                Some(first) => {
                    self.position = ArrayPosition::AfterElement;
                    self.element(first).map(Some)
                }
                None => Err(malformed("an element or `]`", None)),
            },
            ArrayPosition::AfterElement => match self.next_token()? {
                Some(b',') => match self.next_token()? {
                    Some(first) => self.element(first).map(Some),
                    None => Err(malformed("an element", None)),
                },
                Some(b']') => {
                    self.position = ArrayPosition::Closed;
                    Ok(None)
                }
                other => Err(malformed("`,` or `]`", other)),
            },
        }
    }
}

impl<R: Read> Iterator for ArrayElements<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.advance();
        if step.is_err() {
            self.position = ArrayPosition::Closed;
        }
        step.transpose()
    }
}

fn malformed(expected: &str, found: Option<u8>) -> PipelineError {
    let found = match found {
        Some(byte) => format!("`{}`", char::from(byte)),
        None => "end of input".to_string(),
    };
    PipelineError::Source(format!(
        "malformed JSON array: expected {expected}, found {found}"
    ))
}

fn into_record(item: Value) -> Result<Record> {
    match item {
        Value::Object(fields) => Ok(fields
            .into_iter()
            .map(|(name, value)| (name, narrow_number(value)))
            .collect()),
        other => Err(PipelineError::Source(format!(
            "expected a JSON object per record, found {other}"
        ))),
    }
}

// Largest magnitude at which every whole f64 is exactly representable
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

fn narrow_number(value: Value) -> Value {
    match value.as_f64() {
        Some(float)
            if value.is_f64() && float.fract() == 0.0 && float.abs() <= EXACT_INTEGER_LIMIT =>
        {
            Value::from(float as i64)
        }
        _ => value,
    }
}

/// Writes task payloads as a JSON array or as JSON lines.
pub struct JsonSink<W: Write> {
    layout: JsonLayout,
    writer: Option<W>,
    opened: bool,
    written: usize,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W, layout: JsonLayout) -> Self {
        Self {
            layout,
            writer: Some(writer),
            opened: false,
            written: 0,
        }
    }

    fn open_array(&mut self) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        if let (JsonLayout::Array, Some(writer)) = (self.layout, self.writer.as_mut()) {
            writer.write_all(b"[")?;
        }
        self.opened = true;
        Ok(())
    }
}

impl JsonSink<FileWriter> {
    pub fn open(handle: &FileHandle, layout: JsonLayout) -> Result<Self> {
        Ok(Self::new(handle.open_write()?, layout))
    }
}

impl<W: Write + Send + 'static> RecordSink for JsonSink<W> {
    fn init_stream(&mut self) -> Result<()> {
        self.open_array()
    }

    fn write(&mut self, task: &TaskDefinition) -> Result<()> {
        self.open_array()?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::Sink("JSON sink written after close".to_string()))?;

        match self.layout {
            JsonLayout::Array => {
                if self.written > 0 {
                    writer.write_all(b",")?;
                }
                serde_json::to_writer(&mut *writer, &task.data)?;
            }
            JsonLayout::Lines => {
                serde_json::to_writer(&mut *writer, &task.data)?;
                writer.write_all(b"\n")?;
            }
        }
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.open_array()?;
        if let Some(mut writer) = self.writer.take() {
            if self.layout == JsonLayout::Array {
                writer.write_all(b"]")?;
            }
            writer.flush()?;
            debug!(written = self.written, "JSON sink closed");
        }
        Ok(())
    }
}

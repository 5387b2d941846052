//! Apache Parquet files through Arrow record batches.
//!
//! The source reads one batch at a time and hands its rows out in order, so
//! at most one batch is held in memory. Column types come from the file's
//! declared schema. The sink buffers rows until a batch is full, infers the
//! schema from the first record, and writes the footer on `close`.

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::PARQUET_BATCH_SIZE;
use crate::error::{PipelineError, Result};
use crate::models::{Record, TaskDefinition};
use crate::streams::file::{FileHandle, FileWriter};
use crate::streams::schema::{types_of_record, ColumnIndex, ColumnType, ColumnTypes};
use crate::streams::{RecordSink, RecordSource};

pub struct ParquetSource {
    file: Option<File>,
    batches: Option<ParquetRecordBatchReader>,
    pending: VecDeque<Record>,
    fields: Vec<(String, ColumnType)>,
    columns: ColumnIndex,
    types: ColumnTypes,
    batch_size: usize,
}

impl ParquetSource {
    pub fn from_file(file: File) -> Self {
        Self {
            file: Some(file),
            batches: None,
            pending: VecDeque::new(),
            fields: Vec::new(),
            columns: ColumnIndex::new(),
            types: ColumnTypes::new(),
            batch_size: PARQUET_BATCH_SIZE,
        }
    }

    pub fn open(handle: &FileHandle) -> Result<Self> {
        Ok(Self::from_file(handle.open_file()?))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl RecordSource for ParquetSource {
    fn init_stream(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?.with_batch_size(self.batch_size);
        self.fields = builder
            .schema()
            .fields()
            .iter()
            .map(|field| (field.name().clone(), column_type_of(field.data_type())))
            .collect();
        for (position, (name, column_type)) in self.fields.iter().enumerate() {
            debug!(column = %name, column_type = ?column_type, "Parquet column");
            self.columns.insert(name.clone(), position);
            self.types.insert(name.clone(), *column_type);
        }
        debug!(
            row_groups = builder.metadata().num_row_groups(),
            "Opened parquet file"
        );

        self.batches = Some(builder.build()?);
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            let batches = self.batches.as_mut().ok_or_else(|| {
                PipelineError::Source("parquet source read before init_stream".to_string())
            })?;
            match batches.next() {
                None => return Ok(None),
                Some(batch) => {
                    let batch = batch?;
                    self.pending.extend(batch_records(&batch, &self.fields)?);
                }
            }
        }
    }

    fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    fn types(&self) -> &ColumnTypes {
        &self.types
    }
}

fn column_type_of(data_type: &DataType) -> ColumnType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnType::Int64,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => ColumnType::Float64,
        DataType::Boolean => ColumnType::Bool,
        _ => ColumnType::String,
    }
}

fn batch_records(batch: &RecordBatch, fields: &[(String, ColumnType)]) -> Result<Vec<Record>> {
    let mut records = vec![Record::new(); batch.num_rows()];
    for (position, (name, column_type)) in fields.iter().enumerate() {
        let values = column_values(batch.column(position), *column_type)?;
        for (record, value) in records.iter_mut().zip(values) {
            record.insert(name.clone(), value);
        }
    }
    Ok(records)
}

fn column_values(array: &ArrayRef, column_type: ColumnType) -> Result<Vec<Value>> {
    let rows = 0..array.len();
    let values = match column_type {
        ColumnType::Int64 => {
            let widened = cast(array.as_ref(), &DataType::Int64)?;
            let ints = widened.as_primitive::<Int64Type>();
            rows.map(|row| {
                if ints.is_null(row) {
                    Value::Null
                } else {
                    Value::from(ints.value(row))
                }
            })
            .collect()
        }
        ColumnType::Float64 => {
            let widened = cast(array.as_ref(), &DataType::Float64)?;
            let floats = widened.as_primitive::<Float64Type>();
            rows.map(|row| {
                if floats.is_null(row) {
                    Value::Null
                } else {
                    serde_json::Number::from_f64(floats.value(row))
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            })
            .collect()
        }
        ColumnType::Bool => {
            let bools = array.as_boolean();
            rows.map(|row| {
                if bools.is_null(row) {
                    Value::Null
                } else {
                    Value::Bool(bools.value(row))
                }
            })
            .collect()
        }
        ColumnType::String | ColumnType::Json => rows
            .map(|row| {
                if array.is_null(row) {
                    Ok(Value::Null)
                } else {
                    Ok(Value::String(array_value_to_string(array.as_ref(), row)?))
                }
            })
            .collect::<Result<Vec<_>>>()?,
    };
    Ok(values)
}

/// Buffers rows into record batches and writes them to a parquet file.
///
/// The schema is fixed by the first record written: integers, floats and
/// bools map to their Arrow types, everything else to UTF-8 (nested values
/// as JSON text). Every column is nullable; a field that is missing or does
/// not fit its column is written as null.
pub struct ParquetSink<W: Write + Send> {
    target: Option<W>,
    writer: Option<ArrowWriter<W>>,
    schema: Option<SchemaRef>,
    fields: Vec<(String, ColumnType)>,
    buffered: Vec<Record>,
    batch_size: usize,
    written: usize,
    closed: bool,
}

impl<W: Write + Send> ParquetSink<W> {
    pub fn new(target: W) -> Self {
        Self {
            target: Some(target),
            writer: None,
            schema: None,
            fields: Vec::new(),
            buffered: Vec::new(),
            batch_size: PARQUET_BATCH_SIZE,
            written: 0,
            closed: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn declare(&mut self, record: &Record) {
        let types = types_of_record(record);
        self.fields = record
            .keys()
            .map(|name| {
                let column_type = types.get(name).copied().unwrap_or(ColumnType::String);
                (name.clone(), column_type)
            })
            .collect();
        let fields: Vec<Field> = self
            .fields
            .iter()
            .map(|(name, column_type)| Field::new(name, arrow_type(*column_type), true))
            .collect();
        self.schema = Some(Arc::new(Schema::new(fields)));
    }

    fn ensure_writer(&mut self, schema: SchemaRef) -> Result<()> {
        if self.writer.is_none() {
            let target = self
                .target
                .take()
                .ok_or_else(|| PipelineError::Sink("parquet target already released".to_string()))?;
            let properties = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            self.writer = Some(ArrowWriter::try_new(target, schema, Some(properties))?);
        }
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| PipelineError::Sink("parquet schema not declared".to_string()))?;

        let columns: Vec<ArrayRef> = self
            .fields
            .iter()
            .map(|(name, column_type)| build_column(&self.buffered, name, *column_type))
            .collect();
        let batch = RecordBatch::try_new(schema.clone(), columns)?;

        self.ensure_writer(schema)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&batch)?;
        }
        self.written += batch.num_rows();
        debug!(rows = batch.num_rows(), written = self.written, "Wrote parquet batch");
        self.buffered.clear();
        Ok(())
    }
}

impl ParquetSink<FileWriter> {
    pub fn open(handle: &FileHandle) -> Result<Self> {
        Ok(Self::new(handle.open_write()?))
    }
}

impl<W: Write + Send + 'static> RecordSink for ParquetSink<W> {
    fn init_stream(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, task: &TaskDefinition) -> Result<()> {
        if self.closed {
            return Err(PipelineError::Sink("parquet sink written after close".to_string()));
        }
        if self.schema.is_none() {
            self.declare(&task.data);
        }
        self.buffered.push(task.data.clone());
        if self.buffered.len() >= self.batch_size {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.flush_batch()?;
        let schema = match &self.schema {
            Some(schema) => schema.clone(),
            None => {
                warn!("Parquet sink closed without records; writing an empty schema");
                Arc::new(Schema::empty())
            }
        };
        self.ensure_writer(schema)?;
        if let Some(writer) = self.writer.take() {
            let mut target = writer.into_inner()?;
            target.flush()?;
        }
        debug!(written = self.written, "Parquet sink closed");
        Ok(())
    }
}

fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Int64 => DataType::Int64,
        ColumnType::Float64 => DataType::Float64,
        ColumnType::Bool => DataType::Boolean,
        ColumnType::String | ColumnType::Json => DataType::Utf8,
    }
}

fn build_column(records: &[Record], name: &str, column_type: ColumnType) -> ArrayRef {
    let values = records
        .iter()
        .map(|record| record.get(name).filter(|value| !value.is_null()));
    let array: ArrayRef = match column_type {
        ColumnType::Int64 => Arc::new(Int64Array::from(
            values.map(|value| value.and_then(Value::as_i64)).collect::<Vec<_>>(),
        )),
        ColumnType::Float64 => Arc::new(Float64Array::from(
            values.map(|value| value.and_then(Value::as_f64)).collect::<Vec<_>>(),
        )),
        ColumnType::Bool => Arc::new(BooleanArray::from(
            values.map(|value| value.and_then(Value::as_bool)).collect::<Vec<_>>(),
        )),
        ColumnType::String | ColumnType::Json => Arc::new(StringArray::from(
            values
                .map(|value| value.map(render_text))
                .collect::<Vec<Option<String>>>(),
        )),
    };
    array
}

fn render_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

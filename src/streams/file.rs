//! Storage backend selection and byte-level file access for sources and sinks.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::REMOTE_OBJECT_PREFIX;
use crate::error::{PipelineError, Result};

/// Where a path lives, chosen by its URI scheme prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    Remote,
}

impl StorageBackend {
    pub fn for_path(path: &str) -> Self {
        if path.starts_with(REMOTE_OBJECT_PREFIX) {
            Self::Remote
        } else {
            Self::Local
        }
    }
}

/// A path plus its backend and open-time options.
///
/// Output files are created exclusively unless `force` is set, in which case
/// an existing file is truncated. Writers are buffered; [`FileWriter::close`]
/// flushes and may be called any number of times.
#[derive(Debug, Clone)]
pub struct FileHandle {
    path: String,
    backend: StorageBackend,
    force: bool,
}

impl FileHandle {
    pub fn new(path: impl Into<String>, force: bool) -> Self {
        let path = path.into();
        let backend = StorageBackend::for_path(&path);
        Self {
            path,
            backend,
            force,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn backend(&self) -> StorageBackend {
        self.backend
    }

    pub fn force(&self) -> bool {
        self.force
    }

    /// Resolve a relative local path against `dir`.
    pub fn relative_to(mut self, dir: &Path) -> Self {
        if self.backend == StorageBackend::Local && Path::new(&self.path).is_relative() {
            self.path = dir.join(&self.path).to_string_lossy().into_owned();
        }
        self
    }

    pub fn open_read(&self) -> Result<BufReader<File>> {
        let path = self.local_path()?;
        info!(path = %path.display(), "📖 Reading file");
        Ok(BufReader::new(File::open(path)?))
    }

    /// Unbuffered handle for formats that seek, such as parquet.
    pub fn open_file(&self) -> Result<File> {
        let path = self.local_path()?;
        info!(path = %path.display(), "📖 Opening file");
        Ok(File::open(path)?)
    }

    pub fn open_write(&self) -> Result<FileWriter> {
        let path = self.local_path()?;
        if self.force {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed existing output file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => PipelineError::Sink(format!(
                    "{} already exists; pass force to overwrite it",
                    path.display()
                )),
                _ => PipelineError::Io(e),
            })?;
        info!(path = %path.display(), "📝 Writing file");

        Ok(FileWriter {
            path,
            inner: Some(BufWriter::new(file)),
        })
    }

    fn local_path(&self) -> Result<PathBuf> {
        match self.backend {
            StorageBackend::Local => Ok(PathBuf::from(&self.path)),
            StorageBackend::Remote => Err(PipelineError::UnsupportedBackend {
                path: self.path.clone(),
                reason: "remote object storage is not available in this build".to_string(),
            }),
        }
    }
}

/// Buffered output file that is released exactly once
#[derive(Debug)]
pub struct FileWriter {
    path: PathBuf,
    inner: Option<BufWriter<File>>,
}

impl FileWriter {
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.inner.take() {
            writer.flush()?;
            debug!(path = %self.path.display(), "Closed output file");
        }
        Ok(())
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.inner.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "write after close",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.inner.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

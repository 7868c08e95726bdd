//! Append-log implementations for recorded heart-rate samples.

use crate::domain::error::PersistenceError;
use crate::domain::recording::SampleLog;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Appends one line per sample to a text file, flushing after every line so
/// the recording survives an abrupt exit.
pub struct FileSampleLog {
    path: PathBuf,
    file: Option<File>,
}

impl FileSampleLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SampleLog for FileSampleLog {
    fn begin(&mut self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        info!("Appending heart rate data to {}", self.path.display());
        self.file = Some(file);
        Ok(())
    }

    fn append_line(&mut self, line: &str) -> Result<(), PersistenceError> {
        let Some(file) = self.file.as_mut() else {
            return Err(PersistenceError::NotOpen);
        };
        let result = writeln!(file, "{}", line).and_then(|_| file.flush());
        result.map_err(|e| self.io_error(e))?;
        debug!("Recorded: {}", line);
        Ok(())
    }

    fn end(&mut self) -> Result<(), PersistenceError> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush().map_err(|e| self.io_error(e))?;
        info!("Stopped appending to {}", self.path.display());
        Ok(())
    }
}

/// In-memory log whose lines can be inspected through a cloned handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySampleLog {
    lines: Arc<Mutex<Vec<String>>>,
    open: bool,
}

impl MemorySampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl SampleLog for MemorySampleLog {
    fn begin(&mut self) -> Result<(), PersistenceError> {
        self.open = true;
        Ok(())
    }

    fn append_line(&mut self, line: &str) -> Result<(), PersistenceError> {
        if !self.open {
            return Err(PersistenceError::NotOpen);
        }
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), PersistenceError> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_log_appends_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("HeartRateData.txt");
        let mut log = FileSampleLog::new(&path);

        log.begin().unwrap();
        log.append_line("first").unwrap();
        log.end().unwrap();

        log.begin().unwrap();
        log.append_line("second").unwrap();
        log.end().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_file_log_requires_begin() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileSampleLog::new(dir.path().join("HeartRateData.txt"));
        assert!(matches!(
            log.append_line("x"),
            Err(PersistenceError::NotOpen)
        ));
        // Ending an unopened log is harmless.
        log.end().unwrap();
    }

    #[test]
    fn test_file_log_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let mut log = FileSampleLog::new(dir.path());
        assert!(matches!(log.begin(), Err(PersistenceError::Io { .. })));
    }

    #[test]
    fn test_memory_log_shares_lines() {
        let log = MemorySampleLog::new();
        let mut writer = log.clone();
        writer.begin().unwrap();
        writer.append_line("72").unwrap();
        writer.end().unwrap();
        assert!(writer.append_line("73").is_err());
        assert_eq!(log.lines(), vec!["72"]);
    }
}

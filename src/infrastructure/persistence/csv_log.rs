//! Append-only buffered CSV writers for the five logs named in spec §6:
//! `equity_curve.csv`, `trades_log.csv`, `decisions_log.csv`,
//! `errors_log.csv`, `learning_log.csv`. Grounded in the teacher's
//! buffered-repository style (`infrastructure/persistence/repositories.rs`,
//! `application/ml/data_collector.rs::write_to_csv`) but simplified to flat
//! files since the control plane's own bookkeeping needs no relational
//! queries (see DESIGN.md dependency-drop note on `sqlx`).

use serde::Serialize;
use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::PathBuf;
use tracing::{error, info};

pub struct CsvLog<T: Serialize> {
    path: PathBuf,
    buffer: Vec<T>,
    _marker: PhantomData<T>,
}

impl<T: Serialize> CsvLog<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn append(&mut self, record: T) {
        self.buffer.push(record);
    }

    pub fn pending_count(&self) -> usize {
        self.buffer.len()
    }

    /// Flushes buffered records, writing a header row only if the file did
    /// not already exist. Flushed every 7 cycles and on shutdown (spec §6).
    pub fn flush(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_existed = self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new().has_headers(!file_existed).from_writer(file);
        for record in self.buffer.drain(..) {
            if let Err(e) = wtr.serialize(&record) {
                error!(path = %self.path.display(), "failed to serialize CSV record: {e}");
            }
        }
        wtr.flush()?;
        info!(path = %self.path.display(), "flushed CSV log");
        Ok(())
    }
}

impl<T: Serialize> Drop for CsvLog<T> {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            let _ = self.flush();
        }
    }
}

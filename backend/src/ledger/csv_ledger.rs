use serde::Serialize;
use shared::PredictionOutcome;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;

use crate::pipeline::batch::ResultBatch;

pub const CSV_HEADER: [&str; 3] = ["Filename", "Prediction", "Confidence"];
const FAILED_PREDICTION: &str = "Error";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("No results have been recorded yet")]
    NotFound,
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Serialize)]
struct LedgerRow<'a> {
    #[serde(rename = "Filename")]
    filename: &'a str,
    #[serde(rename = "Prediction")]
    prediction: &'a str,
    #[serde(rename = "Confidence")]
    confidence: String,
}

impl<'a> From<&'a PredictionOutcome> for LedgerRow<'a> {
    fn from(outcome: &'a PredictionOutcome) -> Self {
        match outcome {
            PredictionOutcome::Classified(result) => LedgerRow {
                filename: &result.filename,
                prediction: result.label.as_ref(),
                confidence: result.confidence.to_string(),
            },
            PredictionOutcome::Failed(failed) => LedgerRow {
                filename: &failed.filename,
                prediction: FAILED_PREDICTION,
                confidence: String::new(),
            },
        }
    }
}

/// CSV table holding the results of the most recent batch.
///
/// Every write replaces the whole file atomically; there is no append.
pub struct ResultLedger {
    path: PathBuf,
    written: AtomicBool,
    write_lock: Mutex<()>,
}

impl ResultLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(batch: &ResultBatch) -> Result<Vec<u8>, LedgerError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if batch.is_empty() {
            // serde only emits headers alongside the first record
            writer.write_record(CSV_HEADER)?;
        }
        for outcome in &batch.outcomes {
            writer.serialize(LedgerRow::from(outcome))?;
        }
        writer
            .into_inner()
            .map_err(|e| LedgerError::Io(e.into_error()))
    }

    pub fn write(&self, batch: &ResultBatch) -> Result<(), LedgerError> {
        let table = Self::render(batch)?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&table)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| LedgerError::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;

        self.written.store(true, Ordering::SeqCst);
        log::info!(
            "Batch {}: wrote {} row(s) to {}",
            batch.id,
            batch.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Current table bytes, or [`LedgerError::NotFound`] if nothing has been
    /// written by this process or the file was removed since.
    pub fn read(&self) -> Result<Vec<u8>, LedgerError> {
        if !self.written.load(Ordering::SeqCst) {
            return Err(LedgerError::NotFound);
        }
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LedgerError::NotFound),
            Err(e) => Err(LedgerError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ClassLabel, ClassificationResult, Confidence, FailedPrediction};
    use uuid::Uuid;

    fn batch(outcomes: Vec<PredictionOutcome>) -> ResultBatch {
        ResultBatch {
            id: Uuid::new_v4(),
            outcomes,
        }
    }

    fn classified(filename: &str, label: ClassLabel, probability: f64) -> PredictionOutcome {
        PredictionOutcome::Classified(ClassificationResult {
            filename: filename.to_string(),
            label,
            confidence: Confidence::from_probability(probability),
        })
    }

    fn rows(bytes: &[u8]) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(bytes);
        reader
            .records()
            .map(|record| record.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn read_before_any_write_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ResultLedger::new(dir.path().join("results.csv"));
        assert!(matches!(ledger.read(), Err(LedgerError::NotFound)));
    }

    #[test]
    fn stale_file_from_an_earlier_process_is_not_served() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, "Filename,Prediction,Confidence\nold.png,Uninfected,99.00\n").unwrap();

        let ledger = ResultLedger::new(&path);

        assert!(matches!(ledger.read(), Err(LedgerError::NotFound)));
    }

    #[test]
    fn round_trips_rows_in_batch_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ResultLedger::new(dir.path().join("results.csv"));

        ledger
            .write(&batch(vec![
                classified("a1.png", ClassLabel::Uninfected, 0.9),
                classified("b2.jpg", ClassLabel::Parasitized, 0.8),
            ]))
            .unwrap();

        assert_eq!(
            rows(&ledger.read().unwrap()),
            vec![
                vec!["Filename", "Prediction", "Confidence"],
                vec!["a1.png", "Uninfected", "90.00"],
                vec!["b2.jpg", "Parasitized", "80.00"],
            ]
        );
    }

    #[test]
    fn empty_batch_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ResultLedger::new(dir.path().join("results.csv"));

        ledger.write(&batch(Vec::new())).unwrap();

        assert_eq!(ledger.read().unwrap(), b"Filename,Prediction,Confidence\n");
    }

    #[test]
    fn later_batch_replaces_earlier_one() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ResultLedger::new(dir.path().join("results.csv"));

        ledger
            .write(&batch(vec![
                classified("a.png", ClassLabel::Uninfected, 0.7),
                classified("b.png", ClassLabel::Uninfected, 0.6),
            ]))
            .unwrap();
        ledger
            .write(&batch(vec![classified("c.png", ClassLabel::Parasitized, 0.55)]))
            .unwrap();

        let table = rows(&ledger.read().unwrap());
        assert_eq!(table.len(), 2);
        assert_eq!(table[1], vec!["c.png", "Parasitized", "55.00"]);
    }

    #[test]
    fn repeated_reads_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ResultLedger::new(dir.path().join("results.csv"));
        ledger
            .write(&batch(vec![classified("a.png", ClassLabel::Uninfected, 0.9)]))
            .unwrap();

        assert_eq!(ledger.read().unwrap(), ledger.read().unwrap());
    }

    #[test]
    fn externally_removed_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ResultLedger::new(dir.path().join("results.csv"));
        ledger.write(&batch(Vec::new())).unwrap();

        fs::remove_file(ledger.path()).unwrap();

        assert!(matches!(ledger.read(), Err(LedgerError::NotFound)));
    }

    #[test]
    fn failed_items_are_marked_without_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ResultLedger::new(dir.path().join("results.csv"));

        ledger
            .write(&batch(vec![
                classified("a.png", ClassLabel::Uninfected, 0.9),
                PredictionOutcome::Failed(FailedPrediction {
                    filename: "b.png".to_string(),
                    error: "Unsupported or corrupt image".to_string(),
                }),
            ]))
            .unwrap();

        let table = rows(&ledger.read().unwrap());
        assert_eq!(table[2], vec!["b.png", "Error", ""]);
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ResultLedger::new(dir.path().join("reports").join("results.csv"));

        ledger.write(&batch(Vec::new())).unwrap();

        assert!(ledger.path().exists());
    }
}

// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records evaluation metrics to a CSV file, one row per
// validation pass. The same rows are appended to the owning
// job's metrics history, so the CSV is the human-readable view
// and the job record is the durable one.
//
// Output file: <job work dir>/metrics.csv
//
//   epoch,step,train_loss,val_loss
//   1,38,5.821100,5.790300
//   2,76,5.310800,5.400100
//   ...

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

/// One evaluation's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// The epoch that just finished (starts at 1)
    pub epoch: usize,

    /// Global optimizer step at evaluation time
    pub step: usize,

    /// Average next-token loss over the epoch's training batches
    pub train_loss: f64,

    /// Average next-token loss on the validation set.
    /// Divergence from train_loss indicates overfitting.
    pub val_loss: f64,
}

impl EvalMetrics {
    pub fn new(epoch: usize, step: usize, train_loss: f64, val_loss: f64) -> Self {
        Self { epoch, step, train_loss, val_loss }
    }

    /// True if this evaluation improved on the best seen val_loss.
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

/// Appends evaluation rows to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the logger, writing the CSV header if the file is new.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,step,train_loss,val_loss")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one evaluation as a new row.
    pub fn log(&self, m: &EvalMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{},{:.6},{:.6}",
            m.epoch, m.step, m.train_loss, m.val_loss,
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

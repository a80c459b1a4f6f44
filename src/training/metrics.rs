use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Summary of one finished epoch, for logging
#[derive(Debug, Clone, Default)]
pub struct EpochSummary {
    pub epoch: usize,
    pub n_epochs: usize,
    pub train_loss: f64,
    pub error_rate: f64,
    pub eer: f64,
    pub best_error_rate: (usize, f64),
    pub best_eer: (usize, f64),
    pub learning_rate: f64,
    pub duration_secs: f64,
}

impl EpochSummary {
    pub fn log(&self) {
        info!(
            "Epoch {:>3}/{} | Train Loss: {:.4} | Error Rate: {:.4} (best {:.4} @ {}) | EER: {:.4} (best {:.4} @ {}) | LR: {:.2e} | Time: {:.1}s",
            self.epoch,
            self.n_epochs,
            self.train_loss,
            self.error_rate,
            self.best_error_rate.1,
            self.best_error_rate.0,
            self.eer,
            self.best_eer.1,
            self.best_eer.0,
            self.learning_rate,
            self.duration_secs,
        );
    }
}

/// Running totals over the batches of one pass
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    total_loss: f64,
    correct: usize,
    total: usize,
    num_batches: usize,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_loss(&mut self, loss: f64) {
        self.total_loss += loss;
        self.num_batches += 1;
    }

    pub fn update_accuracy(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
        self.num_batches += 1;
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn avg_loss(&self) -> f64 {
        if self.num_batches == 0 {
            return 0.0;
        }
        self.total_loss / self.num_batches as f64
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }

    pub fn error_rate(&self) -> f64 {
        1.0 - self.accuracy()
    }
}

/// Per-epoch record of a run. All epoch series have one entry per
/// completed epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    pub train_loss: Vec<f64>,
    pub train_loss_batch: Vec<f64>,
    pub error_rate: Vec<f64>,
    pub eer: Vec<f64>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&mut self, loss: f64) {
        self.train_loss_batch.push(loss);
    }

    pub fn push_epoch(&mut self, train_loss: f64, error_rate: f64, eer: f64) {
        self.train_loss.push(train_loss);
        self.error_rate.push(error_rate);
        self.eer.push(eer);
    }

    pub fn completed_epochs(&self) -> usize {
        self.error_rate.len()
    }

    /// Whether every epoch series holds exactly `epochs` entries
    pub fn is_consistent(&self, epochs: usize) -> bool {
        self.train_loss.len() == epochs && self.error_rate.len() == epochs && self.eer.len() == epochs
    }

    /// Lowest error rate and its 1-based epoch
    pub fn best_error_rate(&self) -> Option<(usize, f64)> {
        best_of(&self.error_rate)
    }

    /// Lowest EER and its 1-based epoch
    pub fn best_eer(&self) -> Option<(usize, f64)> {
        best_of(&self.eer)
    }

    /// True when the latest error rate is strictly below every earlier one.
    /// The first epoch always qualifies.
    pub fn error_rate_improved(&self) -> bool {
        latest_is_strict_best(&self.error_rate)
    }

    /// True when the latest EER is strictly below every earlier one
    pub fn eer_improved(&self) -> bool {
        latest_is_strict_best(&self.eer)
    }

    pub fn save_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "epoch,train_loss,error_rate,eer")?;
        for (idx, ((loss, error_rate), eer)) in self
            .train_loss
            .iter()
            .zip(&self.error_rate)
            .zip(&self.eer)
            .enumerate()
        {
            writeln!(file, "{},{:.6},{:.6},{:.6}", idx + 1, loss, error_rate, eer)?;
        }
        info!(path = %path.display(), "Training history saved");
        Ok(())
    }
}

fn best_of(series: &[f64]) -> Option<(usize, f64)> {
    series
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, &value)| match best {
            Some((_, current)) if current <= value => best,
            _ => Some((idx + 1, value)),
        })
}

fn latest_is_strict_best(series: &[f64]) -> bool {
    match series.split_last() {
        Some((latest, earlier)) => {
            let prior_best = earlier.iter().copied().fold(f64::INFINITY, f64::min);
            *latest < prior_best
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_averages_loss_and_counts_accuracy() {
        let mut train = MetricsAccumulator::new();
        train.update_loss(1.0);
        train.update_loss(3.0);
        assert_eq!(train.avg_loss(), 2.0);
        assert_eq!(train.num_batches(), 2);

        let mut valid = MetricsAccumulator::new();
        valid.update_accuracy(3, 4);
        valid.update_accuracy(1, 4);
        assert_eq!(valid.accuracy(), 0.5);
        assert_eq!(valid.error_rate(), 0.5);
        assert_eq!(valid.total(), 8);
    }

    #[test]
    fn best_values_report_first_minimum_one_based() {
        let mut history = RunHistory::new();
        history.push_epoch(1.0, 0.5, 0.3);
        history.push_epoch(0.9, 0.4, 0.3);
        history.push_epoch(0.8, 0.4, 0.2);

        assert_eq!(history.best_error_rate(), Some((2, 0.4)));
        assert_eq!(history.best_eer(), Some((3, 0.2)));
        assert!(history.is_consistent(3));
        assert!(!history.is_consistent(2));
    }

    #[test]
    fn improvement_is_strict_and_first_epoch_qualifies() {
        let mut history = RunHistory::new();
        assert!(!history.error_rate_improved());

        history.push_epoch(1.0, 0.5, 0.3);
        assert!(history.error_rate_improved());
        assert!(history.eer_improved());

        history.push_epoch(1.0, 0.5, 0.25);
        assert!(!history.error_rate_improved());
        assert!(history.eer_improved());

        history.push_epoch(1.0, 0.45, 0.26);
        assert!(history.error_rate_improved());
        assert!(!history.eer_improved());
    }

    #[test]
    fn writes_one_csv_row_per_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history.csv");
        let mut history = RunHistory::new();
        history.push_epoch(1.5, 0.25, 0.125);
        history.push_epoch(1.0, 0.2, 0.1);
        history.save_csv(&path).unwrap();

        let csv = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "epoch,train_loss,error_rate,eer");
        assert_eq!(lines[1], "1,1.500000,0.250000,0.125000");
        assert_eq!(lines.len(), 3);
    }
}

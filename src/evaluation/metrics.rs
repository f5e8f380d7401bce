//! Classification metrics over a confusion matrix.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
/// Confusion matrix for a `K`-class classifier.
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&v| u64::from(v)).sum()
    }
}

/// Precision/recall statistics for a single class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f64,
    /// `TP / (TP + FN)`.
    pub recall: f64,
    pub f1: f64,
    /// Total number of true examples for the class.
    pub support: u32,
}

/// Compute per-class precision, recall and F1 from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = f64::from(cm.get(class_idx, class_idx));
        let mut fp = 0f64;
        let mut fn_ = 0f64;
        let mut support = 0u32;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += f64::from(v);
                fp += f64::from(cm.get(j, class_idx));
            }
        }
        let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
        let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        stats.push(PerClassStats {
            precision,
            recall,
            f1,
            support,
        });
    }
    stats
}

/// Compute overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    let total = cm.total();
    if total == 0 {
        return 0.0;
    }
    let correct: u64 = (0..cm.n_classes).map(|i| u64::from(cm.get(i, i))).sum();
    correct as f64 / total as f64
}

/// Mean recall over classes that occur in the ground truth.
pub fn balanced_accuracy(stats: &[PerClassStats]) -> f64 {
    mean(stats.iter().filter(|s| s.support > 0).map(|s| s.recall))
}

/// Unweighted mean F1 over every class seen in truth or predictions.
pub fn macro_f1(stats: &[PerClassStats]) -> f64 {
    mean(stats.iter().map(|s| s.f1))
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> ConfusionMatrix {
        // truth 0: 3 right, 1 as class 1; truth 1: 1 right, 1 as class 0.
        let mut cm = ConfusionMatrix::new(2);
        for _ in 0..3 {
            cm.add(0, 0);
        }
        cm.add(0, 1);
        cm.add(1, 1);
        cm.add(1, 0);
        cm
    }

    #[test]
    fn accuracy_counts_the_diagonal() {
        assert!((accuracy(&sample_matrix()) - 4.0 / 6.0).abs() < 1e-12);
        assert_eq!(accuracy(&ConfusionMatrix::new(3)), 0.0);
    }

    #[test]
    fn per_class_stats_match_hand_computation() {
        let stats = precision_recall_by_class(&sample_matrix());
        assert!((stats[0].precision - 0.75).abs() < 1e-12);
        assert!((stats[0].recall - 0.75).abs() < 1e-12);
        assert!((stats[1].precision - 0.5).abs() < 1e-12);
        assert!((stats[1].recall - 0.5).abs() < 1e-12);
        assert_eq!(stats[0].support, 4);
        assert!((balanced_accuracy(&stats) - 0.625).abs() < 1e-12);
        assert!((macro_f1(&stats) - 0.625).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_indices_are_ignored() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(5, 0);
        assert_eq!(cm.total(), 0);
    }

    #[test]
    fn balanced_accuracy_skips_classes_absent_from_truth() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        cm.add(0, 1);
        let stats = precision_recall_by_class(&cm);
        assert!((balanced_accuracy(&stats) - 0.5).abs() < 1e-12);
    }
}

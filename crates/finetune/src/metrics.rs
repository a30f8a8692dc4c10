use std::collections::BTreeMap;
use std::time::Instant;

/// Classification scores keyed by name, in a stable order.
pub type MetricMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, Default)]
struct ClassCounts {
    true_positive: usize,
    false_positive: usize,
    false_negative: usize,
}

/// Accuracy and micro/macro precision, recall and F1 over `num_labels`
/// classes, plus the sample count. Classes absent from both predictions
/// and labels are left out of the macro averages.
pub fn classification_metrics(predictions: &[u32], labels: &[u32], num_labels: usize) -> MetricMap {
    let mut counts = vec![ClassCounts::default(); num_labels];
    let mut correct = 0usize;
    for (&pred, &label) in predictions.iter().zip(labels) {
        if pred == label {
            correct += 1;
            if let Some(class) = counts.get_mut(label as usize) {
                class.true_positive += 1;
            }
        } else {
            if let Some(class) = counts.get_mut(pred as usize) {
                class.false_positive += 1;
            }
            if let Some(class) = counts.get_mut(label as usize) {
                class.false_negative += 1;
            }
        }
    }

    let total = predictions.len().min(labels.len());
    let accuracy = ratio(correct, total);

    let (tp, fp, fn_) = counts.iter().fold((0, 0, 0), |acc, class| {
        (
            acc.0 + class.true_positive,
            acc.1 + class.false_positive,
            acc.2 + class.false_negative,
        )
    });
    let precision_micro = ratio(tp, tp + fp);
    let recall_micro = ratio(tp, tp + fn_);
    let f1_micro = f1(precision_micro, recall_micro);

    let present: Vec<&ClassCounts> = counts
        .iter()
        .filter(|class| class.true_positive + class.false_positive + class.false_negative > 0)
        .collect();
    let (mut precision_macro, mut recall_macro, mut f1_macro) = (0.0, 0.0, 0.0);
    for class in &present {
        let precision = ratio(class.true_positive, class.true_positive + class.false_positive);
        let recall = ratio(class.true_positive, class.true_positive + class.false_negative);
        precision_macro += precision;
        recall_macro += recall;
        f1_macro += f1(precision, recall);
    }
    if !present.is_empty() {
        let n = present.len() as f64;
        precision_macro /= n;
        recall_macro /= n;
        f1_macro /= n;
    }

    MetricMap::from([
        ("accuracy".to_string(), accuracy),
        ("f1_micro".to_string(), f1_micro),
        ("precision_micro".to_string(), precision_micro),
        ("recall_micro".to_string(), recall_micro),
        ("f1_macro".to_string(), f1_macro),
        ("precision_macro".to_string(), precision_macro),
        ("recall_macro".to_string(), recall_macro),
        ("nb_samples".to_string(), total as f64),
    ])
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Index of the largest logit per row.
pub fn argmax_rows(logits: &[Vec<f32>]) -> Vec<u32> {
    logits
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (index, &value)| {
                    if value > best.1 {
                        (index, value)
                    } else {
                        best
                    }
                })
                .0 as u32
        })
        .collect()
}

/// Running training loss between two log points.
#[derive(Debug)]
pub struct LossTracker {
    total: f64,
    steps: usize,
    started: Instant,
}

impl Default for LossTracker {
    fn default() -> Self {
        Self {
            total: 0.0,
            steps: 0,
            started: Instant::now(),
        }
    }
}

impl LossTracker {
    pub fn record(&mut self, loss: f64) {
        self.total += loss;
        self.steps += 1;
    }

    pub fn average(&self) -> Option<f64> {
        (self.steps > 0).then(|| self.total / self.steps as f64)
    }

    pub fn steps_per_sec(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.steps as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

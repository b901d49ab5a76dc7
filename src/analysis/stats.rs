//! Small descriptive statistics over a batch of values.

/// A batch of values for robust statistics.
///
/// Everything is computed over the whole batch; nothing is incremental.
pub struct Sample {
    values: Vec<f64>,
}

impl Sample {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Median, averaging the two middle values for an even-length batch.
    pub fn median(&self) -> Option<f64> {
        median_of(&self.values)
    }

    /// Median absolute deviation from `center`.
    pub fn mad(&self, center: f64) -> Option<f64> {
        let deviations: Vec<f64> = self.values.iter().map(|v| (v - center).abs()).collect();
        median_of(&deviations)
    }
}

fn median_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median of a sequence of day counts, used to infer a series cadence.
pub fn median_days(gaps: &[i64]) -> Option<i64> {
    if gaps.is_empty() {
        return None;
    }
    let mut sorted = gaps.to_vec();
    sorted.sort_unstable();
    Some(sorted[sorted.len() / 2])
}

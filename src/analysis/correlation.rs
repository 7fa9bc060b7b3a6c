use std::collections::HashMap;

use crate::errors::AnalysisError;

use super::presence::PresenceMatrix;

/// Symmetric Pearson correlation between installation columns.
///
/// Entries involving a zero-variance column are NaN, including the diagonal.
#[derive(Debug, Clone, Default)]
pub struct CorrelationMatrix {
    labels: Vec<String>,
    index: HashMap<String, usize>,
    values: Vec<f64>,
}

impl CorrelationMatrix {
    pub fn from_matrix(matrix: &PresenceMatrix) -> Self {
        let n = matrix.building_count();
        let size = matrix.label_count();
        let counts = (0..size)
            .map(|label| matrix.column_count(label))
            .collect::<Vec<_>>();

        let mut values = vec![f64::NAN; size * size];
        for left in 0..size {
            if !has_variance(counts[left], n) {
                continue;
            }
            values[left * size + left] = 1.0;
            for right in (left + 1)..size {
                if !has_variance(counts[right], n) {
                    continue;
                }
                let both = matrix.co_occurrence(left, right);
                let value = pearson_from_counts(n, counts[left], counts[right], both);
                values[left * size + right] = value;
                values[right * size + left] = value;
            }
        }

        Self::assemble(matrix.labels().to_vec(), values)
    }

    /// Rebuilds a matrix from stored row-major values.
    pub fn from_parts(labels: Vec<String>, values: Vec<f64>) -> Result<Self, AnalysisError> {
        let expected = labels.len() * labels.len();
        if values.len() != expected {
            return Err(AnalysisError::shape(
                "correlation matrix",
                format!("{expected} values"),
                format!("{} values", values.len()),
            ));
        }
        Ok(Self::assemble(labels, values))
    }

    fn assemble(labels: Vec<String>, values: Vec<f64>) -> Self {
        let index = labels
            .iter()
            .enumerate()
            .map(|(position, label)| (label.clone(), position))
            .collect();
        Self {
            labels,
            index,
            values,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Raw coefficient for a label pair, NaN included; `None` for unknown labels.
    #[cfg(test)]
    pub(crate) fn get(&self, left: &str, right: &str) -> Option<f64> {
        let row = *self.index.get(left)?;
        let column = *self.index.get(right)?;
        Some(self.values[row * self.labels.len() + column])
    }

    /// Non-NaN entries of the row for `label`, in column order.
    pub fn row_signals<'a>(&'a self, label: &str) -> Vec<(&'a str, f64)> {
        let Some(row) = self.index.get(label).copied() else {
            return Vec::new();
        };
        let size = self.labels.len();
        self.labels
            .iter()
            .enumerate()
            .map(|(column, other)| (other.as_str(), self.values[row * size + column]))
            .filter(|(_, value)| !value.is_nan())
            .collect()
    }

    /// Labels whose column has no variance across buildings.
    pub fn degenerate_labels(&self) -> Vec<&str> {
        let size = self.labels.len();
        self.labels
            .iter()
            .enumerate()
            .filter(|(position, _)| self.values[position * size + position].is_nan())
            .map(|(_, label)| label.as_str())
            .collect()
    }
}

fn has_variance(count: usize, buildings: usize) -> bool {
    count > 0 && count < buildings
}

/// Pearson coefficient of two 0/1 vectors of length `n` with `a` and `b`
/// ones and `both` shared ones. Integer arithmetic keeps it exact and
/// symmetric.
fn pearson_from_counts(n: usize, a: usize, b: usize, both: usize) -> f64 {
    let (n, a, b, both) = (n as f64, a as f64, b as f64, both as f64);
    let covariance = n * both - a * b;
    let spread = (a * (n - a) * b * (n - b)).sqrt();
    if spread == 0.0 {
        return f64::NAN;
    }
    (covariance / spread).clamp(-1.0, 1.0)
}

//! Minority-class oversampling (SMOTE)

use crate::error::BalanceError;
use crate::feature_extractor::FeatureMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// Synthesizes minority-class rows by interpolating between a minority row and
/// one of its nearest minority neighbors until both classes are equal in size.
#[derive(Debug, Clone)]
pub struct Smote {
    k_neighbors: usize,
    seed: u64,
}

impl Smote {
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self {
            k_neighbors: k_neighbors.max(1),
            seed,
        }
    }

    /// Returns the original rows followed by the synthetic minority rows.
    pub fn fit_resample(
        &self,
        x: &FeatureMatrix,
        y: &[u8],
    ) -> Result<(FeatureMatrix, Vec<u8>), BalanceError> {
        if x.is_empty() {
            return Err(BalanceError::Empty);
        }
        if x.len() != y.len() {
            return Err(BalanceError::LengthMismatch {
                rows: x.len(),
                labels: y.len(),
            });
        }
        let width = x[0].len();
        if x.iter().any(|row| row.len() != width) {
            return Err(BalanceError::RaggedMatrix);
        }

        let positives = y.iter().filter(|&&label| label == 1).count();
        let negatives = y.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(BalanceError::SingleClass);
        }

        let (minority_label, majority_count) = if positives < negatives {
            (1, negatives)
        } else {
            (0, positives)
        };
        let minority: Vec<&Vec<f64>> = x
            .iter()
            .zip(y)
            .filter(|(_, &label)| label == minority_label)
            .map(|(row, _)| row)
            .collect();

        let mut x_res = x.clone();
        let mut y_res = y.to_vec();
        let to_generate = majority_count - minority.len();
        if to_generate == 0 {
            return Ok((x_res, y_res));
        }
        if minority.len() <= self.k_neighbors {
            return Err(BalanceError::TooFewMinoritySamples {
                samples: minority.len(),
                k_neighbors: self.k_neighbors,
            });
        }

        let neighbors = nearest_neighbors(&minority, self.k_neighbors);
        let mut rng = StdRng::seed_from_u64(self.seed);
        x_res.reserve(to_generate);
        y_res.reserve(to_generate);

        for _ in 0..to_generate {
            let base = rng.gen_range(0..minority.len());
            let neighbor = neighbors[base][rng.gen_range(0..self.k_neighbors)];
            let gap: f64 = rng.gen();
            let synthetic = minority[base]
                .iter()
                .zip(minority[neighbor].iter())
                .map(|(a, b)| a + gap * (b - a))
                .collect();
            x_res.push(synthetic);
            y_res.push(minority_label);
        }

        info!(
            minority_label,
            minority = minority.len(),
            majority = majority_count,
            synthesized = to_generate,
            "Balanced training classes"
        );

        Ok((x_res, y_res))
    }
}

impl Default for Smote {
    fn default() -> Self {
        Self::new(5, 42)
    }
}

/// Indices of the `k` nearest other rows for each row (Euclidean distance).
fn nearest_neighbors(rows: &[&Vec<f64>], k: usize) -> Vec<Vec<usize>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let mut distances: Vec<(f64, usize)> = rows
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, other)| (squared_distance(row, other), j))
                .collect();
            distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            distances.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

//! Gradient-boosted decision trees for binary fraud classification.
//!
//! Logistic loss, second-order leaf weights with L2 regularization and
//! histogram split finding over quantile bins. `scale_pos_weight` multiplies
//! the gradient and hessian contribution of positive rows.

use crate::feature_extractor::FeatureMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// L2 regularization on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum required in each child
    pub min_child_weight: f64,
    /// Maximum histogram bins per feature
    pub max_bins: usize,
    /// Initial prediction before any tree is added
    pub base_score: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.3,
            lambda: 1.0,
            min_child_weight: 1.0,
            max_bins: 256,
            base_score: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        weight: f64,
    },
    /// Rows with `x[feature] < threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { weight } => return *weight,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or_default();
                    index = if value < *threshold { *left } else { *right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Per-feature quantile cut points and the binned training matrix
struct BinnedMatrix {
    cuts: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

impl BinnedMatrix {
    fn new(x: &FeatureMatrix, n_features: usize, max_bins: usize) -> Self {
        let cuts: Vec<Vec<f64>> = (0..n_features)
            .map(|feature| {
                let mut values: Vec<f64> = x.iter().map(|row| row[feature]).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                values.dedup();
                cut_points(&values, max_bins)
            })
            .collect();

        let bins = x
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&cuts)
                    .map(|(value, feature_cuts)| {
                        feature_cuts.partition_point(|cut| cut <= value) as u16
                    })
                    .collect()
            })
            .collect();

        Self { cuts, bins }
    }

    fn bin_count(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }
}

fn cut_points(distinct: &[f64], max_bins: usize) -> Vec<f64> {
    let max_bins = max_bins.clamp(2, u16::MAX as usize);
    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|j| distinct[j * distinct.len() / max_bins])
        .collect();
    cuts.dedup();
    cuts
}

struct SplitCandidate {
    gain: f64,
    feature: usize,
    bin: usize,
}

struct TreeBuilder<'a> {
    params: &'a BoostingParams,
    binned: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn build(mut self, rows: Vec<usize>) -> RegressionTree {
        self.grow(rows, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let index = self.nodes.len();
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        let weight = -g / (h + self.params.lambda) * self.params.learning_rate;
        self.nodes.push(Node::Leaf { weight });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return index;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.binned.bins[i][split.feature] as usize <= split.bin);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: self.binned.cuts[split.feature][split.bin],
            left,
            right,
        };
        index
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let lambda = self.params.lambda;
        let parent_score = g * g / (h + lambda);
        let mut best: Option<SplitCandidate> = None;

        for feature in 0..self.binned.cuts.len() {
            let n_bins = self.binned.bin_count(feature);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![(0.0_f64, 0.0_f64); n_bins];
            for &i in rows {
                let slot = &mut hist[self.binned.bins[i][feature] as usize];
                slot.0 += self.grad[i];
                slot.1 += self.hess[i];
            }

            let (mut gl, mut hl) = (0.0_f64, 0.0_f64);
            for (bin, &(bg, bh)) in hist.iter().enumerate().take(n_bins - 1) {
                gl += bg;
                hl += bh;
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let gain =
                    0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score);
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate { gain, feature, bin });
                }
            }
        }
        best
    }
}

/// Binary classifier built from an additive ensemble of regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedClassifier {
    params: BoostingParams,
    scale_pos_weight: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedClassifier {
    /// A classifier with no trees. Every row scores `base_score`.
    pub fn untrained(params: BoostingParams) -> Self {
        Self {
            params,
            scale_pos_weight: 1.0,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    /// Fit on `x` and 0/1 labels `y`.
    pub fn fit(params: BoostingParams, x: &FeatureMatrix, y: &[u8], scale_pos_weight: f64) -> Self {
        let n_features = x.first().map_or(0, |row| row.len());
        let mut model = Self {
            params,
            scale_pos_weight,
            n_features,
            trees: Vec::new(),
        };
        if x.is_empty() || x.len() != y.len() {
            return model;
        }

        let binned = BinnedMatrix::new(x, n_features, model.params.max_bins);
        let base = model.base_margin();
        let mut margins = vec![base; x.len()];
        let mut grad = vec![0.0; x.len()];
        let mut hess = vec![0.0; x.len()];
        model.trees.reserve(model.params.n_estimators);

        for round in 0..model.params.n_estimators {
            for i in 0..x.len() {
                let p = sigmoid(margins[i]);
                let weight = if y[i] == 1 { scale_pos_weight } else { 1.0 };
                grad[i] = (p - f64::from(y[i])) * weight;
                hess[i] = (p * (1.0 - p)).max(1e-16) * weight;
            }

            let tree = TreeBuilder {
                params: &model.params,
                binned: &binned,
                grad: &grad,
                hess: &hess,
                nodes: Vec::new(),
            }
            .build((0..x.len()).collect());

            for (margin, row) in margins.iter_mut().zip(x) {
                *margin += tree.predict(row);
            }
            debug!(round, depth = tree.depth(), nodes = tree.nodes.len(), "Boosting round");
            model.trees.push(tree);
        }

        model
    }

    /// Positive-class probability per row
    pub fn predict_proba(&self, x: &FeatureMatrix) -> Vec<f64> {
        x.iter().map(|row| sigmoid(self.margin(row))).collect()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn scale_pos_weight(&self) -> f64 {
        self.scale_pos_weight
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    fn margin(&self, row: &[f64]) -> f64 {
        self.base_margin() + self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>()
    }

    fn base_margin(&self) -> f64 {
        let p = self.params.base_score.clamp(1e-6, 1.0 - 1e-6);
        (p / (1.0 - p)).ln()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

//! Flat-array regression trees and the exact greedy builder

use crate::dtype::FloatElement;
use crate::error::{Error, Result};
use crate::runtime::ParallelismConfig;

/// Marker in `left` of a leaf node
pub(crate) const LEAF: u32 = 0;

/// Binary regression tree in breadth-first flat arrays
///
/// Node 0 is the root. An internal node `i` sends an observation to
/// `left[i]` when `x[feature[i]] <= threshold[i]` and to `left[i] + 1`
/// otherwise; a leaf has `left[i] == 0` and predicts `value[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree<T: FloatElement> {
    pub(crate) feature: Vec<u32>,
    pub(crate) threshold: Vec<T>,
    pub(crate) left: Vec<u32>,
    pub(crate) value: Vec<T>,
}

impl<T: FloatElement> RegressionTree<T> {
    /// Tree of a single leaf
    pub fn leaf(value: T) -> Self {
        Self {
            feature: vec![0],
            threshold: vec![T::zero()],
            left: vec![LEAF],
            value: vec![value],
        }
    }

    /// Tree from raw node arrays, checked for consistency
    pub fn from_parts(
        feature: Vec<u32>,
        threshold: Vec<T>,
        left: Vec<u32>,
        value: Vec<T>,
    ) -> Result<Self> {
        let n = left.len();
        if n == 0 {
            return Err(Error::invalid_argument("tree", "no nodes"));
        }
        if feature.len() != n || threshold.len() != n || value.len() != n {
            return Err(Error::shape_mismatch(
                "tree",
                &[n, n, n, n],
                &[feature.len(), threshold.len(), n, value.len()],
            ));
        }
        for (i, &l) in left.iter().enumerate() {
            if l != LEAF && (l as usize <= i || l as usize + 1 >= n) {
                return Err(Error::invalid_argument(
                    "tree",
                    format!("node {i} has children {l} and {} of {n} nodes", l + 1),
                ));
            }
        }
        Ok(Self {
            feature,
            threshold,
            left,
            value,
        })
    }

    /// Number of nodes
    pub fn n_nodes(&self) -> usize {
        self.left.len()
    }

    /// Number of leaves
    pub fn n_leaves(&self) -> usize {
        self.left.iter().filter(|&&l| l == LEAF).count()
    }

    /// Largest feature index used by a split, if any
    pub(crate) fn max_feature(&self) -> Option<usize> {
        self.left
            .iter()
            .zip(&self.feature)
            .filter(|(l, _)| **l != LEAF)
            .map(|(_, &f)| f as usize)
            .max()
    }

    /// Prediction for one dense row
    pub fn predict_row(&self, row: &[T]) -> T {
        let mut node = 0;
        loop {
            let l = self.left[node];
            if l == LEAF {
                return self.value[node];
            }
            let f = self.feature[node] as usize;
            node = if row[f] <= self.threshold[node] {
                l as usize
            } else {
                l as usize + 1
            };
        }
    }
}

/// Growth limits of one tree
#[derive(Debug, Clone, Copy)]
pub(crate) struct GrowthLimits {
    pub max_depth: usize,
    pub min_observations_in_leaf: usize,
    pub lambda: f64,
    pub min_split_loss: f64,
    pub shrinkage: f64,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
    /// Observations going left
    n_left: usize,
}

struct PendingNode {
    rows: Vec<usize>,
    depth: usize,
}

fn leaf_weight(g: f64, h: f64, lambda: f64) -> f64 {
    -g / (h + lambda)
}

fn score(g: f64, h: f64, lambda: f64) -> f64 {
    g * g / (h + lambda)
}

/// Best split of `rows` on one feature column, by exact enumeration
fn best_split_on<T: FloatElement>(
    column: &[T],
    feature: usize,
    rows: &[usize],
    grad: &[f64],
    hess: &[f64],
    limits: &GrowthLimits,
) -> Option<Split> {
    let mut order = rows.to_vec();
    order.sort_by(|&a, &b| column[a].to_f64().total_cmp(&column[b].to_f64()));

    let g_total: f64 = rows.iter().map(|&r| grad[r]).sum();
    let h_total: f64 = rows.iter().map(|&r| hess[r]).sum();
    let parent = score(g_total, h_total, limits.lambda);

    let min_leaf = limits.min_observations_in_leaf;
    let mut best: Option<Split> = None;
    let (mut gl, mut hl) = (0.0, 0.0);
    for (k, pair) in order.windows(2).enumerate() {
        gl += grad[pair[0]];
        hl += hess[pair[0]];
        let n_left = k + 1;
        let (x, next) = (column[pair[0]].to_f64(), column[pair[1]].to_f64());
        if x == next || n_left < min_leaf || order.len() - n_left < min_leaf {
            continue;
        }
        let gain = 0.5
            * (score(gl, hl, limits.lambda)
                + score(g_total - gl, h_total - hl, limits.lambda)
                - parent)
            - limits.min_split_loss;
        if gain > 0.0 && best.is_none_or(|b| gain > b.gain) {
            // The midpoint may round up to `next` in the element precision
            let mid = T::from_f64(x + (next - x) * 0.5).to_f64();
            best = Some(Split {
                feature,
                threshold: if mid < next { mid } else { x },
                gain,
                n_left,
            });
        }
    }
    best
}

/// Grow one tree on the gradient statistics of every observation
///
/// `columns[j]` holds feature `j` of every observation. Features are
/// searched in parallel; the highest gain wins, the lowest feature index on
/// ties. Leaf values are already multiplied by the shrinkage.
pub(crate) fn grow<T: FloatElement>(
    columns: &[Vec<T>],
    grad: &[f64],
    hess: &[f64],
    limits: &GrowthLimits,
    parallelism: &ParallelismConfig,
) -> RegressionTree<T> {
    let mut tree = RegressionTree {
        feature: Vec::new(),
        threshold: Vec::new(),
        left: Vec::new(),
        value: Vec::new(),
    };
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(PendingNode {
        rows: (0..grad.len()).collect(),
        depth: 0,
    });
    tree.feature.push(0);
    tree.threshold.push(T::zero());
    tree.left.push(LEAF);
    tree.value.push(T::zero());

    let mut node = 0;
    while let Some(PendingNode { rows, depth }) = queue.pop_front() {
        let g: f64 = rows.iter().map(|&r| grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| hess[r]).sum();
        tree.value[node] = T::from_f64(leaf_weight(g, h, limits.lambda) * limits.shrinkage);

        let split = if depth < limits.max_depth && rows.len() >= 2 * limits.min_observations_in_leaf
        {
            parallelism
                .map_collect(columns.len(), |j| {
                    best_split_on(&columns[j], j, &rows, grad, hess, limits)
                })
                .into_iter()
                .flatten()
                .fold(None::<Split>, |best, s| match best {
                    Some(b) if b.gain >= s.gain => Some(b),
                    _ => Some(s),
                })
        } else {
            None
        };

        if let Some(split) = split {
            let column = &columns[split.feature];
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .partition(|&&r| column[r].to_f64() <= split.threshold);
            debug_assert_eq!(left_rows.len(), split.n_left);

            let child = tree.left.len() as u32;
            tree.feature[node] = split.feature as u32;
            tree.threshold[node] = T::from_f64(split.threshold);
            tree.left[node] = child;
            for _ in 0..2 {
                tree.feature.push(0);
                tree.threshold.push(T::zero());
                tree.left.push(LEAF);
                tree.value.push(T::zero());
            }
            queue.push_back(PendingNode {
                rows: left_rows,
                depth: depth + 1,
            });
            queue.push_back(PendingNode {
                rows: right_rows,
                depth: depth + 1,
            });
        }
        node += 1;
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> GrowthLimits {
        GrowthLimits {
            max_depth: 3,
            min_observations_in_leaf: 1,
            lambda: 0.0,
            min_split_loss: 0.0,
            shrinkage: 1.0,
        }
    }

    #[test]
    fn test_step_function_is_split_once() {
        let x = vec![vec![1.0f64, 2.0, 3.0, 4.0]];
        // Gradient of squared loss at f = 0 is -y
        let grad = [-1.0, -1.0, -5.0, -5.0];
        let hess = [1.0; 4];
        let tree = grow(&x, &grad, &hess, &limits(), &ParallelismConfig::serial());
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.threshold[0], 2.5);
        assert_eq!(tree.predict_row(&[1.5]), 1.0);
        assert_eq!(tree.predict_row(&[10.0]), 5.0);
    }

    #[test]
    fn test_constant_feature_gives_single_leaf() {
        let x = vec![vec![7.0f32; 4]];
        let grad = [-1.0, -2.0, -3.0, -2.0];
        let tree = grow(&x, &grad, &[1.0; 4], &limits(), &ParallelismConfig::serial());
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict_row(&[0.0]), 2.0);
    }

    #[test]
    fn test_min_leaf_size_blocks_small_children() {
        let x = vec![vec![1.0f64, 2.0, 3.0, 4.0]];
        let grad = [-10.0, -1.0, -1.0, -1.0];
        let mut l = limits();
        l.min_observations_in_leaf = 2;
        let tree = grow(&x, &grad, &[1.0; 4], &l, &ParallelismConfig::serial());
        assert!(tree.n_leaves() <= 2);
        assert_eq!(tree.threshold[0], 2.5);
    }

    #[test]
    fn test_from_parts_rejects_backward_links() {
        let leaves = RegressionTree::<f64>::from_parts(
            vec![0, 0, 0],
            vec![0.0; 3],
            vec![0, 0, 0],
            vec![0.0; 3],
        );
        assert!(leaves.is_ok());
        let bad = RegressionTree::<f64>::from_parts(
            vec![0, 0, 0],
            vec![0.0; 3],
            vec![2, 0, 0],
            vec![0.0; 3],
        );
        assert!(bad.is_err());
    }
}

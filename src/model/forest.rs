use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: Array1<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// CART regression tree with an MSE criterion summed over outputs.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, params: TreeParams) -> Self {
        let rows: Vec<usize> = (0..x.nrows()).collect();
        Self {
            root: build(x, y, &rows, 0, params),
        }
    }

    pub fn predict(&self, features: ArrayView1<'_, f64>) -> ArrayView1<'_, f64> {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return value.view(),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(n: &Node) -> usize {
            match n {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

fn mean_of(y: ArrayView2<'_, f64>, rows: &[usize]) -> Array1<f64> {
    let mut sum = Array1::<f64>::zeros(y.ncols());
    for &r in rows {
        sum += &y.row(r);
    }
    sum / rows.len().max(1) as f64
}

fn build(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    rows: &[usize],
    depth: usize,
    params: TreeParams,
) -> Node {
    let n = rows.len();
    let leaf = |rows: &[usize]| Node::Leaf {
        value: mean_of(y, rows),
    };

    if n < params.min_samples_split
        || n < 2 * params.min_samples_leaf.max(1)
        || params.max_depth.is_some_and(|d| depth >= d)
    {
        return leaf(rows);
    }

    let Some((feature, threshold)) = best_split(x, y, rows, params.min_samples_leaf.max(1)) else {
        return leaf(rows);
    };

    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.iter().copied().partition(|&r| x[[r, feature]] <= threshold);
    if left.is_empty() || right.is_empty() {
        return leaf(rows);
    }

    Node::Split {
        feature,
        threshold,
        left: Box::new(build(x, y, &left, depth + 1, params)),
        right: Box::new(build(x, y, &right, depth + 1, params)),
    }
}

// Maximizes sum_o(SL_o^2/nl + SR_o^2/nr), i.e. minimizes the children's
// summed squared error.
fn best_split(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    rows: &[usize],
    min_leaf: usize,
) -> Option<(usize, f64)> {
    let n = rows.len();
    let total = y.select(Axis(0), rows).sum_axis(Axis(0));
    let parent_score = total.dot(&total) / n as f64;

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = rows.to_vec();
    let mut left_sum = Array1::<f64>::zeros(y.ncols());

    for f in 0..x.ncols() {
        order.sort_by(|&a, &b| {
            x[[a, f]]
                .partial_cmp(&x[[b, f]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        left_sum.fill(0.0);

        for s in 1..n {
            left_sum += &y.row(order[s - 1]);
            if s < min_leaf || n - s < min_leaf {
                continue;
            }
            let lo = x[[order[s - 1], f]];
            let hi = x[[order[s], f]];
            if lo >= hi {
                continue;
            }
            let (nl, nr) = (s as f64, (n - s) as f64);
            let score: f64 = left_sum
                .iter()
                .zip(total.iter())
                .map(|(l, t)| l * l / nl + (t - l) * (t - l) / nr)
                .sum();
            if score > parent_score * (1.0 + 1e-12) + 1e-12 && best.map_or(true, |(_, _, b)| score > b) {
                best = Some((f, (lo + hi) / 2.0, score));
            }
        }
    }

    best.map(|(f, thr, _)| (f, thr))
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_outputs: usize,
}

impl RandomForest {
    // Tree i bootstraps from ChaCha8 seeded with `seed + i`.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        n_estimators: usize,
        params: TreeParams,
        seed: u64,
    ) -> anyhow::Result<Self> {
        if x.nrows() != y.nrows() {
            anyhow::bail!("feature rows {} != target rows {}", x.nrows(), y.nrows());
        }
        if x.nrows() == 0 {
            anyhow::bail!("no training samples");
        }
        if n_estimators == 0 {
            anyhow::bail!("n_estimators must be > 0");
        }
        let n = x.nrows();

        let trees = (0..n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let x_boot: Array2<f64> = x.select(Axis(0), &rows);
                let y_boot: Array2<f64> = y.select(Axis(0), &rows);
                RegressionTree::fit(x_boot.view(), y_boot.view(), params)
            })
            .collect();

        Ok(Self {
            trees,
            n_outputs: y.ncols(),
        })
    }

    pub fn predict(&self, features: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.n_outputs);
        for tree in &self.trees {
            out += &tree.predict(features);
        }
        out / self.trees.len().max(1) as f64
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(RegressionTree::depth).max().unwrap_or(0)
    }
}

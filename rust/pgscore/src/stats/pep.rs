//! Local false discovery rate (posterior error probability) from kernel
//! density estimates of the decoy and target score distributions.
//!
//! Densities are evaluated on an evenly spaced grid (linear binning, truncated
//! kernel) and interpolated at every score, so the cost grows linearly with the
//! number of rows.

use rayon::prelude::*;

use crate::table::TargetDecoy;

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
/// Kernel weights past this many bandwidths are below 1e-7 and dropped.
const KERNEL_SUPPORT: f64 = 6.0;
const NODES_PER_BANDWIDTH: f64 = 10.0;
pub const GRID_POINTS: usize = 512;
pub const MAX_GRID_POINTS: usize = 1 << 14;

/// Density sampled on evenly spaced nodes, linear in between and constant
/// past either end.
#[derive(Debug, Clone)]
pub struct DensityGrid {
    start: f64,
    step: f64,
    values: Vec<f64>,
}

impl DensityGrid {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn at(&self, x: f64) -> f64 {
        let last = self.values.len() - 1;
        let t = (x - self.start) / self.step;
        if !(t > 0.0) {
            return self.values[0];
        }
        if t >= last as f64 {
            return self.values[last];
        }
        let j = t.floor() as usize;
        let frac = t - j as f64;
        self.values[j] * (1.0 - frac) + self.values[j + 1] * frac
    }
}

/// Number of grid nodes for `range` so that each bandwidth spans several
/// nodes, between [`GRID_POINTS`] and [`MAX_GRID_POINTS`].
pub fn grid_size(range: f64, bandwidth: f64) -> usize {
    let wanted = (range / bandwidth * NODES_PER_BANDWIDTH).ceil();
    if wanted.is_finite() {
        (wanted as usize).clamp(GRID_POINTS, MAX_GRID_POINTS)
    } else {
        MAX_GRID_POINTS
    }
}

/// Gaussian kernel density estimate with Silverman's bandwidth.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    points: Vec<f64>,
    bandwidth: f64,
}

impl GaussianKde {
    /// `None` when there is nothing to estimate from.
    pub fn fit(points: &[f64]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let mean = points.iter().sum::<f64>() / n;
        let std = if points.len() > 1 {
            (points.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let iqr = quantile(&sorted, 0.75) - quantile(&sorted, 0.25);

        let spread = if iqr > 0.0 { std.min(iqr / 1.34) } else { std };
        let mut bandwidth = 0.9 * spread * n.powf(-0.2);
        if !(bandwidth > 0.0) {
            // Degenerate sample, fall back to a narrow kernel around the values
            bandwidth = 1e-3 * (1.0 + mean.abs());
        }

        Some(Self {
            points: sorted,
            bandwidth,
        })
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn density(&self, x: f64) -> f64 {
        let h = self.bandwidth;
        let total: f64 = self
            .points
            .iter()
            .map(|p| {
                let z = (x - p) / h;
                (-0.5 * z * z).exp()
            })
            .sum();
        total * INV_SQRT_2PI / (self.points.len() as f64 * h)
    }

    /// Density on `nodes` evenly spaced points over `[lo, hi]`.
    ///
    /// Samples are linearly binned onto the nodes, which are then convolved
    /// with the kernel truncated at [`KERNEL_SUPPORT`] bandwidths. Samples
    /// outside the range are binned onto the nearest end.
    pub fn grid(&self, lo: f64, hi: f64, nodes: usize) -> DensityGrid {
        let h = self.bandwidth;
        let nodes = nodes.max(2);
        let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - h, lo + h) };
        let step = (hi - lo) / (nodes - 1) as f64;

        let mut weights = vec![0.0; nodes];
        for &p in self.points.iter() {
            let t = ((p - lo) / step).clamp(0.0, (nodes - 1) as f64);
            let j = (t.floor() as usize).min(nodes - 2);
            let frac = t - j as f64;
            weights[j] += 1.0 - frac;
            weights[j + 1] += frac;
        }

        let taps = ((KERNEL_SUPPORT * h / step).ceil() as usize).min(nodes - 1);
        let kernel: Vec<f64> = (0..=taps)
            .map(|d| {
                let z = d as f64 * step / h;
                (-0.5 * z * z).exp()
            })
            .collect();
        let norm = INV_SQRT_2PI / (self.points.len() as f64 * h);

        let values = (0..nodes)
            .into_par_iter()
            .map(|i| {
                let from = i.saturating_sub(taps);
                let to = (i + taps).min(nodes - 1);
                let total: f64 = (from..=to).map(|j| weights[j] * kernel[i.abs_diff(j)]).sum();
                total * norm
            })
            .collect();

        DensityGrid {
            start: lo,
            step,
            values,
        }
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// `π0 · f_decoy(s) / f_target(s)` for every score, clamped to `[0, 1]` and
/// made non-decreasing as the score decreases.
///
/// Without targets (or decoys) every row gets 1.
pub fn local_fdr(scores: &[f64], labels: &[TargetDecoy], pi0: f64) -> Vec<f64> {
    let (targets, decoys): (Vec<(f64, TargetDecoy)>, Vec<(f64, TargetDecoy)>) = scores
        .iter()
        .copied()
        .zip(labels.iter().copied())
        .partition(|(_, l)| *l == TargetDecoy::Target);
    let target_scores: Vec<f64> = targets.into_iter().map(|x| x.0).collect();
    let decoy_scores: Vec<f64> = decoys.into_iter().map(|x| x.0).collect();

    let (Some(null), Some(all_targets)) = (
        GaussianKde::fit(&decoy_scores),
        GaussianKde::fit(&target_scores),
    ) else {
        return vec![1.0; scores.len()];
    };

    let (lo, hi) = scores
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    let nodes = grid_size(hi - lo, null.bandwidth().min(all_targets.bandwidth()));
    let null_grid = null.grid(lo, hi, nodes);
    let target_grid = all_targets.grid(lo, hi, nodes);

    let raw: Vec<f64> = scores
        .par_iter()
        .map(|&s| {
            let f = target_grid.at(s);
            if f > 0.0 {
                (pi0 * null_grid.at(s) / f).clamp(0.0, 1.0)
            } else {
                1.0
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut out = raw.clone();
    let mut running = 0.0f64;
    for &i in order.iter() {
        running = running.max(raw[i]);
        out[i] = running;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kde_integrates_to_one() {
        let kde = GaussianKde::fit(&[0.0, 1.0, 2.0, 2.5, 4.0]).unwrap();
        let step = 0.01;
        let area: f64 = (-2000..2000)
            .map(|i| kde.density(i as f64 * step) * step)
            .sum();
        assert!((area - 1.0).abs() < 1e-3, "area {}", area);
        assert!(GaussianKde::fit(&[]).is_none());
        assert!(GaussianKde::fit(&[3.0, 3.0]).unwrap().bandwidth() > 0.0);
    }

    #[test]
    fn test_grid_density_matches_exact() {
        let points: Vec<f64> = (0..300)
            .map(|i| ((i * 37) % 101) as f64 / 10.0 + if i % 3 == 0 { 8.0 } else { 0.0 })
            .collect();
        let kde = GaussianKde::fit(&points).unwrap();
        let (lo, hi) = (-2.0, 20.0);
        let grid = kde.grid(lo, hi, grid_size(hi - lo, kde.bandwidth()));
        assert!(grid.len() >= GRID_POINTS);

        let xs: Vec<f64> = (0..=440).map(|i| lo + i as f64 * 0.05).collect();
        let peak = xs.iter().map(|&x| kde.density(x)).fold(0.0, f64::max);
        for &x in xs.iter() {
            let exact = kde.density(x);
            let err = (grid.at(x) - exact).abs();
            assert!(err < 1e-2 * peak, "x {}: grid {} exact {}", x, grid.at(x), exact);
        }
        // Constant past the ends
        assert_eq!(grid.at(-100.0), grid.at(lo));
        assert!((grid.at(100.0) - grid.at(hi)).abs() < 1e-12);
    }

    #[test]
    fn test_grid_size_is_bounded() {
        assert_eq!(grid_size(1.0, 1.0), GRID_POINTS);
        assert_eq!(grid_size(1e6, 1e-3), MAX_GRID_POINTS);
        assert_eq!(grid_size(0.0, 0.5), GRID_POINTS);
        assert_eq!(grid_size(100.0, 0.5), 2_000);
    }

    #[test]
    fn test_local_fdr_is_monotone_and_bounded() {
        let mut scores = Vec::new();
        let mut labels = Vec::new();
        for i in 0..50 {
            let x = i as f64 / 10.0;
            scores.push(x);
            labels.push(TargetDecoy::Decoy);
            scores.push(x + 3.0);
            labels.push(TargetDecoy::Target);
        }
        let pep = local_fdr(&scores, &labels, 1.0);
        assert_eq!(pep.len(), scores.len());
        assert!(pep.iter().all(|&p| (0.0..=1.0).contains(&p)));

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        for w in order.windows(2) {
            assert!(pep[w[0]] <= pep[w[1]]);
        }
        // Best target is almost surely true, worst decoy almost surely false
        assert!(pep[order[0]] < 0.05, "{}", pep[order[0]]);
        assert!(pep[*order.last().unwrap()] > 0.9);
    }

    #[test]
    fn test_local_fdr_without_targets() {
        let pep = local_fdr(&[1.0, 2.0], &[TargetDecoy::Decoy, TargetDecoy::Decoy], 1.0);
        assert_eq!(pep, vec![1.0, 1.0]);
    }
}

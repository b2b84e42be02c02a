//! Density-based spatial clustering (DBSCAN) for 2D point sets
//!
//! Used to merge the many above-threshold pixels surrounding each
//! correlation peak into one candidate per source. Points are binned into a
//! uniform grid with cell size `eps`, so a neighbourhood query only visits the
//! 3x3 block of cells around a point.
//!
//! Cluster labels are assigned in the order clusters are first reached while
//! scanning the input, so identical input produces identical labels on every
//! run. Neighbourhoods are inclusive (`distance <= eps`) and a point counts
//! towards its own neighbourhood, matching the usual DBSCAN definition.

use std::collections::HashMap;

use crate::locate::Locatable2d;

/// Output of a DBSCAN run.
#[derive(Debug, Clone, PartialEq)]
pub struct DbscanResult {
    /// Cluster label per input point. Points that were noise under
    /// `min_samples` are promoted to their own singleton cluster.
    pub labels: Vec<usize>,

    /// Number of distinct clusters, singletons included.
    pub n_clusters: usize,

    /// Number of points that were noise before promotion.
    pub n_noise: usize,
}

impl DbscanResult {
    /// Member indices for each cluster, in label order.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.n_clusters];
        for (idx, &label) in self.labels.iter().enumerate() {
            members[label].push(idx);
        }
        members
    }

    /// Mean position of each cluster, in label order.
    pub fn centroids<T: Locatable2d>(&self, points: &[T]) -> Vec<(f64, f64)> {
        let mut sums = vec![(0.0, 0.0, 0usize); self.n_clusters];
        for (point, &label) in points.iter().zip(&self.labels) {
            let entry = &mut sums[label];
            entry.0 += point.x();
            entry.1 += point.y();
            entry.2 += 1;
        }
        sums.into_iter()
            .map(|(sx, sy, n)| (sx / n as f64, sy / n as f64))
            .collect()
    }
}

struct GridIndex {
    eps: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl GridIndex {
    fn new<T: Locatable2d>(points: &[T], eps: f64) -> Self {
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (idx, p) in points.iter().enumerate() {
            cells
                .entry(Self::cell_of(p.x(), p.y(), eps))
                .or_default()
                .push(idx);
        }
        Self { eps, cells }
    }

    fn cell_of(x: f64, y: f64, eps: f64) -> (i64, i64) {
        ((x / eps).floor() as i64, (y / eps).floor() as i64)
    }

    /// Neighbours of `idx` within `eps`, in ascending index order.
    fn neighbours<T: Locatable2d>(&self, points: &[T], idx: usize) -> Vec<usize> {
        let p = &points[idx];
        let (cx, cy) = Self::cell_of(p.x(), p.y(), self.eps);
        let eps_sq = self.eps * self.eps;

        let mut found = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(bucket) = self.cells.get(&(cx + dx, cy + dy)) {
                    for &other in bucket {
                        let q = &points[other];
                        let d_sq = (p.x() - q.x()).powi(2) + (p.y() - q.y()).powi(2);
                        if d_sq <= eps_sq {
                            found.push(other);
                        }
                    }
                }
            }
        }
        found.sort_unstable();
        found
    }
}

/// Cluster points with DBSCAN.
///
/// # Arguments
/// * `points` - Points to cluster
/// * `eps` - Neighbourhood radius, must be positive
/// * `min_samples` - Minimum neighbourhood size (self included) for a core
///   point; `1` makes every point a core point
///
/// # Returns
/// Labels for every point. Empty input gives an empty result.
pub fn dbscan<T: Locatable2d>(points: &[T], eps: f64, min_samples: usize) -> DbscanResult {
    const UNVISITED: usize = usize::MAX;
    const NOISE: usize = usize::MAX - 1;

    let n = points.len();
    let mut labels = vec![UNVISITED; n];
    if n == 0 || eps <= 0.0 {
        return DbscanResult {
            labels: (0..n).collect(),
            n_clusters: n,
            n_noise: 0,
        };
    }

    let index = GridIndex::new(points, eps);
    let min_samples = min_samples.max(1);
    let mut n_clusters = 0;

    for start in 0..n {
        if labels[start] != UNVISITED {
            continue;
        }

        let seeds = index.neighbours(points, start);
        if seeds.len() < min_samples {
            labels[start] = NOISE;
            continue;
        }

        let cluster = n_clusters;
        n_clusters += 1;
        labels[start] = cluster;

        let mut queue: Vec<usize> = seeds;
        let mut head = 0;
        while head < queue.len() {
            let current = queue[head];
            head += 1;

            if labels[current] == NOISE {
                // Border point reached from a core point
                labels[current] = cluster;
                continue;
            }
            if labels[current] != UNVISITED {
                continue;
            }
            labels[current] = cluster;

            let neighbours = index.neighbours(points, current);
            if neighbours.len() >= min_samples {
                queue.extend(neighbours.into_iter().filter(|&i| {
                    labels[i] == UNVISITED || labels[i] == NOISE
                }));
            }
        }
    }

    let mut n_noise = 0;
    for label in labels.iter_mut() {
        if *label == NOISE {
            *label = n_clusters;
            n_clusters += 1;
            n_noise += 1;
        }
    }

    DbscanResult {
        labels,
        n_clusters,
        n_noise,
    }
}

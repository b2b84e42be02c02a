//! Blend labeling of detected donuts.
//!
//! Two donuts are blended when their centres are closer than the blend
//! radius (and not coincident). The relation is stored once in a
//! [`BlendGraph`]: an arena of node positions plus an immutable adjacency
//! list, so every candidate's neighbour list is always present (possibly
//! empty) and symmetric.

use serde::{Deserialize, Serialize};
use wep_math::locate::{distance, Locatable2d};

/// A detected donut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonutCandidate {
    /// Centre column (sub-pixel)
    pub x_center: f64,
    /// Centre row (sub-pixel)
    pub y_center: f64,
    pub blended: bool,
    /// Indices of the candidates this one is blended with, ascending
    pub blended_with: Vec<usize>,
    pub num_blended_neighbors: usize,
    /// Correlation flux proxy, set by flux ranking
    pub flux: Option<f64>,
}

impl DonutCandidate {
    /// An unblended candidate at `(x, y)`.
    pub fn new(x_center: f64, y_center: f64) -> Self {
        Self {
            x_center,
            y_center,
            blended: false,
            blended_with: Vec::new(),
            num_blended_neighbors: 0,
            flux: None,
        }
    }
}

impl Locatable2d for DonutCandidate {
    fn x(&self) -> f64 {
        self.x_center
    }

    fn y(&self) -> f64 {
        self.y_center
    }
}

/// Symmetric blend relation over a set of positions.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendGraph {
    positions: Vec<(f64, f64)>,
    adjacency: Vec<Vec<usize>>,
}

impl BlendGraph {
    /// Label every pair closer than `blend_radius`.
    ///
    /// Pairs are visited in `(i, j)` row-major order over the strict upper
    /// triangle, so neighbour lists come out ascending.
    pub fn build<T: Locatable2d>(positions: &[T], blend_radius: f64) -> Self {
        let n = positions.len();
        let mut adjacency = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = distance(&positions[i], &positions[j]);
                if d > 0.0 && d < blend_radius {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }

        let graph = Self {
            positions: positions.iter().map(|p| (p.x(), p.y())).collect(),
            adjacency,
        };
        log::debug!(
            "{} of {} donuts blended within {} px",
            graph.adjacency.iter().filter(|a| !a.is_empty()).count(),
            n,
            blend_radius
        );
        graph
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Neighbours of node `i`, ascending.
    pub fn neighbors(&self, i: usize) -> &[usize] {
        self.adjacency.get(i).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_blended(&self, i: usize) -> bool {
        !self.neighbors(i).is_empty()
    }

    /// Each blended pair once, `i < j`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.adjacency
            .iter()
            .enumerate()
            .flat_map(|(i, adj)| adj.iter().filter(move |&&j| j > i).map(move |&j| (i, j)))
    }

    /// Candidate records in node order.
    pub fn candidates(&self) -> Vec<DonutCandidate> {
        self.positions
            .iter()
            .zip(&self.adjacency)
            .map(|(&(x, y), adj)| DonutCandidate {
                x_center: x,
                y_center: y,
                blended: !adj.is_empty(),
                blended_with: adj.clone(),
                num_blended_neighbors: adj.len(),
                flux: None,
            })
            .collect()
    }
}

/// Blend-label `positions` and return the candidate table.
pub fn label_blends<T: Locatable2d>(positions: &[T], blend_radius: f64) -> Vec<DonutCandidate> {
    BlendGraph::build(positions, blend_radius).candidates()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions() -> Vec<(f64, f64)> {
        vec![(500.0, 500.0), (200.0, 200.0), (220.0, 200.0)]
    }

    #[test]
    fn test_small_radius_blends_nothing() {
        let candidates = label_blends(&positions(), 10.0);
        assert_eq!(candidates.len(), 3);
        for c in &candidates {
            assert!(!c.blended);
            assert!(c.blended_with.is_empty());
            assert_eq!(c.num_blended_neighbors, 0);
        }
    }

    #[test]
    fn test_close_pair_blends_mutually() {
        let candidates = label_blends(&positions(), 30.0);
        assert!(!candidates[0].blended);
        assert!(candidates[1].blended);
        assert!(candidates[2].blended);
        assert_eq!(candidates[1].blended_with, vec![2]);
        assert_eq!(candidates[2].blended_with, vec![1]);
        assert_eq!(candidates[1].num_blended_neighbors, 1);
    }

    #[test]
    fn test_distance_equal_to_radius_is_not_blended() {
        let candidates = label_blends(&positions(), 20.0);
        assert!(candidates.iter().all(|c| !c.blended));
    }

    #[test]
    fn test_coincident_points_are_not_blended() {
        let graph = BlendGraph::build(&[(10.0, 10.0), (10.0, 10.0)], 5.0);
        assert!(!graph.is_blended(0));
        assert!(!graph.is_blended(1));
    }

    #[test]
    fn test_symmetric_and_deterministic() {
        let points = vec![(0.0, 0.0), (3.0, 0.0), (6.0, 0.0), (100.0, 0.0), (1.0, 1.0)];
        let graph = BlendGraph::build(&points, 4.0);
        for i in 0..graph.len() {
            for &j in graph.neighbors(i) {
                assert!(graph.neighbors(j).contains(&i));
            }
        }
        assert_eq!(graph.neighbors(0), &[1, 4]);
        assert_eq!(graph.neighbors(1), &[0, 2, 4]);
        assert_eq!(graph.neighbors(3), &[] as &[usize]);
        assert_eq!(graph.edges().collect::<Vec<_>>(), vec![(0, 1), (0, 4), (1, 2), (1, 4)]);

        assert_eq!(BlendGraph::build(&points, 4.0), graph);
        for c in graph.candidates() {
            assert_eq!(c.blended, c.num_blended_neighbors > 0);
        }
    }
}

use geo::{Polygon, Rect};

use super::grid::GridGraph;
use super::{BaseGraph, Penalties};

/// Octilinear lattice variant with native diagonal cells: diagonal links
/// are priced with their own factor instead of the Euclidean sqrt(2), and
/// crossing diagonals are not mutually excluded (the variant resolves
/// them through its own cell geometry).
#[derive(Debug, Clone)]
pub struct OctiGridGraph {
    core: GridGraph,
}

impl OctiGridGraph {
    /// Default diagonal cost factor of the octi lattice.
    pub const DIAG_FACTOR: f64 = 1.5;

    pub fn new(bbox: Rect<f64>, cell_size: f64, border_rad: f64, pens: Penalties) -> Self {
        Self::with_diag_factor(bbox, cell_size, border_rad, pens, Self::DIAG_FACTOR)
    }

    pub fn with_diag_factor(
        bbox: Rect<f64>,
        cell_size: f64,
        border_rad: f64,
        pens: Penalties,
        diag_factor: f64,
    ) -> Self {
        OctiGridGraph {
            core: GridGraph::with_diagonals(bbox, cell_size, border_rad, pens, diag_factor, false),
        }
    }

    pub fn add_obstacle(&mut self, poly: &Polygon<f64>) {
        self.core.add_obstacle(poly);
    }
}

impl BaseGraph for OctiGridGraph {
    fn core(&self) -> &GridGraph {
        &self.core
    }

    fn core_mut(&mut self) -> &mut GridGraph {
        &mut self.core
    }
}

pub mod grid;
pub mod octi;

pub use grid::{GridEdge, GridEdgeIdx, GridEdgeKind, GridGraph, GridNode, GridNodeIdx};
pub use octi::OctiGridGraph;

use geo::{Polygon, Rect};

/// Cost model of the discrete embedding substrate.
///
/// Turn penalties are named by the direction change: `p_45` prices a
/// gentle 45 degree turn, `p_180` a full reversal. `hop_pen` prices one
/// cell step (an inter-cell edge, scaled by the Euclidean step length in
/// cell units, and a straight pass through a cell), `move_pen` scales
/// station displacement per cell of distance, `dense_pen`/`dense_cap`
/// govern sharing of an inter-cell edge by several combinatorial edges
/// (cap 1 = exclusive).
#[derive(Debug, Clone, Copy)]
pub struct Penalties {
    pub p_45: f64,
    pub p_90: f64,
    pub p_135: f64,
    pub p_180: f64,
    pub hop_pen: f64,
    pub move_pen: f64,
    pub dense_pen: f64,
    pub dense_cap: u8,
}

impl Default for Penalties {
    fn default() -> Self {
        Penalties {
            p_45: 1.0,
            p_90: 2.0,
            p_135: 3.0,
            p_180: 4.0,
            hop_pen: 1.0,
            move_pen: 0.5,
            dense_pen: 2.0,
            dense_cap: 1,
        }
    }
}

impl Penalties {
    /// Cost of a port-to-port pass with the given port index distance
    /// (1 = sharpest bend, 4 = straight crossing).
    pub fn bend_cost(&self, port_dist: u8) -> f64 {
        match port_dist {
            1 => self.p_135,
            2 => self.p_90,
            3 => self.p_45,
            4 => self.hop_pen,
            _ => f64::INFINITY,
        }
    }

    /// Turn penalty class for an angular difference in degrees.
    pub fn angle_cost(&self, diff: f64) -> f64 {
        if diff < 22.5 {
            0.0
        } else if diff < 67.5 {
            self.p_45
        } else if diff < 112.5 {
            self.p_90
        } else if diff < 157.5 {
            self.p_135
        } else {
            self.p_180
        }
    }

    /// Correction added to a sink while an unsettled endpoint considers a
    /// centre, so bend accounting through the port edges is not distorted.
    /// Stripped from the two terminal sinks after a successful route.
    pub fn sink_cost_offset(&self) -> f64 {
        self.p_135 - self.p_45
    }
}

/// Per-port cost vector written onto the sink edges of a candidate
/// centre before routing (topological blocks, spacing, node bends).
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeCost(pub [f64; 8]);

impl std::ops::AddAssign for NodeCost {
    fn add_assign(&mut self, rhs: NodeCost) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a += b;
        }
    }
}

/// Which lattice variant to embed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseGraphKind {
    /// Square cells, eight ports, crossing diagonals mutually excluded.
    #[default]
    Grid,
    /// Octilinear variant with native diagonal accounting.
    Octi,
}

/// Capability interface of the embedding substrate. The two variants
/// differ in edge enumeration and diagonal-crossing logic only; every
/// operation of the shared core is reachable through `core()`.
pub trait BaseGraph: Clone + Send + Sync {
    fn core(&self) -> &GridGraph;
    fn core_mut(&mut self) -> &mut GridGraph;

    fn num_neighbors(&self) -> usize {
        8
    }
}

/// Build the configured variant over a padded bounding box.
pub fn new_base_graph(
    kind: BaseGraphKind,
    bbox: Rect<f64>,
    cell_size: f64,
    border_rad: f64,
    pens: Penalties,
    obstacles: &[Polygon<f64>],
) -> GridGraphAny {
    match kind {
        BaseGraphKind::Grid => {
            let mut gg = GridGraph::new(bbox, cell_size, border_rad, pens);
            for o in obstacles {
                gg.add_obstacle(o);
            }
            GridGraphAny::Grid(gg)
        }
        BaseGraphKind::Octi => {
            let mut gg = OctiGridGraph::new(bbox, cell_size, border_rad, pens);
            for o in obstacles {
                gg.core_mut().add_obstacle(o);
            }
            GridGraphAny::Octi(gg)
        }
    }
}

/// Runtime-selected base graph variant.
#[derive(Debug, Clone)]
pub enum GridGraphAny {
    Grid(GridGraph),
    Octi(OctiGridGraph),
}

impl BaseGraph for GridGraphAny {
    fn core(&self) -> &GridGraph {
        match self {
            GridGraphAny::Grid(g) => g,
            GridGraphAny::Octi(g) => g.core(),
        }
    }

    fn core_mut(&mut self) -> &mut GridGraph {
        match self {
            GridGraphAny::Grid(g) => g,
            GridGraphAny::Octi(g) => g.core_mut(),
        }
    }
}

impl BaseGraph for GridGraph {
    fn core(&self) -> &GridGraph {
        self
    }

    fn core_mut(&mut self) -> &mut GridGraph {
        self
    }
}

use ahash::AHashMap;
use geo::{Coord, Polygon, Rect};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use super::{NodeCost, Penalties};
use crate::comb_graph::{CombEdgeIdx, CombGraph, CombNodeIdx};
use crate::geometry::{self, DIR_VECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridNodeIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridEdgeIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridEdgeKind {
    /// Port-to-centre edge, traversable only while opened.
    Sink,
    /// Port-to-port turn within a cell.
    Bend,
    /// Colinear port-to-port pass through a cell.
    Cross,
    /// Port-to-port edge into the neighbouring cell, in direction `dir`
    /// as seen from the `from` side.
    Link { dir: u8 },
}

#[derive(Debug, Clone)]
pub struct GridNode {
    pub cell: (usize, usize),
    /// None = cell centre, Some(d) = port in compass direction d.
    pub dir: Option<u8>,
    pub pos: Coord<f64>,
    /// Centres only: occupied by a settled combinatorial node, or
    /// otherwise excluded from candidate sets.
    pub closed: bool,
    /// Centres only: number of pass-through routes using this cell.
    pub traversed: u16,
}

#[derive(Debug, Clone)]
pub struct GridEdge {
    pub from: GridNodeIdx,
    pub to: GridNodeIdx,
    pub kind: GridEdgeKind,
    pub cost: f64,
    /// Hard block (obstacle, settled cell interior).
    pub closed: bool,
    /// Would cross a settled diagonal.
    pub blocked: bool,
    /// Number of combinatorial edges settled onto this edge.
    pub res_count: u8,
    /// The geometrically crossing diagonal, if any.
    pub crossing_partner: Option<GridEdgeIdx>,
    /// Sequence number of the settle, for stable render stacking.
    pub rndr_order: u32,
    /// Sinks only: traversable centre-out / centre-in.
    pub open_fr: bool,
    pub open_to: bool,
}

impl GridEdge {
    pub fn is_secondary(&self) -> bool {
        !matches!(self.kind, GridEdgeKind::Link { .. })
    }

    pub fn get_other_nd(&self, n: GridNodeIdx) -> GridNodeIdx {
        if self.from == n { self.to } else { self.from }
    }
}

/// The square-lattice embedding substrate: one centre plus eight port
/// nodes per cell, sink/bend/cross edges within a cell and link edges
/// between cells. All mutable routing state (open sinks, settles,
/// blocks, residents) lives here and is exactly reversible.
#[derive(Debug, Clone)]
pub struct GridGraph {
    pub cols: usize,
    pub rows: usize,
    pub cell_size: f64,
    pub border_rad: f64,
    origin: Coord<f64>,
    pub pens: Penalties,
    /// Cost factor of diagonal links relative to the cell size.
    pub diag_factor: f64,
    pub nodes: Vec<GridNode>,
    pub edges: Vec<GridEdge>,
    pub adj: Vec<Vec<GridEdgeIdx>>,
    centre_tree: RTree<GeomWithData<[f64; 2], usize>>,
    settled_nds: AHashMap<CombNodeIdx, GridNodeIdx>,
    grid_settled: AHashMap<GridNodeIdx, CombNodeIdx>,
    next_rndr: u32,
}

pub const SQRT2: f64 = std::f64::consts::SQRT_2;

impl GridGraph {
    pub fn new(bbox: Rect<f64>, cell_size: f64, border_rad: f64, pens: Penalties) -> Self {
        Self::with_diagonals(bbox, cell_size, border_rad, pens, SQRT2, true)
    }

    /// Shared constructor of both lattice variants. `exclude_crossings`
    /// links geometrically crossing diagonals for mutual exclusion.
    pub fn with_diagonals(
        bbox: Rect<f64>,
        cell_size: f64,
        border_rad: f64,
        pens: Penalties,
        diag_factor: f64,
        exclude_crossings: bool,
    ) -> Self {
        let cols = ((bbox.width() / cell_size).ceil() as usize).max(1) + 1;
        let rows = ((bbox.height() / cell_size).ceil() as usize).max(1) + 1;
        let origin = bbox.min();

        let mut gg = GridGraph {
            cols,
            rows,
            cell_size,
            border_rad,
            origin,
            pens,
            diag_factor,
            nodes: Vec::with_capacity(cols * rows * 9),
            edges: Vec::new(),
            adj: Vec::new(),
            centre_tree: RTree::new(),
            settled_nds: AHashMap::new(),
            grid_settled: AHashMap::new(),
            next_rndr: 0,
        };
        gg.init(exclude_crossings);
        gg
    }

    fn init(&mut self, exclude_crossings: bool) {
        let (cols, rows, s, r) = (self.cols, self.rows, self.cell_size, self.border_rad);

        let mut centre_entries = Vec::with_capacity(cols * rows);
        for cy in 0..rows {
            for cx in 0..cols {
                let centre = Coord {
                    x: self.origin.x + cx as f64 * s,
                    y: self.origin.y + cy as f64 * s,
                };
                let idx = self.nodes.len();
                self.nodes.push(GridNode {
                    cell: (cx, cy),
                    dir: None,
                    pos: centre,
                    closed: false,
                    traversed: 0,
                });
                centre_entries.push(GeomWithData::new([centre.x, centre.y], idx));
                for d in 0..8u8 {
                    let (dx, dy) = DIR_VECS[d as usize];
                    let norm = ((dx * dx + dy * dy) as f64).sqrt();
                    self.nodes.push(GridNode {
                        cell: (cx, cy),
                        dir: Some(d),
                        pos: Coord {
                            x: centre.x + dx as f64 / norm * r,
                            y: centre.y + dy as f64 / norm * r,
                        },
                        closed: false,
                        traversed: 0,
                    });
                }
            }
        }
        self.adj = vec![Vec::new(); self.nodes.len()];
        self.centre_tree = RTree::bulk_load(centre_entries);

        // intra-cell edges
        for cy in 0..rows {
            for cx in 0..cols {
                let centre = self.centre_idx((cx, cy));
                for d in 0..8u8 {
                    let port = self.port_idx((cx, cy), d);
                    self.push_edge(GridEdge {
                        from: port,
                        to: centre,
                        kind: GridEdgeKind::Sink,
                        cost: 0.0,
                        closed: true,
                        blocked: false,
                        res_count: 0,
                        crossing_partner: None,
                        rndr_order: 0,
                        open_fr: false,
                        open_to: false,
                    });
                }
                for a in 0..8u8 {
                    for b in (a + 1)..8u8 {
                        let k = geometry::port_dist(a, b);
                        let kind = if k == 4 {
                            GridEdgeKind::Cross
                        } else {
                            GridEdgeKind::Bend
                        };
                        self.push_edge(GridEdge {
                            from: self.port_idx((cx, cy), a),
                            to: self.port_idx((cx, cy), b),
                            kind,
                            cost: self.pens.bend_cost(k),
                            closed: false,
                            blocked: false,
                            res_count: 0,
                            crossing_partner: None,
                            rndr_order: 0,
                            open_fr: false,
                            open_to: false,
                        });
                    }
                }
            }
        }

        // link edges; directions 0..4 so each pair is built once
        let mut links: AHashMap<((usize, usize), u8), GridEdgeIdx> = AHashMap::new();
        for cy in 0..rows {
            for cx in 0..cols {
                for d in 0..4u8 {
                    let (dx, dy) = DIR_VECS[d as usize];
                    let nx = cx as i64 + dx;
                    let ny = cy as i64 + dy;
                    if nx < 0 || ny < 0 || nx as usize >= cols || ny as usize >= rows {
                        continue;
                    }
                    let ncell = (nx as usize, ny as usize);
                    // unit cell step, scaled by the Euclidean length of
                    // the step in cell units (1 cardinal, diagonal factor
                    // otherwise)
                    let factor = if d % 2 == 1 { self.diag_factor } else { 1.0 };
                    let idx = self.push_edge(GridEdge {
                        from: self.port_idx((cx, cy), d),
                        to: self.port_idx(ncell, (d + 4) % 8),
                        kind: GridEdgeKind::Link { dir: d },
                        cost: self.pens.hop_pen * factor,
                        closed: false,
                        blocked: false,
                        res_count: 0,
                        crossing_partner: None,
                        rndr_order: 0,
                        open_fr: false,
                        open_to: false,
                    });
                    links.insert(((cx, cy), d), idx);
                }
            }
        }

        if exclude_crossings {
            // the NE diagonal out of (cx, cy) crosses the SE diagonal out
            // of (cx, cy + 1)
            for (&((cx, cy), d), &e) in &links {
                if d != 1 {
                    continue;
                }
                if let Some(&partner) = links.get(&((cx, cy + 1), 3)) {
                    self.edges[e.0].crossing_partner = Some(partner);
                    self.edges[partner.0].crossing_partner = Some(e);
                }
            }
        }
    }

    fn push_edge(&mut self, e: GridEdge) -> GridEdgeIdx {
        let idx = GridEdgeIdx(self.edges.len());
        self.adj[e.from.0].push(idx);
        self.adj[e.to.0].push(idx);
        self.edges.push(e);
        idx
    }

    pub fn centre_idx(&self, cell: (usize, usize)) -> GridNodeIdx {
        GridNodeIdx((cell.1 * self.cols + cell.0) * 9)
    }

    pub fn port_idx(&self, cell: (usize, usize), d: u8) -> GridNodeIdx {
        GridNodeIdx((cell.1 * self.cols + cell.0) * 9 + 1 + d as usize)
    }

    /// The compass neighbour centre of `centre` at position 0..8; index 8
    /// is the centre itself (the "stay" move of the local search).
    pub fn neighbor(&self, centre: GridNodeIdx, pos: usize) -> Option<GridNodeIdx> {
        if pos == 8 {
            return Some(centre);
        }
        let (cx, cy) = self.nodes[centre.0].cell;
        let (dx, dy) = DIR_VECS[pos];
        let nx = cx as i64 + dx;
        let ny = cy as i64 + dy;
        if nx < 0 || ny < 0 || nx as usize >= self.cols || ny as usize >= self.rows {
            return None;
        }
        Some(self.centre_idx((nx as usize, ny as usize)))
    }

    /// Candidate centres within `max_dis` of a geographic point, excluding
    /// occupied and traversed cells. Sorted for determinism.
    pub fn get_gr_nd_cands(&self, pos: Coord<f64>, max_dis: f64) -> Vec<GridNodeIdx> {
        let mut ret: Vec<GridNodeIdx> = self
            .centre_tree
            .locate_within_distance([pos.x, pos.y], max_dis * max_dis)
            .map(|g| GridNodeIdx(g.data))
            .filter(|&n| !self.nodes[n.0].closed && self.nodes[n.0].traversed == 0)
            .collect();
        ret.sort();
        ret
    }

    fn sink_edges(&self, centre: GridNodeIdx) -> impl Iterator<Item = GridEdgeIdx> + '_ {
        self.adj[centre.0]
            .iter()
            .copied()
            .filter(|&e| self.edges[e.0].kind == GridEdgeKind::Sink)
    }

    /// Make `centre` reachable as a routing source, charging `extra` on
    /// its sinks. Must be paired with `close_sink_fr`.
    pub fn open_sink_fr(&mut self, centre: GridNodeIdx, extra: f64) {
        for e in self.sink_edges(centre).collect::<Vec<_>>() {
            self.edges[e.0].open_fr = true;
            self.edges[e.0].cost = extra;
        }
    }

    pub fn open_sink_to(&mut self, centre: GridNodeIdx, extra: f64) {
        for e in self.sink_edges(centre).collect::<Vec<_>>() {
            self.edges[e.0].open_to = true;
            self.edges[e.0].cost = extra;
        }
    }

    pub fn close_sink_fr(&mut self, centre: GridNodeIdx) {
        for e in self.sink_edges(centre).collect::<Vec<_>>() {
            self.edges[e.0].open_fr = false;
            self.edges[e.0].cost = 0.0;
        }
    }

    pub fn close_sink_to(&mut self, centre: GridNodeIdx) {
        for e in self.sink_edges(centre).collect::<Vec<_>>() {
            self.edges[e.0].open_to = false;
            self.edges[e.0].cost = 0.0;
        }
    }

    /// Add a per-port cost vector onto the sinks of `centre`.
    pub fn add_cost_vec(&mut self, centre: GridNodeIdx, c: NodeCost) {
        for e in self.sink_edges(centre).collect::<Vec<_>>() {
            let port = self.edges[e.0].from;
            let d = self.nodes[port.0].dir.expect("sink from-node is a port");
            self.edges[e.0].cost += c.0[d as usize];
        }
    }

    pub fn is_settled(&self, cn: CombNodeIdx) -> bool {
        self.settled_nds.contains_key(&cn)
    }

    pub fn get_settled(&self, cn: CombNodeIdx) -> Option<GridNodeIdx> {
        self.settled_nds.get(&cn).copied()
    }

    pub fn settled_comb_nd(&self, centre: GridNodeIdx) -> Option<CombNodeIdx> {
        self.grid_settled.get(&centre).copied()
    }

    /// Occupy `centre` with `cn`: excluded from candidate sets, and the
    /// cell interior is closed to pass-through routes. Idempotent for the
    /// same pairing; reversible via `unsettle_nd`.
    pub fn settle_nd(&mut self, centre: GridNodeIdx, cn: CombNodeIdx) {
        if self.settled_nds.get(&cn) == Some(&centre) {
            return;
        }
        self.settled_nds.insert(cn, centre);
        self.grid_settled.insert(centre, cn);
        self.nodes[centre.0].closed = true;
        for e in self.cell_pass_edges(centre) {
            self.edges[e.0].closed = true;
        }
    }

    pub fn unsettle_nd(&mut self, cn: CombNodeIdx) {
        let Some(centre) = self.settled_nds.remove(&cn) else {
            return;
        };
        self.grid_settled.remove(&centre);
        self.nodes[centre.0].closed = false;
        for e in self.cell_pass_edges(centre) {
            self.edges[e.0].closed = false;
        }
    }

    fn cell_pass_edges(&self, centre: GridNodeIdx) -> Vec<GridEdgeIdx> {
        let cell = self.nodes[centre.0].cell;
        let mut ret = Vec::new();
        for d in 0..8u8 {
            let port = self.port_idx(cell, d);
            for &e in &self.adj[port.0] {
                let kind = self.edges[e.0].kind;
                if (kind == GridEdgeKind::Bend || kind == GridEdgeKind::Cross)
                    && self.edges[e.0].from == port
                {
                    ret.push(e);
                }
            }
        }
        ret
    }

    /// Settle the link between two adjacent cell centres for a
    /// combinatorial edge, blocking the crossing diagonal, if any.
    pub fn settle_edg(&mut self, centre_a: GridNodeIdx, centre_b: GridNodeIdx, _e: CombEdgeIdx) {
        let Some(link) = self.link_between(centre_a, centre_b) else {
            return;
        };
        self.edges[link.0].res_count += 1;
        self.next_rndr += 1;
        self.edges[link.0].rndr_order = self.next_rndr;
        if let Some(p) = self.edges[link.0].crossing_partner {
            self.edges[p.0].blocked = true;
        }
    }

    pub fn unsettle_edg(&mut self, centre_a: GridNodeIdx, centre_b: GridNodeIdx) {
        let Some(link) = self.link_between(centre_a, centre_b) else {
            return;
        };
        self.edges[link.0].res_count = self.edges[link.0].res_count.saturating_sub(1);
        if self.edges[link.0].res_count == 0 {
            self.edges[link.0].rndr_order = 0;
        }
        if let Some(p) = self.edges[link.0].crossing_partner {
            self.edges[p.0].blocked = self.edges[link.0].res_count > 0;
        }
    }

    /// The link edge between two adjacent cell centres.
    pub fn link_between(&self, centre_a: GridNodeIdx, centre_b: GridNodeIdx) -> Option<GridEdgeIdx> {
        let (ax, ay) = self.nodes[centre_a.0].cell;
        let (bx, by) = self.nodes[centre_b.0].cell;
        let (dx, dy) = (bx as i64 - ax as i64, by as i64 - ay as i64);
        let d = DIR_VECS.iter().position(|&v| v == (dx, dy))? as u8;
        let port = self.port_idx((ax, ay), d);
        self.adj[port.0]
            .iter()
            .copied()
            .find(|&e| matches!(self.edges[e.0].kind, GridEdgeKind::Link { .. })
                && self.edges[e.0].get_other_nd(port) == self.port_idx((bx, by), (d + 4) % 8))
    }

    /// The centre of the cell a link edge enters, seen from `from_port`.
    pub fn link_far_centre(&self, e: GridEdgeIdx, from_port: GridNodeIdx) -> GridNodeIdx {
        let far = self.edges[e.0].get_other_nd(from_port);
        self.centre_idx(self.nodes[far.0].cell)
    }

    pub fn inc_traversed(&mut self, centre: GridNodeIdx) {
        self.nodes[centre.0].traversed += 1;
    }

    pub fn dec_traversed(&mut self, centre: GridNodeIdx) {
        self.nodes[centre.0].traversed = self.nodes[centre.0].traversed.saturating_sub(1);
    }

    /// Close every link edge whose course intersects the polygon.
    pub fn add_obstacle(&mut self, poly: &Polygon<f64>) {
        for i in 0..self.edges.len() {
            if !matches!(self.edges[i].kind, GridEdgeKind::Link { .. }) {
                continue;
            }
            let a = self.centre_pos_of(self.edges[i].from);
            let b = self.centre_pos_of(self.edges[i].to);
            if geometry::segment_intersects_polygon(a, b, poly) {
                self.edges[i].closed = true;
            }
        }
    }

    fn centre_pos_of(&self, port: GridNodeIdx) -> Coord<f64> {
        self.nodes[self.centre_idx(self.nodes[port.0].cell).0].pos
    }

    /// Displacement penalty for embedding a combinatorial node at `centre`.
    pub fn nd_move_pen(&self, geo_pos: Coord<f64>, centre: GridNodeIdx) -> f64 {
        self.pens.move_pen * geometry::dist(geo_pos, self.nodes[centre.0].pos) / self.cell_size
    }

    /// Octilinear lower-bound distance between two points, in link cost
    /// units (cell steps times `hop_pen`). Admissible against the link
    /// edge costs of this graph.
    pub fn octi_dist(&self, a: Coord<f64>, b: Coord<f64>) -> f64 {
        let dx = (b.x - a.x).abs() / self.cell_size;
        let dy = (b.y - a.y).abs() / self.cell_size;
        let (lo, hi) = if dx < dy { (dx, dy) } else { (dy, dx) };
        let diagonal = (hi - lo) + self.diag_factor.min(SQRT2) * lo;
        let cardinal = dx + dy;
        self.pens.hop_pen * diagonal.min(cardinal)
    }

    /// Admissible heuristic: distance to the nearest target centre.
    pub fn heur(&self, n: GridNodeIdx, target_pos: &[Coord<f64>]) -> f64 {
        target_pos
            .iter()
            .map(|&t| self.octi_dist(self.nodes[n.0].pos, t))
            .fold(f64::INFINITY, f64::min)
            .max(0.0)
    }

    /// Per-edge penalties biasing a route towards the geographic course of
    /// a combinatorial edge: `alpha * d(link midpoint, course)`.
    pub fn write_geo_course_pens(&self, course: &[Coord<f64>], alpha: f64) -> Vec<f64> {
        let mut pens = vec![0.0; self.edges.len()];
        for (i, e) in self.edges.iter().enumerate() {
            if !matches!(e.kind, GridEdgeKind::Link { .. }) {
                continue;
            }
            let a = self.nodes[e.from.0].pos;
            let b = self.nodes[e.to.0].pos;
            let mid = Coord {
                x: (a.x + b.x) / 2.0,
                y: (a.y + b.y) / 2.0,
            };
            if let Some((_, d, _)) = geometry::project_point_to_polyline(mid, course) {
                pens[i] = alpha * d;
            }
        }
        pens
    }

    // --- node cost penalties -----------------------------------------------

    /// Bend sharpness of each port against the preferred geographic
    /// bearing of `e` leaving `nd`.
    pub fn node_bend_pen(&self, cg: &CombGraph, nd: CombNodeIdx, e: CombEdgeIdx) -> NodeCost {
        let pref = cg.edge_bearing_at(nd, e);
        let mut c = NodeCost::default();
        for d in 0..8u8 {
            let diff = geometry::bearing_difference(geometry::dir_bearing(d), pref);
            c.0[d as usize] = self.pens.angle_cost(diff);
        }
        c
    }

    /// Infinite cost on ports that would break the clockwise edge
    /// ordering against the already-routed incident edges.
    pub fn topo_block_pen(
        &self,
        cg: &CombGraph,
        nd: CombNodeIdx,
        e: CombEdgeIdx,
        routed_ports: &[(CombEdgeIdx, u8)],
    ) -> NodeCost {
        let mut c = NodeCost::default();
        if routed_ports.is_empty() {
            return c;
        }
        let ord = &cg.nodes[nd.0].ordering;
        for d in 0..8u8 {
            let mut seq: Vec<(usize, u8)> = routed_ports
                .iter()
                .map(|&(f, p)| (ord.iter().position(|&x| x == f).unwrap_or(0), p))
                .collect();
            seq.push((ord.iter().position(|&x| x == e).unwrap_or(0), d));
            seq.sort();
            if !Self::circularly_consistent(&seq) {
                c.0[d as usize] = f64::INFINITY;
            }
        }
        c
    }

    /// Ports in comb-ordering order must be circularly increasing, with
    /// no port used twice.
    fn circularly_consistent(seq: &[(usize, u8)]) -> bool {
        let ports: Vec<u8> = seq.iter().map(|&(_, p)| p).collect();
        let mut uniq = ports.clone();
        uniq.sort_unstable();
        uniq.dedup();
        if uniq.len() != ports.len() {
            return false;
        }
        let descents = ports
            .iter()
            .zip(ports.iter().cycle().skip(1))
            .filter(|(a, b)| b < a)
            .count();
        descents <= 1
    }

    /// Soft preference for the evenly-spaced port inside the clockwise
    /// arc spanned by the routed neighbours of `e`. With fewer than two
    /// routed neighbours there is no arc to violate.
    pub fn spacing_pen(
        &self,
        cg: &CombGraph,
        nd: CombNodeIdx,
        e: CombEdgeIdx,
        routed_ports: &[(CombEdgeIdx, u8)],
    ) -> NodeCost {
        let mut c = NodeCost::default();
        if routed_ports.len() < 2 {
            return c;
        }
        // nearest routed neighbour before and after e in the ordering
        let mut pred: Option<(usize, u8)> = None;
        let mut succ: Option<(usize, u8)> = None;
        for &(f, p) in routed_ports {
            let before = cg.clockwise_dist(nd, f, e);
            let after = cg.clockwise_dist(nd, e, f);
            if pred.is_none_or(|(s, _)| before < s) {
                pred = Some((before, p));
            }
            if succ.is_none_or(|(s, _)| after < s) {
                succ = Some((after, p));
            }
        }
        let (steps_pred, port_pred) = pred.expect("two routed neighbours");
        let (steps_succ, port_succ) = succ.expect("two routed neighbours");
        let mut arc = (port_succ as usize + 8 - port_pred as usize) % 8;
        if arc == 0 {
            arc = 8;
        }
        let frac = steps_pred as f64 / (steps_pred + steps_succ).max(1) as f64;
        let ideal = ((port_pred as usize + (arc as f64 * frac).round() as usize) % 8) as u8;
        for d in 0..8u8 {
            c.0[d as usize] = 0.5 * self.pens.p_45 * geometry::port_dist(d, ideal) as f64;
        }
        c
    }

    /// Snapshot of the mutable routing state, for exact-reversal checks.
    pub fn state_signature(&self) -> Vec<u64> {
        let mut sig = Vec::with_capacity(self.edges.len() + self.nodes.len());
        for e in &self.edges {
            let mut h = e.cost.to_bits();
            h ^= (e.closed as u64) << 1
                | (e.blocked as u64) << 2
                | (e.res_count as u64) << 3
                | (e.open_fr as u64) << 11
                | (e.open_to as u64) << 12;
            sig.push(h);
        }
        for n in &self.nodes {
            sig.push((n.closed as u64) | (n.traversed as u64) << 1);
        }
        sig
    }
}
